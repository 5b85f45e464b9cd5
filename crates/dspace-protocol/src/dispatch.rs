// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Method registration table.
//!
//! Every server builds one [`Dispatcher`] at start-up and registers each
//! method with the names of its parameters. Incoming positional arguments
//! are folded into the keyword map by those names before the typed request
//! is deserialized.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::envelope::{PROTOCOL_VERSION, RpcRequest, RpcResponse, major_version};
use crate::error::StorError;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type HandlerFn =
    Arc<dyn Fn(RequestContext, Map<String, Value>) -> BoxFuture<Result<Value, StorError>> + Send + Sync>;

/// Request type for methods without parameters.
#[derive(Debug, Default, Clone, serde::Deserialize, Serialize)]
pub struct NoArgs {}

struct Entry {
    params: &'static [&'static str],
    handler: HandlerFn,
}

#[derive(Default)]
pub struct Dispatcher {
    methods: HashMap<String, Entry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a keyword-only method.
    pub fn register<Req, Resp, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, StorError>> + Send + 'static,
    {
        self.register_with_params(name, &[], f)
    }

    /// Register a method that also accepts positional arguments named `params`.
    pub fn register_with_params<Req, Resp, F, Fut>(
        &mut self,
        name: &str,
        params: &'static [&'static str],
        f: F,
    ) -> &mut Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, StorError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler: HandlerFn = Arc::new(move |ctx, kwargs| {
            let f = f.clone();
            Box::pin(async move {
                let req: Req = serde_json::from_value(Value::Object(kwargs))
                    .map_err(|e| StorError::invalid(e.to_string()))?;
                let resp = f(ctx, req).await?;
                Ok(serde_json::to_value(resp)?)
            })
        });
        if self
            .methods
            .insert(name.to_string(), Entry { params, handler })
            .is_some()
        {
            warn!(method = name, "method registered twice, keeping the latest");
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run one request to completion.
    pub async fn call(&self, request: RpcRequest) -> Result<Value, StorError> {
        if major_version(&request.version) != major_version(PROTOCOL_VERSION) {
            return Err(StorError::VersionMismatch {
                server: PROTOCOL_VERSION.to_string(),
                client: request.version,
            });
        }
        let ctx = RequestContext::from_json(&request.context)?;
        let entry = self
            .methods
            .get(&request.method)
            .ok_or_else(|| StorError::NoSuchMethod {
                method: request.method.clone(),
            })?;

        let kwargs = fold_args(&request.method, entry.params, request.args, request.kwargs)?;
        debug!(method = %request.method, request_id = %ctx.request_id, "dispatching");
        (entry.handler)(ctx, kwargs).await
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        RpcResponse::from_result(self.call(request).await)
    }
}

fn fold_args(
    method: &str,
    params: &[&str],
    args: Vec<Value>,
    mut kwargs: Map<String, Value>,
) -> Result<Map<String, Value>, StorError> {
    if args.len() > params.len() {
        return Err(StorError::invalid(format!(
            "{method} takes {} positional arguments, got {}",
            params.len(),
            args.len()
        )));
    }
    for (name, value) in params.iter().zip(args) {
        if kwargs.contains_key(*name) {
            return Err(StorError::invalid(format!(
                "{method} got multiple values for {name}"
            )));
        }
        kwargs.insert((*name).to_string(), value);
    }
    Ok(kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.register_with_params("add", &["a", "b"], |_ctx, req: Add| async move {
            Ok::<_, StorError>(req.a + req.b)
        });
        d.register("whoami", |ctx: RequestContext, _: NoArgs| async move {
            Ok::<_, StorError>(ctx.cluster_id)
        });
        d
    }

    fn request(method: &str, args: Vec<Value>, kwargs: Value) -> RpcRequest {
        let mut req = RpcRequest::new(
            &RequestContext::admin("c9"),
            method,
            kwargs.as_object().cloned().unwrap_or_default(),
        )
        .unwrap();
        req.args = args;
        req
    }

    #[tokio::test]
    async fn test_keyword_call() {
        let d = dispatcher();
        let out = d.call(request("add", vec![], json!({"a": 2, "b": 3}))).await;
        assert_eq!(out.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_positional_args_fold_into_kwargs() {
        let d = dispatcher();
        let out = d.call(request("add", vec![json!(4)], json!({"b": 1}))).await;
        assert_eq!(out.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_duplicate_argument_rejected() {
        let d = dispatcher();
        let out = d.call(request("add", vec![json!(4)], json!({"a": 1, "b": 1}))).await;
        assert!(matches!(out, Err(StorError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher();
        let out = d.call(request("nope", vec![], json!({}))).await;
        assert_eq!(
            out.unwrap_err(),
            StorError::NoSuchMethod {
                method: "nope".into()
            }
        );
    }

    #[tokio::test]
    async fn test_context_reaches_handler() {
        let d = dispatcher();
        let out = d.call(request("whoami", vec![], json!({}))).await;
        assert_eq!(out.unwrap(), json!("c9"));
    }

    #[tokio::test]
    async fn test_major_version_mismatch() {
        let d = dispatcher();
        let mut req = request("whoami", vec![], json!({}));
        req.version = "2.0".into();
        assert!(matches!(
            d.call(req).await,
            Err(StorError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_minor_version_tolerated() {
        let d = dispatcher();
        let mut req = request("whoami", vec![], json!({}));
        req.version = "1.7".into();
        assert!(d.call(req).await.is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_wraps_errors() {
        let d = dispatcher();
        match d.dispatch(request("add", vec![], json!({"a": 1}))).await {
            RpcResponse::Err { error } => assert_eq!(error.class, "InvalidInput"),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_method_names_sorted() {
        assert_eq!(dispatcher().method_names(), vec!["add", "whoami"]);
    }
}
