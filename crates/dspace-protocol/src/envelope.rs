// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::RequestContext;
use crate::error::{StorError, WireError};

/// Version spoken by this build. Peers must agree on the major part.
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// JSON-encoded [`RequestContext`].
    pub context: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub version: String,
}

impl RpcRequest {
    pub fn new(
        ctx: &RequestContext,
        method: impl Into<String>,
        kwargs: Map<String, Value>,
    ) -> Result<Self, StorError> {
        Ok(Self {
            context: ctx.to_json()?,
            method: method.into(),
            args: Vec::new(),
            kwargs,
            version: PROTOCOL_VERSION.to_string(),
        })
    }

    /// Build the kwargs map from any serializable struct.
    pub fn with_params<P: Serialize>(
        ctx: &RequestContext,
        method: impl Into<String>,
        params: &P,
    ) -> Result<Self, StorError> {
        let kwargs = match serde_json::to_value(params)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(StorError::serialization(format!(
                    "call parameters must be an object, got {other}"
                )));
            }
        };
        Self::new(ctx, method, kwargs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RpcResponse {
    Ok { result: Value },
    Err { error: WireError },
}

impl RpcResponse {
    pub fn from_result(result: Result<Value, StorError>) -> Self {
        match result {
            Ok(result) => RpcResponse::Ok { result },
            Err(err) => RpcResponse::Err {
                error: WireError::from(&err),
            },
        }
    }

    pub fn into_result(self) -> Result<Value, StorError> {
        match self {
            RpcResponse::Ok { result } => Ok(result),
            RpcResponse::Err { error } => Err(StorError::from(error)),
        }
    }
}

/// Major part of a `major.minor` version string.
pub fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}
