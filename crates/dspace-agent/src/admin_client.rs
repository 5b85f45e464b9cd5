// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The admin methods an agent calls.
//!
//! Agents pass their arguments positionally, in the order the admin
//! declares them, so an older admin that only knows the positional form
//! keeps working.

use std::sync::Arc;

use async_trait::async_trait;
use dspace_protocol::api::{DiskInfo, NodeServiceManifest, ServiceUpdate};
use dspace_protocol::{CallTimeout, RequestContext, Result, RpcClient, RpcRequest};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// Service name agents register their endpoint under.
pub const AGENT_SERVICE: &str = "agent";

#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Full inventory push; the admin answers with a fold summary.
    async fn disk_reporter(&self, ctx: &RequestContext, disks: &[DiskInfo], node_id: i64) -> Result<Value>;
    async fn disk_online(&self, ctx: &RequestContext, info: &DiskInfo, node_id: i64) -> Result<()>;
    async fn disk_offline(&self, ctx: &RequestContext, name: &str, node_id: i64) -> Result<()>;
    async fn service_update(&self, ctx: &RequestContext, services: &ServiceUpdate, node_id: i64) -> Result<()>;
    async fn node_services_manifest(&self, ctx: &RequestContext, node_id: i64) -> Result<NodeServiceManifest>;
    async fn rpc_service_register(
        &self,
        ctx: &RequestContext,
        service: &str,
        node_id: i64,
        ip: &str,
        port: u16,
    ) -> Result<()>;
}

/// [`AdminApi`] over a QUIC [`RpcClient`].
pub struct RpcAdminClient {
    client: Arc<RpcClient>,
}

impl RpcAdminClient {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    async fn positional<T: DeserializeOwned>(&self, ctx: &RequestContext, method: &str, args: Vec<Value>) -> Result<T> {
        let mut request = RpcRequest::new(ctx, method, Default::default())?;
        request.args = args;
        let value = self.client.call_raw(request, CallTimeout::Default).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl AdminApi for RpcAdminClient {
    async fn disk_reporter(&self, ctx: &RequestContext, disks: &[DiskInfo], node_id: i64) -> Result<Value> {
        self.positional(ctx, "disk_reporter", vec![json!(disks), json!(node_id)])
            .await
    }

    async fn disk_online(&self, ctx: &RequestContext, info: &DiskInfo, node_id: i64) -> Result<()> {
        let _: Value = self
            .positional(ctx, "disk_online", vec![json!(info), json!(node_id)])
            .await?;
        Ok(())
    }

    async fn disk_offline(&self, ctx: &RequestContext, name: &str, node_id: i64) -> Result<()> {
        let _: Value = self
            .positional(ctx, "disk_offline", vec![json!(name), json!(node_id)])
            .await?;
        Ok(())
    }

    async fn service_update(&self, ctx: &RequestContext, services: &ServiceUpdate, node_id: i64) -> Result<()> {
        let _: Value = self
            .positional(ctx, "service_update", vec![json!(services), json!(node_id)])
            .await?;
        Ok(())
    }

    async fn node_services_manifest(&self, ctx: &RequestContext, node_id: i64) -> Result<NodeServiceManifest> {
        self.positional(ctx, "node_services_manifest", vec![json!(node_id)])
            .await
    }

    async fn rpc_service_register(
        &self,
        ctx: &RequestContext,
        service: &str,
        node_id: i64,
        ip: &str,
        port: u16,
    ) -> Result<()> {
        let _: Value = self
            .positional(
                ctx,
                "rpc_service_register",
                vec![json!(service), json!(node_id), json!(ip), json!(port)],
            )
            .await?;
        Ok(())
    }
}
