// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Best-effort fan-out of UI events to the websocket service of admin nodes.
//!
//! An event goes to the admin that received the originating request when
//! the context names one (`ws_ip`), otherwise to every admin node of the
//! cluster. Delivery failures are logged and dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dspace_protocol::{RequestContext, RpcClient, RpcClientConfig, tag};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::registry::AgentRegistry;
use crate::store::{Record, Resource};

/// Keyword arguments of the websocket service's `send_message` method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
    pub obj: Value,
    pub op_type: String,
    pub msg: String,
    #[serde(default)]
    pub resource_type: Option<String>,
}

impl SendMessage {
    pub fn new(op_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            obj: Value::Null,
            op_type: op_type.into(),
            msg: msg.into(),
            resource_type: None,
        }
    }

    /// Attach a tagged resource as the event payload.
    pub fn about<T: Resource>(mut self, record: &Record<T>) -> Self {
        match tag(record) {
            Ok(obj) => self.obj = obj,
            Err(e) => warn!(kind = T::KIND, error = %e, "event payload dropped"),
        }
        self.resource_type = Some(T::KIND.to_string());
        self
    }

    pub fn resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }
}

/// Upper snake case `<RESOURCE>_<OUTCOME>` operation type.
pub fn op_type(resource: &str, outcome: &str) -> String {
    format!("{resource}_{outcome}").to_uppercase()
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ctx: &RequestContext, message: SendMessage);
}

/// Delivers events to admin websocket services over QUIC.
pub struct WebSocketClientManager {
    registry: Arc<AgentRegistry>,
    call_timeout: Duration,
    clients: Mutex<HashMap<SocketAddr, Arc<RpcClient>>>,
}

impl WebSocketClientManager {
    pub fn new(registry: Arc<AgentRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, addr: SocketAddr) -> Option<Arc<RpcClient>> {
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(client) = clients.get(&addr) {
            return Some(client.clone());
        }
        let mut config = RpcClientConfig::for_peer(addr);
        config.default_call_timeout_ms = self.call_timeout.as_millis() as u64;
        match RpcClient::new(config) {
            Ok(client) => {
                let client = Arc::new(client);
                clients.insert(addr, client.clone());
                Some(client)
            }
            Err(e) => {
                warn!(%addr, error = %e, "websocket client unavailable");
                None
            }
        }
    }

    async fn targets(&self, ctx: &RequestContext) -> Vec<SocketAddr> {
        if let Some(ws_ip) = &ctx.ws_ip {
            return match self.registry.websocket_addr(ws_ip) {
                Ok(addr) => vec![addr],
                Err(e) => {
                    warn!(ws_ip, error = %e, "bad websocket address");
                    Vec::new()
                }
            };
        }
        self.registry
            .websocket_endpoints(&ctx.cluster_id)
            .await
            .unwrap_or_else(|e| {
                warn!(cluster_id = %ctx.cluster_id, error = %e, "websocket endpoints unavailable");
                Vec::new()
            })
    }
}

#[async_trait]
impl Notifier for WebSocketClientManager {
    async fn send(&self, ctx: &RequestContext, message: SendMessage) {
        for addr in self.targets(ctx).await {
            if let Some(client) = self.client(addr) {
                debug!(%addr, op_type = %message.op_type, "sending event");
                client.cast(ctx, "send_message", &message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cluster, ClusterStatus};
    use chrono::Utc;

    #[test]
    fn test_op_type_is_upper_snake() {
        assert_eq!(op_type("osd", "create_success"), "OSD_CREATE_SUCCESS");
        assert_eq!(op_type("pool", "decrease_disk_error"), "POOL_DECREASE_DISK_ERROR");
    }

    #[test]
    fn test_message_carries_tagged_resource() {
        let record = Record {
            id: 1,
            cluster_id: "c1".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
            deleted_at: None,
            inner: Cluster {
                display_name: "first".into(),
                status: ClusterStatus::Active,
            },
        };
        let msg = SendMessage::new("CLUSTER_UPDATE", "updated").about(&record);
        assert_eq!(msg.resource_type.as_deref(), Some("cluster"));
        assert_eq!(msg.obj["__class"], "cluster");
        assert_eq!(msg.obj["data"]["display_name"], "first");
    }
}
