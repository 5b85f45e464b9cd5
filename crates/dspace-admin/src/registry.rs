// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Endpoint registry for agents and peer admin services.
//!
//! Endpoints are cached by `(cluster_id, service_name, node_id)` and loaded
//! from `RpcService` rows on a miss. A connect failure evicts the entry so
//! the next lookup re-reads the store.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dspace_protocol::{RequestContext, Result, RpcClient, RpcClientConfig, StorError};
use tracing::{debug, info, warn};

use crate::agent_client::{AgentApi, RpcAgentClient};
use crate::models::{Node, RpcService};
use crate::store::{Filter, Store};

pub const AGENT_SERVICE: &str = "agent";
pub const WEBSOCKET_SERVICE: &str = "websocket";
pub const ADMIN_SERVICE: &str = "admin";

/// Opens connections to peers.
pub trait Dialer: Send + Sync {
    fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn AgentApi>>;
}

/// Dials agents over QUIC.
pub struct QuicDialer {
    call_timeout: Duration,
}

impl QuicDialer {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }
}

impl Dialer for QuicDialer {
    fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn AgentApi>> {
        let mut config = RpcClientConfig::for_peer(addr);
        config.default_call_timeout_ms = self.call_timeout.as_millis() as u64;
        let client = RpcClient::new(config)?;
        Ok(Arc::new(RpcAgentClient::new(Arc::new(client))))
    }
}

type EndpointKey = (String, String, i64);

pub struct AgentRegistry {
    store: Arc<dyn Store>,
    dialer: Arc<dyn Dialer>,
    agent_port: u16,
    websocket_port: u16,
    endpoints: Mutex<HashMap<EndpointKey, SocketAddr>>,
    agents: Mutex<HashMap<SocketAddr, Arc<dyn AgentApi>>>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn socket_addr(ip: &str, port: u16) -> Result<SocketAddr> {
    format!("{ip}:{port}")
        .parse()
        .map_err(|_| StorError::invalid(format!("bad endpoint {ip}:{port}")))
}

/// Errors after which a cached connection is not worth keeping.
fn is_connection_error(err: &StorError) -> bool {
    matches!(
        err,
        StorError::ConnectTimeout { .. } | StorError::RpcTransport { .. } | StorError::EndpointNotFound { .. }
    )
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn Store>, dialer: Arc<dyn Dialer>, agent_port: u16, websocket_port: u16) -> Self {
        Self {
            store,
            dialer,
            agent_port,
            websocket_port,
            endpoints: Mutex::new(HashMap::new()),
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Upsert the endpoint row of `service` on `node_id`.
    pub async fn register(&self, cluster_id: &str, service: &str, node_id: i64, ip: &str, port: u16) -> Result<()> {
        let ctx = RequestContext::admin(cluster_id);
        let existing = self
            .store
            .first::<RpcService>(
                &ctx,
                &[Filter::eq("service_name", service), Filter::eq("node_id", node_id)],
            )
            .await?;
        match existing {
            Some(row) => {
                self.store
                    .patch::<RpcService>(row.id, serde_json::json!({"ip": ip, "port": port}))
                    .await?;
            }
            None => {
                self.store
                    .create(
                        cluster_id,
                        &RpcService {
                            service_name: service.to_string(),
                            node_id,
                            ip: ip.to_string(),
                            port,
                        },
                    )
                    .await?;
            }
        }
        self.evict(cluster_id, service, node_id);
        info!(cluster_id, service, node_id, ip, port, "endpoint registered");
        Ok(())
    }

    async fn reload(&self, cluster_id: &str) -> Result<()> {
        let rows = self
            .store
            .all::<RpcService>(&RequestContext::admin(cluster_id), &[])
            .await?;
        let mut endpoints = guard(&self.endpoints);
        for row in rows {
            match socket_addr(&row.ip, row.port) {
                Ok(addr) => {
                    endpoints.insert((cluster_id.to_string(), row.service_name.clone(), row.node_id), addr);
                }
                Err(e) => warn!(service = %row.service_name, node_id = row.node_id, error = %e, "skipping endpoint"),
            }
        }
        debug!(cluster_id, count = endpoints.len(), "endpoints reloaded");
        Ok(())
    }

    fn default_port(&self, service: &str) -> Option<u16> {
        match service {
            AGENT_SERVICE => Some(self.agent_port),
            WEBSOCKET_SERVICE => Some(self.websocket_port),
            _ => None,
        }
    }

    pub async fn endpoint(&self, cluster_id: &str, service: &str, node_id: i64) -> Result<SocketAddr> {
        let key = (cluster_id.to_string(), service.to_string(), node_id);
        if let Some(addr) = guard(&self.endpoints).get(&key) {
            return Ok(*addr);
        }
        self.reload(cluster_id).await?;
        if let Some(addr) = guard(&self.endpoints).get(&key) {
            return Ok(*addr);
        }

        let not_found = || StorError::EndpointNotFound {
            service: service.to_string(),
            node_id,
        };
        let port = self.default_port(service).ok_or_else(not_found)?;
        let node = self.store.find::<Node>(node_id).await?.ok_or_else(not_found)?;
        let addr = socket_addr(&node.ip_address, port)?;
        guard(&self.endpoints).insert(key, addr);
        Ok(addr)
    }

    /// Client of the agent on `node_id`.
    pub async fn agent(&self, ctx: &RequestContext, node_id: i64) -> Result<Arc<dyn AgentApi>> {
        let addr = self.endpoint(&ctx.cluster_id, AGENT_SERVICE, node_id).await?;
        if let Some(agent) = guard(&self.agents).get(&addr) {
            return Ok(agent.clone());
        }
        let agent = self.dialer.dial(addr)?;
        guard(&self.agents).insert(addr, agent.clone());
        Ok(agent)
    }

    /// Run `f` against the agent on `node_id`, evicting it on connection errors.
    pub async fn with_agent<T, F, Fut>(&self, ctx: &RequestContext, node_id: i64, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn AgentApi>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let result = match self.agent(ctx, node_id).await {
            Ok(agent) => f(agent).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result
            && is_connection_error(e)
        {
            warn!(node_id, error = %e, "dropping agent endpoint");
            self.evict(&ctx.cluster_id, AGENT_SERVICE, node_id);
        }
        result
    }

    pub fn evict(&self, cluster_id: &str, service: &str, node_id: i64) {
        let key = (cluster_id.to_string(), service.to_string(), node_id);
        if let Some(addr) = guard(&self.endpoints).remove(&key) {
            guard(&self.agents).remove(&addr);
        }
    }

    /// Websocket notifier endpoints of every admin node in the cluster.
    pub async fn websocket_endpoints(&self, cluster_id: &str) -> Result<Vec<SocketAddr>> {
        let admins = self
            .store
            .all::<Node>(&RequestContext::admin(cluster_id), &[Filter::eq("role_admin", true)])
            .await?;
        let mut out = Vec::with_capacity(admins.len());
        for node in admins {
            match self.endpoint(cluster_id, WEBSOCKET_SERVICE, node.id).await {
                Ok(addr) => out.push(addr),
                Err(e) => warn!(node_id = node.id, error = %e, "no websocket endpoint"),
            }
        }
        Ok(out)
    }

    /// Parse a websocket address from a context, defaulting the port.
    pub fn websocket_addr(&self, ws_ip: &str) -> Result<SocketAddr> {
        ws_ip
            .parse()
            .or_else(|_| socket_addr(ws_ip, self.websocket_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeAgent, FakeDialer};
    use crate::models::NodeStatus;
    use crate::store::SqliteStore;

    fn node(ip: &str, admin: bool) -> Node {
        Node {
            hostname: format!("host-{ip}"),
            ip_address: ip.to_string(),
            cluster_ip: ip.to_string(),
            public_ip: ip.to_string(),
            gateway_ip: None,
            password: None,
            ssh_user: "root".into(),
            ssh_port: 22,
            role_monitor: false,
            role_storage: true,
            role_admin: admin,
            role_object_gateway: false,
            role_block_gateway: false,
            rack_id: None,
            datacenter_id: None,
            object_gateway_ip_address: None,
            status: NodeStatus::Active,
        }
    }

    async fn setup() -> (Arc<dyn Store>, Arc<FakeDialer>, AgentRegistry) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let dialer = Arc::new(FakeDialer::new(Arc::new(FakeAgent::new())));
        let registry = AgentRegistry::new(store.clone(), dialer.clone(), 2082, 2083);
        (store, dialer, registry)
    }

    #[tokio::test]
    async fn test_agent_falls_back_to_node_address() {
        let (store, _, registry) = setup().await;
        let n = store.create("c1", &node("10.0.0.1", false)).await.unwrap();
        let addr = registry.endpoint("c1", AGENT_SERVICE, n.id).await.unwrap();
        assert_eq!(addr, "10.0.0.1:2082".parse().unwrap());

        let err = registry.endpoint("c1", "prometheus", n.id).await.unwrap_err();
        assert!(matches!(err, StorError::EndpointNotFound { .. }));
    }

    #[tokio::test]
    async fn test_registered_row_wins_and_eviction_rereads() {
        let (store, dialer, registry) = setup().await;
        let n = store.create("c1", &node("10.0.0.1", false)).await.unwrap();
        registry.register("c1", AGENT_SERVICE, n.id, "10.9.9.9", 4000).await.unwrap();

        let ctx = RequestContext::admin("c1");
        registry.agent(&ctx, n.id).await.unwrap();
        registry.agent(&ctx, n.id).await.unwrap();
        assert_eq!(dialer.dialed(), vec!["10.9.9.9:4000".parse().unwrap()]);

        registry.register("c1", AGENT_SERVICE, n.id, "10.9.9.8", 4000).await.unwrap();
        registry.agent(&ctx, n.id).await.unwrap();
        assert_eq!(dialer.dialed().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_error_evicts() {
        let (store, dialer, registry) = setup().await;
        let n = store.create("c1", &node("10.0.0.1", false)).await.unwrap();
        let ctx = RequestContext::admin("c1");
        let err = registry
            .with_agent(&ctx, n.id, |_agent| async {
                Err::<(), _>(StorError::ConnectTimeout { addr: "10.0.0.1:2082".into() })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorError::ConnectTimeout { .. }));
        registry.agent(&ctx, n.id).await.unwrap();
        assert_eq!(dialer.dialed().len(), 2);
    }

    #[tokio::test]
    async fn test_websocket_endpoints_cover_admin_nodes() {
        let (store, _, registry) = setup().await;
        store.create("c1", &node("10.0.0.1", true)).await.unwrap();
        store.create("c1", &node("10.0.0.2", false)).await.unwrap();
        let admin2 = store.create("c1", &node("10.0.0.3", true)).await.unwrap();
        registry.register("c1", WEBSOCKET_SERVICE, admin2.id, "10.0.0.3", 9000).await.unwrap();

        let mut eps = registry.websocket_endpoints("c1").await.unwrap();
        eps.sort();
        assert_eq!(
            eps,
            vec!["10.0.0.1:2083".parse().unwrap(), "10.0.0.3:9000".parse().unwrap()]
        );
        assert_eq!(registry.websocket_addr("10.0.0.7").unwrap(), "10.0.0.7:2083".parse().unwrap());
    }
}
