// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable admin runtime.
//!
//! [`AdminRuntime`] wires the store, tools and background loops together,
//! serves the admin method table over QUIC and runs the websocket hub. Every
//! seam can be replaced through the builder, which is how the integration
//! tests run the whole control plane against fakes.
//!
//! # Example
//!
//! ```rust,ignore
//! use dspace_admin::{AdminRuntime, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AdminRuntime::builder(Config::from_env()?).start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dspace_protocol::{ANY_CLUSTER, Dispatcher, RequestContext, RpcServer};
use dspace_tools::{CephCli, CephTool, LocalExecutor, MetricSource, PrometheusSource};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::alert::{AlertLogCleaner, seed_default_rules};
use crate::config::Config;
use crate::handlers::AdminState;
use crate::models::{Cluster, Node};
use crate::notify::{Notifier, WebSocketClientManager};
use crate::registry::{ADMIN_SERVICE, AgentRegistry, Dialer, QuicDialer, WEBSOCKET_SERVICE};
use crate::server::admin_dispatcher;
use crate::store::{SqliteStore, Store};
use crate::supervisor::{NodeRestarter, Restarter};
use crate::websocket::WebSocketHub;

const SSH_TIMEOUT: Duration = Duration::from_secs(30);
const WS_BACKLOG: usize = 1024;

/// Builder for an [`AdminRuntime`]; unset seams get their production implementation.
pub struct AdminRuntimeBuilder {
    config: Config,
    store: Option<Arc<dyn Store>>,
    ceph: Option<Arc<dyn CephTool>>,
    metrics: Option<Arc<dyn MetricSource>>,
    dialer: Option<Arc<dyn Dialer>>,
    notifier: Option<Arc<dyn Notifier>>,
    restarter: Option<Arc<dyn Restarter>>,
    serve_rpc: bool,
}

impl std::fmt::Debug for AdminRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminRuntimeBuilder")
            .field("admin_addr", &self.config.admin_addr)
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("serve_rpc", &self.serve_rpc)
            .finish()
    }
}

impl AdminRuntimeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            ceph: None,
            metrics: None,
            dialer: None,
            notifier: None,
            restarter: None,
            serve_rpc: true,
        }
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ceph(mut self, ceph: Arc<dyn CephTool>) -> Self {
        self.ceph = Some(ceph);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricSource>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn restarter(mut self, restarter: Arc<dyn Restarter>) -> Self {
        self.restarter = Some(restarter);
        self
    }

    /// Skip the QUIC and websocket listeners; the dispatcher is still built.
    ///
    /// Default: serve
    pub fn without_listeners(mut self) -> Self {
        self.serve_rpc = false;
        self
    }

    /// Resolve every seam and build the shared state without starting anything.
    pub async fn build(self) -> Result<Arc<AdminState>> {
        let config = self.config;
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::connect(&config.database_url).await?) as Arc<dyn Store>,
        };
        let ceph = match self.ceph {
            Some(ceph) => ceph,
            None => Arc::new(CephCli::new(Arc::new(LocalExecutor::default()))) as Arc<dyn CephTool>,
        };
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(PrometheusSource::new(config.prometheus_url.clone())?) as Arc<dyn MetricSource>,
        };
        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(QuicDialer::new(config.rpc_timeout)));
        let registry = Arc::new(AgentRegistry::new(
            store.clone(),
            dialer,
            config.agent_port,
            config.websocket_rpc_addr.port(),
        ));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(WebSocketClientManager::new(registry.clone(), config.rpc_timeout)));
        let restarter = self
            .restarter
            .unwrap_or_else(|| Arc::new(NodeRestarter::new(store.clone(), registry.clone(), SSH_TIMEOUT)));

        let state = AdminState::new(config, store, ceph, metrics, registry, notifier, restarter)?;
        Ok(Arc::new(state))
    }

    /// Build and start every loop and listener.
    pub async fn start(self) -> Result<AdminRuntime> {
        let serve = self.serve_rpc;
        let state = self.build().await?;
        AdminRuntime::start(state, serve).await
    }
}

/// A running admin control plane.
pub struct AdminRuntime {
    state: Arc<AdminState>,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<WebSocketHub>,
    shutdown_tx: watch::Sender<bool>,
    stops: Vec<Arc<Notify>>,
    servers: Vec<Arc<RpcServer>>,
    handles: Vec<JoinHandle<()>>,
}

impl AdminRuntime {
    pub fn builder(config: Config) -> AdminRuntimeBuilder {
        AdminRuntimeBuilder::new(config)
    }

    async fn start(state: Arc<AdminState>, serve: bool) -> Result<Self> {
        prepare_clusters(&state).await?;
        let agents = state.supervisor.load().await?;

        let dispatcher = Arc::new(admin_dispatcher(state.clone()));
        let hub = WebSocketHub::new(WS_BACKLOG);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut runtime = Self {
            state: state.clone(),
            dispatcher,
            hub,
            shutdown_tx,
            stops: Vec::new(),
            servers: Vec::new(),
            handles: Vec::new(),
        };

        if state.config.heartbeat_check {
            let supervisor = state.supervisor.clone();
            runtime.stops.push(supervisor.shutdown_handle());
            runtime.handles.push(tokio::spawn(supervisor.run()));
        } else {
            info!("heartbeat check disabled, supervisor not started");
        }

        let health = state.health.clone();
        runtime.stops.push(health.shutdown_handle());
        runtime.handles.push(tokio::spawn(async move { health.run().await }));

        let cleaner = AlertLogCleaner::new(state.store.clone(), state.config.alert_log_retention_days);
        runtime.stops.push(cleaner.shutdown_handle());
        runtime.handles.push(tokio::spawn(async move { cleaner.run().await }));

        if serve {
            runtime.listen(shutdown_rx).await?;
        }

        info!(
            admin_addr = %state.config.admin_addr,
            agents,
            listening = serve,
            "admin runtime started"
        );
        Ok(runtime)
    }

    async fn listen(&mut self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let config = &self.state.config;

        let admin = Arc::new(RpcServer::self_signed(config.admin_addr)?);
        let dispatcher = self.dispatcher.clone();
        let server = admin.clone();
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = server.serve(dispatcher).await {
                error!(error = %e, "admin RPC server stopped");
            }
        }));
        self.servers.push(admin);

        let mut internal = Dispatcher::new();
        self.hub.register(&mut internal);
        let internal = Arc::new(internal);
        let ws_rpc = Arc::new(RpcServer::self_signed(config.websocket_rpc_addr)?);
        let server = ws_rpc.clone();
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = server.serve(internal).await {
                error!(error = %e, "websocket RPC server stopped");
            }
        }));
        self.servers.push(ws_rpc);

        let hub = self.hub.clone();
        let ws_addr = config.websocket_addr;
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = hub.serve(ws_addr, shutdown_rx).await {
                error!(error = %e, "websocket service stopped");
            }
        }));

        self.advertise().await;
        Ok(())
    }

    /// Publish this node's admin and websocket endpoints.
    async fn advertise(&self) {
        let config = &self.state.config;
        let node = match self.state.store.find::<Node>(config.node_id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                warn!(node_id = config.node_id, "own node row missing, endpoints not advertised");
                return;
            }
            Err(e) => {
                warn!(error = %e, "own node lookup failed");
                return;
            }
        };
        for (service, port) in [
            (ADMIN_SERVICE, config.admin_addr.port()),
            (WEBSOCKET_SERVICE, config.websocket_rpc_addr.port()),
        ] {
            if let Err(e) = self
                .state
                .registry
                .register(&node.cluster_id, service, node.id, &node.ip_address, port)
                .await
            {
                warn!(service, error = %e, "endpoint not advertised");
            }
        }
    }

    pub fn state(&self) -> &Arc<AdminState> {
        &self.state
    }

    /// The admin method table, callable in-process.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn hub(&self) -> &Arc<WebSocketHub> {
        &self.hub
    }

    /// Stop accepting work, drain in-flight tasks and stop every loop.
    pub async fn shutdown(self) -> Result<()> {
        info!("admin runtime shutting down");
        self.state.tasks.close();
        self.state.tasks.wait_idle().await;

        let _ = self.shutdown_tx.send(true);
        for stop in &self.stops {
            stop.notify_one();
        }
        for server in &self.servers {
            server.close();
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "admin runtime task panicked");
            }
        }
        info!("admin runtime shutdown complete");
        Ok(())
    }
}

/// Seed default alert rules for every known cluster.
async fn prepare_clusters(state: &AdminState) -> Result<()> {
    let clusters = state
        .store
        .all::<Cluster>(&RequestContext::admin(ANY_CLUSTER), &[])
        .await?;
    for cluster in clusters {
        seed_default_rules(&state.store, &cluster.cluster_id).await?;
    }
    Ok(())
}
