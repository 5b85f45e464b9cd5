// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable agent runtime.
//!
//! [`AgentRuntime`] serves the agent method table over QUIC and runs the
//! setup reporter and the cron. The host tools and the admin client are
//! seams of the builder, so tests drive a whole agent against fakes.

use std::sync::Arc;

use anyhow::Result;
use dspace_protocol::{Dispatcher, RpcClient, RpcClientConfig, RpcServer};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::admin_client::{AdminApi, RpcAdminClient};
use crate::config::Config;
use crate::cron::{Cron, Hotplug};
use crate::handlers::{AgentState, AgentTools};
use crate::reporter::SetupReporter;
use crate::server::agent_dispatcher;

/// Builder for an [`AgentRuntime`]; unset seams get their production implementation.
pub struct AgentRuntimeBuilder {
    config: Config,
    tools: Option<AgentTools>,
    admin: Option<Arc<dyn AdminApi>>,
    serve_rpc: bool,
    run_loops: bool,
}

impl AgentRuntimeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tools: None,
            admin: None,
            serve_rpc: true,
            run_loops: true,
        }
    }

    pub fn tools(mut self, tools: AgentTools) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn admin(mut self, admin: Arc<dyn AdminApi>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Skip the QUIC listener; the dispatcher is still built.
    pub fn without_listeners(mut self) -> Self {
        self.serve_rpc = false;
        self
    }

    /// Do not spawn the reporter and the cron; both can still be driven by hand.
    pub fn without_loops(mut self) -> Self {
        self.run_loops = false;
        self
    }

    pub fn build(self) -> Result<Arc<AgentState>> {
        let config = self.config;
        let tools = self.tools.unwrap_or_else(|| AgentTools::local(&config));
        let admin = match self.admin {
            Some(admin) => admin,
            None => {
                let mut client = RpcClientConfig::for_peer(config.admin_addr);
                client.default_call_timeout_ms = config.rpc_timeout.as_millis() as u64;
                Arc::new(RpcAdminClient::new(Arc::new(RpcClient::new(client)?))) as Arc<dyn AdminApi>
            }
        };
        Ok(Arc::new(AgentState::new(config, tools, admin)))
    }

    pub async fn start(self) -> Result<AgentRuntime> {
        let serve = self.serve_rpc;
        let loops = self.run_loops;
        let state = self.build()?;
        AgentRuntime::start(state, serve, loops).await
    }
}

/// A running node agent.
pub struct AgentRuntime {
    state: Arc<AgentState>,
    dispatcher: Arc<Dispatcher>,
    cron: Arc<Cron>,
    reporter: Arc<SetupReporter>,
    stops: Vec<Arc<Notify>>,
    servers: Vec<Arc<RpcServer>>,
    handles: Vec<JoinHandle<()>>,
}

impl AgentRuntime {
    pub fn builder(config: Config) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new(config)
    }

    async fn start(state: Arc<AgentState>, serve: bool, loops: bool) -> Result<Self> {
        let hotplug = Arc::new(Hotplug::new());
        let mut runtime = Self {
            dispatcher: Arc::new(agent_dispatcher(state.clone())),
            cron: Arc::new(Cron::new(state.clone(), hotplug.clone())),
            reporter: Arc::new(SetupReporter::new(state.clone(), hotplug)),
            state: state.clone(),
            stops: Vec::new(),
            servers: Vec::new(),
            handles: Vec::new(),
        };

        // Listen before reporting so the admin can dial back right away
        if serve {
            let server = Arc::new(RpcServer::self_signed(state.config.agent_addr)?);
            let dispatcher = runtime.dispatcher.clone();
            let serving = server.clone();
            runtime.handles.push(tokio::spawn(async move {
                if let Err(e) = serving.serve(dispatcher).await {
                    error!(error = %e, "agent RPC server stopped");
                }
            }));
            runtime.servers.push(server);
        }

        if loops {
            let reporter = runtime.reporter.clone();
            runtime.stops.push(reporter.shutdown_handle());
            runtime.handles.push(tokio::spawn(async move { reporter.run().await }));

            let cron = runtime.cron.clone();
            runtime.stops.push(cron.shutdown_handle());
            runtime.handles.push(tokio::spawn(async move { cron.run().await }));
        }

        info!(
            node_id = state.config.node_id,
            agent_addr = %state.config.agent_addr,
            admin_addr = %state.config.admin_addr,
            listening = serve,
            loops,
            "agent runtime started"
        );
        Ok(runtime)
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    /// The agent method table, callable in-process.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn cron(&self) -> &Arc<Cron> {
        &self.cron
    }

    pub fn reporter(&self) -> &Arc<SetupReporter> {
        &self.reporter
    }

    /// Bound address of the RPC listener, if one is running.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.servers.first().and_then(|s| s.local_addr().ok())
    }

    pub async fn shutdown(self) -> Result<()> {
        info!("agent runtime shutting down");
        for stop in &self.stops {
            stop.notify_one();
        }
        for server in &self.servers {
            server.close();
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "agent runtime task panicked");
            }
        }
        info!("agent runtime shutdown complete");
        Ok(())
    }
}
