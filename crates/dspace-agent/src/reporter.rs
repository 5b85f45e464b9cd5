// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Setup reporter.
//!
//! Runs once at startup: advertises the agent endpoint, then pushes the
//! full disk inventory. Until both went through it keeps retrying, since
//! the admin may come up after the agents. A successful report seeds the
//! hotplug set the cron diffs against.

use std::sync::Arc;
use std::time::Duration;

use dspace_protocol::Result;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::admin_client::AGENT_SERVICE;
use crate::cron::Hotplug;
use crate::handlers::AgentState;

const DEFAULT_RETRY: Duration = Duration::from_secs(10);

pub struct SetupReporter {
    state: Arc<AgentState>,
    hotplug: Arc<Hotplug>,
    retry: Duration,
    shutdown: Arc<Notify>,
}

impl SetupReporter {
    pub fn new(state: Arc<AgentState>, hotplug: Arc<Hotplug>) -> Self {
        Self {
            state,
            hotplug,
            retry: DEFAULT_RETRY,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn retry_interval(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Report until it succeeds or shutdown is requested.
    pub async fn run(&self) {
        let mut attempt = 1u32;
        loop {
            match self.report_once().await {
                Ok(summary) => {
                    info!(attempt, %summary, "setup report accepted");
                    return;
                }
                Err(e) => warn!(attempt, error = %e, "setup report failed"),
            }
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Setup reporter received shutdown signal");
                    return;
                }

                _ = tokio::time::sleep(self.retry) => attempt += 1,
            }
        }
    }

    /// Register the endpoint and push the inventory; returns the admin's fold summary.
    pub async fn report_once(&self) -> Result<Value> {
        let ctx = self.state.ctx();
        let config = &self.state.config;
        self.state
            .admin
            .rpc_service_register(
                &ctx,
                AGENT_SERVICE,
                config.node_id,
                &config.node_ip,
                config.agent_addr.port(),
            )
            .await?;

        let disks = self.state.tools.disks.probe().await?;
        let summary = self.state.admin.disk_reporter(&ctx, &disks, config.node_id).await?;
        self.hotplug.seed(&disks);
        info!(disks = disks.len(), node_id = config.node_id, "disk inventory reported");
        Ok(summary)
    }
}
