// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DSpace Agent - node daemon
//!
//! Serves the agent RPC methods, reports the node's disks and heartbeats
//! its managed services to the admin.

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dspace_agent::{AgentRuntime, Config};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("dspace_agent=info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting DSpace Agent");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        node_id = config.node_id,
        cluster_id = %config.cluster_id,
        agent_addr = %config.agent_addr,
        admin_addr = %config.admin_addr,
        cron_interval_secs = config.cron_interval.as_secs(),
        "Configuration loaded"
    );

    let runtime = AgentRuntime::builder(config).start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    runtime.shutdown().await?;

    Ok(())
}
