// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DSpace Admin - control plane daemon
//!
//! Serves the admin RPC methods, runs the service supervisor, the pool
//! health refresher and the alert log cleaner, and hosts the UI websocket.

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dspace_admin::{AdminRuntime, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("dspace_admin=info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting DSpace Admin");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        admin_addr = %config.admin_addr,
        websocket_addr = %config.websocket_addr,
        task_workers = config.task_workers,
        heartbeat_check = config.heartbeat_check,
        "Configuration loaded"
    );

    let runtime = AdminRuntime::builder(config).start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    runtime.shutdown().await?;

    Ok(())
}
