// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon control, liveness and reachability.

use std::net::IpAddr;

use dspace_protocol::api::{DSA_SERVICE, ManagedService, ServiceKind, ServiceStatus};
use dspace_protocol::{RequestContext, Result, StorError};
use dspace_tools::net;
use serde::Deserialize;
use tracing::{info, warn};

use super::{AgentState, NameRequest};

#[derive(Debug, Clone, Deserialize)]
pub struct PingRequest {
    pub ip: String,
}

pub async fn handle_check_dsa_status(_state: &AgentState, _ctx: &RequestContext) -> Result<bool> {
    Ok(true)
}

pub async fn handle_systemd_service_status(
    state: &AgentState,
    _ctx: &RequestContext,
    req: NameRequest,
) -> Result<ServiceStatus> {
    Ok(state.tools.systemd.status(&req.name).await?.service_status())
}

pub async fn handle_systemd_service_restart(state: &AgentState, _ctx: &RequestContext, req: NameRequest) -> Result<()> {
    state.tools.systemd.restart(&req.name).await?;
    info!(unit = %req.name, "unit restarted");
    Ok(())
}

pub async fn handle_docker_service_status(
    state: &AgentState,
    _ctx: &RequestContext,
    req: NameRequest,
) -> Result<ServiceStatus> {
    Ok(state.tools.docker.status(&req.name).await?.service_status())
}

pub async fn handle_docker_service_restart(state: &AgentState, _ctx: &RequestContext, req: NameRequest) -> Result<()> {
    state.tools.docker.restart(&req.name).await?;
    info!(container = %req.name, "container restarted");
    Ok(())
}

pub async fn handle_ping(state: &AgentState, _ctx: &RequestContext, req: PingRequest) -> Result<bool> {
    req.ip
        .parse::<IpAddr>()
        .map_err(|_| StorError::invalid(format!("{} is not an ip address", req.ip)))?;
    Ok(net::ping(state.tools.exec.as_ref(), &req.ip).await?)
}

/// Current status of one manifest entry. Probe failures report `error`.
///
/// The agent itself is active whenever it is the one answering.
pub async fn observe(state: &AgentState, service: &ManagedService) -> ServiceStatus {
    if service.name == DSA_SERVICE {
        return ServiceStatus::Active;
    }
    let status = match service.kind {
        ServiceKind::Systemd => state.tools.systemd.status(&service.service_name).await,
        ServiceKind::Container => state.tools.docker.status(&service.service_name).await,
    };
    match status {
        Ok(status) => status.service_status(),
        Err(e) => {
            warn!(service = %service.service_name, error = %e, "status probe failed");
            ServiceStatus::Error
        }
    }
}
