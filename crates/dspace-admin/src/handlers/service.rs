// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent heartbeats and the service table.

use dspace_protocol::api::ServiceUpdate;
use dspace_protocol::{RequestContext, Result};
use serde::Deserialize;
use tracing::debug;

use super::AdminState;
use crate::models::Service;
use crate::store::{Filter, Record};

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceUpdateRequest {
    pub services: ServiceUpdate,
    pub node_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceListRequest {
    #[serde(default)]
    pub node_id: Option<i64>,
    #[serde(default)]
    pub role: Option<String>,
}

pub async fn handle_service_update(state: &AdminState, req: ServiceUpdateRequest) -> Result<()> {
    let reports: usize = req.services.values().map(Vec::len).sum();
    debug!(node_id = req.node_id, reports, "service heartbeat");
    state.supervisor.service_update(req.services, req.node_id).await
}

pub async fn handle_service_list(
    state: &AdminState,
    ctx: &RequestContext,
    req: ServiceListRequest,
) -> Result<Vec<Record<Service>>> {
    let mut filters = Vec::new();
    if let Some(node_id) = req.node_id {
        filters.push(Filter::eq("node_id", node_id));
    }
    if let Some(role) = &req.role {
        filters.push(Filter::eq("role", role));
    }
    state.store.all::<Service>(ctx, &filters).await
}
