// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use dspace_protocol::{RequestContext, Result};
use serde::Deserialize;

use super::AdminState;
use crate::models::{ActionLog, ActionStatus};
use crate::store::{Filter, Record};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionLogListRequest {
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<i64>,
    #[serde(default)]
    pub status: Option<ActionStatus>,
    /// Newest rows first; at most this many.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionLogRequest {
    pub action_log_id: i64,
}

pub async fn handle_action_log_list(
    state: &AdminState,
    ctx: &RequestContext,
    req: ActionLogListRequest,
) -> Result<Vec<Record<ActionLog>>> {
    let mut filters = Vec::new();
    if let Some(resource_type) = &req.resource_type {
        filters.push(Filter::eq("resource_type", resource_type));
    }
    if let Some(resource_id) = req.resource_id {
        filters.push(Filter::eq("resource_id", resource_id));
    }
    if let Some(status) = req.status {
        filters.push(Filter::eq("status", status));
    }
    let mut rows = state.actions.list(ctx, &filters).await?;
    if let Some(limit) = req.limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

pub async fn handle_action_log_get(
    state: &AdminState,
    ctx: &RequestContext,
    req: ActionLogRequest,
) -> Result<Record<ActionLog>> {
    state.actions.get(ctx, req.action_log_id).await
}
