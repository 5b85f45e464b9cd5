// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! iSCSI targets of the block gateway on this node.

use dspace_protocol::api::{IscsiMapping, IscsiTargetSpec};
use dspace_protocol::{RequestContext, Result};
use serde::Deserialize;
use tracing::info;

use super::{AgentState, SpecRequest};

#[derive(Debug, Clone, Deserialize)]
pub struct TargetRequest {
    pub iqn: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingsApplyRequest {
    pub iqn: String,
    pub mappings: Vec<IscsiMapping>,
}

pub async fn handle_iscsi_target_create(
    state: &AgentState,
    _ctx: &RequestContext,
    req: SpecRequest<IscsiTargetSpec>,
) -> Result<()> {
    state.tools.iscsi.target_create(&req.spec).await?;
    info!(iqn = %req.spec.iqn, chap = req.spec.chap.is_some(), "iscsi target created");
    Ok(())
}

pub async fn handle_iscsi_target_delete(state: &AgentState, _ctx: &RequestContext, req: TargetRequest) -> Result<bool> {
    let removed = state.tools.iscsi.target_delete(&req.iqn).await?;
    info!(iqn = %req.iqn, removed, "iscsi target deleted");
    Ok(removed)
}

pub async fn handle_iscsi_target_list(state: &AgentState, _ctx: &RequestContext) -> Result<Vec<String>> {
    Ok(state.tools.iscsi.target_list().await?)
}

/// Replace the whole ACL and LUN state of a target.
pub async fn handle_iscsi_mappings_apply(
    state: &AgentState,
    _ctx: &RequestContext,
    req: MappingsApplyRequest,
) -> Result<()> {
    state.tools.iscsi.apply_mappings(&req.iqn, &req.mappings).await?;
    info!(iqn = %req.iqn, groups = req.mappings.len(), "iscsi mappings applied");
    Ok(())
}

pub async fn handle_iscsi_mappings_get(
    state: &AgentState,
    _ctx: &RequestContext,
    req: TargetRequest,
) -> Result<Vec<IscsiMapping>> {
    Ok(state.tools.iscsi.mappings(&req.iqn).await?)
}
