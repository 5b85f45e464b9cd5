// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-disk operations.

use dspace_protocol::api::{DiskInfo, LedState, PartitionInfo};
use dspace_protocol::{RequestContext, Result, StorError};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::AgentState;

#[derive(Debug, Clone, Deserialize)]
pub struct DiskNameRequest {
    pub disk_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionsCreateRequest {
    pub disk_name: String,
    pub num: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskLightRequest {
    pub disk_name: String,
    pub led: LedState,
}

/// The disk named `name`, which must not carry the operating system.
async fn data_disk(state: &AgentState, name: &str) -> Result<DiskInfo> {
    let disk = state
        .tools
        .disks
        .probe()
        .await?
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| StorError::not_found("disk", name))?;
    if disk.is_system {
        return Err(StorError::precondition(format!("disk {name} holds the system")));
    }
    Ok(disk)
}

pub async fn handle_disk_partitions_create(
    state: &AgentState,
    _ctx: &RequestContext,
    req: PartitionsCreateRequest,
) -> Result<Vec<PartitionInfo>> {
    if req.num == 0 {
        return Err(StorError::invalid("partition count must be at least 1"));
    }
    let disk = data_disk(state, &req.disk_name).await?;
    if !disk.partitions.is_empty() {
        return Err(StorError::precondition(format!("disk {} is already partitioned", disk.name)));
    }
    let partitions = state.tools.disks.partitions_create(&disk.name, req.num).await?;
    info!(disk = %disk.name, partitions = partitions.len(), "disk partitioned");
    Ok(partitions)
}

pub async fn handle_disk_partitions_remove(
    state: &AgentState,
    _ctx: &RequestContext,
    req: DiskNameRequest,
) -> Result<()> {
    let disk = data_disk(state, &req.disk_name).await?;
    state.tools.disks.partitions_remove(&disk.name).await?;
    info!(disk = %disk.name, "disk partitions removed");
    Ok(())
}

pub async fn handle_disk_light(state: &AgentState, _ctx: &RequestContext, req: DiskLightRequest) -> Result<()> {
    state.tools.disks.light(&req.disk_name, req.led).await?;
    info!(disk = %req.disk_name, led = ?req.led, "disk led switched");
    Ok(())
}

pub async fn handle_disk_smart_get(state: &AgentState, _ctx: &RequestContext, req: DiskNameRequest) -> Result<Value> {
    Ok(state.tools.disks.smart(&req.disk_name).await?)
}
