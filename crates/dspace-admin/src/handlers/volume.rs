// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rbd volumes and their snapshots.

use std::sync::Arc;

use dspace_protocol::{RequestContext, Result, StorError};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{AdminState, abandon, complete, settle};
use crate::action_log::ActionTarget;
use crate::models::{Pool, PoolRole, Volume, VolumeMapping, VolumeSnapshot, VolumeStatus};
use crate::store::{Filter, Record};

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeCreateRequest {
    pub name: String,
    pub pool_id: i64,
    pub size_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeRequest {
    pub volume_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotCreateRequest {
    pub volume_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotRequest {
    pub snapshot_id: i64,
}

pub async fn handle_volume_create(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: VolumeCreateRequest,
) -> Result<Record<Volume>> {
    if req.size_mb == 0 {
        return Err(StorError::invalid("volume size must be positive"));
    }
    let pool = state.store.fetch::<Pool>(ctx, req.pool_id).await?;
    if pool.role != PoolRole::Data || !pool.status.is_usable() {
        return Err(StorError::invalid(format!("pool {} cannot hold volumes", pool.display_name)));
    }
    if state
        .store
        .first::<Volume>(ctx, &[Filter::eq("display_name", &req.name)])
        .await?
        .is_some()
    {
        return Err(StorError::NameDuplicate {
            resource: "volume".to_string(),
            name: req.name,
        });
    }

    let volume = state
        .store
        .create(
            &ctx.cluster_id,
            &Volume {
                name: format!("volume-{}", uuid::Uuid::new_v4().simple()),
                display_name: req.name.clone(),
                pool_id: pool.id,
                size_mb: req.size_mb,
                status: VolumeStatus::Creating,
            },
        )
        .await?;
    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("volume").id(volume.id).name(volume.display_name.clone()))
        .await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_volume = volume.clone();
    state
        .tasks
        .submit("volume_create", async move {
            let outcome: Result<Record<Volume>> = async {
                task_state
                    .ceph
                    .rbd_create(&pool.pool_name, &task_volume.name, task_volume.size_mb)
                    .await?;
                task_state
                    .store
                    .transition(
                        task_volume.id,
                        &[Filter::eq("status", VolumeStatus::Creating)],
                        json!({"status": VolumeStatus::Active}),
                    )
                    .await
            }
            .await;
            let outcome = settle(&task_state, task_volume.id, VolumeStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "volume", "create", outcome).await
        })
        .await?;
    Ok(volume)
}

pub async fn handle_volume_delete(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: VolumeRequest,
) -> Result<Record<Volume>> {
    let volume = state.store.fetch::<Volume>(ctx, req.volume_id).await?;
    if state
        .store
        .first::<VolumeMapping>(ctx, &[Filter::eq("volume_id", volume.id)])
        .await?
        .is_some()
    {
        return Err(StorError::precondition(format!("volume {} is mapped", volume.display_name)));
    }
    if state
        .store
        .first::<VolumeSnapshot>(ctx, &[Filter::eq("volume_id", volume.id)])
        .await?
        .is_some()
    {
        return Err(StorError::precondition(format!("volume {} has snapshots", volume.display_name)));
    }
    let pool = state.store.load::<Pool>(volume.pool_id).await?;

    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("volume")
                .id(volume.id)
                .name(volume.display_name.clone())
                .before(volume.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            volume.id,
            &[Filter::one_of("status", [VolumeStatus::Active, VolumeStatus::Error])],
            json!({"status": VolumeStatus::Deleting}),
        )
        .await;
    let volume: Record<Volume> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_volume = volume.clone();
    state
        .tasks
        .submit("volume_delete", async move {
            let outcome: Result<Record<Volume>> = async {
                if !task_state.ceph.rbd_remove(&pool.pool_name, &task_volume.name).await? {
                    warn!(volume = %task_volume.name, "image already gone");
                }
                task_state
                    .store
                    .remove::<Volume>(task_volume.id, json!({"status": VolumeStatus::Deleted}))
                    .await?;
                info!(volume = %task_volume.display_name, "volume deleted");
                Ok(task_volume.clone())
            }
            .await;
            let outcome = settle(&task_state, task_volume.id, VolumeStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "volume", "delete", outcome).await
        })
        .await?;
    Ok(volume)
}

pub async fn handle_volume_snapshot_create(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: SnapshotCreateRequest,
) -> Result<Record<VolumeSnapshot>> {
    let volume = state.store.fetch::<Volume>(ctx, req.volume_id).await?;
    if volume.status != VolumeStatus::Active {
        return Err(StorError::invalid(format!("volume {} is not active", volume.display_name)));
    }
    let pool = state.store.load::<Pool>(volume.pool_id).await?;
    let snapshot = state
        .store
        .create(
            &ctx.cluster_id,
            &VolumeSnapshot {
                volume_id: volume.id,
                name: format!("snapshot-{}", uuid::Uuid::new_v4().simple()),
                display_name: req.name,
                status: VolumeStatus::Creating,
            },
        )
        .await?;
    let action_id = state
        .actions
        .begin(
            ctx,
            "create",
            ActionTarget::new("volume_snapshot")
                .id(snapshot.id)
                .name(snapshot.display_name.clone()),
        )
        .await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_snapshot = snapshot.clone();
    state
        .tasks
        .submit("volume_snapshot_create", async move {
            let outcome: Result<Record<VolumeSnapshot>> = async {
                task_state
                    .ceph
                    .rbd_snap_create(&pool.pool_name, &volume.name, &task_snapshot.name)
                    .await?;
                task_state
                    .store
                    .transition(
                        task_snapshot.id,
                        &[Filter::eq("status", VolumeStatus::Creating)],
                        json!({"status": VolumeStatus::Active}),
                    )
                    .await
            }
            .await;
            let outcome = settle(&task_state, task_snapshot.id, VolumeStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "volume_snapshot", "create", outcome).await
        })
        .await?;
    Ok(snapshot)
}

pub async fn handle_volume_snapshot_delete(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: SnapshotRequest,
) -> Result<Record<VolumeSnapshot>> {
    let snapshot = state.store.fetch::<VolumeSnapshot>(ctx, req.snapshot_id).await?;
    let volume = state.store.load::<Volume>(snapshot.volume_id).await?;
    let pool = state.store.load::<Pool>(volume.pool_id).await?;

    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("volume_snapshot")
                .id(snapshot.id)
                .name(snapshot.display_name.clone())
                .before(snapshot.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            snapshot.id,
            &[Filter::one_of("status", [VolumeStatus::Active, VolumeStatus::Error])],
            json!({"status": VolumeStatus::Deleting}),
        )
        .await;
    let snapshot: Record<VolumeSnapshot> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_snapshot = snapshot.clone();
    state
        .tasks
        .submit("volume_snapshot_delete", async move {
            let outcome: Result<Record<VolumeSnapshot>> = async {
                task_state
                    .ceph
                    .rbd_snap_remove(&pool.pool_name, &volume.name, &task_snapshot.name)
                    .await?;
                task_state
                    .store
                    .remove::<VolumeSnapshot>(task_snapshot.id, json!({"status": VolumeStatus::Deleted}))
                    .await?;
                Ok(task_snapshot.clone())
            }
            .await;
            let outcome = settle(&task_state, task_snapshot.id, VolumeStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "volume_snapshot", "delete", outcome).await
        })
        .await?;
    Ok(snapshot)
}
