// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Disk inventory, hotplug events and accelerate-disk partitioning.

use std::collections::BTreeSet;
use std::sync::Arc;

use dspace_protocol::api::{DiskInfo, LedState};
use dspace_protocol::{RequestContext, Result, StorError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{AdminState, abandon, complete, settle};
use crate::action_log::ActionTarget;
use crate::alert::Alert;
use crate::models::{Disk, DiskPartition, DiskRole, DiskStatus, Node, Osd, OsdStatus, PartitionRole};
use crate::notify::SendMessage;
use crate::store::{Filter, Record};

#[derive(Debug, Clone, Deserialize)]
pub struct DiskReportRequest {
    pub disks: Vec<DiskInfo>,
    pub node_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskOnlineRequest {
    pub info: DiskInfo,
    pub node_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskOfflineRequest {
    pub name: String,
    pub node_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiskListRequest {
    #[serde(default)]
    pub node_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskRequest {
    pub disk_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskLightRequest {
    pub disk_id: i64,
    pub led: LedState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionsCreateRequest {
    pub disk_id: i64,
    pub num: u32,
    pub role: PartitionRole,
}

/// What one inventory report changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskReportSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub errored: usize,
}

fn same_disk(disk: &Disk, info: &DiskInfo) -> bool {
    match &info.guid {
        Some(guid) => disk.guid.as_deref() == Some(guid.as_str()),
        None => disk.guid.is_none() && disk.name == info.name,
    }
}

fn new_disk(node_id: i64, info: &DiskInfo) -> Disk {
    Disk {
        node_id,
        name: info.name.clone(),
        guid: info.guid.clone(),
        role: if info.is_system { DiskRole::System } else { DiskRole::Data },
        disk_type: info.disk_type,
        size: info.size,
        slot: info.slot.clone(),
        wwid: info.wwid.clone(),
        serial: info.serial.clone(),
        led: LedState::Off,
        partition_num: 0,
        status: if info.is_system { DiskStatus::Inuse } else { DiskStatus::Available },
    }
}

fn attributes(info: &DiskInfo) -> Value {
    json!({
        "name": info.name,
        "type": info.disk_type,
        "size": info.size,
        "slot": info.slot,
        "wwid": info.wwid,
        "serial": info.serial,
    })
}

async fn osds_on(state: &AdminState, ctx: &RequestContext, disk_id: i64) -> Result<Vec<Record<Osd>>> {
    state.store.all::<Osd>(ctx, &[Filter::eq("disk_id", disk_id)]).await
}

async fn partitions_of(state: &AdminState, ctx: &RequestContext, disk_id: i64) -> Result<Vec<Record<DiskPartition>>> {
    state
        .store
        .all::<DiskPartition>(ctx, &[Filter::eq("disk_id", disk_id)])
        .await
}

/// Status a disk settles in once its device is present.
pub(crate) async fn settled_status(state: &AdminState, ctx: &RequestContext, disk: &Record<Disk>) -> Result<DiskStatus> {
    if disk.role == DiskRole::System || !osds_on(state, ctx, disk.id).await?.is_empty() {
        return Ok(DiskStatus::Inuse);
    }
    if disk.role == DiskRole::Accelerate {
        let consumed = partitions_of(state, ctx, disk.id)
            .await?
            .iter()
            .any(|p| p.status == DiskStatus::Inuse);
        return Ok(if consumed { DiskStatus::Inuse } else { DiskStatus::Available });
    }
    Ok(DiskStatus::Available)
}

/// Reconcile partition rows of `disk` against what the device reports.
async fn reconcile_partitions(
    state: &AdminState,
    ctx: &RequestContext,
    disk: &Record<Disk>,
    info: &DiskInfo,
) -> Result<()> {
    for partition in partitions_of(state, ctx, disk.id).await? {
        match info.partitions.iter().find(|p| p.uuid == partition.uuid) {
            Some(seen) => {
                state
                    .store
                    .patch::<DiskPartition>(partition.id, json!({"name": seen.name, "size": seen.size}))
                    .await?;
            }
            None if partition.status == DiskStatus::Inuse => {
                warn!(partition = %partition.uuid, "consumed partition vanished");
                state
                    .store
                    .patch::<DiskPartition>(partition.id, json!({"status": DiskStatus::Error}))
                    .await?;
            }
            None => {
                state
                    .store
                    .remove::<DiskPartition>(partition.id, json!({}))
                    .await?;
            }
        }
    }
    Ok(())
}

/// Fold a full inventory of one node into the disk table.
pub async fn handle_disk_reporter(
    state: &AdminState,
    ctx: &RequestContext,
    req: DiskReportRequest,
) -> Result<DiskReportSummary> {
    let node = state.store.fetch::<Node>(ctx, req.node_id).await?;
    let existing = state
        .store
        .all::<Disk>(ctx, &[Filter::eq("node_id", node.id)])
        .await?;
    let mut summary = DiskReportSummary::default();
    let mut seen = BTreeSet::new();

    for info in &req.disks {
        match existing.iter().find(|d| same_disk(d, info)) {
            Some(disk) => {
                seen.insert(disk.id);
                let mut values = attributes(info);
                if matches!(disk.status, DiskStatus::Unavailable) {
                    values["status"] = json!(settled_status(state, ctx, disk).await?);
                }
                let disk = state.store.patch::<Disk>(disk.id, values).await?;
                reconcile_partitions(state, ctx, &disk, info).await?;
                summary.updated += 1;
            }
            None => {
                let disk = state.store.create(&ctx.cluster_id, &new_disk(node.id, info)).await?;
                debug!(disk = %disk.name, node_id = node.id, "disk discovered");
                summary.added += 1;
            }
        }
    }

    for disk in existing.iter().filter(|d| !seen.contains(&d.id)) {
        if osds_on(state, ctx, disk.id).await?.is_empty() {
            for partition in partitions_of(state, ctx, disk.id).await? {
                state.store.remove::<DiskPartition>(partition.id, json!({})).await?;
            }
            state.store.remove::<Disk>(disk.id, json!({})).await?;
            summary.removed += 1;
        } else {
            state
                .store
                .patch::<Disk>(disk.id, json!({"status": DiskStatus::Error}))
                .await?;
            summary.errored += 1;
        }
    }

    info!(
        node_id = node.id,
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        errored = summary.errored,
        "disk report folded"
    );
    Ok(summary)
}

pub async fn handle_disk_online(state: &AdminState, ctx: &RequestContext, req: DiskOnlineRequest) -> Result<Record<Disk>> {
    let node = state.store.fetch::<Node>(ctx, req.node_id).await?;
    let existing = state
        .store
        .all::<Disk>(ctx, &[Filter::eq("node_id", node.id)])
        .await?
        .into_iter()
        .find(|d| same_disk(d, &req.info));
    let disk = match existing {
        Some(disk) => {
            let mut values = attributes(&req.info);
            values["status"] = json!(settled_status(state, ctx, &disk).await?);
            let disk = state.store.patch::<Disk>(disk.id, values).await?;
            reconcile_partitions(state, ctx, &disk, &req.info).await?;
            disk
        }
        None => state.store.create(&ctx.cluster_id, &new_disk(node.id, &req.info)).await?,
    };
    info!(disk = %disk.name, node_id = node.id, "disk online");

    let text = format!("disk {} on {} is online", disk.name, node.hostname);
    state
        .notifier
        .send(ctx, SendMessage::new("DISK_ONLINE", text.clone()).about(&disk))
        .await;
    let alert = Alert::new("disk_online", "disk", text).resource(disk.id, disk.name.clone());
    if let Err(e) = state.alerts.emit(ctx, alert).await {
        warn!(disk = %disk.name, error = %e, "disk alert failed");
    }
    Ok(disk)
}

/// A device disappeared. Osds on it go offline, never away.
pub async fn handle_disk_offline(
    state: &AdminState,
    ctx: &RequestContext,
    req: DiskOfflineRequest,
) -> Result<Record<Disk>> {
    let node = state.store.fetch::<Node>(ctx, req.node_id).await?;
    let disk = state
        .store
        .first::<Disk>(ctx, &[Filter::eq("node_id", node.id), Filter::eq("name", &req.name)])
        .await?
        .ok_or_else(|| StorError::not_found("disk", &req.name))?;

    let osds = osds_on(state, ctx, disk.id).await?;
    let status = if osds.is_empty() && disk.role != DiskRole::Accelerate {
        DiskStatus::Unavailable
    } else {
        DiskStatus::Error
    };
    for osd in &osds {
        let moved = state
            .store
            .cas::<Osd>(
                osd.id,
                json!({"status": OsdStatus::Offline}),
                &[Filter::one_of("status", [OsdStatus::Active, OsdStatus::Inactive])],
            )
            .await?;
        if moved {
            info!(osd_id = osd.osd_id, "osd offline with its disk");
        }
    }
    let disk = state.store.patch::<Disk>(disk.id, json!({"status": status})).await?;
    warn!(disk = %disk.name, node_id = node.id, osds = osds.len(), "disk offline");

    let text = format!("disk {} on {} is offline", disk.name, node.hostname);
    state
        .notifier
        .send(ctx, SendMessage::new("DISK_OFFLINE", text.clone()).about(&disk))
        .await;
    let alert = Alert::new("disk_offline", "disk", text).resource(disk.id, disk.name.clone());
    if let Err(e) = state.alerts.emit(ctx, alert).await {
        warn!(disk = %disk.name, error = %e, "disk alert failed");
    }
    Ok(disk)
}

pub async fn handle_disk_list(state: &AdminState, ctx: &RequestContext, req: DiskListRequest) -> Result<Vec<Record<Disk>>> {
    let filters: Vec<Filter> = req.node_id.map(|id| Filter::eq("node_id", id)).into_iter().collect();
    state.store.all::<Disk>(ctx, &filters).await
}

pub async fn handle_disk_light(state: &AdminState, ctx: &RequestContext, req: DiskLightRequest) -> Result<Record<Disk>> {
    let disk = state.store.fetch::<Disk>(ctx, req.disk_id).await?;
    let name = disk.name.clone();
    let led = req.led;
    state
        .registry
        .with_agent(ctx, disk.node_id, |agent| async move { agent.disk_light(ctx, &name, led).await })
        .await?;
    state.store.patch::<Disk>(disk.id, json!({"led": req.led})).await
}

pub async fn handle_disk_smart_get(state: &AdminState, ctx: &RequestContext, req: DiskRequest) -> Result<Value> {
    let disk = state.store.fetch::<Disk>(ctx, req.disk_id).await?;
    let name = disk.name.clone();
    state
        .registry
        .with_agent(ctx, disk.node_id, |agent| async move { agent.disk_smart_get(ctx, &name).await })
        .await
}

/// Split a free disk into partitions of one role; it becomes an accelerate disk.
pub async fn handle_disk_partitions_create(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: PartitionsCreateRequest,
) -> Result<Record<Disk>> {
    let disk = state.store.fetch::<Disk>(ctx, req.disk_id).await?;
    if disk.role != DiskRole::Data {
        return Err(StorError::invalid(format!("disk {} is not a data disk", disk.name)));
    }
    if !(1..=32).contains(&req.num) {
        return Err(StorError::invalid("partition count must be between 1 and 32"));
    }
    if req.role == PartitionRole::Cache && !state.is_branded(&ctx.cluster_id).await? {
        return Err(StorError::PartitionRoleUnsupported {
            role: req.role.as_str().to_string(),
            flavor: state.ceph_flavor(&ctx.cluster_id).await?,
        });
    }

    let action_id = state
        .actions
        .begin(
            ctx,
            "partitions_create",
            ActionTarget::new("disk").id(disk.id).name(disk.name.clone()).before(disk.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            disk.id,
            &[Filter::eq("status", DiskStatus::Available)],
            json!({"status": DiskStatus::Processing}),
        )
        .await;
    let disk: Record<Disk> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_disk = disk.clone();
    state
        .tasks
        .submit("disk_partitions_create", async move {
            let outcome = create_partitions(&task_state, &task_ctx, &task_disk, req.num, req.role).await;
            let outcome = settle(&task_state, task_disk.id, DiskStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "disk", "partitions_create", outcome).await
        })
        .await?;
    Ok(disk)
}

async fn create_partitions(
    state: &AdminState,
    ctx: &RequestContext,
    disk: &Record<Disk>,
    num: u32,
    role: PartitionRole,
) -> Result<Record<Disk>> {
    let name = disk.name.clone();
    let created = state
        .registry
        .with_agent(ctx, disk.node_id, |agent| async move {
            agent.disk_partitions_create(ctx, &name, num).await
        })
        .await?;
    for info in &created {
        state
            .store
            .create(
                &ctx.cluster_id,
                &DiskPartition {
                    node_id: disk.node_id,
                    disk_id: disk.id,
                    uuid: info.uuid.clone(),
                    name: info.name.clone(),
                    size: info.size,
                    role,
                    status: DiskStatus::Available,
                },
            )
            .await?;
    }
    state
        .store
        .patch::<Disk>(
            disk.id,
            json!({
                "role": DiskRole::Accelerate,
                "partition_num": created.len(),
                "status": DiskStatus::Available,
            }),
        )
        .await
}

pub async fn handle_disk_partitions_remove(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: DiskRequest,
) -> Result<Record<Disk>> {
    let disk = state.store.fetch::<Disk>(ctx, req.disk_id).await?;
    if disk.role != DiskRole::Accelerate {
        return Err(StorError::invalid(format!("disk {} has no partitions", disk.name)));
    }
    if partitions_of(state, ctx, disk.id)
        .await?
        .iter()
        .any(|p| p.status == DiskStatus::Inuse)
    {
        return Err(StorError::precondition(format!("partitions of {} are in use", disk.name)));
    }

    let action_id = state
        .actions
        .begin(
            ctx,
            "partitions_remove",
            ActionTarget::new("disk").id(disk.id).name(disk.name.clone()).before(disk.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            disk.id,
            &[Filter::eq("status", DiskStatus::Available)],
            json!({"status": DiskStatus::Processing}),
        )
        .await;
    let disk: Record<Disk> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_disk = disk.clone();
    state
        .tasks
        .submit("disk_partitions_remove", async move {
            let outcome = remove_partitions(&task_state, &task_ctx, &task_disk).await;
            let outcome = settle(&task_state, task_disk.id, DiskStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "disk", "partitions_remove", outcome).await
        })
        .await?;
    Ok(disk)
}

async fn remove_partitions(state: &AdminState, ctx: &RequestContext, disk: &Record<Disk>) -> Result<Record<Disk>> {
    let name = disk.name.clone();
    state
        .registry
        .with_agent(ctx, disk.node_id, |agent| async move {
            agent.disk_partitions_remove(ctx, &name).await
        })
        .await?;
    for partition in partitions_of(state, ctx, disk.id).await? {
        state.store.remove::<DiskPartition>(partition.id, json!({})).await?;
    }
    state
        .store
        .patch::<Disk>(
            disk.id,
            json!({"role": DiskRole::Data, "partition_num": 0, "status": DiskStatus::Available}),
        )
        .await
}
