// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Osd lifecycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use dspace_protocol::api::OsdInstallSpec;
use dspace_protocol::{RequestContext, Result, StorError};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::disk::settled_status;
use super::{AdminState, abandon, complete, settle};
use crate::action_log::ActionTarget;
use crate::models::{Disk, DiskPartition, DiskRole, DiskStatus, Node, Osd, OsdStatus, PartitionRole};
use crate::store::{Filter, Record};

const BACKEND_TYPE_KEY: &str = "backend_type";
const CACHE_BACKEND: &str = "t2ce";

#[derive(Debug, Clone, Deserialize)]
pub struct OsdCreateRequest {
    pub disk_id: i64,
    #[serde(default)]
    pub db_partition_id: Option<i64>,
    #[serde(default)]
    pub wal_partition_id: Option<i64>,
    #[serde(default)]
    pub cache_partition_id: Option<i64>,
    #[serde(default)]
    pub journal_partition_id: Option<i64>,
}

impl OsdCreateRequest {
    fn slots(&self) -> Vec<(i64, PartitionRole)> {
        [
            (self.db_partition_id, PartitionRole::Db),
            (self.wal_partition_id, PartitionRole::Wal),
            (self.cache_partition_id, PartitionRole::Cache),
            (self.journal_partition_id, PartitionRole::Journal),
        ]
        .into_iter()
        .filter_map(|(id, role)| id.map(|id| (id, role)))
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsdRequest {
    pub osd_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsdListRequest {
    #[serde(default)]
    pub node_id: Option<i64>,
}

fn config_section(osd_id: i64) -> String {
    format!("osd.{osd_id}")
}

async fn partition_name(state: &AdminState, id: Option<i64>) -> Result<Option<String>> {
    match id {
        Some(id) => Ok(Some(state.store.load::<DiskPartition>(id).await?.name.clone())),
        None => Ok(None),
    }
}

async fn install_spec(state: &AdminState, osd: &Osd) -> Result<OsdInstallSpec> {
    let disk = state.store.load::<Disk>(osd.disk_id).await?;
    Ok(OsdInstallSpec {
        osd_id: osd.osd_id,
        fsid: osd.fsid.clone(),
        disk_name: disk.name.clone(),
        db_partition: partition_name(state, osd.db_partition_id).await?,
        wal_partition: partition_name(state, osd.wal_partition_id).await?,
        cache_partition: partition_name(state, osd.cache_partition_id).await?,
        journal_partition: partition_name(state, osd.journal_partition_id).await?,
    })
}

/// Hand disk and partitions back once the osd is gone or never came up.
async fn release_devices(state: &AdminState, ctx: &RequestContext, disk_id: i64, partitions: &[i64]) -> Result<()> {
    state
        .store
        .patch::<Disk>(disk_id, json!({"status": DiskStatus::Available}))
        .await?;
    for id in partitions {
        state
            .store
            .patch::<DiskPartition>(*id, json!({"status": DiskStatus::Available}))
            .await?;
    }
    settle_accelerate_disks(state, ctx, partitions).await
}

/// Re-derive the status of the accelerate disks holding `partitions`, which
/// are `inuse` exactly while one of their partitions is consumed. Disks in
/// any other status are left alone.
async fn settle_accelerate_disks(state: &AdminState, ctx: &RequestContext, partitions: &[i64]) -> Result<()> {
    let mut disks = BTreeSet::new();
    for id in partitions {
        disks.insert(state.store.load::<DiskPartition>(*id).await?.disk_id);
    }
    for disk_id in disks {
        let disk = state.store.load::<Disk>(disk_id).await?;
        let status = settled_status(state, ctx, &disk).await?;
        if status != disk.status {
            state
                .store
                .cas::<Disk>(
                    disk_id,
                    json!({"status": status}),
                    &[Filter::one_of("status", [DiskStatus::Available, DiskStatus::Inuse])],
                )
                .await?;
        }
    }
    Ok(())
}

/// Validate the request and claim every referenced partition.
async fn claim_partitions(
    state: &AdminState,
    ctx: &RequestContext,
    disk: &Record<Disk>,
    req: &OsdCreateRequest,
) -> Result<Vec<i64>> {
    let slots = req.slots();
    if req.cache_partition_id.is_some() && !state.is_branded(&ctx.cluster_id).await? {
        return Err(StorError::PartitionRoleUnsupported {
            role: PartitionRole::Cache.as_str().to_string(),
            flavor: state.ceph_flavor(&ctx.cluster_id).await?,
        });
    }
    for (id, wanted) in &slots {
        let partition = state.store.fetch::<DiskPartition>(ctx, *id).await?;
        if partition.node_id != disk.node_id {
            return Err(StorError::invalid(format!(
                "partition {} is not on the node of disk {}",
                partition.name, disk.name
            )));
        }
        if !partition.role.serves(*wanted) {
            return Err(StorError::invalid(format!(
                "partition {} is a {} partition, not {}",
                partition.name,
                partition.role.as_str(),
                wanted.as_str()
            )));
        }
    }

    let mut claimed = Vec::with_capacity(slots.len());
    for (id, _) in &slots {
        let won = state
            .store
            .cas::<DiskPartition>(
                *id,
                json!({"status": DiskStatus::Inuse}),
                &[Filter::eq("status", DiskStatus::Available)],
            )
            .await?;
        if !won {
            for id in &claimed {
                state
                    .store
                    .patch::<DiskPartition>(*id, json!({"status": DiskStatus::Available}))
                    .await?;
            }
            return Err(StorError::busy("disk_partition", *id));
        }
        claimed.push(*id);
    }
    settle_accelerate_disks(state, ctx, &claimed).await?;
    Ok(claimed)
}

pub async fn handle_osd_create(state: &Arc<AdminState>, ctx: &RequestContext, req: OsdCreateRequest) -> Result<Record<Osd>> {
    let disk = state.store.fetch::<Disk>(ctx, req.disk_id).await?;
    if disk.role != DiskRole::Data {
        return Err(StorError::invalid(format!("disk {} is not a data disk", disk.name)));
    }
    if disk.status != DiskStatus::Available {
        return Err(StorError::invalid(format!("disk {} is not available", disk.name)));
    }
    let node = state.store.fetch::<Node>(ctx, disk.node_id).await?;
    if !node.role_storage {
        return Err(StorError::invalid(format!("node {} has no storage role", node.hostname)));
    }

    let disk: Record<Disk> = state
        .store
        .transition(
            disk.id,
            &[Filter::eq("status", DiskStatus::Available)],
            json!({"status": DiskStatus::Inuse}),
        )
        .await?;
    let partitions = match claim_partitions(state, ctx, &disk, &req).await {
        Ok(partitions) => partitions,
        Err(e) => {
            release_devices(state, ctx, disk.id, &[]).await?;
            return Err(e);
        }
    };

    let fsid = uuid::Uuid::new_v4().to_string();
    let osd_id = match state.ceph.osd_new(&fsid).await {
        Ok(id) => id,
        Err(e) => {
            release_devices(state, ctx, disk.id, &partitions).await?;
            return Err(e.into());
        }
    };

    let osd = state
        .store
        .create(
            &ctx.cluster_id,
            &Osd {
                node_id: disk.node_id,
                osd_id,
                osd_name: config_section(osd_id),
                fsid,
                disk_id: disk.id,
                disk_type: disk.disk_type,
                db_partition_id: req.db_partition_id,
                wal_partition_id: req.wal_partition_id,
                cache_partition_id: req.cache_partition_id,
                journal_partition_id: req.journal_partition_id,
                crush_rule_id: None,
                status: OsdStatus::Creating,
            },
        )
        .await?;
    let action_id = state
        .actions
        .begin(
            ctx,
            "create",
            ActionTarget::new("osd").id(osd.id).name(osd.osd_name.clone()),
        )
        .await?;
    info!(osd_id, node = %node.hostname, disk = %disk.name, "osd allocated");

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_osd = osd.clone();
    state
        .tasks
        .submit("osd_create", async move {
            let outcome = install(&task_state, &task_ctx, &task_osd).await;
            let outcome = settle(&task_state, task_osd.id, OsdStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "osd", "create", outcome).await
        })
        .await?;
    Ok(osd)
}

// The ceph id stays allocated when install fails; pool undo and osd delete
// both cope with an osd in error.
async fn install(state: &AdminState, ctx: &RequestContext, osd: &Record<Osd>) -> Result<Record<Osd>> {
    if osd.cache_partition_id.is_some() {
        state
            .ceph
            .config_set(&config_section(osd.osd_id), BACKEND_TYPE_KEY, CACHE_BACKEND)
            .await?;
    }
    let spec = install_spec(state, osd).await?;
    state
        .registry
        .with_agent(ctx, osd.node_id, |agent| async move { agent.ceph_osd_install(ctx, &spec).await })
        .await?;
    state
        .store
        .transition(
            osd.id,
            &[Filter::eq("status", OsdStatus::Creating)],
            json!({"status": OsdStatus::Active}),
        )
        .await
}

pub async fn handle_osd_delete(state: &Arc<AdminState>, ctx: &RequestContext, req: OsdRequest) -> Result<Record<Osd>> {
    let osd = state.store.fetch::<Osd>(ctx, req.osd_id).await?;
    if osd.crush_rule_id.is_some() {
        return Err(StorError::precondition(format!("{} still belongs to a pool", osd.osd_name)));
    }
    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("osd").id(osd.id).name(osd.osd_name.clone()).before(osd.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            osd.id,
            &[Filter::one_of(
                "status",
                [OsdStatus::Active, OsdStatus::Inactive, OsdStatus::Offline, OsdStatus::Error],
            )],
            json!({"status": OsdStatus::Deleting}),
        )
        .await;
    let osd: Record<Osd> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_osd = osd.clone();
    state
        .tasks
        .submit("osd_delete", async move {
            let outcome = uninstall(&task_state, &task_ctx, &task_osd).await;
            let outcome = settle(&task_state, task_osd.id, OsdStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "osd", "delete", outcome).await
        })
        .await?;
    Ok(osd)
}

async fn uninstall(state: &AdminState, ctx: &RequestContext, osd: &Record<Osd>) -> Result<Record<Osd>> {
    let spec = install_spec(state, osd).await?;
    state
        .registry
        .with_agent(ctx, osd.node_id, |agent| async move { agent.ceph_osd_uninstall(ctx, &spec).await })
        .await?;
    if !state.ceph.osd_purge(osd.osd_id).await? {
        warn!(osd_id = osd.osd_id, "osd already gone from ceph");
    }
    if osd.cache_partition_id.is_some() {
        state
            .ceph
            .config_remove(&config_section(osd.osd_id), BACKEND_TYPE_KEY)
            .await?;
    }
    release_devices(state, ctx, osd.disk_id, &osd.partition_ids()).await?;
    state.store.remove::<Osd>(osd.id, json!({})).await?;
    info!(osd_id = osd.osd_id, "osd removed");
    Ok(osd.clone())
}

pub async fn handle_osd_restart(state: &AdminState, ctx: &RequestContext, req: OsdRequest) -> Result<Record<Osd>> {
    let osd = state.store.fetch::<Osd>(ctx, req.osd_id).await?;
    if matches!(osd.status, OsdStatus::Creating | OsdStatus::Deleting) {
        return Err(StorError::busy("osd", osd.id));
    }
    let osd_id = osd.osd_id;
    state
        .registry
        .with_agent(ctx, osd.node_id, |agent| async move { agent.ceph_osd_restart(ctx, osd_id).await })
        .await?;
    info!(osd_id, "osd restarted");
    Ok(osd)
}

pub async fn handle_osd_list(state: &AdminState, ctx: &RequestContext, req: OsdListRequest) -> Result<Vec<Record<Osd>>> {
    let filters: Vec<Filter> = req.node_id.map(|id| Filter::eq("node_id", id)).into_iter().collect();
    state.store.all::<Osd>(ctx, &filters).await
}
