// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool lifecycle and osd membership.
//!
//! Membership changes regenerate the pool's crush rule from its previous
//! content so surviving buckets keep their ids. The most recent change of
//! any pool in the cluster is kept as a one-shot undo snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use dspace_protocol::{RequestContext, Result, StorError};
use dspace_tools::{FaultDomain, PoolSpec, PoolType, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{AdminState, abandon, complete, settle};
use crate::action_log::ActionTarget;
use crate::crush::{CrushGenerator, OsdPlacement, fault_domains_of};
use crate::models::{
    CrushRule, Disk, Node, ObjectPolicy, Osd, OsdStatus, Pool, PoolRole, PoolStatus, Volume, VolumeStatus,
};
use crate::store::{Filter, Record};

/// Sys config key of the undo snapshot.
pub const POOL_UNDO_KEY: &str = "pool_undo";

const TIB: f64 = (1u64 << 40) as f64;

#[derive(Debug, Clone, Deserialize)]
pub struct PoolCreateRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub pool_type: PoolType,
    pub role: PoolRole,
    #[serde(default)]
    pub speed_type: Option<String>,
    pub failure_domain_type: FaultDomain,
    pub replicate_size: u32,
    pub osds: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolRequest {
    pub pool_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolDiskRequest {
    pub pool_id: i64,
    pub osds: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoPool {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoOsd {
    pub id: i64,
    pub osd_name: String,
}

/// Pool membership change that can be reverted once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUndo {
    pub pool: UndoPool,
    pub osds: Vec<UndoOsd>,
}

impl PoolUndo {
    fn new(pool: &Record<Pool>, osds: &[Record<Osd>]) -> Self {
        Self {
            pool: UndoPool {
                id: pool.id,
                name: pool.display_name.clone(),
            },
            osds: osds
                .iter()
                .map(|o| UndoOsd {
                    id: o.id,
                    osd_name: o.osd_name.clone(),
                })
                .collect(),
        }
    }
}

fn pg_num(osd_num: usize, replicate_size: u32) -> u32 {
    let target = (osd_num as u32 * 100) / replicate_size.max(1);
    target.next_power_of_two().clamp(32, 4096)
}

fn application(role: PoolRole) -> &'static str {
    match role {
        PoolRole::Data => "rbd",
        PoolRole::Index | PoolRole::ObjectMeta | PoolRole::Gateway => "rgw",
    }
}

/// Physical location of each osd, as the crush generator needs it.
async fn placements(state: &AdminState, osds: &[Record<Osd>]) -> Result<Vec<OsdPlacement>> {
    let mut out = Vec::with_capacity(osds.len());
    for osd in osds {
        let node = state.store.load::<Node>(osd.node_id).await?;
        let disk = state.store.load::<Disk>(osd.disk_id).await?;
        out.push(OsdPlacement {
            osd_id: osd.osd_id,
            name: osd.osd_name.clone(),
            weight: disk.size as f64 / TIB,
            host: node.hostname.clone(),
            rack: node.rack_id.map(|id| format!("rack{id}")),
            datacenter: node.datacenter_id.map(|id| format!("dc{id}")),
        });
    }
    Ok(out)
}

/// Active osds not yet claimed by any pool.
async fn free_osds(state: &AdminState, ctx: &RequestContext, ids: &[i64]) -> Result<Vec<Record<Osd>>> {
    if ids.is_empty() {
        return Err(StorError::invalid("at least one osd is required"));
    }
    let unique: BTreeSet<i64> = ids.iter().copied().collect();
    if unique.len() != ids.len() {
        return Err(StorError::invalid("osd list contains duplicates"));
    }
    let mut osds = Vec::with_capacity(ids.len());
    for id in ids {
        let osd = state.store.fetch::<Osd>(ctx, *id).await?;
        if osd.status != OsdStatus::Active {
            return Err(StorError::invalid(format!("{} is not active", osd.osd_name)));
        }
        if osd.crush_rule_id.is_some() {
            return Err(StorError::invalid(format!("{} already belongs to a pool", osd.osd_name)));
        }
        osds.push(osd);
    }
    Ok(osds)
}

async fn rule_osds(state: &AdminState, ctx: &RequestContext, rule_id: i64) -> Result<Vec<Record<Osd>>> {
    state
        .store
        .all::<Osd>(ctx, &[Filter::eq("crush_rule_id", rule_id)])
        .await
}

fn rule_of(pool: &Pool) -> Result<i64> {
    pool.crush_rule_id
        .ok_or_else(|| StorError::precondition(format!("pool {} has no crush rule", pool.display_name)))
}

pub async fn handle_pool_create(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: PoolCreateRequest,
) -> Result<Record<Pool>> {
    if req.name.trim().is_empty() {
        return Err(StorError::invalid("pool name is empty"));
    }
    if req.replicate_size == 0 {
        return Err(StorError::invalid("replicate size must be positive"));
    }
    if state
        .store
        .first::<Pool>(ctx, &[Filter::eq("display_name", &req.name)])
        .await?
        .is_some()
    {
        return Err(StorError::NameDuplicate {
            resource: "pool".to_string(),
            name: req.name,
        });
    }
    let osds = free_osds(state, ctx, &req.osds).await?;

    let uid = uuid::Uuid::new_v4().simple().to_string();
    let pool_name = format!("pool-{uid}");
    let rule_name = format!("rule-{uid}");
    let placed = placements(state, &osds).await?;
    let domains = fault_domains_of(&rule_name, req.failure_domain_type, &placed).len();
    if domains < req.replicate_size as usize {
        return Err(StorError::invalid(format!(
            "{} {} fault domains cannot hold {} replicas",
            domains,
            req.failure_domain_type.as_str(),
            req.replicate_size
        )));
    }
    let content = CrushGenerator::new(rule_name.as_str(), req.failure_domain_type, placed).gen_content();

    let rule = state
        .store
        .create(
            &ctx.cluster_id,
            &CrushRule {
                rule_name,
                fault_domain: req.failure_domain_type,
                content,
                rule_id: None,
            },
        )
        .await?;
    let pool = state
        .store
        .create(
            &ctx.cluster_id,
            &Pool {
                pool_name,
                display_name: req.name.clone(),
                pool_type: req.pool_type,
                role: req.role,
                speed_type: req.speed_type.clone(),
                replicate_size: req.replicate_size,
                failure_domain_type: req.failure_domain_type,
                crush_rule_id: Some(rule.id),
                osd_num: osds.len() as u32,
                ceph_pool_id: None,
                status: PoolStatus::Creating,
            },
        )
        .await?;
    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("pool").id(pool.id).name(pool.display_name.clone()))
        .await?;
    if let Err(e) = link(state, &osds, rule.id).await {
        // Nothing reached ceph yet: drop the rule and leave the pool deletable.
        if let Err(cleanup) = state.store.remove::<CrushRule>(rule.id, json!({})).await {
            warn!(rule = %rule.rule_name, error = %cleanup, "orphan crush rule not removed");
        }
        if let Err(cleanup) = state
            .store
            .patch::<Pool>(pool.id, json!({"status": PoolStatus::Error, "crush_rule_id": Value::Null}))
            .await
        {
            warn!(pool = %pool.display_name, error = %cleanup, "failure status not recorded");
        }
        return abandon(state, action_id, Err(e)).await;
    }

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_pool = pool.clone();
    state
        .tasks
        .submit("pool_create", async move {
            let outcome = create_on_ceph(&task_state, &task_ctx, &task_pool, &rule).await;
            let outcome = settle(&task_state, task_pool.id, PoolStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "pool", "create", outcome).await
        })
        .await?;
    Ok(pool)
}

/// Claim every osd for `rule_id`. When one of them was taken in the
/// meantime the ones already claimed are released again.
async fn link(state: &AdminState, osds: &[Record<Osd>], rule_id: i64) -> Result<()> {
    for (i, osd) in osds.iter().enumerate() {
        let claimed = state
            .store
            .transition::<Osd>(
                osd.id,
                &[Filter::is_null("crush_rule_id")],
                json!({"crush_rule_id": rule_id, "status": OsdStatus::Active}),
            )
            .await;
        if let Err(e) = claimed {
            if let Err(undo) = unlink(state, &osds[..i]).await {
                warn!(rule_id, error = %undo, "claimed osds not released");
            }
            return Err(e);
        }
    }
    Ok(())
}

async fn unlink(state: &AdminState, osds: &[Record<Osd>]) -> Result<()> {
    for osd in osds {
        state
            .store
            .patch::<Osd>(osd.id, json!({"crush_rule_id": Value::Null}))
            .await?;
    }
    Ok(())
}

async fn create_on_ceph(
    state: &AdminState,
    ctx: &RequestContext,
    pool: &Record<Pool>,
    rule: &Record<CrushRule>,
) -> Result<Record<Pool>> {
    let specify_rep = state.is_branded(&ctx.cluster_id).await?;
    let spec = PoolSpec {
        pool_name: pool.pool_name.clone(),
        pool_type: pool.pool_type,
        replicate_size: pool.replicate_size,
        pg_num: pg_num(pool.osd_num as usize, pool.replicate_size),
        application: application(pool.role).to_string(),
    };
    let ceph_pool_id = state.ceph.pool_create(&spec, specify_rep, &rule.content).await?;
    if !specify_rep {
        state.ceph.pool_set_size(&pool.pool_name, pool.replicate_size).await?;
    }
    let info = state.ceph.rule_get(&rule.rule_name).await?;
    state
        .store
        .patch::<CrushRule>(rule.id, json!({"rule_id": info.rule_id}))
        .await?;
    info!(pool = %pool.display_name, ceph_pool_id, rule_id = info.rule_id, "pool created");
    state
        .store
        .transition(
            pool.id,
            &[Filter::eq("status", PoolStatus::Creating)],
            json!({"status": PoolStatus::Active, "ceph_pool_id": ceph_pool_id}),
        )
        .await
}

pub async fn handle_pool_delete(state: &Arc<AdminState>, ctx: &RequestContext, req: PoolRequest) -> Result<Record<Pool>> {
    let pool = state.store.fetch::<Pool>(ctx, req.pool_id).await?;
    let volumes = state
        .store
        .all::<Volume>(ctx, &[Filter::eq("pool_id", pool.id)])
        .await?;
    let policies = state.store.all::<ObjectPolicy>(ctx, &[]).await?;
    let live: Vec<&str> = volumes
        .iter()
        .filter(|v| v.status != VolumeStatus::Deleted)
        .map(|v| v.display_name.as_str())
        .chain(
            policies
                .iter()
                .filter(|p| p.index_pool_id == pool.id || p.data_pool_id == pool.id)
                .map(|p| p.name.as_str()),
        )
        .collect();
    if !live.is_empty() {
        return Err(StorError::PoolHasDependants {
            pool: pool.display_name.clone(),
            dependants: live.join(", "),
        });
    }

    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("pool").id(pool.id).name(pool.display_name.clone()).before(pool.to_value()?),
        )
        .await?;
    let mut expected: Vec<PoolStatus> = PoolStatus::HEALTH.to_vec();
    expected.push(PoolStatus::Error);
    let claimed = state
        .store
        .transition(
            pool.id,
            &[Filter::one_of("status", expected)],
            json!({"status": PoolStatus::Deleting}),
        )
        .await;
    let pool: Record<Pool> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_pool = pool.clone();
    state
        .tasks
        .submit("pool_delete", async move {
            let outcome = delete_on_ceph(&task_state, &task_ctx, &task_pool).await;
            let outcome = settle(&task_state, task_pool.id, PoolStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "pool", "delete", outcome).await
        })
        .await?;
    Ok(pool)
}

async fn delete_on_ceph(state: &AdminState, ctx: &RequestContext, pool: &Record<Pool>) -> Result<Record<Pool>> {
    if !state.ceph.pool_delete(&pool.pool_name).await? {
        warn!(pool = %pool.pool_name, "pool already gone from ceph");
    }
    if let Some(rule_id) = pool.crush_rule_id {
        let rule = state.store.load::<CrushRule>(rule_id).await?;
        state.ceph.crush_delete(&rule.content).await?;
        unlink(state, &rule_osds(state, ctx, rule_id).await?).await?;
        state.store.remove::<CrushRule>(rule_id, json!({})).await?;
    }
    state
        .store
        .remove::<Pool>(pool.id, json!({"status": PoolStatus::Deleted}))
        .await?;
    info!(pool = %pool.display_name, "pool deleted");
    Ok(pool.clone())
}

/// Take a usable pool into `processing` for a membership change.
async fn begin_change(
    state: &AdminState,
    ctx: &RequestContext,
    pool: &Record<Pool>,
    action: &str,
) -> Result<(i64, Record<Pool>)> {
    let action_id = state
        .actions
        .begin(
            ctx,
            action,
            ActionTarget::new("pool").id(pool.id).name(pool.display_name.clone()).before(pool.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            pool.id,
            &[Filter::one_of("status", PoolStatus::HEALTH)],
            json!({"status": PoolStatus::Processing}),
        )
        .await;
    let pool = abandon(state, action_id, claimed).await?;
    Ok((action_id, pool))
}

pub async fn handle_pool_increase_disk(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: PoolDiskRequest,
) -> Result<Record<Pool>> {
    let pool = state.store.fetch::<Pool>(ctx, req.pool_id).await?;
    rule_of(&pool)?;
    let added = free_osds(state, ctx, &req.osds).await?;
    let (action_id, pool) = begin_change(state, ctx, &pool, "increase_disk").await?;
    submit_change(state, ctx, action_id, pool, added, Vec::new(), "increase_disk", true).await
}

pub async fn handle_pool_decrease_disk(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: PoolDiskRequest,
) -> Result<Record<Pool>> {
    let pool = state.store.fetch::<Pool>(ctx, req.pool_id).await?;
    let removed = members(state, ctx, &pool, &req.osds).await?;
    check_removal(state, ctx, &pool, &removed).await?;
    let (action_id, pool) = begin_change(state, ctx, &pool, "decrease_disk").await?;
    submit_change(state, ctx, action_id, pool, Vec::new(), removed, "decrease_disk", true).await
}

/// `ids` resolved to osds of `pool`'s rule.
async fn members(state: &AdminState, ctx: &RequestContext, pool: &Record<Pool>, ids: &[i64]) -> Result<Vec<Record<Osd>>> {
    let rule_id = rule_of(pool)?;
    if ids.is_empty() {
        return Err(StorError::invalid("at least one osd is required"));
    }
    let mut osds = Vec::with_capacity(ids.len());
    for id in ids {
        let osd = state.store.fetch::<Osd>(ctx, *id).await?;
        if osd.crush_rule_id != Some(rule_id) {
            return Err(StorError::invalid(format!(
                "{} is not in pool {}",
                osd.osd_name, pool.display_name
            )));
        }
        osds.push(osd);
    }
    Ok(osds)
}

/// Removing as many fault domains as there are replicas, or every domain
/// left, would lose data.
async fn check_removal(
    state: &AdminState,
    ctx: &RequestContext,
    pool: &Record<Pool>,
    removed: &[Record<Osd>],
) -> Result<()> {
    let rule = state.store.load::<CrushRule>(rule_of(pool)?).await?;
    let current = placements(state, &rule_osds(state, ctx, rule.id).await?).await?;
    let leaving = placements(state, removed).await?;
    let available = fault_domains_of(&rule.rule_name, rule.fault_domain, &current).len();
    let removing = fault_domains_of(&rule.rule_name, rule.fault_domain, &leaving).len();
    if removing >= pool.replicate_size as usize || removing >= available {
        return Err(StorError::FaultDomainRemovalUnsafe {
            removing,
            replicate_size: pool.replicate_size,
            available,
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn submit_change(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    action_id: i64,
    pool: Record<Pool>,
    added: Vec<Record<Osd>>,
    removed: Vec<Record<Osd>>,
    action: &'static str,
    record_undo: bool,
) -> Result<Record<Pool>> {
    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_pool = pool.clone();
    state
        .tasks
        .submit(action, async move {
            let outcome = change_membership(&task_state, &task_ctx, &task_pool, &added, &removed, record_undo).await;
            let outcome = settle(&task_state, task_pool.id, PoolStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "pool", action, outcome).await
        })
        .await?;
    Ok(pool)
}

async fn change_membership(
    state: &AdminState,
    ctx: &RequestContext,
    pool: &Record<Pool>,
    added: &[Record<Osd>],
    removed: &[Record<Osd>],
    record_undo: bool,
) -> Result<Record<Pool>> {
    let rule = state.store.load::<CrushRule>(rule_of(pool)?).await?;
    let leaving: BTreeSet<i64> = removed.iter().map(|o| o.id).collect();
    let mut next: Vec<Record<Osd>> = rule_osds(state, ctx, rule.id)
        .await?
        .into_iter()
        .filter(|o| !leaving.contains(&o.id))
        .collect();
    next.extend(added.iter().cloned());

    let content = CrushGenerator::from_content(&rule.content, placements(state, &next).await?).gen_content();
    let applied: std::result::Result<(), ToolError> = async {
        state.ceph.crush_apply(&content).await?;
        state.ceph.crush_prune(&rule.content, &content).await
    }
    .await;
    if let Err(e) = applied {
        if !removed.is_empty() {
            // Start moving data off the osds even though the rule is unchanged.
            let names: Vec<String> = removed.iter().map(|o| o.osd_name.clone()).collect();
            match state.ceph.mark_osds_out(&names).await {
                Ok(()) => warn!(pool = %pool.display_name, osds = ?names, "crush update failed, osds marked out"),
                Err(out) => warn!(pool = %pool.display_name, error = %out, "marking osds out failed"),
            }
        }
        return Err(e.into());
    }

    state
        .store
        .patch::<CrushRule>(rule.id, json!({"content": content}))
        .await?;
    unlink(state, removed).await?;
    link(state, added, rule.id).await?;

    if record_undo {
        let changed: &[Record<Osd>] = if added.is_empty() { removed } else { added };
        let snapshot = serde_json::to_value(PoolUndo::new(pool, changed))?;
        state
            .store
            .sys_config_set(&ctx.cluster_id, POOL_UNDO_KEY, &snapshot)
            .await?;
    }
    info!(
        pool = %pool.display_name,
        added = added.len(),
        removed = removed.len(),
        osd_num = next.len(),
        "pool membership changed"
    );
    state
        .store
        .transition(
            pool.id,
            &[Filter::eq("status", PoolStatus::Processing)],
            json!({"status": PoolStatus::Active, "osd_num": next.len()}),
        )
        .await
}

/// Revert the last membership change. The snapshot is cleared on read.
pub async fn handle_pool_undo(state: &Arc<AdminState>, ctx: &RequestContext) -> Result<Record<Pool>> {
    let snapshot = state
        .store
        .sys_config_swap(&ctx.cluster_id, POOL_UNDO_KEY, &json!({}))
        .await?;
    let undo: PoolUndo = match snapshot {
        Some(value) if value.as_object().is_some_and(|m| !m.is_empty()) => serde_json::from_value(value)?,
        _ => {
            return Err(StorError::ActionNotFound {
                action: POOL_UNDO_KEY.to_string(),
            });
        }
    };

    let pool = state.store.fetch::<Pool>(ctx, undo.pool.id).await?;
    let rule_id = rule_of(&pool)?;
    let mut osds = Vec::with_capacity(undo.osds.len());
    for entry in &undo.osds {
        osds.push(state.store.fetch::<Osd>(ctx, entry.id).await?);
    }
    // Osds still linked were added by the change being undone.
    let (linked, unlinked): (Vec<_>, Vec<_>) = osds.into_iter().partition(|o| o.crush_rule_id == Some(rule_id));
    for osd in &unlinked {
        if osd.crush_rule_id.is_some() || osd.status != OsdStatus::Active {
            return Err(StorError::precondition(format!("{} cannot rejoin the pool", osd.osd_name)));
        }
    }

    let (action_id, pool) = begin_change(state, ctx, &pool, "undo").await?;
    info!(pool = %pool.display_name, re_add = unlinked.len(), remove = linked.len(), "undoing pool change");
    submit_change(state, ctx, action_id, pool, unlinked, linked, "undo", false).await
}

pub async fn handle_pool_list(state: &AdminState, ctx: &RequestContext) -> Result<Vec<Record<Pool>>> {
    state.store.all::<Pool>(ctx, &[]).await
}
