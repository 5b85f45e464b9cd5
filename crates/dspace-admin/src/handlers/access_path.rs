// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Volume access paths: iscsi targets served by block gateway nodes.
//!
//! Every gateway of an access path exports the same target. Mapping changes
//! compute the full desired mapping set, rewrite it on each gateway node
//! under that node's `volume_gateway-<id>` lock and only then touch rows.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use dspace_protocol::api::{ChapCredentials, IscsiMapping, IscsiTargetSpec, IscsiVolume};
use dspace_protocol::{RequestContext, Result, StorError};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{AdminState, abandon, complete, conclude, settle};
use crate::action_log::ActionTarget;
use crate::models::{
    AccessPathStatus, Node, Pool, Volume, VolumeAccessPath, VolumeClientGroup, VolumeGateway,
    VolumeMapping, VolumeStatus,
};
use crate::store::{Filter, Record};

const IQN_PREFIX: &str = "com.dspace";

static IQN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^iqn\.\d{4}-\d{2}\.[a-z0-9][a-z0-9.-]*(:[^\s]+)?$").ok());

/// Whether `iqn` is a well formed iscsi qualified name.
pub fn valid_iqn(iqn: &str) -> bool {
    IQN.as_ref().is_some_and(|re| re.is_match(iqn))
}

fn new_iqn() -> String {
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("iqn.{}.{IQN_PREFIX}:{}", Utc::now().format("%Y-%m"), &short[..8])
}

fn gateway_lock(node_id: i64) -> String {
    format!("volume_gateway-{node_id}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessPathCreateRequest {
    pub name: String,
    #[serde(default)]
    pub chap_enable: bool,
    #[serde(default)]
    pub chap_username: Option<String>,
    #[serde(default)]
    pub chap_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessPathRequest {
    pub access_path_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRequest {
    pub access_path_id: i64,
    pub node_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingRequest {
    pub access_path_id: i64,
    pub client_group_id: i64,
    pub volume_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeClientGroupRequest {
    pub access_path_id: i64,
    pub client_group_id: i64,
    pub new_client_group_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientGroupCreateRequest {
    pub name: String,
    pub initiators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientGroupRequest {
    pub client_group_id: i64,
}

/// `(client_group_id, volume_id)` pairs an access path should export.
type MappingSet = BTreeSet<(i64, i64)>;

fn chap_of(path: &VolumeAccessPath) -> Option<ChapCredentials> {
    match (path.chap_enable, &path.chap_username, &path.chap_password) {
        (true, Some(username), Some(password)) => Some(ChapCredentials {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    }
}

async fn gateways_of(state: &AdminState, ctx: &RequestContext, path_id: i64) -> Result<Vec<Record<VolumeGateway>>> {
    state
        .store
        .all::<VolumeGateway>(ctx, &[Filter::eq("access_path_id", path_id)])
        .await
}

async fn mappings_of(state: &AdminState, ctx: &RequestContext, path_id: i64) -> Result<Vec<Record<VolumeMapping>>> {
    state
        .store
        .all::<VolumeMapping>(ctx, &[Filter::eq("access_path_id", path_id)])
        .await
}

fn mapping_set(rows: &[Record<VolumeMapping>]) -> MappingSet {
    rows.iter().map(|m| (m.client_group_id, m.volume_id)).collect()
}

/// Resolve a mapping set into what the iscsi tool applies.
async fn resolve(state: &AdminState, set: &MappingSet) -> Result<Vec<IscsiMapping>> {
    let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for (group, volume) in set {
        groups.entry(*group).or_default().push(*volume);
    }
    let mut out = Vec::with_capacity(groups.len());
    for (group_id, volume_ids) in groups {
        let group = state.store.load::<VolumeClientGroup>(group_id).await?;
        let mut volumes = Vec::with_capacity(volume_ids.len());
        for volume_id in volume_ids {
            let volume = state.store.load::<Volume>(volume_id).await?;
            let pool = state.store.load::<Pool>(volume.pool_id).await?;
            volumes.push(IscsiVolume {
                pool: pool.pool_name.clone(),
                image: volume.name.clone(),
            });
        }
        out.push(IscsiMapping {
            initiators: group.initiators.clone(),
            volumes,
        });
    }
    Ok(out)
}

/// Rewrite the target on every gateway node of `path`.
async fn push(state: &AdminState, ctx: &RequestContext, path: &Record<VolumeAccessPath>, set: &MappingSet) -> Result<()> {
    let mappings = resolve(state, set).await?;
    for gateway in gateways_of(state, ctx, path.id).await? {
        let _guard = state.locks.lock(&gateway_lock(gateway.node_id)).await;
        let iqn = path.iqn.clone();
        let mappings = &mappings;
        state
            .registry
            .with_agent(ctx, gateway.node_id, |agent| async move {
                agent.iscsi_mappings_apply(ctx, &iqn, mappings).await
            })
            .await?;
    }
    Ok(())
}

pub async fn handle_access_path_create(
    state: &AdminState,
    ctx: &RequestContext,
    req: AccessPathCreateRequest,
) -> Result<Record<VolumeAccessPath>> {
    if req.name.trim().is_empty() {
        return Err(StorError::invalid("access path name is empty"));
    }
    if req.chap_enable {
        let user_ok = req.chap_username.as_deref().is_some_and(|u| !u.is_empty());
        let secret_ok = req.chap_password.as_deref().is_some_and(|p| (12..=16).contains(&p.len()));
        if !user_ok || !secret_ok {
            return Err(StorError::invalid("chap needs a username and a 12 to 16 character secret"));
        }
    }
    if state
        .store
        .first::<VolumeAccessPath>(ctx, &[Filter::eq("name", &req.name)])
        .await?
        .is_some()
    {
        return Err(StorError::NameDuplicate {
            resource: "volume_access_path".to_string(),
            name: req.name,
        });
    }

    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("volume_access_path").name(req.name.clone()))
        .await?;
    let outcome = state
        .store
        .create(
            &ctx.cluster_id,
            &VolumeAccessPath {
                name: req.name,
                iqn: new_iqn(),
                chap_enable: req.chap_enable,
                chap_username: req.chap_username,
                chap_password: req.chap_password,
                status: AccessPathStatus::Active,
            },
        )
        .await;
    if let Ok(path) = &outcome {
        state.actions.attach(action_id, path.id).await?;
        info!(access_path = %path.name, iqn = %path.iqn, "access path created");
    }
    conclude(state, action_id, outcome).await
}

pub async fn handle_access_path_delete(
    state: &AdminState,
    ctx: &RequestContext,
    req: AccessPathRequest,
) -> Result<Record<VolumeAccessPath>> {
    let path = state.store.fetch::<VolumeAccessPath>(ctx, req.access_path_id).await?;
    if !gateways_of(state, ctx, path.id).await?.is_empty() {
        return Err(StorError::AccessPathHasGateways { name: path.name.clone() });
    }
    if state
        .store
        .first::<VolumeClientGroup>(ctx, &[Filter::eq("access_path_id", path.id)])
        .await?
        .is_some()
    {
        return Err(StorError::AccessPathHasClientGroups { name: path.name.clone() });
    }

    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("volume_access_path")
                .id(path.id)
                .name(path.name.clone())
                .before(path.to_value()?),
        )
        .await?;
    let outcome: Result<Record<VolumeAccessPath>> = async {
        let path: Record<VolumeAccessPath> = state
            .store
            .transition(
                path.id,
                &[Filter::one_of("status", [AccessPathStatus::Active, AccessPathStatus::Error])],
                json!({"status": AccessPathStatus::Deleted}),
            )
            .await?;
        state.store.remove::<VolumeAccessPath>(path.id, json!({})).await?;
        Ok(path)
    }
    .await;
    conclude(state, action_id, outcome).await
}

/// Take an access path into `processing` and run `work` as a task.
async fn run_change<F, Fut>(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    path: Record<VolumeAccessPath>,
    action: &'static str,
    work: F,
) -> Result<Record<VolumeAccessPath>>
where
    F: FnOnce(Arc<AdminState>, RequestContext, Record<VolumeAccessPath>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let action_id = state
        .actions
        .begin(
            ctx,
            action,
            ActionTarget::new("volume_access_path")
                .id(path.id)
                .name(path.name.clone())
                .before(path.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            path.id,
            &[Filter::eq("status", AccessPathStatus::Active)],
            json!({"status": AccessPathStatus::Processing}),
        )
        .await;
    let path: Record<VolumeAccessPath> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_path = path.clone();
    state
        .tasks
        .submit(action, async move {
            let id = task_path.id;
            let outcome = match work(task_state.clone(), task_ctx.clone(), task_path).await {
                Ok(()) => {
                    task_state
                        .store
                        .transition::<VolumeAccessPath>(
                            id,
                            &[Filter::eq("status", AccessPathStatus::Processing)],
                            json!({"status": AccessPathStatus::Active}),
                        )
                        .await
                }
                Err(e) => Err(e),
            };
            let outcome = settle(&task_state, id, AccessPathStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "volume_access_path", action, outcome).await
        })
        .await?;
    Ok(path)
}

/// Address the target is advertised on from `node`.
fn advertised_ip(node: &Node) -> String {
    node.gateway_ip.clone().unwrap_or_else(|| node.public_ip.clone())
}

pub async fn handle_access_path_mount_gateway(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: GatewayRequest,
) -> Result<Record<VolumeAccessPath>> {
    let path = state.store.fetch::<VolumeAccessPath>(ctx, req.access_path_id).await?;
    let node = state.store.fetch::<Node>(ctx, req.node_id).await?;
    if !node.role_block_gateway {
        return Err(StorError::invalid(format!("node {} has no block gateway role", node.hostname)));
    }
    if gateways_of(state, ctx, path.id).await?.iter().any(|g| g.node_id == node.id) {
        return Err(StorError::invalid(format!(
            "node {} already serves {}",
            node.hostname, path.name
        )));
    }
    let ip = advertised_ip(&node);
    state.check_gateway_ip(&ctx.cluster_id, &ip).await?;

    run_change(state, ctx, path, "mount_gateway", move |state, ctx, path| async move {
        let _guard = state.locks.lock(&gateway_lock(node.id)).await;
        let spec = IscsiTargetSpec {
            iqn: path.iqn.clone(),
            chap: chap_of(&path),
        };
        let mappings = resolve(&state, &mapping_set(&mappings_of(&state, &ctx, path.id).await?)).await?;
        let ctx_ref = &ctx;
        state
            .registry
            .with_agent(ctx_ref, node.id, |agent| async move {
                agent.iscsi_target_create(ctx_ref, &spec).await?;
                agent.iscsi_mappings_apply(ctx_ref, &spec.iqn, &mappings).await
            })
            .await?;
        state
            .store
            .create(
                &ctx.cluster_id,
                &VolumeGateway {
                    access_path_id: path.id,
                    node_id: node.id,
                    ip: ip.clone(),
                },
            )
            .await?;
        state
            .store
            .patch::<Node>(node.id, json!({"object_gateway_ip_address": ip}))
            .await?;
        info!(access_path = %path.name, node = %node.hostname, "gateway mounted");
        Ok::<_, StorError>(())
    })
    .await
}

pub async fn handle_access_path_unmount_gateway(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: GatewayRequest,
) -> Result<Record<VolumeAccessPath>> {
    let path = state.store.fetch::<VolumeAccessPath>(ctx, req.access_path_id).await?;
    if !mappings_of(state, ctx, path.id).await?.is_empty() {
        return Err(StorError::AccessPathHasMappings { name: path.name.clone() });
    }
    let gateway = gateways_of(state, ctx, path.id)
        .await?
        .into_iter()
        .find(|g| g.node_id == req.node_id)
        .ok_or_else(|| StorError::not_found("volume_gateway", req.node_id))?;

    run_change(state, ctx, path, "unmount_gateway", move |state, ctx, path| async move {
        let _guard = state.locks.lock(&gateway_lock(gateway.node_id)).await;
        let iqn = path.iqn.clone();
        let ctx_ref = &ctx;
        let removed = state
            .registry
            .with_agent(ctx_ref, gateway.node_id, |agent| async move {
                agent.iscsi_target_delete(ctx_ref, &iqn).await
            })
            .await?;
        if !removed {
            warn!(iqn = %path.iqn, node_id = gateway.node_id, "target already gone");
        }
        state.store.remove::<VolumeGateway>(gateway.id, json!({})).await?;
        let still_serving = state
            .store
            .first::<VolumeGateway>(&ctx, &[Filter::eq("node_id", gateway.node_id)])
            .await?
            .is_some();
        if !still_serving {
            state
                .store
                .patch::<Node>(gateway.node_id, json!({"object_gateway_ip_address": Value::Null}))
                .await?;
        }
        info!(access_path = %path.name, node_id = gateway.node_id, "gateway unmounted");
        Ok::<_, StorError>(())
    })
    .await
}

/// A client group may serve at most one access path.
async fn usable_group(
    state: &AdminState,
    ctx: &RequestContext,
    path_id: i64,
    group_id: i64,
) -> Result<Record<VolumeClientGroup>> {
    let group = state.store.fetch::<VolumeClientGroup>(ctx, group_id).await?;
    match group.access_path_id {
        Some(other) if other != path_id => Err(StorError::invalid(format!(
            "client group {} belongs to another access path",
            group.name
        ))),
        _ => Ok(group),
    }
}

/// A volume is exported through at most one access path and client group.
async fn ensure_unmapped(state: &AdminState, ctx: &RequestContext, volume: &Record<Volume>) -> Result<()> {
    if state
        .store
        .first::<VolumeMapping>(ctx, &[Filter::eq("volume_id", volume.id)])
        .await?
        .is_some()
    {
        return Err(StorError::invalid(format!("volume {} is already mapped", volume.display_name)));
    }
    Ok(())
}

pub async fn handle_access_path_create_mapping(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: MappingRequest,
) -> Result<Record<VolumeAccessPath>> {
    let path = state.store.fetch::<VolumeAccessPath>(ctx, req.access_path_id).await?;
    if gateways_of(state, ctx, path.id).await?.is_empty() {
        return Err(StorError::precondition(format!("access path {} has no gateway", path.name)));
    }
    let group = usable_group(state, ctx, path.id, req.client_group_id).await?;
    if req.volume_ids.is_empty() {
        return Err(StorError::invalid("at least one volume is required"));
    }
    let unique: BTreeSet<i64> = req.volume_ids.iter().copied().collect();
    if unique.len() != req.volume_ids.len() {
        return Err(StorError::invalid("volume list contains duplicates"));
    }
    for volume_id in &req.volume_ids {
        let volume = state.store.fetch::<Volume>(ctx, *volume_id).await?;
        if volume.status != VolumeStatus::Active {
            return Err(StorError::invalid(format!("volume {} is not active", volume.display_name)));
        }
        ensure_unmapped(state, ctx, &volume).await?;
    }

    run_change(state, ctx, path, "create_mapping", move |state, ctx, path| async move {
        // Another access path may have taken a volume while this one was queued.
        for volume_id in &req.volume_ids {
            ensure_unmapped(&state, &ctx, &state.store.load::<Volume>(*volume_id).await?).await?;
        }
        let mut desired = mapping_set(&mappings_of(&state, &ctx, path.id).await?);
        desired.extend(req.volume_ids.iter().map(|v| (group.id, *v)));
        push(&state, &ctx, &path, &desired).await?;
        for volume_id in &req.volume_ids {
            state
                .store
                .create(
                    &ctx.cluster_id,
                    &VolumeMapping {
                        access_path_id: path.id,
                        client_group_id: group.id,
                        volume_id: *volume_id,
                    },
                )
                .await?;
        }
        state
            .store
            .patch::<VolumeClientGroup>(group.id, json!({"access_path_id": path.id}))
            .await?;
        Ok::<_, StorError>(())
    })
    .await
}

pub async fn handle_access_path_change_client_group(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: ChangeClientGroupRequest,
) -> Result<Record<VolumeAccessPath>> {
    let path = state.store.fetch::<VolumeAccessPath>(ctx, req.access_path_id).await?;
    let rows = mappings_of(state, ctx, path.id).await?;
    if !rows.iter().any(|m| m.client_group_id == req.client_group_id) {
        return Err(StorError::not_found("volume_mapping", req.client_group_id));
    }
    let new_group = usable_group(state, ctx, path.id, req.new_client_group_id).await?;
    if rows.iter().any(|m| m.client_group_id == new_group.id) {
        return Err(StorError::invalid(format!("client group {} is already mapped", new_group.name)));
    }

    run_change(state, ctx, path, "change_client_group", move |state, ctx, path| async move {
        let desired: MappingSet = rows
            .iter()
            .map(|m| {
                let group = if m.client_group_id == req.client_group_id { new_group.id } else { m.client_group_id };
                (group, m.volume_id)
            })
            .collect();
        push(&state, &ctx, &path, &desired).await?;
        for row in rows.iter().filter(|m| m.client_group_id == req.client_group_id) {
            state
                .store
                .patch::<VolumeMapping>(row.id, json!({"client_group_id": new_group.id}))
                .await?;
        }
        state
            .store
            .patch::<VolumeClientGroup>(req.client_group_id, json!({"access_path_id": Value::Null}))
            .await?;
        state
            .store
            .patch::<VolumeClientGroup>(new_group.id, json!({"access_path_id": path.id}))
            .await?;
        Ok::<_, StorError>(())
    })
    .await
}

pub async fn handle_access_path_remove_mapping(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: MappingRequest,
) -> Result<Record<VolumeAccessPath>> {
    let path = state.store.fetch::<VolumeAccessPath>(ctx, req.access_path_id).await?;
    let rows = mappings_of(state, ctx, path.id).await?;
    let dropping: Vec<Record<VolumeMapping>> = rows
        .iter()
        .filter(|m| m.client_group_id == req.client_group_id && req.volume_ids.contains(&m.volume_id))
        .cloned()
        .collect();
    if dropping.len() != req.volume_ids.len() {
        return Err(StorError::not_found("volume_mapping", req.client_group_id));
    }

    run_change(state, ctx, path, "remove_mapping", move |state, ctx, path| async move {
        let mut desired = mapping_set(&rows);
        for row in &dropping {
            desired.remove(&(row.client_group_id, row.volume_id));
        }
        push(&state, &ctx, &path, &desired).await?;
        for row in &dropping {
            state.store.remove::<VolumeMapping>(row.id, json!({})).await?;
        }
        if !desired.iter().any(|(group, _)| *group == req.client_group_id) {
            state
                .store
                .patch::<VolumeClientGroup>(req.client_group_id, json!({"access_path_id": Value::Null}))
                .await?;
        }
        Ok::<_, StorError>(())
    })
    .await
}

pub async fn handle_client_group_create(
    state: &AdminState,
    ctx: &RequestContext,
    req: ClientGroupCreateRequest,
) -> Result<Record<VolumeClientGroup>> {
    if req.initiators.is_empty() {
        return Err(StorError::invalid("at least one initiator is required"));
    }
    if let Some(bad) = req.initiators.iter().find(|i| !valid_iqn(i)) {
        return Err(StorError::IqnMalformed { iqn: bad.clone() });
    }
    if state
        .store
        .first::<VolumeClientGroup>(ctx, &[Filter::eq("name", &req.name)])
        .await?
        .is_some()
    {
        return Err(StorError::NameDuplicate {
            resource: "volume_client_group".to_string(),
            name: req.name,
        });
    }
    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("volume_client_group").name(req.name.clone()))
        .await?;
    let outcome = state
        .store
        .create(
            &ctx.cluster_id,
            &VolumeClientGroup {
                name: req.name,
                initiators: req.initiators,
                access_path_id: None,
            },
        )
        .await;
    if let Ok(group) = &outcome {
        state.actions.attach(action_id, group.id).await?;
    }
    conclude(state, action_id, outcome).await
}

pub async fn handle_client_group_delete(
    state: &AdminState,
    ctx: &RequestContext,
    req: ClientGroupRequest,
) -> Result<Record<VolumeClientGroup>> {
    let group = state.store.fetch::<VolumeClientGroup>(ctx, req.client_group_id).await?;
    if group.access_path_id.is_some()
        || state
            .store
            .first::<VolumeMapping>(ctx, &[Filter::eq("client_group_id", group.id)])
            .await?
            .is_some()
    {
        return Err(StorError::precondition(format!("client group {} is mapped", group.name)));
    }
    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("volume_client_group")
                .id(group.id)
                .name(group.name.clone())
                .before(group.to_value()?),
        )
        .await?;
    let outcome = state
        .store
        .remove::<VolumeClientGroup>(group.id, json!({}))
        .await
        .map(|_| group);
    conclude(state, action_id, outcome).await
}
