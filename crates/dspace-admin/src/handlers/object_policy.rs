// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage placement policies.
//!
//! A policy names the index pool and the data pool a zone stores bucket
//! metadata and objects in. The gateway side lives in the zonegroup
//! configuration, so every change ends with a period commit.

use dspace_protocol::api::ObjectPolicySpec;
use dspace_protocol::{RequestContext, Result, StorError};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::radosgw::zone_for;
use super::{AdminState, conclude};
use crate::action_log::ActionTarget;
use crate::models::{Node, ObjectPolicy, Pool, PoolRole, Radosgw, RadosgwZone};
use crate::store::{Filter, Record};

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectPolicyCreateRequest {
    pub name: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub zonegroup: Option<String>,
    pub index_pool_id: i64,
    pub data_pool_id: i64,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectPolicyRequest {
    pub policy_id: i64,
}

/// `pool_id` as a settled pool of `role`.
async fn placement_pool(state: &AdminState, ctx: &RequestContext, pool_id: i64, role: PoolRole) -> Result<Record<Pool>> {
    let pool = state.store.fetch::<Pool>(ctx, pool_id).await?;
    if pool.role != role {
        return Err(StorError::invalid(format!(
            "pool {} has role {:?}, expected {:?}",
            pool.display_name, pool.role, role
        )));
    }
    if !pool.status.is_usable() {
        return Err(StorError::invalid(format!("pool {} is not active", pool.display_name)));
    }
    Ok(pool)
}

/// A node able to run radosgw-admin for `zone`: one hosting a gateway of
/// the zone, else any object gateway node.
async fn zone_node(state: &AdminState, ctx: &RequestContext, zone_id: i64) -> Result<i64> {
    if let Some(gateway) = state
        .store
        .first::<Radosgw>(ctx, &[Filter::eq("zone_id", zone_id)])
        .await?
    {
        return Ok(gateway.node_id);
    }
    state
        .store
        .all::<Node>(ctx, &[])
        .await?
        .into_iter()
        .find(|n| n.role_object_gateway)
        .map(|n| n.id)
        .ok_or_else(|| StorError::invalid("no node carries the object gateway role"))
}

pub async fn handle_object_policy_create(
    state: &AdminState,
    ctx: &RequestContext,
    req: ObjectPolicyCreateRequest,
) -> Result<Record<ObjectPolicy>> {
    let index = placement_pool(state, ctx, req.index_pool_id, PoolRole::Index).await?;
    let data = placement_pool(state, ctx, req.data_pool_id, PoolRole::Gateway).await?;
    let zone = zone_for(
        state,
        ctx,
        req.zone.as_deref(),
        req.realm.as_deref(),
        req.zonegroup.as_deref(),
    )
    .await?;
    if state
        .store
        .first::<ObjectPolicy>(ctx, &[Filter::eq("zone_id", zone.id), Filter::eq("name", &req.name)])
        .await?
        .is_some()
    {
        return Err(StorError::NameDuplicate {
            resource: "object_policy".to_string(),
            name: req.name,
        });
    }
    let node_id = zone_node(state, ctx, zone.id).await?;

    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("object_policy").name(req.name.clone()))
        .await?;
    let outcome = create_policy(state, ctx, &req, &zone, &index, &data, node_id).await;
    if let Ok(policy) = &outcome {
        state.actions.attach(action_id, policy.id).await?;
    }
    conclude(state, action_id, outcome).await
}

async fn create_policy(
    state: &AdminState,
    ctx: &RequestContext,
    req: &ObjectPolicyCreateRequest,
    zone: &Record<RadosgwZone>,
    index: &Record<Pool>,
    data: &Record<Pool>,
    node_id: i64,
) -> Result<Record<ObjectPolicy>> {
    let spec = ObjectPolicySpec {
        name: req.name.clone(),
        zone: zone.name.clone(),
        index_pool: index.pool_name.clone(),
        data_pool: data.pool_name.clone(),
        compression: req.compression.clone(),
    };
    let (realm, zonegroup, zone_name) = (zone.realm.clone(), zone.zonegroup.clone(), zone.name.clone());
    let is_default = req.default;
    state
        .registry
        .with_agent(ctx, node_id, |agent| async move {
            agent.radosgw_zone_ensure(ctx, &realm, &zonegroup, &zone_name).await?;
            agent.create_object_policy(ctx, &spec).await?;
            if is_default {
                agent.set_default_object_policy(ctx, &spec.name).await?;
            }
            agent.period_update(ctx).await
        })
        .await?;

    if req.default {
        clear_default(state, ctx, zone.id).await?;
    }
    let policy = state
        .store
        .create(
            &ctx.cluster_id,
            &ObjectPolicy {
                name: req.name.clone(),
                zone_id: zone.id,
                index_pool_id: index.id,
                data_pool_id: data.id,
                compression: req.compression.clone(),
                is_default: req.default,
            },
        )
        .await?;
    info!(policy = %policy.name, zone = %zone.name, "object policy created");
    Ok(policy)
}

async fn clear_default(state: &AdminState, ctx: &RequestContext, zone_id: i64) -> Result<()> {
    let previous = state
        .store
        .all::<ObjectPolicy>(ctx, &[Filter::eq("zone_id", zone_id), Filter::eq("is_default", true)])
        .await?;
    for policy in previous {
        state.store.patch::<ObjectPolicy>(policy.id, json!({"is_default": false})).await?;
    }
    Ok(())
}

pub async fn handle_object_policy_delete(
    state: &AdminState,
    ctx: &RequestContext,
    req: ObjectPolicyRequest,
) -> Result<Record<ObjectPolicy>> {
    let policy = state.store.fetch::<ObjectPolicy>(ctx, req.policy_id).await?;
    if policy.is_default {
        let siblings = state
            .store
            .all::<ObjectPolicy>(ctx, &[Filter::eq("zone_id", policy.zone_id)])
            .await?;
        if siblings.len() > 1 {
            return Err(StorError::precondition(format!(
                "{} is the default policy of its zone",
                policy.name
            )));
        }
    }
    let zone = state.store.load::<RadosgwZone>(policy.zone_id).await?;
    let node_id = zone_node(state, ctx, zone.id).await?;

    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("object_policy")
                .id(policy.id)
                .name(policy.name.clone())
                .before(policy.to_value()?),
        )
        .await?;
    let outcome = delete_policy(state, ctx, &policy, &zone, node_id).await;
    conclude(state, action_id, outcome).await
}

async fn delete_policy(
    state: &AdminState,
    ctx: &RequestContext,
    policy: &Record<ObjectPolicy>,
    zone: &RadosgwZone,
    node_id: i64,
) -> Result<Record<ObjectPolicy>> {
    let (zone_name, name) = (zone.name.clone(), policy.name.clone());
    let removed = state
        .registry
        .with_agent(ctx, node_id, |agent| async move {
            let removed = agent.delete_object_policy(ctx, &zone_name, &name).await?;
            agent.period_update(ctx).await?;
            Ok(removed)
        })
        .await?;
    if !removed {
        info!(policy = %policy.name, "object policy already gone from the zonegroup");
    }
    state.store.remove::<ObjectPolicy>(policy.id, json!({})).await?;
    Ok(policy.clone())
}
