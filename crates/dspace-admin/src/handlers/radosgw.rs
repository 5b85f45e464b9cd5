// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object gateways and the keepalived/haproxy routers in front of them.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dspace_protocol::api::{ROLE_OBJECT_GATEWAY, ROLE_RADOSGW_ROUTER, RgwInstallSpec, RouterInstallSpec};
use dspace_protocol::{RequestContext, Result, StorError};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{AdminState, abandon, complete, settle};
use crate::action_log::ActionTarget;
use crate::models::{GatewayStatus, Node, Radosgw, RadosgwRouter, RadosgwZone, Service};
use crate::store::{Filter, Record};

const DEFAULT_ZONE: &str = "default";
/// How long a fresh router's virtual ip may take to answer.
pub const VIP_WAIT: Duration = Duration::from_secs(30);
const VIP_POLL: Duration = Duration::from_secs(1);
const TOP_PRIORITY: u8 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct RadosgwCreateRequest {
    pub name: String,
    pub node_id: i64,
    pub ip_address: String,
    pub port: u16,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub zonegroup: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadosgwRequest {
    pub radosgw_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterCreateRequest {
    pub name: String,
    pub virtual_ip: String,
    pub virtual_router_id: u32,
    pub port: u16,
    #[serde(default)]
    pub https_port: Option<u16>,
    pub nodes: Vec<i64>,
    pub radosgw_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterUpdateRequest {
    pub router_id: i64,
    pub radosgw_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterRequest {
    pub router_id: i64,
}

fn router_ports(router: &RadosgwRouter) -> impl Iterator<Item = u16> + '_ {
    std::iter::once(router.port).chain(router.https_port)
}

/// Any gateway or router on `node_id` already listening on `port`.
async fn port_taken(state: &AdminState, ctx: &RequestContext, node_id: i64, port: u16) -> Result<bool> {
    let gateways = state
        .store
        .all::<Radosgw>(ctx, &[Filter::eq("node_id", node_id), Filter::eq("port", port)])
        .await?;
    if !gateways.is_empty() {
        return Ok(true);
    }
    let routers = state.store.all::<RadosgwRouter>(ctx, &[]).await?;
    Ok(routers
        .iter()
        .any(|r| r.nodes.contains(&node_id) && router_ports(r).any(|p| p == port)))
}

/// Remove the supervisor rows of a daemon that no longer exists.
async fn drop_services(state: &AdminState, ctx: &RequestContext, role: &str, name: &str) -> Result<()> {
    let rows = state
        .store
        .all::<Service>(ctx, &[Filter::eq("role", role), Filter::eq("name", name)])
        .await?;
    for row in rows {
        state.store.remove::<Service>(row.id, json!({})).await?;
    }
    Ok(())
}

/// The named zone row, created with default realm and zonegroup when absent.
pub(crate) async fn zone_for(
    state: &AdminState,
    ctx: &RequestContext,
    zone: Option<&str>,
    realm: Option<&str>,
    zonegroup: Option<&str>,
) -> Result<Record<RadosgwZone>> {
    let name = zone.unwrap_or(DEFAULT_ZONE);
    if let Some(zone) = state
        .store
        .first::<RadosgwZone>(ctx, &[Filter::eq("name", name)])
        .await?
    {
        return Ok(zone);
    }
    state
        .store
        .create(
            &ctx.cluster_id,
            &RadosgwZone {
                name: name.to_string(),
                realm: realm.unwrap_or(DEFAULT_ZONE).to_string(),
                zonegroup: zonegroup.unwrap_or(DEFAULT_ZONE).to_string(),
            },
        )
        .await
}

pub async fn handle_radosgw_create(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: RadosgwCreateRequest,
) -> Result<Record<Radosgw>> {
    let node = state.store.fetch::<Node>(ctx, req.node_id).await?;
    if !node.role_object_gateway {
        return Err(StorError::invalid(format!("node {} has no object gateway role", node.hostname)));
    }
    state.check_gateway_ip(&ctx.cluster_id, &req.ip_address).await?;
    let (min, max) = (state.config.rgw_min_port, state.config.rgw_max_port);
    if !(min..=max).contains(&req.port) {
        return Err(StorError::invalid(format!("port must be between {min} and {max}")));
    }
    if port_taken(state, ctx, node.id, req.port).await? {
        return Err(StorError::PortInUse { port: req.port });
    }
    if state
        .store
        .first::<Radosgw>(ctx, &[Filter::eq("name", &req.name)])
        .await?
        .is_some()
    {
        return Err(StorError::NameDuplicate {
            resource: "radosgw".to_string(),
            name: req.name,
        });
    }
    let zone = zone_for(
        state,
        ctx,
        req.zone.as_deref(),
        req.realm.as_deref(),
        req.zonegroup.as_deref(),
    )
    .await?;

    let gateway = state
        .store
        .create(
            &ctx.cluster_id,
            &Radosgw {
                name: req.name.clone(),
                node_id: node.id,
                ip_address: req.ip_address.clone(),
                port: req.port,
                zone_id: zone.id,
                status: GatewayStatus::Creating,
            },
        )
        .await?;
    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("radosgw").id(gateway.id).name(gateway.name.clone()))
        .await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_gateway = gateway.clone();
    state
        .tasks
        .submit("radosgw_create", async move {
            let outcome = install_gateway(&task_state, &task_ctx, &task_gateway, &node, &zone).await;
            let outcome = settle(&task_state, task_gateway.id, GatewayStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "radosgw", "create", outcome).await
        })
        .await?;
    Ok(gateway)
}

async fn install_gateway(
    state: &AdminState,
    ctx: &RequestContext,
    gateway: &Record<Radosgw>,
    node: &Node,
    zone: &RadosgwZone,
) -> Result<Record<Radosgw>> {
    let (realm, zonegroup, zone_name) = (zone.realm.clone(), zone.zonegroup.clone(), zone.name.clone());
    let created = state
        .registry
        .with_agent(ctx, gateway.node_id, |agent| async move {
            agent.radosgw_zone_ensure(ctx, &realm, &zonegroup, &zone_name).await
        })
        .await?;
    if created {
        info!(zone = %zone.name, "radosgw zone created");
    }

    let section = gateway.config_section();
    state.ceph.config_set(&section, "host", &node.hostname).await?;
    state
        .ceph
        .config_set(
            &section,
            "rgw_frontends",
            &format!("beast endpoint={}:{}", gateway.ip_address, gateway.port),
        )
        .await?;
    state.ceph.config_set(&section, "rgw_zone", &zone.name).await?;

    let spec = RgwInstallSpec {
        name: gateway.name.clone(),
        ip: gateway.ip_address.clone(),
        port: gateway.port,
        zone: zone.name.clone(),
    };
    state
        .registry
        .with_agent(ctx, gateway.node_id, |agent| async move { agent.ceph_rgw_install(ctx, &spec).await })
        .await?;
    state
        .store
        .transition(
            gateway.id,
            &[Filter::eq("status", GatewayStatus::Creating)],
            json!({"status": GatewayStatus::Active}),
        )
        .await
}

pub async fn handle_radosgw_delete(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: RadosgwRequest,
) -> Result<Record<Radosgw>> {
    let gateway = state.store.fetch::<Radosgw>(ctx, req.radosgw_id).await?;
    let routers = state.store.all::<RadosgwRouter>(ctx, &[]).await?;
    if let Some(router) = routers.iter().find(|r| r.radosgw_ids.contains(&gateway.id)) {
        return Err(StorError::precondition(format!(
            "radosgw {} is behind router {}",
            gateway.name, router.name
        )));
    }
    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("radosgw")
                .id(gateway.id)
                .name(gateway.name.clone())
                .before(gateway.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            gateway.id,
            &[Filter::one_of(
                "status",
                [GatewayStatus::Active, GatewayStatus::Inactive, GatewayStatus::Error],
            )],
            json!({"status": GatewayStatus::Deleting}),
        )
        .await;
    let gateway: Record<Radosgw> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_gateway = gateway.clone();
    state
        .tasks
        .submit("radosgw_delete", async move {
            let outcome = uninstall_gateway(&task_state, &task_ctx, &task_gateway).await;
            let outcome = settle(&task_state, task_gateway.id, GatewayStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "radosgw", "delete", outcome).await
        })
        .await?;
    Ok(gateway)
}

async fn uninstall_gateway(state: &AdminState, ctx: &RequestContext, gateway: &Record<Radosgw>) -> Result<Record<Radosgw>> {
    let name = gateway.name.clone();
    state
        .registry
        .with_agent(ctx, gateway.node_id, |agent| async move { agent.ceph_rgw_uninstall(ctx, &name).await })
        .await?;
    let section = gateway.config_section();
    for key in ["host", "rgw_frontends", "rgw_zone"] {
        state.ceph.config_remove(&section, key).await?;
    }
    drop_services(state, ctx, ROLE_OBJECT_GATEWAY, &gateway.name).await?;
    state.store.remove::<Radosgw>(gateway.id, json!({})).await?;
    info!(radosgw = %gateway.name, "radosgw removed");
    Ok(gateway.clone())
}

/// `ip:port` backends of the given gateways.
async fn backends(state: &AdminState, ctx: &RequestContext, ids: &[i64]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let gateway = state.store.fetch::<Radosgw>(ctx, *id).await?;
        out.push(format!("{}:{}", gateway.ip_address, gateway.port));
    }
    Ok(out)
}

fn router_spec(router: &RadosgwRouter, backends: &[String], member: usize) -> RouterInstallSpec {
    RouterInstallSpec {
        name: router.name.clone(),
        virtual_ip: router.virtual_ip.clone(),
        virtual_router_id: router.virtual_router_id,
        port: router.port,
        https_port: router.https_port,
        backends: backends.to_vec(),
        priority: TOP_PRIORITY.saturating_sub(member as u8),
    }
}

pub async fn handle_radosgw_router_create(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: RouterCreateRequest,
) -> Result<Record<RadosgwRouter>> {
    let members: BTreeSet<i64> = req.nodes.iter().copied().collect();
    if members.is_empty() || members.len() != req.nodes.len() {
        return Err(StorError::invalid("router needs distinct member nodes"));
    }
    if !(1..=255).contains(&req.virtual_router_id) {
        return Err(StorError::invalid("virtual router id must be between 1 and 255"));
    }
    if req.https_port == Some(req.port) {
        return Err(StorError::invalid("http and https ports must differ"));
    }
    for node_id in &req.nodes {
        let node = state.store.fetch::<Node>(ctx, *node_id).await?;
        if !node.role_object_gateway {
            return Err(StorError::invalid(format!("node {} has no object gateway role", node.hostname)));
        }
        for port in std::iter::once(req.port).chain(req.https_port) {
            if port_taken(state, ctx, node.id, port).await? {
                return Err(StorError::PortInUse { port });
            }
        }
    }
    state.check_gateway_ip(&ctx.cluster_id, &req.virtual_ip).await?;

    let routers = state.store.all::<RadosgwRouter>(ctx, &[]).await?;
    if routers.iter().any(|r| r.name == req.name) {
        return Err(StorError::NameDuplicate {
            resource: "radosgw_router".to_string(),
            name: req.name,
        });
    }
    if routers.iter().any(|r| r.virtual_router_id == req.virtual_router_id) {
        return Err(StorError::VirtualRouterIdInUse {
            vrid: req.virtual_router_id,
        });
    }
    if routers.iter().any(|r| r.virtual_ip == req.virtual_ip) {
        return Err(StorError::IpInUse { ip: req.virtual_ip });
    }
    let vip = req.virtual_ip.clone();
    let probe = req.nodes[0];
    let answering = state
        .registry
        .with_agent(ctx, probe, |agent| async move { agent.ping(ctx, &vip).await })
        .await?;
    if answering {
        return Err(StorError::IpInUse { ip: req.virtual_ip });
    }
    let backends = backends(state, ctx, &req.radosgw_ids).await?;

    let router = state
        .store
        .create(
            &ctx.cluster_id,
            &RadosgwRouter {
                name: req.name,
                virtual_ip: req.virtual_ip,
                virtual_router_id: req.virtual_router_id,
                port: req.port,
                https_port: req.https_port,
                nodes: req.nodes,
                radosgw_ids: req.radosgw_ids,
                status: GatewayStatus::Creating,
            },
        )
        .await?;
    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("radosgw_router").id(router.id).name(router.name.clone()))
        .await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_router = router.clone();
    state
        .tasks
        .submit("radosgw_router_create", async move {
            let outcome = install_router(&task_state, &task_ctx, &task_router, &backends).await;
            let outcome = settle(&task_state, task_router.id, GatewayStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "radosgw_router", "create", outcome).await
        })
        .await?;
    Ok(router)
}

async fn install_router(
    state: &AdminState,
    ctx: &RequestContext,
    router: &Record<RadosgwRouter>,
    backends: &[String],
) -> Result<Record<RadosgwRouter>> {
    for (member, node_id) in router.nodes.iter().enumerate() {
        let spec = router_spec(router, backends, member);
        state
            .registry
            .with_agent(ctx, *node_id, |agent| async move { agent.rgw_router_install(ctx, &spec).await })
            .await?;
    }
    wait_for_vip(state, ctx, router).await?;
    state
        .store
        .transition(
            router.id,
            &[Filter::eq("status", GatewayStatus::Creating)],
            json!({"status": GatewayStatus::Active}),
        )
        .await
}

/// Ping the virtual ip from the first member until it answers.
async fn wait_for_vip(state: &AdminState, ctx: &RequestContext, router: &RadosgwRouter) -> Result<()> {
    let probe = router
        .nodes
        .first()
        .copied()
        .ok_or_else(|| StorError::invalid(format!("router {} has no members", router.name)))?;
    let deadline = tokio::time::Instant::now() + VIP_WAIT;
    loop {
        let vip = router.virtual_ip.clone();
        let answered = state
            .registry
            .with_agent(ctx, probe, |agent| async move { agent.ping(ctx, &vip).await })
            .await;
        match answered {
            Ok(true) => {
                info!(router = %router.name, vip = %router.virtual_ip, "virtual ip is up");
                return Ok(());
            }
            Ok(false) => debug!(router = %router.name, "virtual ip not answering yet"),
            Err(e) => warn!(router = %router.name, error = %e, "virtual ip probe failed"),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(StorError::CommandTimeout {
                command: format!("ping {}", router.virtual_ip),
                seconds: VIP_WAIT.as_secs(),
            });
        }
        tokio::time::sleep(VIP_POLL).await;
    }
}

/// Point a router at a different set of gateways.
pub async fn handle_radosgw_router_update(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: RouterUpdateRequest,
) -> Result<Record<RadosgwRouter>> {
    let router = state.store.fetch::<RadosgwRouter>(ctx, req.router_id).await?;
    let backends = backends(state, ctx, &req.radosgw_ids).await?;
    let action_id = state
        .actions
        .begin(
            ctx,
            "update",
            ActionTarget::new("radosgw_router")
                .id(router.id)
                .name(router.name.clone())
                .before(router.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            router.id,
            &[Filter::one_of("status", [GatewayStatus::Active, GatewayStatus::Inactive])],
            json!({"status": GatewayStatus::Processing}),
        )
        .await;
    let router: Record<RadosgwRouter> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_router = router.clone();
    state
        .tasks
        .submit("radosgw_router_update", async move {
            let outcome = update_router(&task_state, &task_ctx, &task_router, &backends, &req.radosgw_ids).await;
            let outcome = settle(&task_state, task_router.id, GatewayStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "radosgw_router", "update", outcome).await
        })
        .await?;
    Ok(router)
}

async fn update_router(
    state: &AdminState,
    ctx: &RequestContext,
    router: &Record<RadosgwRouter>,
    backends: &[String],
    radosgw_ids: &[i64],
) -> Result<Record<RadosgwRouter>> {
    for (member, node_id) in router.nodes.iter().enumerate() {
        let spec = router_spec(router, backends, member);
        state
            .registry
            .with_agent(ctx, *node_id, |agent| async move { agent.rgw_router_update(ctx, &spec).await })
            .await?;
    }
    state
        .store
        .transition(
            router.id,
            &[Filter::eq("status", GatewayStatus::Processing)],
            json!({"status": GatewayStatus::Active, "radosgw_ids": radosgw_ids}),
        )
        .await
}

pub async fn handle_radosgw_router_delete(
    state: &Arc<AdminState>,
    ctx: &RequestContext,
    req: RouterRequest,
) -> Result<Record<RadosgwRouter>> {
    let router = state.store.fetch::<RadosgwRouter>(ctx, req.router_id).await?;
    let action_id = state
        .actions
        .begin(
            ctx,
            "delete",
            ActionTarget::new("radosgw_router")
                .id(router.id)
                .name(router.name.clone())
                .before(router.to_value()?),
        )
        .await?;
    let claimed = state
        .store
        .transition(
            router.id,
            &[Filter::one_of(
                "status",
                [GatewayStatus::Active, GatewayStatus::Inactive, GatewayStatus::Error],
            )],
            json!({"status": GatewayStatus::Deleting}),
        )
        .await;
    let router: Record<RadosgwRouter> = abandon(state, action_id, claimed).await?;

    let task_state = state.clone();
    let task_ctx = ctx.clone();
    let task_router = router.clone();
    state
        .tasks
        .submit("radosgw_router_delete", async move {
            let outcome = uninstall_router(&task_state, &task_ctx, &task_router).await;
            let outcome = settle(&task_state, task_router.id, GatewayStatus::Error, outcome).await;
            complete(&task_state, &task_ctx, action_id, "radosgw_router", "delete", outcome).await
        })
        .await?;
    Ok(router)
}

async fn uninstall_router(
    state: &AdminState,
    ctx: &RequestContext,
    router: &Record<RadosgwRouter>,
) -> Result<Record<RadosgwRouter>> {
    for node_id in &router.nodes {
        let name = router.name.clone();
        state
            .registry
            .with_agent(ctx, *node_id, |agent| async move { agent.rgw_router_uninstall(ctx, &name).await })
            .await?;
    }
    drop_services(state, ctx, ROLE_RADOSGW_ROUTER, &router.name).await?;
    state.store.remove::<RadosgwRouter>(router.id, json!({})).await?;
    info!(router = %router.name, "router removed");
    Ok(router.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_priorities_descend() {
        let router = RadosgwRouter {
            name: "r1".into(),
            virtual_ip: "10.0.0.100".into(),
            virtual_router_id: 7,
            port: 80,
            https_port: Some(443),
            nodes: vec![1, 2],
            radosgw_ids: vec![],
            status: GatewayStatus::Creating,
        };
        let backends = vec!["10.0.0.1:7480".to_string()];
        assert_eq!(router_spec(&router, &backends, 0).priority, 100);
        assert_eq!(router_spec(&router, &backends, 1).priority, 99);
        assert_eq!(router_ports(&router).collect::<Vec<_>>(), vec![80, 443]);
    }
}
