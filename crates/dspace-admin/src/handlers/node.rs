// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node lookups, endpoint registration and the agent's service manifest.

use dspace_protocol::api::{
    DSA_SERVICE, ManagedService, NodeServiceManifest, ROLE_ADMIN, ROLE_BASE, ROLE_BLOCK_GATEWAY,
    ROLE_MONITOR, ROLE_OBJECT_GATEWAY, ROLE_RADOSGW_ROUTER, ROLE_STORAGE, ServiceKind, osd_unit,
    rgw_unit, router_container,
};
use dspace_protocol::{RequestContext, Result};
use serde::Deserialize;
use tracing::info;

use super::AdminState;
use crate::models::{Node, Osd, OsdStatus, Radosgw, RadosgwRouter};
use crate::registry::AGENT_SERVICE;
use crate::store::{Filter, Record};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeRequest {
    pub node_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterEndpointRequest {
    pub service: String,
    pub node_id: i64,
    pub ip: String,
    pub port: u16,
}

pub async fn handle_node_get(state: &AdminState, ctx: &RequestContext, req: NodeRequest) -> Result<Record<Node>> {
    state.store.fetch::<Node>(ctx, req.node_id).await
}

pub async fn handle_node_list(state: &AdminState, ctx: &RequestContext) -> Result<Vec<Record<Node>>> {
    state.store.all::<Node>(ctx, &[]).await
}

/// Written by every daemon on start-up so peers can find it.
pub async fn handle_rpc_service_register(
    state: &AdminState,
    ctx: &RequestContext,
    req: RegisterEndpointRequest,
) -> Result<()> {
    state.store.fetch::<Node>(ctx, req.node_id).await?;
    state
        .registry
        .register(&ctx.cluster_id, &req.service, req.node_id, &req.ip, req.port)
        .await?;
    if req.service == AGENT_SERVICE {
        let container = format!("{}-agent", state.config.image_namespace);
        state.supervisor.track_agent(ctx, req.node_id, &container).await?;
    }
    Ok(())
}

fn systemd(role: &str, name: impl Into<String>) -> ManagedService {
    let name = name.into();
    ManagedService {
        role: role.to_string(),
        service_name: name.clone(),
        name,
        kind: ServiceKind::Systemd,
    }
}

fn container(role: &str, name: impl Into<String>, container: impl Into<String>) -> ManagedService {
    ManagedService {
        role: role.to_string(),
        name: name.into(),
        service_name: container.into(),
        kind: ServiceKind::Container,
    }
}

/// Daemons the agent on `node_id` should watch and report.
pub async fn handle_node_services_manifest(
    state: &AdminState,
    ctx: &RequestContext,
    req: NodeRequest,
) -> Result<NodeServiceManifest> {
    let node = state.store.fetch::<Node>(ctx, req.node_id).await?;
    let ns = &state.config.image_namespace;
    let mut services = vec![
        container(ROLE_BASE, DSA_SERVICE, format!("{ns}-agent")),
        systemd(ROLE_BASE, "chronyd"),
        container(ROLE_BASE, "node-exporter", format!("{ns}-node-exporter")),
    ];

    if node.role_monitor {
        services.push(systemd(ROLE_MONITOR, format!("ceph-mon@{}", node.hostname)));
        services.push(systemd(ROLE_MONITOR, format!("ceph-mgr@{}", node.hostname)));
    }
    if node.role_admin {
        services.push(container(ROLE_ADMIN, "prometheus", format!("{ns}-prometheus")));
    }
    if node.role_storage {
        let osds = state
            .store
            .all::<Osd>(
                ctx,
                &[
                    Filter::eq("node_id", node.id),
                    Filter::one_of("status", [OsdStatus::Active, OsdStatus::Inactive, OsdStatus::Offline]),
                ],
            )
            .await?;
        services.extend(osds.iter().map(|o| systemd(ROLE_STORAGE, osd_unit(o.osd_id))));
    }
    if node.role_object_gateway {
        let gateways = state
            .store
            .all::<Radosgw>(ctx, &[Filter::eq("node_id", node.id)])
            .await?;
        services.extend(gateways.iter().map(|g| ManagedService {
            role: ROLE_OBJECT_GATEWAY.to_string(),
            name: g.name.clone(),
            service_name: rgw_unit(&g.name),
            kind: ServiceKind::Systemd,
        }));
    }
    if node.role_block_gateway {
        services.push(systemd(ROLE_BLOCK_GATEWAY, "tcmu-runner"));
    }
    let routers = state.store.all::<RadosgwRouter>(ctx, &[]).await?;
    services.extend(
        routers
            .iter()
            .filter(|r| r.nodes.contains(&node.id))
            .map(|r| container(ROLE_RADOSGW_ROUTER, r.name.clone(), router_container(&r.name))),
    );

    info!(node_id = node.id, services = services.len(), "service manifest built");
    Ok(NodeServiceManifest {
        node_id: node.id,
        services,
    })
}
