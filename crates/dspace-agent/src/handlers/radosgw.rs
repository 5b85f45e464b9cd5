// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object gateway daemons and the radosgw-admin zone and placement calls.

use std::path::PathBuf;

use dspace_protocol::api::{ObjectPolicySpec, RgwInstallSpec, rgw_unit};
use dspace_protocol::{RequestContext, Result, StorError};
use dspace_tools::ToolKind;
use serde::Deserialize;
use tracing::{info, warn};

use super::{AgentState, NameRequest, SpecRequest, check_name};

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneEnsureRequest {
    pub realm: String,
    pub zonegroup: String,
    pub zone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDeleteRequest {
    pub zone: String,
    pub name: String,
}

fn entity(name: &str) -> String {
    format!("client.rgw.{name}")
}

/// Data dir holding the keyring of gateway `name`.
pub fn data_dir(state: &AgentState, name: &str) -> PathBuf {
    state
        .config
        .ceph_data_dir
        .join("radosgw")
        .join(format!("ceph-rgw.{name}"))
}

pub async fn handle_radosgw_zone_ensure(
    state: &AgentState,
    _ctx: &RequestContext,
    req: ZoneEnsureRequest,
) -> Result<bool> {
    let created = state
        .tools
        .radosgw
        .zone_ensure(&req.realm, &req.zonegroup, &req.zone)
        .await?;
    if created {
        info!(zone = %req.zone, zonegroup = %req.zonegroup, "radosgw zone created");
    }
    Ok(created)
}

pub async fn handle_ceph_rgw_install(
    state: &AgentState,
    _ctx: &RequestContext,
    req: SpecRequest<RgwInstallSpec>,
) -> Result<()> {
    let spec = req.spec;
    check_name("radosgw", &spec.name)?;
    let _guard = state.install_guard().await;
    info!(name = %spec.name, ip = %spec.ip, port = spec.port, zone = %spec.zone, "installing radosgw");
    state.tools.packages.install(&["ceph-radosgw"]).await?;

    let dir = data_dir(state, &spec.name);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| StorError::CommandFailed {
            reason: format!("create {}: {e}", dir.display()),
        })?;
    let keyring = dir.join("keyring").to_string_lossy().into_owned();
    let entity = entity(&spec.name);
    state
        .run_checked(
            ToolKind::Ceph,
            "ceph",
            &[
                "auth",
                "get-or-create",
                entity.as_str(),
                "mon",
                "allow rw",
                "osd",
                "allow rwx",
                "-o",
                keyring.as_str(),
            ],
        )
        .await?;

    let unit = rgw_unit(&spec.name);
    state.tools.systemd.enable(&unit).await?;
    state.tools.systemd.start(&unit).await?;
    info!(name = %spec.name, "radosgw installed");
    Ok(())
}

pub async fn handle_ceph_rgw_uninstall(state: &AgentState, _ctx: &RequestContext, req: NameRequest) -> Result<()> {
    check_name("radosgw", &req.name)?;
    let _guard = state.install_guard().await;
    info!(name = %req.name, "uninstalling radosgw");

    state.tools.systemd.rm(&rgw_unit(&req.name)).await?;
    let entity = entity(&req.name);
    if let Err(e) = state
        .run_checked(ToolKind::Ceph, "ceph", &["auth", "del", entity.as_str()])
        .await
    {
        warn!(name = %req.name, error = %e, "radosgw key not removed");
    }
    let dir = data_dir(state, &req.name);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(StorError::CommandFailed {
                reason: format!("remove {}: {e}", dir.display()),
            });
        }
    }
    info!(name = %req.name, "radosgw uninstalled");
    Ok(())
}

pub async fn handle_create_object_policy(
    state: &AgentState,
    _ctx: &RequestContext,
    req: SpecRequest<ObjectPolicySpec>,
) -> Result<()> {
    state.tools.radosgw.placement_create(&req.spec).await?;
    info!(policy = %req.spec.name, zone = %req.spec.zone, "object policy created");
    Ok(())
}

pub async fn handle_modify_object_policy(
    state: &AgentState,
    _ctx: &RequestContext,
    req: SpecRequest<ObjectPolicySpec>,
) -> Result<()> {
    state.tools.radosgw.placement_modify(&req.spec).await?;
    info!(policy = %req.spec.name, "object policy modified");
    Ok(())
}

pub async fn handle_delete_object_policy(
    state: &AgentState,
    _ctx: &RequestContext,
    req: PolicyDeleteRequest,
) -> Result<bool> {
    let removed = state.tools.radosgw.placement_delete(&req.zone, &req.name).await?;
    info!(policy = %req.name, removed, "object policy deleted");
    Ok(removed)
}

pub async fn handle_set_default_object_policy(
    state: &AgentState,
    _ctx: &RequestContext,
    req: NameRequest,
) -> Result<()> {
    state.tools.radosgw.placement_set_default(&req.name).await?;
    info!(policy = %req.name, "default object policy set");
    Ok(())
}

pub async fn handle_period_update(state: &AgentState, _ctx: &RequestContext) -> Result<()> {
    state.tools.radosgw.period_update().await?;
    info!("radosgw period committed");
    Ok(())
}
