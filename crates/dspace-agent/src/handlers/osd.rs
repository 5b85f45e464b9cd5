// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Osd daemons on this node, prepared with `ceph-volume`.

use dspace_protocol::api::{OsdInstallSpec, osd_unit};
use dspace_protocol::{RequestContext, Result};
use dspace_tools::ToolKind;
use serde::Deserialize;
use tracing::{info, warn};

use super::{AgentState, SpecRequest};

#[derive(Debug, Clone, Deserialize)]
pub struct OsdRequest {
    pub osd_id: i64,
}

fn dev(name: &str) -> String {
    format!("/dev/{name}")
}

/// `ceph-volume lvm prepare` arguments for `spec`.
///
/// A journal partition selects filestore; anything else is bluestore.
pub fn prepare_args(spec: &OsdInstallSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["lvm".into(), "prepare".into()];
    match &spec.journal_partition {
        Some(journal) => {
            args.extend(["--filestore".into(), "--journal".into(), dev(journal)]);
        }
        None => args.push("--bluestore".into()),
    }
    args.extend([
        "--osd-id".into(),
        spec.osd_id.to_string(),
        "--osd-fsid".into(),
        spec.fsid.clone(),
        "--data".into(),
        dev(&spec.disk_name),
    ]);
    if let Some(db) = &spec.db_partition {
        args.extend(["--block.db".into(), dev(db)]);
    }
    if let Some(wal) = &spec.wal_partition {
        args.extend(["--block.wal".into(), dev(wal)]);
    }
    if let Some(cache) = &spec.cache_partition {
        args.extend(["--cache-device".into(), dev(cache)]);
    }
    args
}

pub async fn handle_ceph_osd_install(
    state: &AgentState,
    _ctx: &RequestContext,
    req: SpecRequest<OsdInstallSpec>,
) -> Result<()> {
    let spec = req.spec;
    let _guard = state.install_guard().await;
    info!(osd_id = spec.osd_id, disk = %spec.disk_name, "installing osd");
    state.tools.packages.install(&["ceph-osd"]).await?;

    let args = prepare_args(&spec);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    state.run_checked(ToolKind::Ceph, "ceph-volume", &args).await?;

    let id = spec.osd_id.to_string();
    state
        .run_checked(
            ToolKind::Ceph,
            "ceph-volume",
            &["lvm", "activate", "--no-systemd", id.as_str(), spec.fsid.as_str()],
        )
        .await?;

    let unit = osd_unit(spec.osd_id);
    state.tools.systemd.enable(&unit).await?;
    state.tools.systemd.start(&unit).await?;
    info!(osd_id = spec.osd_id, "osd installed");
    Ok(())
}

pub async fn handle_ceph_osd_uninstall(
    state: &AgentState,
    _ctx: &RequestContext,
    req: SpecRequest<OsdInstallSpec>,
) -> Result<()> {
    let spec = req.spec;
    let _guard = state.install_guard().await;
    info!(osd_id = spec.osd_id, "uninstalling osd");

    state.tools.systemd.rm(&osd_unit(spec.osd_id)).await?;
    let id = spec.osd_id.to_string();
    state
        .run_checked(ToolKind::Ceph, "ceph-volume", &["lvm", "zap", "--destroy", "--osd-id", id.as_str()])
        .await?;

    // partitions stay, only their contents go
    let partitions = [
        &spec.db_partition,
        &spec.wal_partition,
        &spec.cache_partition,
        &spec.journal_partition,
    ];
    for partition in partitions.into_iter().flatten() {
        let path = dev(partition);
        if let Err(e) = state
            .run_checked(ToolKind::Ceph, "ceph-volume", &["lvm", "zap", path.as_str()])
            .await
        {
            warn!(osd_id = spec.osd_id, partition = %path, error = %e, "partition not wiped");
        }
    }
    info!(osd_id = spec.osd_id, "osd uninstalled");
    Ok(())
}

pub async fn handle_ceph_osd_restart(state: &AgentState, _ctx: &RequestContext, req: OsdRequest) -> Result<()> {
    state.tools.systemd.restart(&osd_unit(req.osd_id)).await?;
    info!(osd_id = req.osd_id, "osd restarted");
    Ok(())
}

/// Stop the daemon of an osd whose disk went away.
pub async fn handle_ceph_osd_offline(state: &AgentState, _ctx: &RequestContext, req: OsdRequest) -> Result<()> {
    state.tools.systemd.stop(&osd_unit(req.osd_id)).await?;
    info!(osd_id = req.osd_id, "osd stopped");
    Ok(())
}
