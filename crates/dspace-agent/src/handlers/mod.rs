// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent method implementations.
//!
//! Everything here acts on the local node only. Installs and uninstalls of
//! daemons take the node install lock so the admin cannot interleave two of
//! them on one host.

pub mod disk;
pub mod iscsi;
pub mod logs;
pub mod osd;
pub mod radosgw;
pub mod router;
pub mod service;

use std::sync::Arc;

use dspace_protocol::{RequestContext, Result, StorError};
use dspace_tools::executor::render;
use dspace_tools::{
    ContainerRuntime, DiskProbe, Docker, Executor, IscsiTool, LocalExecutor, Lio, LsblkProbe, PackageManager,
    RadosgwAdmin, RadosgwAdminCli, ServiceControl, Systemctl, ToolKind, Yum,
};
use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::admin_client::AdminApi;
use crate::config::Config;

/// Host tools the agent drives.
#[derive(Clone)]
pub struct AgentTools {
    pub exec: Arc<dyn Executor>,
    pub disks: Arc<dyn DiskProbe>,
    pub systemd: Arc<dyn ServiceControl>,
    pub docker: Arc<dyn ContainerRuntime>,
    pub iscsi: Arc<dyn IscsiTool>,
    pub radosgw: Arc<dyn RadosgwAdmin>,
    pub packages: Arc<dyn PackageManager>,
}

impl AgentTools {
    /// Production tools running commands on this host.
    pub fn local(config: &Config) -> Self {
        let exec: Arc<dyn Executor> = Arc::new(LocalExecutor::default());
        Self {
            disks: Arc::new(LsblkProbe::new(exec.clone())),
            systemd: Arc::new(Systemctl::new(exec.clone())),
            docker: Arc::new(Docker::new(exec.clone())),
            iscsi: Arc::new(Lio::new(&config.iscsi_configfs, &config.iscsi_save_file)),
            radosgw: Arc::new(RadosgwAdminCli::new(exec.clone())),
            packages: Arc::new(Yum::new(exec.clone())),
            exec,
        }
    }
}

/// Shared state of every agent method.
pub struct AgentState {
    pub config: Config,
    pub tools: AgentTools,
    pub admin: Arc<dyn AdminApi>,
    install_lock: Mutex<()>,
}

impl AgentState {
    pub fn new(config: Config, tools: AgentTools, admin: Arc<dyn AdminApi>) -> Self {
        Self {
            config,
            tools,
            admin,
            install_lock: Mutex::new(()),
        }
    }

    /// Context for calls this agent starts on its own.
    pub fn ctx(&self) -> RequestContext {
        RequestContext::admin(self.config.cluster_id.clone())
    }

    /// Held for the whole of an install or uninstall.
    pub(crate) async fn install_guard(&self) -> MutexGuard<'_, ()> {
        self.install_lock.lock().await
    }

    /// Run `program` and fail unless it exits zero.
    pub(crate) async fn run_checked(&self, kind: ToolKind, program: &str, args: &[&str]) -> Result<String> {
        let out = self
            .tools
            .exec
            .run(program, args)
            .await?
            .check(kind, &render(program, args))?;
        Ok(out.stdout)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpecRequest<T> {
    pub spec: T,
}

/// Names that end up in paths, unit names and container names.
pub(crate) fn check_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StorError::invalid(format!("{kind} name {name:?} is not allowed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_name() {
        check_name("radosgw", "rgw-1.a_b").unwrap();
        for bad in ["", "../etc", ".hidden", "a b", "x/y"] {
            assert!(check_name("radosgw", bad).is_err(), "{bad}");
        }
    }
}
