// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon control through systemd units and docker containers.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dspace_protocol::api::ServiceStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ToolError, ToolKind};
use crate::executor::{Executor, render};

/// State of a unit or container as the host reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Inactive,
    Running,
    Missing,
}

impl UnitStatus {
    /// Heartbeat status reported for this unit state.
    pub fn service_status(&self) -> ServiceStatus {
        match self {
            UnitStatus::Active | UnitStatus::Running => ServiceStatus::Active,
            UnitStatus::Inactive | UnitStatus::Missing => ServiceStatus::Inactive,
        }
    }
}

/// Start/stop verbs are idempotent: acting on an already stopped or
/// missing unit is not an error.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn status(&self, name: &str) -> Result<UnitStatus>;
    async fn start(&self, name: &str) -> Result<()>;
    async fn restart(&self, name: &str) -> Result<()>;
    async fn stop(&self, name: &str) -> Result<()>;
    async fn enable(&self, name: &str) -> Result<()>;
    async fn disable(&self, name: &str) -> Result<()>;
    /// Remove the container or unit; `false` when it did not exist.
    async fn rm(&self, name: &str) -> Result<bool>;
}

pub struct Systemctl {
    executor: Arc<dyn Executor>,
}

impl Systemctl {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    async fn systemctl(&self, verb: &str, name: &str) -> Result<bool> {
        let args = [verb, name];
        self.executor
            .run("systemctl", &args)
            .await?
            .normalize(ToolKind::Systemd, &render("systemctl", &args))
    }
}

#[async_trait]
impl ServiceControl for Systemctl {
    async fn status(&self, name: &str) -> Result<UnitStatus> {
        let out = self.executor.run("systemctl", &["is-active", name]).await?;
        let state = out.stdout.trim();
        Ok(match state {
            "active" | "activating" | "reloading" => UnitStatus::Active,
            _ if out.stderr.contains("not loaded") || out.stderr.contains("could not be found") => {
                UnitStatus::Missing
            }
            _ => UnitStatus::Inactive,
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.systemctl("start", name).await?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        info!(unit = %name, "restarting unit");
        self.systemctl("restart", name).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        if !self.systemctl("stop", name).await? {
            debug!(unit = %name, "unit not loaded, nothing to stop");
        }
        Ok(())
    }

    async fn enable(&self, name: &str) -> Result<()> {
        self.systemctl("enable", name).await?;
        Ok(())
    }

    async fn disable(&self, name: &str) -> Result<()> {
        self.systemctl("disable", name).await?;
        Ok(())
    }

    async fn rm(&self, name: &str) -> Result<bool> {
        self.stop(name).await?;
        self.systemctl("disable", name).await
    }
}

/// Container to create with `docker run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub volumes: Vec<(String, String)>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default)]
    pub command: Vec<String>,
}

/// A [`ServiceControl`] that can also create containers.
#[async_trait]
pub trait ContainerRuntime: ServiceControl {
    /// Create and start a container, replacing one with the same name.
    async fn run(&self, spec: &ContainerSpec) -> Result<()>;
}

pub struct Docker {
    executor: Arc<dyn Executor>,
    /// Local daemon socket; `None` when commands run on another host.
    socket: Option<PathBuf>,
}

impl Docker {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            socket: Some(PathBuf::from("/var/run/docker.sock")),
        }
    }

    /// Docker driven through a remote executor, e.g. over SSH.
    pub fn remote(executor: Arc<dyn Executor>) -> Self {
        Self { executor, socket: None }
    }

    pub fn with_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    fn check_socket(&self) -> Result<()> {
        match &self.socket {
            Some(socket) if !socket.exists() => {
                Err(ToolError::DockerSocketMissing(socket.display().to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<bool> {
        self.check_socket()?;
        self.executor
            .run("docker", args)
            .await?
            .normalize(ToolKind::Docker, &render("docker", args))
    }
}

#[async_trait]
impl ServiceControl for Docker {
    async fn status(&self, name: &str) -> Result<UnitStatus> {
        self.check_socket()?;
        let out = self
            .executor
            .run("docker", &["inspect", "-f", "{{.State.Status}}", name])
            .await?;
        if out.is_missing() {
            return Ok(UnitStatus::Missing);
        }
        Ok(match out.stdout.trim() {
            "running" => UnitStatus::Running,
            _ => UnitStatus::Inactive,
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.docker(&["start", name]).await?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        info!(container = %name, "restarting container");
        self.docker(&["restart", name]).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.docker(&["stop", name]).await?;
        Ok(())
    }

    async fn enable(&self, name: &str) -> Result<()> {
        self.docker(&["update", "--restart=always", name]).await?;
        Ok(())
    }

    async fn disable(&self, name: &str) -> Result<()> {
        self.docker(&["update", "--restart=no", name]).await?;
        Ok(())
    }

    async fn rm(&self, name: &str) -> Result<bool> {
        self.docker(&["rm", "-f", name]).await
    }
}

#[async_trait]
impl ContainerRuntime for Docker {
    async fn run(&self, spec: &ContainerSpec) -> Result<()> {
        self.rm(&spec.name).await?;
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--restart=always".into(),
            "--name".into(),
            spec.name.clone(),
        ];
        if spec.privileged {
            args.push("--privileged".into());
        }
        if spec.host_network {
            args.push("--network=host".into());
        }
        for (k, v) in &spec.env {
            args.push("-e".into());
            args.push(format!("{k}={v}"));
        }
        for (host, container) in &spec.volumes {
            args.push("-v".into());
            args.push(format!("{host}:{container}"));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        if !self.docker(&args).await? {
            return Err(ToolError::NotFound(format!("image {}", spec.image)));
        }
        info!(container = %spec.name, image = %spec.image, "container started");
        Ok(())
    }
}
