// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host package manager.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Result, ToolKind};
use crate::executor::{Executor, render};

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn is_installed(&self, name: &str) -> Result<bool>;
    /// Install whatever of `names` is missing.
    async fn install(&self, names: &[&str]) -> Result<()>;
    async fn remove(&self, names: &[&str]) -> Result<()>;
}

/// `rpm`/`yum` based hosts.
pub struct Yum {
    executor: Arc<dyn Executor>,
}

impl Yum {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl PackageManager for Yum {
    async fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.executor.run("rpm", &["-q", name]).await?.success())
    }

    async fn install(&self, names: &[&str]) -> Result<()> {
        let mut missing = Vec::new();
        for name in names {
            if !self.is_installed(name).await? {
                missing.push(*name);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        let mut args = vec!["install", "-y"];
        args.extend(missing.iter().copied());
        self.executor
            .run("yum", &args)
            .await?
            .check(ToolKind::Shell, &render("yum", &args))?;
        info!(packages = ?missing, "packages installed");
        Ok(())
    }

    async fn remove(&self, names: &[&str]) -> Result<()> {
        let mut args = vec!["remove", "-y"];
        args.extend(names.iter().copied());
        self.executor
            .run("yum", &args)
            .await?
            .normalize(ToolKind::Shell, &render("yum", &args))?;
        Ok(())
    }
}
