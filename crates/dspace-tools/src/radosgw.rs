// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `radosgw-admin` wrapper: realm/zonegroup/zone and placement policies.

use std::sync::Arc;

use async_trait::async_trait;
use dspace_protocol::api::ObjectPolicySpec;
use tracing::info;

use crate::error::{Result, ToolKind};
use crate::executor::{CommandOutput, Executor, render};

/// Realm and zonegroup used when the operator does not name one.
pub const DEFAULT_REALM: &str = "default";
pub const DEFAULT_ZONEGROUP: &str = "default";

#[async_trait]
pub trait RadosgwAdmin: Send + Sync {
    /// Make sure the realm/zonegroup/zone triple exists; `true` when the zone was created.
    async fn zone_ensure(&self, realm: &str, zonegroup: &str, zone: &str) -> Result<bool>;
    async fn placement_create(&self, spec: &ObjectPolicySpec) -> Result<()>;
    async fn placement_modify(&self, spec: &ObjectPolicySpec) -> Result<()>;
    async fn placement_delete(&self, zone: &str, name: &str) -> Result<bool>;
    async fn placement_set_default(&self, name: &str) -> Result<()>;
    async fn period_update(&self) -> Result<()>;
}

pub struct RadosgwAdminCli {
    executor: Arc<dyn Executor>,
}

impl RadosgwAdminCli {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    async fn raw(&self, args: &[&str]) -> Result<CommandOutput> {
        self.executor.run("radosgw-admin", args).await
    }

    async fn admin(&self, args: &[&str]) -> Result<CommandOutput> {
        self.raw(args)
            .await?
            .check(ToolKind::RadosgwAdmin, &render("radosgw-admin", args))
    }

    /// Create, treating "already exists" (EEXIST, rc 17) as success.
    async fn create(&self, args: &[&str]) -> Result<bool> {
        let out = self.raw(args).await?;
        if out.rc == 17 || out.stderr.contains("File exists") {
            return Ok(false);
        }
        out.check(ToolKind::RadosgwAdmin, &render("radosgw-admin", args))?;
        Ok(true)
    }

    fn placement_args<'a>(verb: &'a str, spec: &'a ObjectPolicySpec) -> Vec<&'a str> {
        let mut args = vec![
            "zone",
            "placement",
            verb,
            "--rgw-zone",
            spec.zone.as_str(),
            "--placement-id",
            spec.name.as_str(),
            "--index-pool",
            spec.index_pool.as_str(),
            "--data-pool",
            spec.data_pool.as_str(),
        ];
        if let Some(compression) = &spec.compression {
            args.extend(["--compression", compression.as_str()]);
        }
        args
    }
}

#[async_trait]
impl RadosgwAdmin for RadosgwAdminCli {
    async fn zone_ensure(&self, realm: &str, zonegroup: &str, zone: &str) -> Result<bool> {
        let zone_arg = format!("--rgw-zone={zone}");
        if self.raw(&["zone", "get", &zone_arg]).await?.success() {
            return Ok(false);
        }
        let realm_arg = format!("--rgw-realm={realm}");
        let zonegroup_arg = format!("--rgw-zonegroup={zonegroup}");
        self.create(&["realm", "create", &realm_arg, "--default"]).await?;
        self.create(&[
            "zonegroup", "create", &zonegroup_arg, &realm_arg, "--master", "--default",
        ])
        .await?;
        let created = self
            .create(&["zone", "create", &zonegroup_arg, &zone_arg, "--master", "--default"])
            .await?;
        self.period_update().await?;
        info!(%realm, %zonegroup, %zone, "radosgw zone ready");
        Ok(created)
    }

    async fn placement_create(&self, spec: &ObjectPolicySpec) -> Result<()> {
        self.create(&[
            "zonegroup",
            "placement",
            "add",
            "--rgw-zonegroup",
            DEFAULT_ZONEGROUP,
            "--placement-id",
            &spec.name,
        ])
        .await?;
        self.admin(&Self::placement_args("add", spec)).await?;
        Ok(())
    }

    async fn placement_modify(&self, spec: &ObjectPolicySpec) -> Result<()> {
        self.admin(&Self::placement_args("modify", spec)).await?;
        Ok(())
    }

    async fn placement_delete(&self, zone: &str, name: &str) -> Result<bool> {
        let args = ["zone", "placement", "rm", "--rgw-zone", zone, "--placement-id", name];
        let removed = self
            .raw(&args)
            .await?
            .normalize(ToolKind::RadosgwAdmin, &render("radosgw-admin", &args))?;
        let args = [
            "zonegroup", "placement", "rm", "--rgw-zonegroup", DEFAULT_ZONEGROUP, "--placement-id", name,
        ];
        self.raw(&args)
            .await?
            .normalize(ToolKind::RadosgwAdmin, &render("radosgw-admin", &args))?;
        Ok(removed)
    }

    async fn placement_set_default(&self, name: &str) -> Result<()> {
        self.admin(&[
            "zonegroup", "placement", "default", "--rgw-zonegroup", DEFAULT_ZONEGROUP, "--placement-id", name,
        ])
        .await?;
        Ok(())
    }

    async fn period_update(&self) -> Result<()> {
        self.admin(&["period", "update", "--commit"]).await?;
        Ok(())
    }
}
