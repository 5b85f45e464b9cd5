// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed admin-side view of the node agent RPC surface.
//!
//! Install and uninstall calls run without a timeout; everything else uses
//! the client's short-call default.

use std::sync::Arc;

use async_trait::async_trait;
use dspace_protocol::api::{
    IscsiMapping, IscsiTargetSpec, LedState, ObjectPolicySpec, OsdInstallSpec, PartitionInfo,
    RgwInstallSpec, RouterInstallSpec, ServiceStatus,
};
use dspace_protocol::{CallTimeout, RequestContext, Result, RpcClient};
use serde_json::{Value, json};

#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn check_dsa_status(&self, ctx: &RequestContext) -> Result<bool>;

    async fn disk_partitions_create(
        &self,
        ctx: &RequestContext,
        disk_name: &str,
        num: u32,
    ) -> Result<Vec<PartitionInfo>>;
    async fn disk_partitions_remove(&self, ctx: &RequestContext, disk_name: &str) -> Result<()>;
    async fn disk_light(&self, ctx: &RequestContext, disk_name: &str, led: LedState) -> Result<()>;
    async fn disk_smart_get(&self, ctx: &RequestContext, disk_name: &str) -> Result<Value>;

    async fn ceph_osd_install(&self, ctx: &RequestContext, spec: &OsdInstallSpec) -> Result<()>;
    async fn ceph_osd_uninstall(&self, ctx: &RequestContext, spec: &OsdInstallSpec) -> Result<()>;
    async fn ceph_osd_restart(&self, ctx: &RequestContext, osd_id: i64) -> Result<()>;

    async fn radosgw_zone_ensure(&self, ctx: &RequestContext, realm: &str, zonegroup: &str, zone: &str)
    -> Result<bool>;
    async fn ceph_rgw_install(&self, ctx: &RequestContext, spec: &RgwInstallSpec) -> Result<()>;
    async fn ceph_rgw_uninstall(&self, ctx: &RequestContext, name: &str) -> Result<()>;

    async fn create_object_policy(&self, ctx: &RequestContext, spec: &ObjectPolicySpec) -> Result<()>;
    async fn delete_object_policy(&self, ctx: &RequestContext, zone: &str, name: &str) -> Result<bool>;
    async fn set_default_object_policy(&self, ctx: &RequestContext, name: &str) -> Result<()>;
    /// Commit pending realm changes so every gateway picks them up.
    async fn period_update(&self, ctx: &RequestContext) -> Result<()>;

    async fn rgw_router_install(&self, ctx: &RequestContext, spec: &RouterInstallSpec) -> Result<()>;
    async fn rgw_router_update(&self, ctx: &RequestContext, spec: &RouterInstallSpec) -> Result<()>;
    async fn rgw_router_uninstall(&self, ctx: &RequestContext, name: &str) -> Result<()>;

    async fn systemd_service_restart(&self, ctx: &RequestContext, name: &str) -> Result<()>;
    async fn systemd_service_status(&self, ctx: &RequestContext, name: &str) -> Result<ServiceStatus>;
    async fn docker_service_restart(&self, ctx: &RequestContext, name: &str) -> Result<()>;
    async fn docker_service_status(&self, ctx: &RequestContext, name: &str) -> Result<ServiceStatus>;

    async fn iscsi_target_create(&self, ctx: &RequestContext, spec: &IscsiTargetSpec) -> Result<()>;
    async fn iscsi_target_delete(&self, ctx: &RequestContext, iqn: &str) -> Result<bool>;
    async fn iscsi_mappings_apply(&self, ctx: &RequestContext, iqn: &str, mappings: &[IscsiMapping])
    -> Result<()>;

    /// Whether `ip` answers from this node.
    async fn ping(&self, ctx: &RequestContext, ip: &str) -> Result<bool>;
}

/// [`AgentApi`] over a QUIC [`RpcClient`].
pub struct RpcAgentClient {
    client: Arc<RpcClient>,
}

impl RpcAgentClient {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    async fn short<T: serde::de::DeserializeOwned>(&self, ctx: &RequestContext, method: &str, params: Value) -> Result<T> {
        self.client.call(ctx, method, &params, CallTimeout::Default).await
    }

    async fn long(&self, ctx: &RequestContext, method: &str, params: Value) -> Result<()> {
        self.client.call(ctx, method, &params, CallTimeout::Unbounded).await
    }
}

#[async_trait]
impl AgentApi for RpcAgentClient {
    async fn check_dsa_status(&self, ctx: &RequestContext) -> Result<bool> {
        self.short(ctx, "check_dsa_status", json!({})).await
    }

    async fn disk_partitions_create(
        &self,
        ctx: &RequestContext,
        disk_name: &str,
        num: u32,
    ) -> Result<Vec<PartitionInfo>> {
        self.client
            .call(
                ctx,
                "disk_partitions_create",
                &json!({"disk_name": disk_name, "num": num}),
                CallTimeout::Unbounded,
            )
            .await
    }

    async fn disk_partitions_remove(&self, ctx: &RequestContext, disk_name: &str) -> Result<()> {
        self.long(ctx, "disk_partitions_remove", json!({"disk_name": disk_name})).await
    }

    async fn disk_light(&self, ctx: &RequestContext, disk_name: &str, led: LedState) -> Result<()> {
        self.short(ctx, "disk_light", json!({"disk_name": disk_name, "led": led})).await
    }

    async fn disk_smart_get(&self, ctx: &RequestContext, disk_name: &str) -> Result<Value> {
        self.short(ctx, "disk_smart_get", json!({"disk_name": disk_name})).await
    }

    async fn ceph_osd_install(&self, ctx: &RequestContext, spec: &OsdInstallSpec) -> Result<()> {
        self.long(ctx, "ceph_osd_install", json!({"spec": spec})).await
    }

    async fn ceph_osd_uninstall(&self, ctx: &RequestContext, spec: &OsdInstallSpec) -> Result<()> {
        self.long(ctx, "ceph_osd_uninstall", json!({"spec": spec})).await
    }

    async fn ceph_osd_restart(&self, ctx: &RequestContext, osd_id: i64) -> Result<()> {
        self.short(ctx, "ceph_osd_restart", json!({"osd_id": osd_id})).await
    }

    async fn radosgw_zone_ensure(
        &self,
        ctx: &RequestContext,
        realm: &str,
        zonegroup: &str,
        zone: &str,
    ) -> Result<bool> {
        self.client
            .call(
                ctx,
                "radosgw_zone_ensure",
                &json!({"realm": realm, "zonegroup": zonegroup, "zone": zone}),
                CallTimeout::Unbounded,
            )
            .await
    }

    async fn ceph_rgw_install(&self, ctx: &RequestContext, spec: &RgwInstallSpec) -> Result<()> {
        self.long(ctx, "ceph_rgw_install", json!({"spec": spec})).await
    }

    async fn ceph_rgw_uninstall(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        self.long(ctx, "ceph_rgw_uninstall", json!({"name": name})).await
    }

    async fn create_object_policy(&self, ctx: &RequestContext, spec: &ObjectPolicySpec) -> Result<()> {
        self.short(ctx, "create_object_policy", json!({"spec": spec})).await
    }

    async fn delete_object_policy(&self, ctx: &RequestContext, zone: &str, name: &str) -> Result<bool> {
        self.short(ctx, "delete_object_policy", json!({"zone": zone, "name": name}))
            .await
    }

    async fn set_default_object_policy(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        self.short(ctx, "set_default_object_policy", json!({"name": name})).await
    }

    async fn period_update(&self, ctx: &RequestContext) -> Result<()> {
        self.long(ctx, "period_update", json!({})).await
    }

    async fn rgw_router_install(&self, ctx: &RequestContext, spec: &RouterInstallSpec) -> Result<()> {
        self.long(ctx, "rgw_router_install", json!({"spec": spec})).await
    }

    async fn rgw_router_update(&self, ctx: &RequestContext, spec: &RouterInstallSpec) -> Result<()> {
        self.long(ctx, "rgw_router_update", json!({"spec": spec})).await
    }

    async fn rgw_router_uninstall(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        self.long(ctx, "rgw_router_uninstall", json!({"name": name})).await
    }

    async fn systemd_service_restart(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        self.short(ctx, "systemd_service_restart", json!({"name": name})).await
    }

    async fn systemd_service_status(&self, ctx: &RequestContext, name: &str) -> Result<ServiceStatus> {
        self.short(ctx, "systemd_service_status", json!({"name": name})).await
    }

    async fn docker_service_restart(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        self.short(ctx, "docker_service_restart", json!({"name": name})).await
    }

    async fn docker_service_status(&self, ctx: &RequestContext, name: &str) -> Result<ServiceStatus> {
        self.short(ctx, "docker_service_status", json!({"name": name})).await
    }

    async fn iscsi_target_create(&self, ctx: &RequestContext, spec: &IscsiTargetSpec) -> Result<()> {
        self.short(ctx, "iscsi_target_create", json!({"spec": spec})).await
    }

    async fn iscsi_target_delete(&self, ctx: &RequestContext, iqn: &str) -> Result<bool> {
        self.short(ctx, "iscsi_target_delete", json!({"iqn": iqn})).await
    }

    async fn iscsi_mappings_apply(
        &self,
        ctx: &RequestContext,
        iqn: &str,
        mappings: &[IscsiMapping],
    ) -> Result<()> {
        self.short(ctx, "iscsi_mappings_apply", json!({"iqn": iqn, "mappings": mappings}))
            .await
    }

    async fn ping(&self, ctx: &RequestContext, ip: &str) -> Result<bool> {
        self.short(ctx, "ping", json!({"ip": ip})).await
    }
}
