// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted resources and their status enums.
//!
//! Status values serialize as the lowercase strings stored in the `status`
//! field, so they can be used directly in store filters.

use chrono::{DateTime, Utc};
use dspace_protocol::api::{DiskType, LedState, ServiceKind, ServiceStatus};
use dspace_tools::{CrushContent, FaultDomain, PoolType};
use serde::{Deserialize, Serialize};

use crate::store::Resource;

macro_rules! resource {
    ($ty:ty, $kind:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;
        }
    };
}

// ============================================================================
// Cluster and nodes
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    #[default]
    Active,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub display_name: String,
    #[serde(default)]
    pub status: ClusterStatus,
}
resource!(Cluster, "cluster");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Creating,
    Active,
    Deleting,
    Error,
    DeployingRole,
    RemovingRole,
    Inactive,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub hostname: String,
    /// Admin network address, also where the agent listens
    pub ip_address: String,
    pub cluster_ip: String,
    pub public_ip: String,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    /// Bootstrap SSH password, also used to restart a dead agent
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub role_monitor: bool,
    #[serde(default)]
    pub role_storage: bool,
    #[serde(default)]
    pub role_admin: bool,
    #[serde(default)]
    pub role_object_gateway: bool,
    #[serde(default)]
    pub role_block_gateway: bool,
    #[serde(default)]
    pub rack_id: Option<i64>,
    #[serde(default)]
    pub datacenter_id: Option<i64>,
    /// Address advertised by the block gateway mounted on this node
    #[serde(default)]
    pub object_gateway_ip_address: Option<String>,
    pub status: NodeStatus,
}
resource!(Node, "node");

/// Endpoint registration written by every daemon on start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcService {
    pub service_name: String,
    pub node_id: i64,
    pub ip: String,
    pub port: u16,
}
resource!(RpcService, "rpc_service");

// ============================================================================
// Disks and osds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskRole {
    System,
    Data,
    Accelerate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskStatus {
    Available,
    Inuse,
    Processing,
    Unavailable,
    Error,
    Replacing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub node_id: i64,
    pub name: String,
    #[serde(default)]
    pub guid: Option<String>,
    pub role: DiskRole,
    #[serde(rename = "type")]
    pub disk_type: DiskType,
    pub size: u64,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub wwid: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub led: LedState,
    #[serde(default)]
    pub partition_num: u32,
    pub status: DiskStatus,
}
resource!(Disk, "disk");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionRole {
    Cache,
    Db,
    Wal,
    Journal,
    Mix,
}

impl PartitionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionRole::Cache => "cache",
            PartitionRole::Db => "db",
            PartitionRole::Wal => "wal",
            PartitionRole::Journal => "journal",
            PartitionRole::Mix => "mix",
        }
    }

    /// Whether a partition of this role can back an osd slot of `wanted`.
    pub fn serves(&self, wanted: PartitionRole) -> bool {
        *self == wanted || (*self == PartitionRole::Mix && matches!(wanted, PartitionRole::Db | PartitionRole::Wal))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskPartition {
    pub node_id: i64,
    pub disk_id: i64,
    pub uuid: String,
    pub name: String,
    pub size: u64,
    pub role: PartitionRole,
    pub status: DiskStatus,
}
resource!(DiskPartition, "disk_partition");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsdStatus {
    Creating,
    Active,
    Inactive,
    Offline,
    Error,
    Deleting,
    Replacing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Osd {
    pub node_id: i64,
    /// Ceph-assigned id, pre-allocated before the daemon exists
    pub osd_id: i64,
    pub osd_name: String,
    pub fsid: String,
    pub disk_id: i64,
    #[serde(rename = "type")]
    pub disk_type: DiskType,
    #[serde(default)]
    pub db_partition_id: Option<i64>,
    #[serde(default)]
    pub wal_partition_id: Option<i64>,
    #[serde(default)]
    pub cache_partition_id: Option<i64>,
    #[serde(default)]
    pub journal_partition_id: Option<i64>,
    #[serde(default)]
    pub crush_rule_id: Option<i64>,
    pub status: OsdStatus,
}
resource!(Osd, "osd");

impl Osd {
    pub fn partition_ids(&self) -> Vec<i64> {
        [
            self.db_partition_id,
            self.wal_partition_id,
            self.cache_partition_id,
            self.journal_partition_id,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

// ============================================================================
// Pools
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrushRule {
    pub rule_name: String,
    #[serde(rename = "type")]
    pub fault_domain: FaultDomain,
    pub content: CrushContent,
    /// Ceph-side id, cached once the rule exists
    #[serde(default)]
    pub rule_id: Option<i64>,
}
resource!(CrushRule, "crush_rule");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolRole {
    Data,
    Index,
    ObjectMeta,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Creating,
    Active,
    Processing,
    Warning,
    Degraded,
    Recovering,
    Error,
    Deleting,
    Deleted,
}

impl PoolStatus {
    /// Stable states the health roll-up may overwrite.
    pub const HEALTH: [PoolStatus; 4] = [
        PoolStatus::Active,
        PoolStatus::Warning,
        PoolStatus::Degraded,
        PoolStatus::Recovering,
    ];

    pub fn is_usable(&self) -> bool {
        Self::HEALTH.contains(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    /// Ceph-side name, derived from a uuid and never renamed
    pub pool_name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub pool_type: PoolType,
    pub role: PoolRole,
    #[serde(default)]
    pub speed_type: Option<String>,
    pub replicate_size: u32,
    pub failure_domain_type: FaultDomain,
    #[serde(default)]
    pub crush_rule_id: Option<i64>,
    pub osd_num: u32,
    /// Ceph pool id once created
    #[serde(default)]
    pub ceph_pool_id: Option<i64>,
    pub status: PoolStatus,
}
resource!(Pool, "pool");

// ============================================================================
// Block storage
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    Creating,
    Active,
    Deleting,
    Error,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub display_name: String,
    pub pool_id: i64,
    pub size_mb: u64,
    pub status: VolumeStatus,
}
resource!(Volume, "volume");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub volume_id: i64,
    pub name: String,
    pub display_name: String,
    pub status: VolumeStatus,
}
resource!(VolumeSnapshot, "volume_snapshot");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPathStatus {
    Active,
    Processing,
    Error,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeAccessPath {
    pub name: String,
    pub iqn: String,
    #[serde(default)]
    pub chap_enable: bool,
    #[serde(default)]
    pub chap_username: Option<String>,
    #[serde(default)]
    pub chap_password: Option<String>,
    pub status: AccessPathStatus,
}
resource!(VolumeAccessPath, "volume_access_path");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGateway {
    pub access_path_id: i64,
    pub node_id: i64,
    /// Address the target is advertised on
    pub ip: String,
}
resource!(VolumeGateway, "volume_gateway");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeClientGroup {
    pub name: String,
    pub initiators: Vec<String>,
    #[serde(default)]
    pub access_path_id: Option<i64>,
}
resource!(VolumeClientGroup, "volume_client_group");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub access_path_id: i64,
    pub client_group_id: i64,
    pub volume_id: i64,
}
resource!(VolumeMapping, "volume_mapping");

// ============================================================================
// Object gateways
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Creating,
    Active,
    Inactive,
    Processing,
    Error,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Radosgw {
    pub name: String,
    pub node_id: i64,
    pub ip_address: String,
    pub port: u16,
    pub zone_id: i64,
    pub status: GatewayStatus,
}
resource!(Radosgw, "radosgw");

impl Radosgw {
    /// Ceph config section of this instance.
    pub fn config_section(&self) -> String {
        format!("client.rgw.{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadosgwRouter {
    pub name: String,
    pub virtual_ip: String,
    pub virtual_router_id: u32,
    pub port: u16,
    #[serde(default)]
    pub https_port: Option<u16>,
    /// Member nodes, kept inline
    pub nodes: Vec<i64>,
    pub radosgw_ids: Vec<i64>,
    pub status: GatewayStatus,
}
resource!(RadosgwRouter, "radosgw_router");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadosgwZone {
    pub name: String,
    pub realm: String,
    pub zonegroup: String,
}
resource!(RadosgwZone, "radosgw_zone");

/// A placement target binding an index pool and a data pool in one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPolicy {
    pub name: String,
    pub zone_id: i64,
    pub index_pool_id: i64,
    pub data_pool_id: i64,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}
resource!(ObjectPolicy, "object_policy");

// ============================================================================
// Services, audit and alerts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub node_id: i64,
    pub role: String,
    pub service_name: String,
    pub kind: ServiceKind,
    pub status: ServiceStatus,
    /// Number of consecutive active heartbeats
    #[serde(default)]
    pub counter: u64,
}
resource!(Service, "service");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    UnderWay,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub client_ip: Option<String>,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<i64>,
    #[serde(default)]
    pub resource_name: Option<String>,
    pub action: String,
    pub begin_time: DateTime<Utc>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub before_data: Option<serde_json::Value>,
    #[serde(default)]
    pub after_data: Option<serde_json::Value>,
    #[serde(default)]
    pub diff_data: Option<serde_json::Value>,
    pub status: ActionStatus,
    #[serde(default)]
    pub err_msg: Option<String>,
}
resource!(ActionLog, "action_log");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warn,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Event family, e.g. `disk_offline` or `service_status`
    #[serde(rename = "type")]
    pub rule_type: String,
    pub resource_type: String,
    pub level: AlertLevel,
    pub enabled: bool,
}
resource!(AlertRule, "alert_rule");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertGroup {
    pub name: String,
    #[serde(default)]
    pub alert_rule_ids: Vec<i64>,
    #[serde(default)]
    pub email_group_ids: Vec<i64>,
}
resource!(AlertGroup, "alert_group");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailGroup {
    pub name: String,
    pub emails: Vec<String>,
}
resource!(EmailGroup, "email_group");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLogStatus {
    /// Logged, no mail recipients
    None,
    Sent,
    EmailFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLog {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<i64>,
    #[serde(default)]
    pub resource_name: Option<String>,
    pub level: AlertLevel,
    pub alert_value: String,
    pub status: AlertLogStatus,
    #[serde(default)]
    pub read: bool,
}
resource!(AlertLog, "alert_log");
