// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payloads exchanged between the admin and the node agents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Hdd,
    Ssd,
    Nvme,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedState {
    On,
    #[default]
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub uuid: String,
    pub name: String,
    pub size: u64,
}

/// One block device as seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub name: String,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub wwid: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    pub size: u64,
    #[serde(rename = "type")]
    pub disk_type: DiskType,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub partitions: Vec<PartitionInfo>,
}

impl DiskInfo {
    /// Stable identity: the guid when known, else the transient device name.
    pub fn identity(&self) -> &str {
        self.guid.as_deref().unwrap_or(&self.name)
    }
}

/// Status a daemon reports through the agent heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Starting,
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    /// Display name, e.g. `ceph-osd@3`
    pub name: String,
    pub status: ServiceStatus,
    pub node_id: i64,
    /// Unit or container name on the node
    pub service_name: String,
    #[serde(default)]
    pub kind: ServiceKind,
}

/// Heartbeat body: role name to the services observed for that role.
pub type ServiceUpdate = BTreeMap<String, Vec<ServiceReport>>;

pub const ROLE_BASE: &str = "base";
pub const ROLE_MONITOR: &str = "role_monitor";
pub const ROLE_STORAGE: &str = "role_storage";
pub const ROLE_ADMIN: &str = "role_admin";
pub const ROLE_OBJECT_GATEWAY: &str = "role_object_gateway";
pub const ROLE_BLOCK_GATEWAY: &str = "role_block_gateway";
pub const ROLE_RADOSGW_ROUTER: &str = "role_radosgw_router";

/// The node agent, itself a container reported under [`ROLE_BASE`].
pub const DSA_SERVICE: &str = "DSA";

pub fn osd_unit(osd_id: i64) -> String {
    format!("ceph-osd@{osd_id}")
}

pub fn rgw_unit(name: &str) -> String {
    format!("ceph-radosgw@rgw.{name}")
}

/// Keepalived and HAProxy of one router run in a single container.
pub fn router_container(name: &str) -> String {
    format!("rgw-router-{name}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    Systemd,
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedService {
    pub role: String,
    pub name: String,
    pub service_name: String,
    pub kind: ServiceKind,
}

/// What an agent should watch on its node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeServiceManifest {
    pub node_id: i64,
    pub services: Vec<ManagedService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdInstallSpec {
    pub osd_id: i64,
    pub fsid: String,
    pub disk_name: String,
    #[serde(default)]
    pub db_partition: Option<String>,
    #[serde(default)]
    pub wal_partition: Option<String>,
    #[serde(default)]
    pub cache_partition: Option<String>,
    #[serde(default)]
    pub journal_partition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgwInstallSpec {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterInstallSpec {
    pub name: String,
    pub virtual_ip: String,
    pub virtual_router_id: u32,
    pub port: u16,
    #[serde(default)]
    pub https_port: Option<u16>,
    /// `ip:port` of every backend gateway
    pub backends: Vec<String>,
    /// Keepalived priority of this member
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiTargetSpec {
    pub iqn: String,
    #[serde(default)]
    pub chap: Option<ChapCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiVolume {
    pub pool: String,
    pub image: String,
}

impl IscsiVolume {
    /// Backstore config string understood by tcmu-runner.
    pub fn rbd_config(&self) -> String {
        format!("rbd/{}/{}", self.pool, self.image)
    }

    /// Backstore object name.
    pub fn backstore_name(&self) -> String {
        format!("{}-{}", self.pool, self.image)
    }
}

/// One client group's initiators and the volumes exported to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiMapping {
    pub initiators: Vec<String>,
    pub volumes: Vec<IscsiVolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPolicySpec {
    pub name: String,
    pub zone: String,
    pub index_pool: String,
    pub data_pool: String,
    #[serde(default)]
    pub compression: Option<String>,
}

/// A slice of a log file; `data` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    pub offset: u64,
    pub length: u64,
    pub data: String,
    pub eof: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_info_wire_shape() {
        let disk: DiskInfo = serde_json::from_value(serde_json::json!({
            "name": "sdb",
            "guid": "g-1",
            "size": 4000,
            "type": "ssd",
        }))
        .unwrap();
        assert_eq!(disk.disk_type, DiskType::Ssd);
        assert!(disk.partitions.is_empty());
        assert_eq!(disk.identity(), "g-1");
    }

    #[test]
    fn test_identity_falls_back_to_name() {
        let disk = DiskInfo {
            name: "sdc".into(),
            guid: None,
            wwid: None,
            serial: None,
            size: 1,
            disk_type: DiskType::Hdd,
            slot: None,
            is_system: false,
            partitions: vec![],
        };
        assert_eq!(disk.identity(), "sdc");
    }

    #[test]
    fn test_service_update_shape() {
        let update: ServiceUpdate = serde_json::from_value(serde_json::json!({
            "role_storage": [
                {"name": "osd.1", "status": "inactive", "node_id": 2, "service_name": "ceph-osd@1"}
            ]
        }))
        .unwrap();
        assert_eq!(update["role_storage"][0].status, ServiceStatus::Inactive);
        assert_eq!(update["role_storage"][0].kind, ServiceKind::Systemd);
    }

    #[test]
    fn test_rbd_config_string() {
        let vol = IscsiVolume {
            pool: "rbd-pool".into(),
            image: "vol-1".into(),
        };
        assert_eq!(vol.rbd_config(), "rbd/rbd-pool/vol-1");
    }
}
