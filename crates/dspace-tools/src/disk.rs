// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Block device inventory and per-disk operations.

use std::sync::Arc;

use async_trait::async_trait;
use dspace_protocol::api::{DiskInfo, DiskType, LedState, PartitionInfo};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, ToolError, ToolKind};
use crate::executor::{Executor, render};

#[async_trait]
pub trait DiskProbe: Send + Sync {
    /// Every whole disk on the node with its partitions.
    async fn probe(&self) -> Result<Vec<DiskInfo>>;
    async fn smart(&self, name: &str) -> Result<Value>;
    async fn light(&self, name: &str, led: LedState) -> Result<()>;
    /// Split `name` into `num` equal partitions.
    async fn partitions_create(&self, name: &str, num: u32) -> Result<Vec<PartitionInfo>>;
    async fn partitions_remove(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    rota: Option<bool>,
    #[serde(rename = "type")]
    dev_type: String,
    #[serde(default)]
    wwn: Option<String>,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    ptuuid: Option<String>,
    #[serde(default)]
    partuuid: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    tran: Option<String>,
    #[serde(default)]
    hctl: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    fn mounts_root(&self) -> bool {
        matches!(self.mountpoint.as_deref(), Some("/") | Some("/boot"))
            || self.children.iter().any(LsblkDevice::mounts_root)
    }

    fn into_disk(self) -> DiskInfo {
        let disk_type = if self.tran.as_deref() == Some("nvme") || self.name.starts_with("nvme") {
            DiskType::Nvme
        } else if self.rota == Some(false) {
            DiskType::Ssd
        } else {
            DiskType::Hdd
        };
        let is_system = self.mounts_root();
        let partitions = self
            .children
            .iter()
            .filter(|c| c.dev_type == "part")
            .map(|c| PartitionInfo {
                uuid: c.partuuid.clone().unwrap_or_else(|| c.name.clone()),
                name: c.name.clone(),
                size: c.size.unwrap_or(0),
            })
            .collect();
        DiskInfo {
            guid: self.ptuuid.or_else(|| self.wwn.clone()),
            wwid: self.wwn,
            serial: self.serial,
            size: self.size.unwrap_or(0),
            disk_type,
            slot: self.hctl,
            is_system,
            partitions,
            name: self.name,
        }
    }
}

/// Parse `lsblk -J -b -o ...` output into whole-disk records.
pub fn parse_lsblk(raw: &str) -> Result<Vec<DiskInfo>> {
    let parsed: LsblkOutput = serde_json::from_str(raw).map_err(|e| ToolError::parse("lsblk", e))?;
    Ok(parsed
        .blockdevices
        .into_iter()
        .filter(|d| d.dev_type == "disk")
        .map(LsblkDevice::into_disk)
        .collect())
}

pub struct LsblkProbe {
    executor: Arc<dyn Executor>,
}

impl LsblkProbe {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    async fn checked(&self, program: &str, args: &[&str]) -> Result<String> {
        let out = self
            .executor
            .run(program, args)
            .await?
            .check(ToolKind::Shell, &render(program, args))?;
        Ok(out.stdout)
    }
}

#[async_trait]
impl DiskProbe for LsblkProbe {
    async fn probe(&self) -> Result<Vec<DiskInfo>> {
        let raw = self
            .checked(
                "lsblk",
                &[
                    "-J", "-b", "-o",
                    "NAME,SIZE,ROTA,TYPE,WWN,SERIAL,PTUUID,PARTUUID,MOUNTPOINT,TRAN,HCTL",
                ],
            )
            .await?;
        parse_lsblk(&raw)
    }

    async fn smart(&self, name: &str) -> Result<Value> {
        let dev = format!("/dev/{name}");
        // smartctl uses bit flags in its exit code; the json body is still valid
        let out = self.executor.run("smartctl", &["-j", "-a", &dev]).await?;
        serde_json::from_str(&out.stdout).map_err(|e| ToolError::parse("smartctl", e))
    }

    async fn light(&self, name: &str, led: LedState) -> Result<()> {
        let target = match led {
            LedState::On => format!("locate=/dev/{name}"),
            LedState::Off => format!("locate_off=/dev/{name}"),
        };
        self.checked("ledctl", &[&target]).await?;
        Ok(())
    }

    async fn partitions_create(&self, name: &str, num: u32) -> Result<Vec<PartitionInfo>> {
        if num == 0 {
            return Err(ToolError::parse("sgdisk", "partition count must be positive"));
        }
        let dev = format!("/dev/{name}");
        self.checked("sgdisk", &["-o", &dev]).await?;
        let percent = 100 / num;
        // last partition takes whatever the integer split left over
        for i in 1..=num {
            let start = format!("{}%", (i - 1) * percent);
            let end = if i == num { "100%".to_string() } else { format!("{}%", i * percent) };
            self.checked("parted", &["-s", &dev, "mkpart", "primary", &start, &end])
                .await?;
        }
        self.checked("partprobe", &[&dev]).await?;
        let disks = self.probe().await?;
        disks
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| d.partitions)
            .ok_or_else(|| ToolError::NotFound(format!("disk {name}")))
    }

    async fn partitions_remove(&self, name: &str) -> Result<()> {
        let dev = format!("/dev/{name}");
        self.checked("sgdisk", &["-Z", &dev]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK: &str = r#"{
      "blockdevices": [
        {"name": "sda", "size": 480103981056, "rota": false, "type": "disk", "wwn": "0x5002", "serial": "S1",
         "ptuuid": "aaaa", "tran": "sata", "hctl": "0:0:0:0",
         "children": [
           {"name": "sda1", "size": 1073741824, "rota": false, "type": "part", "partuuid": "p-1", "mountpoint": "/boot"}
         ]},
        {"name": "sdb", "size": 4000787030016, "rota": true, "type": "disk", "wwn": "0x5003", "serial": "S2",
         "ptuuid": null, "tran": "sas", "hctl": "0:0:1:0"},
        {"name": "nvme0n1", "size": 1600321314816, "rota": false, "type": "disk", "tran": "nvme",
         "ptuuid": "cccc",
         "children": [
           {"name": "nvme0n1p1", "size": 800000000000, "type": "part", "partuuid": "n-1"},
           {"name": "nvme0n1p2", "size": 800000000000, "type": "part", "partuuid": "n-2"}
         ]},
        {"name": "sr0", "size": 1073741312, "rota": true, "type": "rom"}
      ]
    }"#;

    #[test]
    fn test_parse_lsblk() {
        let disks = parse_lsblk(LSBLK).unwrap();
        assert_eq!(disks.len(), 3);

        let sda = &disks[0];
        assert!(sda.is_system);
        assert_eq!(sda.disk_type, DiskType::Ssd);
        assert_eq!(sda.guid.as_deref(), Some("aaaa"));

        let sdb = &disks[1];
        assert!(!sdb.is_system);
        assert_eq!(sdb.disk_type, DiskType::Hdd);
        // no partition table yet, fall back to the wwn
        assert_eq!(sdb.guid.as_deref(), Some("0x5003"));

        let nvme = &disks[2];
        assert_eq!(nvme.disk_type, DiskType::Nvme);
        assert_eq!(nvme.partitions.len(), 2);
        assert_eq!(nvme.partitions[1].uuid, "n-2");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_lsblk("not json").is_err());
    }
}
