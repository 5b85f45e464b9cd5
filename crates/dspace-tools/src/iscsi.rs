// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! LIO iSCSI target management through configfs.
//!
//! Objects are directories under the configfs root:
//!
//! ```text
//! core/user_0/<backstore>/{control,enable}
//! iscsi/<iqn>/tpgt_1/{enable,auth,np/<portal>}
//! iscsi/<iqn>/tpgt_1/lun/lun_N/<backstore> -> core/user_0/<backstore>
//! iscsi/<iqn>/tpgt_1/acls/<initiator>/lun_M/lun -> tpgt_1/lun/lun_N
//! ```
//!
//! Every mutation is followed by a JSON saveconfig; the previous file is
//! rotated into a capped backup directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dspace_protocol::api::{ChapCredentials, IscsiMapping, IscsiTargetSpec, IscsiVolume};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, ToolError};

/// Saveconfig backups kept next to the save file.
pub const BACKUP_CAP: usize = 256;

const TPG: &str = "tpgt_1";
const HBA: &str = "user_0";
const PORTAL: &str = "0.0.0.0:3260";

#[async_trait]
pub trait IscsiTool: Send + Sync {
    /// Fails with `AlreadyExists` when the IQN is taken.
    async fn target_create(&self, spec: &IscsiTargetSpec) -> Result<()>;
    async fn target_delete(&self, iqn: &str) -> Result<bool>;
    async fn target_list(&self) -> Result<Vec<String>>;
    /// Fails with `AlreadyExists` when the initiator already has an ACL.
    async fn acl_create(&self, iqn: &str, initiator: &str) -> Result<()>;
    async fn acl_delete(&self, iqn: &str, initiator: &str) -> Result<bool>;
    async fn mappings(&self, iqn: &str) -> Result<Vec<IscsiMapping>>;
    /// Replace all ACLs and LUNs of `iqn`; the previous state is restored on failure.
    async fn apply_mappings(&self, iqn: &str, mappings: &[IscsiMapping]) -> Result<()>;
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn list_dir(path: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries {
                names.push(entry?.file_name().to_string_lossy().into_owned());
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    names.sort();
    Ok(names)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Remove a configfs object. Kernel-owned attribute files and default
/// groups refuse removal; those errors are skipped below the top level.
fn remove_tree(path: &Path, top: bool) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.file_type().is_symlink() {
        return fs::remove_file(path);
    }
    if meta.is_file() {
        if let Err(e) = fs::remove_file(path) {
            debug!(path = %path.display(), error = %e, "attribute not removable");
        }
        return Ok(());
    }
    for name in list_dir(path)? {
        remove_tree(&path.join(name), false)?;
    }
    match fs::remove_dir(path) {
        Err(e) if !top => {
            debug!(path = %path.display(), error = %e, "default group not removable");
            Ok(())
        }
        other => other,
    }
}

fn lun_index(name: &str) -> Option<u32> {
    name.strip_prefix("lun_").and_then(|n| n.parse().ok())
}

fn parse_rbd_config(config: &str) -> Option<IscsiVolume> {
    let mut parts = config.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("rbd"), Some(pool), Some(image)) => Some(IscsiVolume {
            pool: pool.to_string(),
            image: image.to_string(),
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfig {
    pub storage_objects: Vec<StorageObject>,
    pub targets: Vec<SavedTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    pub name: String,
    pub plugin: String,
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedTarget {
    pub wwn: String,
    pub fabric: String,
    pub tpgs: Vec<SavedTpg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedTpg {
    pub tag: u32,
    pub enable: bool,
    pub portals: Vec<String>,
    pub luns: Vec<SavedLun>,
    pub node_acls: Vec<SavedAcl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedLun {
    pub index: u32,
    pub storage_object: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedAcl {
    pub node_wwn: String,
    pub mapped_luns: Vec<SavedMappedLun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedMappedLun {
    pub index: u32,
    pub tpg_lun: u32,
}

/// Synchronous view of the configfs tree. Callers serialize access.
#[derive(Debug, Clone)]
struct Configfs {
    root: PathBuf,
}

impl Configfs {
    fn target_dir(&self, iqn: &str) -> PathBuf {
        self.root.join("iscsi").join(iqn)
    }

    fn tpg_dir(&self, iqn: &str) -> PathBuf {
        self.target_dir(iqn).join(TPG)
    }

    fn acl_dir(&self, iqn: &str, initiator: &str) -> PathBuf {
        self.tpg_dir(iqn).join("acls").join(initiator)
    }

    fn backstore_dir(&self, name: &str) -> PathBuf {
        self.root.join("core").join(HBA).join(name)
    }

    fn require_target(&self, iqn: &str) -> Result<()> {
        if exists(&self.target_dir(iqn)) {
            Ok(())
        } else {
            Err(ToolError::NotFound(format!("iscsi target {iqn}")))
        }
    }

    fn targets(&self) -> Result<Vec<String>> {
        Ok(list_dir(&self.root.join("iscsi"))?
            .into_iter()
            .filter(|name| name.starts_with("iqn."))
            .collect())
    }

    fn create_target(&self, spec: &IscsiTargetSpec) -> Result<()> {
        if exists(&self.target_dir(&spec.iqn)) {
            return Err(ToolError::AlreadyExists(format!("iscsi target {}", spec.iqn)));
        }
        let tpg = self.tpg_dir(&spec.iqn);
        fs::create_dir_all(tpg.join("acls"))?;
        fs::create_dir_all(tpg.join("lun"))?;
        fs::create_dir_all(tpg.join("np").join(PORTAL))?;
        if let Some(chap) = &spec.chap {
            fs::create_dir_all(tpg.join("auth"))?;
            fs::write(tpg.join("auth").join("userid"), &chap.username)?;
            fs::write(tpg.join("auth").join("password"), &chap.password)?;
        }
        fs::write(tpg.join("enable"), "1")?;
        Ok(())
    }

    fn delete_target(&self, iqn: &str) -> Result<bool> {
        if !exists(&self.target_dir(iqn)) {
            return Ok(false);
        }
        for initiator in self.acls(iqn)? {
            self.delete_acl(iqn, &initiator)?;
        }
        let tpg = self.tpg_dir(iqn);
        for lun in list_dir(&tpg.join("lun"))? {
            remove_tree(&tpg.join("lun").join(lun), true)?;
        }
        for portal in list_dir(&tpg.join("np"))? {
            remove_tree(&tpg.join("np").join(portal), true)?;
        }
        remove_tree(&tpg, true)?;
        remove_tree(&self.target_dir(iqn), true)?;
        Ok(true)
    }

    fn chap(&self, iqn: &str) -> Option<ChapCredentials> {
        let auth = self.tpg_dir(iqn).join("auth");
        let username = read_trimmed(&auth.join("userid")).filter(|u| !u.is_empty())?;
        let password = read_trimmed(&auth.join("password")).unwrap_or_default();
        Some(ChapCredentials { username, password })
    }

    fn acls(&self, iqn: &str) -> Result<Vec<String>> {
        Ok(list_dir(&self.tpg_dir(iqn).join("acls"))?)
    }

    fn create_acl(&self, iqn: &str, initiator: &str) -> Result<()> {
        self.require_target(iqn)?;
        let dir = self.acl_dir(iqn, initiator);
        if exists(&dir) {
            return Err(ToolError::AlreadyExists(format!("acl {initiator} on {iqn}")));
        }
        fs::create_dir_all(&dir)?;
        if let Some(chap) = self.chap(iqn) {
            fs::create_dir_all(dir.join("auth"))?;
            fs::write(dir.join("auth").join("userid"), chap.username)?;
            fs::write(dir.join("auth").join("password"), chap.password)?;
        }
        Ok(())
    }

    fn delete_acl(&self, iqn: &str, initiator: &str) -> Result<bool> {
        let dir = self.acl_dir(iqn, initiator);
        if !exists(&dir) {
            return Ok(false);
        }
        // mapped luns first, configfs refuses to drop an acl that still has them
        for name in list_dir(&dir)? {
            if lun_index(&name).is_some() {
                remove_tree(&dir.join(name), true)?;
            }
        }
        remove_tree(&dir, true)?;
        Ok(true)
    }

    fn ensure_backstore(&self, volume: &IscsiVolume) -> Result<String> {
        let name = volume.backstore_name();
        let dir = self.backstore_dir(&name);
        if !exists(&dir) {
            fs::create_dir_all(&dir)?;
            fs::write(dir.join("control"), format!("dev_config={}", volume.rbd_config()))?;
            fs::write(dir.join("enable"), "1")?;
        }
        Ok(name)
    }

    fn delete_backstore(&self, name: &str) -> Result<bool> {
        let dir = self.backstore_dir(name);
        if !exists(&dir) {
            return Ok(false);
        }
        remove_tree(&dir, true)?;
        Ok(true)
    }

    /// The kernel exposes the config under `attrib/`; a plain tree only has `control`.
    fn backstore_config(&self, name: &str) -> Option<String> {
        let dir = self.backstore_dir(name);
        read_trimmed(&dir.join("attrib").join("dev_config")).or_else(|| {
            read_trimmed(&dir.join("control"))
                .and_then(|c| c.strip_prefix("dev_config=").map(str::to_string))
        })
    }

    fn backstores(&self) -> Result<Vec<String>> {
        Ok(list_dir(&self.root.join("core").join(HBA))?)
    }

    /// `(lun index, backstore name)` of every LUN on the target.
    fn luns(&self, iqn: &str) -> Result<Vec<(u32, String)>> {
        let lun_root = self.tpg_dir(iqn).join("lun");
        let mut out = Vec::new();
        for name in list_dir(&lun_root)? {
            let Some(index) = lun_index(&name) else { continue };
            let dir = lun_root.join(&name);
            for entry in list_dir(&dir)? {
                let path = dir.join(&entry);
                if fs::symlink_metadata(&path)?.file_type().is_symlink() {
                    out.push((index, entry));
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn create_lun(&self, iqn: &str, backstore: &str) -> Result<u32> {
        let used: BTreeSet<u32> = self.luns(iqn)?.into_iter().map(|(i, _)| i).collect();
        let index = (0..).find(|i| !used.contains(i)).unwrap_or(0);
        let dir = self.tpg_dir(iqn).join("lun").join(format!("lun_{index}"));
        fs::create_dir_all(&dir)?;
        symlink(self.backstore_dir(backstore), dir.join(backstore))?;
        Ok(index)
    }

    fn map_lun(&self, iqn: &str, initiator: &str, tpg_lun: u32, mapped: u32) -> Result<()> {
        let dir = self.acl_dir(iqn, initiator).join(format!("lun_{mapped}"));
        fs::create_dir_all(&dir)?;
        let target = self.tpg_dir(iqn).join("lun").join(format!("lun_{tpg_lun}"));
        symlink(target, dir.join("lun"))?;
        Ok(())
    }

    /// `(mapped index, tpg lun index)` pairs of an ACL.
    fn mapped_luns(&self, iqn: &str, initiator: &str) -> Result<Vec<(u32, u32)>> {
        let dir = self.acl_dir(iqn, initiator);
        let mut out = Vec::new();
        for name in list_dir(&dir)? {
            let Some(mapped) = lun_index(&name) else { continue };
            let link = fs::read_link(dir.join(&name).join("lun"))?;
            let tpg_lun = link
                .file_name()
                .and_then(|n| lun_index(&n.to_string_lossy()))
                .ok_or_else(|| ToolError::parse("configfs", format!("bad lun link {}", link.display())))?;
            out.push((mapped, tpg_lun));
        }
        out.sort();
        Ok(out)
    }

    fn mappings(&self, iqn: &str) -> Result<Vec<IscsiMapping>> {
        self.require_target(iqn)?;
        let volumes: BTreeMap<u32, IscsiVolume> = self
            .luns(iqn)?
            .into_iter()
            .filter_map(|(index, backstore)| {
                self.backstore_config(&backstore)
                    .and_then(|c| parse_rbd_config(&c))
                    .map(|v| (index, v))
            })
            .collect();
        let mut out: Vec<IscsiMapping> = Vec::new();
        for initiator in self.acls(iqn)? {
            let acl_volumes: Vec<IscsiVolume> = self
                .mapped_luns(iqn, &initiator)?
                .into_iter()
                .filter_map(|(_, lun)| volumes.get(&lun).cloned())
                .collect();
            match out.iter_mut().find(|m| m.volumes == acl_volumes) {
                Some(mapping) => mapping.initiators.push(initiator),
                None => out.push(IscsiMapping {
                    initiators: vec![initiator],
                    volumes: acl_volumes,
                }),
            }
        }
        Ok(out)
    }

    fn apply(&self, iqn: &str, mappings: &[IscsiMapping]) -> Result<()> {
        self.require_target(iqn)?;
        for initiator in self.acls(iqn)? {
            self.delete_acl(iqn, &initiator)?;
        }
        let old_backstores: BTreeSet<String> = self.luns(iqn)?.into_iter().map(|(_, b)| b).collect();
        let lun_root = self.tpg_dir(iqn).join("lun");
        for name in list_dir(&lun_root)? {
            remove_tree(&lun_root.join(name), true)?;
        }

        let mut lun_of: BTreeMap<String, u32> = BTreeMap::new();
        for volume in mappings.iter().flat_map(|m| &m.volumes) {
            let backstore = self.ensure_backstore(volume)?;
            if !lun_of.contains_key(&backstore) {
                let index = self.create_lun(iqn, &backstore)?;
                lun_of.insert(backstore, index);
            }
        }
        for mapping in mappings {
            for initiator in &mapping.initiators {
                if !exists(&self.acl_dir(iqn, initiator)) {
                    self.create_acl(iqn, initiator)?;
                }
                let mut next = self.mapped_luns(iqn, initiator)?.len() as u32;
                for volume in &mapping.volumes {
                    if let Some(lun) = lun_of.get(&volume.backstore_name()) {
                        self.map_lun(iqn, initiator, *lun, next)?;
                        next += 1;
                    }
                }
            }
        }
        for backstore in old_backstores {
            if !lun_of.contains_key(&backstore) {
                self.delete_backstore(&backstore)?;
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<SaveConfig> {
        let storage_objects = self
            .backstores()?
            .into_iter()
            .map(|name| StorageObject {
                config: self.backstore_config(&name).unwrap_or_default(),
                plugin: "user".to_string(),
                name,
            })
            .collect();
        let mut targets = Vec::new();
        for iqn in self.targets()? {
            let tpg = self.tpg_dir(&iqn);
            let luns = self
                .luns(&iqn)?
                .into_iter()
                .map(|(index, backstore)| SavedLun {
                    index,
                    storage_object: format!("/backstores/user/{backstore}"),
                })
                .collect();
            let mut node_acls = Vec::new();
            for initiator in self.acls(&iqn)? {
                let mapped_luns = self
                    .mapped_luns(&iqn, &initiator)?
                    .into_iter()
                    .map(|(index, tpg_lun)| SavedMappedLun { index, tpg_lun })
                    .collect();
                node_acls.push(SavedAcl {
                    node_wwn: initiator,
                    mapped_luns,
                });
            }
            targets.push(SavedTarget {
                fabric: "iscsi".to_string(),
                tpgs: vec![SavedTpg {
                    tag: 1,
                    enable: read_trimmed(&tpg.join("enable")).as_deref() == Some("1"),
                    portals: list_dir(&tpg.join("np"))?,
                    luns,
                    node_acls,
                }],
                wwn: iqn,
            });
        }
        Ok(SaveConfig {
            storage_objects,
            targets,
        })
    }
}

/// [`IscsiTool`] over the kernel LIO configfs tree.
pub struct Lio {
    fs: Configfs,
    save_file: PathBuf,
    backup_dir: PathBuf,
    lock: Mutex<()>,
}

impl Lio {
    pub fn new(configfs_root: impl Into<PathBuf>, save_file: impl Into<PathBuf>) -> Self {
        let save_file = save_file.into();
        let backup_dir = save_file
            .parent()
            .map(|p| p.join("backup"))
            .unwrap_or_else(|| PathBuf::from("backup"));
        Self {
            fs: Configfs {
                root: configfs_root.into(),
            },
            save_file,
            backup_dir,
            lock: Mutex::new(()),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Rotate the current save file into the backup dir, then write a fresh one.
    fn save(&self) -> Result<()> {
        let config = self.fs.snapshot()?;
        if exists(&self.save_file) {
            fs::create_dir_all(&self.backup_dir)?;
            let mut seqs: Vec<u64> = list_dir(&self.backup_dir)?
                .iter()
                .filter_map(|n| n.strip_prefix("saveconfig.json.").and_then(|s| s.parse().ok()))
                .collect();
            seqs.sort_unstable();
            let next = seqs.last().map_or(1, |n| n + 1);
            fs::copy(
                &self.save_file,
                self.backup_dir.join(format!("saveconfig.json.{next}")),
            )?;
            seqs.push(next);
            let excess = seqs.len().saturating_sub(BACKUP_CAP);
            for seq in &seqs[..excess] {
                fs::remove_file(self.backup_dir.join(format!("saveconfig.json.{seq}")))?;
            }
        }
        if let Some(parent) = self.save_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.save_file.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&config)?)?;
        fs::rename(&tmp, &self.save_file)?;
        debug!(path = %self.save_file.display(), "iscsi saveconfig written");
        Ok(())
    }
}

// configfs calls complete in the kernel without blocking on devices.
#[async_trait]
impl IscsiTool for Lio {
    async fn target_create(&self, spec: &IscsiTargetSpec) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.fs.create_target(spec)?;
        info!(iqn = %spec.iqn, "iscsi target created");
        self.save()
    }

    async fn target_delete(&self, iqn: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let removed = self.fs.delete_target(iqn)?;
        if removed {
            info!(%iqn, "iscsi target removed");
            self.save()?;
        }
        Ok(removed)
    }

    async fn target_list(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.fs.targets()
    }

    async fn acl_create(&self, iqn: &str, initiator: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.fs.create_acl(iqn, initiator)?;
        self.save()
    }

    async fn acl_delete(&self, iqn: &str, initiator: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let removed = self.fs.delete_acl(iqn, initiator)?;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    async fn mappings(&self, iqn: &str) -> Result<Vec<IscsiMapping>> {
        let _guard = self.lock.lock().await;
        self.fs.mappings(iqn)
    }

    async fn apply_mappings(&self, iqn: &str, mappings: &[IscsiMapping]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let previous = self.fs.mappings(iqn)?;
        if let Err(err) = self.fs.apply(iqn, mappings) {
            warn!(%iqn, error = %err, "iscsi mapping rewrite failed, restoring previous state");
            if let Err(restore) = self.fs.apply(iqn, &previous) {
                warn!(%iqn, error = %restore, "iscsi mapping restore failed");
            }
            self.save()?;
            return Err(err);
        }
        info!(%iqn, mappings = mappings.len(), "iscsi mappings applied");
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IQN: &str = "iqn.2025-01.com.dspace:0a1b2c3d";
    const INIT_A: &str = "iqn.1994-05.com.redhat:a";
    const INIT_B: &str = "iqn.1994-05.com.redhat:b";

    fn lio(dir: &tempfile::TempDir) -> Lio {
        Lio::new(dir.path().join("configfs"), dir.path().join("etc/saveconfig.json"))
    }

    fn spec() -> IscsiTargetSpec {
        IscsiTargetSpec {
            iqn: IQN.into(),
            chap: Some(ChapCredentials {
                username: "user".into(),
                password: "secret12345".into(),
            }),
        }
    }

    fn vol(image: &str) -> IscsiVolume {
        IscsiVolume {
            pool: "rbd".into(),
            image: image.into(),
        }
    }

    fn saved(lio: &Lio) -> SaveConfig {
        serde_json::from_slice(&fs::read(&lio.save_file).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_target_create_rejects_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let lio = lio(&dir);
        lio.target_create(&spec()).await.unwrap();
        assert!(matches!(
            lio.target_create(&spec()).await,
            Err(ToolError::AlreadyExists(_))
        ));
        assert_eq!(lio.target_list().await.unwrap(), vec![IQN]);
    }

    #[tokio::test]
    async fn test_acl_create_rejects_duplicate_and_inherits_chap() {
        let dir = tempfile::tempdir().unwrap();
        let lio = lio(&dir);
        lio.target_create(&spec()).await.unwrap();
        lio.acl_create(IQN, INIT_A).await.unwrap();
        assert!(matches!(
            lio.acl_create(IQN, INIT_A).await,
            Err(ToolError::AlreadyExists(_))
        ));
        let userid = lio.fs.acl_dir(IQN, INIT_A).join("auth/userid");
        assert_eq!(fs::read_to_string(userid).unwrap(), "user");
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let lio = lio(&dir);
        assert!(!lio.target_delete(IQN).await.unwrap());
        lio.target_create(&spec()).await.unwrap();
        assert!(!lio.acl_delete(IQN, INIT_A).await.unwrap());
        assert!(lio.target_delete(IQN).await.unwrap());
        assert!(lio.target_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_mappings_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let lio = lio(&dir);
        lio.target_create(&spec()).await.unwrap();
        let mappings = vec![
            IscsiMapping {
                initiators: vec![INIT_A.into()],
                volumes: vec![vol("v1"), vol("v2")],
            },
            IscsiMapping {
                initiators: vec![INIT_B.into()],
                volumes: vec![vol("v3")],
            },
        ];
        lio.apply_mappings(IQN, &mappings).await.unwrap();
        assert_eq!(lio.mappings(IQN).await.unwrap(), mappings);

        let config = saved(&lio);
        assert_eq!(config.storage_objects.len(), 3);
        assert_eq!(config.storage_objects[0].config, "rbd/rbd/v1");
        assert_eq!(config.targets[0].tpgs[0].node_acls.len(), 2);

        // move v3 to the first group, v2 drops out
        let mappings = vec![IscsiMapping {
            initiators: vec![INIT_A.into(), INIT_B.into()],
            volumes: vec![vol("v1"), vol("v3")],
        }];
        lio.apply_mappings(IQN, &mappings).await.unwrap();
        assert_eq!(lio.mappings(IQN).await.unwrap(), mappings);
        let names: Vec<String> = saved(&lio).storage_objects.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["rbd-v1", "rbd-v3"]);
    }

    #[tokio::test]
    async fn test_apply_on_unknown_target() {
        let dir = tempfile::tempdir().unwrap();
        let lio = lio(&dir);
        assert!(matches!(
            lio.apply_mappings(IQN, &[]).await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_backups_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let lio = lio(&dir);
        lio.target_create(&spec()).await.unwrap();
        for i in 0..(BACKUP_CAP + 4) {
            lio.acl_create(IQN, &format!("iqn.1994-05.com.redhat:h{i}")).await.unwrap();
        }
        let backups = list_dir(lio.backup_dir()).unwrap();
        assert_eq!(backups.len(), BACKUP_CAP);
        // the oldest rotations are gone
        assert!(!backups.contains(&"saveconfig.json.1".to_string()));
        assert!(backups.contains(&format!("saveconfig.json.{}", BACKUP_CAP + 4)));
    }

    #[test]
    fn test_parse_rbd_config() {
        let parsed = parse_rbd_config("rbd/p/img").unwrap();
        assert_eq!((parsed.pool.as_str(), parsed.image.as_str()), ("p", "img"));
        assert_eq!(parse_rbd_config("file//tmp/x"), None);
    }
}
