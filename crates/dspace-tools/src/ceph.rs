// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ceph CLI wrapper.
//!
//! Every verb shells out to `ceph`/`rbd` with `-f json` where output is
//! parsed. Removal verbs are idempotent: a missing object is `Ok(false)`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, ToolError, ToolKind};
use crate::executor::{CommandOutput, Executor, render};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultDomain {
    Host,
    Rack,
    Datacenter,
}

impl FaultDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultDomain::Host => "host",
            FaultDomain::Rack => "rack",
            FaultDomain::Datacenter => "datacenter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketType {
    Root,
    Datacenter,
    Rack,
    Host,
}

impl BucketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketType::Root => "root",
            BucketType::Datacenter => "datacenter",
            BucketType::Rack => "rack",
            BucketType::Host => "host",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrushOsd {
    pub id: i64,
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrushBucket {
    /// Negative id, stable across regenerations of the same rule.
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub bucket_type: BucketType,
    #[serde(default)]
    pub children: Vec<CrushBucket>,
    #[serde(default)]
    pub osds: Vec<CrushOsd>,
}

impl CrushBucket {
    fn walk<'a>(&'a self, parent: Option<&'a CrushBucket>, out: &mut Vec<(Option<&'a CrushBucket>, &'a CrushBucket)>) {
        out.push((parent, self));
        for child in &self.children {
            child.walk(Some(self), out);
        }
    }
}

/// Generated crush hierarchy and the rule that places replicas across it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrushContent {
    pub rule_name: String,
    pub fault_domain: FaultDomain,
    pub root: CrushBucket,
}

impl CrushContent {
    /// Buckets in pre-order with their parent.
    pub fn buckets(&self) -> Vec<(Option<&CrushBucket>, &CrushBucket)> {
        let mut out = Vec::new();
        self.root.walk(None, &mut out);
        out
    }

    /// Every osd with the bucket that holds it.
    pub fn osds(&self) -> Vec<(&CrushBucket, &CrushOsd)> {
        self.buckets()
            .into_iter()
            .flat_map(|(_, b)| b.osds.iter().map(move |o| (b, o)))
            .collect()
    }

    pub fn osd_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.osds().into_iter().map(|(_, o)| o.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Names of the buckets at the fault-domain level.
    pub fn fault_domains(&self) -> Vec<String> {
        let level = match self.fault_domain {
            FaultDomain::Host => BucketType::Host,
            FaultDomain::Rack => BucketType::Rack,
            FaultDomain::Datacenter => BucketType::Datacenter,
        };
        self.buckets()
            .into_iter()
            .filter(|(_, b)| b.bucket_type == level)
            .map(|(_, b)| b.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Replicated,
    Erasure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub pool_name: String,
    pub pool_type: PoolType,
    pub replicate_size: u32,
    pub pg_num: u32,
    /// `rbd` or `rgw`
    pub application: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleInfo {
    pub rule_id: i64,
}

#[async_trait]
pub trait CephTool: Send + Sync {
    async fn status(&self) -> Result<Value>;
    /// `HEALTH_OK`, `HEALTH_WARN` or `HEALTH_ERR`.
    async fn health(&self) -> Result<String>;

    /// Create the pool and its crush rule; returns the ceph pool id.
    async fn pool_create(&self, spec: &PoolSpec, specify_rep: bool, crush: &CrushContent) -> Result<i64>;
    async fn pool_delete(&self, pool_name: &str) -> Result<bool>;
    async fn pool_set_size(&self, pool_name: &str, size: u32) -> Result<()>;
    async fn rule_get(&self, rule_name: &str) -> Result<RuleInfo>;

    /// Create or update the buckets, osd placements and rule of `content`.
    async fn crush_apply(&self, content: &CrushContent) -> Result<()>;
    /// Remove from ceph what `old` has and `new` lacks.
    async fn crush_prune(&self, old: &CrushContent, new: &CrushContent) -> Result<()>;
    /// Remove rule, osd links and buckets. Missing parts are ignored.
    async fn crush_delete(&self, content: &CrushContent) -> Result<()>;

    /// Pre-allocate an osd id for `fsid`.
    async fn osd_new(&self, fsid: &str) -> Result<i64>;
    async fn osd_purge(&self, osd_id: i64) -> Result<bool>;
    /// Mark osds out; unknown names are skipped.
    async fn mark_osds_out(&self, names: &[String]) -> Result<()>;

    async fn config_set(&self, who: &str, key: &str, value: &str) -> Result<()>;
    async fn config_remove(&self, who: &str, key: &str) -> Result<bool>;

    async fn rbd_create(&self, pool: &str, image: &str, size_mb: u64) -> Result<()>;
    async fn rbd_remove(&self, pool: &str, image: &str) -> Result<bool>;
    async fn rbd_snap_create(&self, pool: &str, image: &str, snap: &str) -> Result<()>;
    async fn rbd_snap_remove(&self, pool: &str, image: &str, snap: &str) -> Result<bool>;
}

/// [`CephTool`] over the `ceph` and `rbd` command line clients.
pub struct CephCli {
    executor: Arc<dyn Executor>,
}

impl CephCli {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let out = self.executor.run(program, args).await?;
        debug!(command = %render(program, args), rc = out.rc, "ceph command finished");
        Ok(out)
    }

    async fn ceph(&self, args: &[&str]) -> Result<CommandOutput> {
        self.run("ceph", args)
            .await?
            .check(ToolKind::Ceph, &render("ceph", args))
    }

    async fn ceph_json(&self, args: &[&str]) -> Result<Value> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(["-f", "json"]);
        let out = self.ceph(&full).await?;
        serde_json::from_str(&out.stdout).map_err(|e| ToolError::parse(render("ceph", &full), e))
    }

    async fn ceph_idempotent(&self, args: &[&str]) -> Result<bool> {
        self.run("ceph", args)
            .await?
            .normalize(ToolKind::Ceph, &render("ceph", args))
    }

    async fn pool_id(&self, pool_name: &str) -> Result<i64> {
        let pools = self.ceph_json(&["osd", "pool", "ls", "detail"]).await?;
        pools
            .as_array()
            .into_iter()
            .flatten()
            .find(|p| p["pool_name"] == pool_name)
            .and_then(|p| p["pool_id"].as_i64())
            .ok_or_else(|| ToolError::NotFound(format!("pool {pool_name}")))
    }
}

fn location_args(path: &[&CrushBucket]) -> Vec<String> {
    path.iter()
        .map(|b| format!("{}={}", b.bucket_type.as_str(), b.name))
        .collect()
}

fn osd_paths(content: &CrushContent) -> Vec<(Vec<&CrushBucket>, &CrushOsd)> {
    fn descend<'a>(
        bucket: &'a CrushBucket,
        path: &mut Vec<&'a CrushBucket>,
        out: &mut Vec<(Vec<&'a CrushBucket>, &'a CrushOsd)>,
    ) {
        path.push(bucket);
        for osd in &bucket.osds {
            out.push((path.clone(), osd));
        }
        for child in &bucket.children {
            descend(child, path, out);
        }
        path.pop();
    }
    let mut out = Vec::new();
    descend(&content.root, &mut Vec::new(), &mut out);
    out
}

#[async_trait]
impl CephTool for CephCli {
    async fn status(&self) -> Result<Value> {
        self.ceph_json(&["status"]).await
    }

    async fn health(&self) -> Result<String> {
        let health = self.ceph_json(&["health"]).await?;
        health["status"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ToolError::parse("ceph health", "missing status"))
    }

    async fn pool_create(&self, spec: &PoolSpec, specify_rep: bool, crush: &CrushContent) -> Result<i64> {
        self.crush_apply(crush).await?;
        let pg = spec.pg_num.to_string();
        let size = spec.replicate_size.to_string();
        match spec.pool_type {
            PoolType::Replicated => {
                let mut args: Vec<&str> = vec![
                    "osd",
                    "pool",
                    "create",
                    spec.pool_name.as_str(),
                    pg.as_str(),
                    pg.as_str(),
                    "replicated",
                    crush.rule_name.as_str(),
                ];
                if specify_rep {
                    args.extend(["--size", size.as_str()]);
                }
                self.ceph(&args).await?;
                if !specify_rep {
                    self.pool_set_size(&spec.pool_name, spec.replicate_size).await?;
                }
            }
            PoolType::Erasure => {
                self.ceph(&["osd", "pool", "create", &spec.pool_name, &pg, &pg, "erasure"])
                    .await?;
                self.ceph(&["osd", "pool", "set", &spec.pool_name, "crush_rule", &crush.rule_name])
                    .await?;
            }
        }
        self.ceph(&["osd", "pool", "application", "enable", &spec.pool_name, &spec.application])
            .await?;
        let id = self.pool_id(&spec.pool_name).await?;
        info!(pool = %spec.pool_name, pool_id = id, "ceph pool created");
        Ok(id)
    }

    async fn pool_delete(&self, pool_name: &str) -> Result<bool> {
        self.ceph_idempotent(&[
            "osd", "pool", "delete", pool_name, pool_name, "--yes-i-really-really-mean-it",
        ])
        .await
    }

    async fn pool_set_size(&self, pool_name: &str, size: u32) -> Result<()> {
        let size = size.to_string();
        self.ceph(&["osd", "pool", "set", pool_name, "size", &size]).await?;
        Ok(())
    }

    async fn rule_get(&self, rule_name: &str) -> Result<RuleInfo> {
        let rule = self.ceph_json(&["osd", "crush", "rule", "dump", rule_name]).await?;
        Ok(serde_json::from_value(rule)?)
    }

    async fn crush_apply(&self, content: &CrushContent) -> Result<()> {
        for (parent, bucket) in content.buckets() {
            self.ceph(&["osd", "crush", "add-bucket", &bucket.name, bucket.bucket_type.as_str()])
                .await?;
            if let Some(parent) = parent {
                let loc = format!("{}={}", parent.bucket_type.as_str(), parent.name);
                self.ceph(&["osd", "crush", "move", &bucket.name, &loc]).await?;
            }
        }
        for (path, osd) in osd_paths(content) {
            let weight = format!("{:.4}", osd.weight);
            let loc = location_args(&path);
            let mut args = vec!["osd", "crush", "set", osd.name.as_str(), weight.as_str()];
            args.extend(loc.iter().map(String::as_str));
            self.ceph(&args).await?;
        }
        let out = self
            .run(
                "ceph",
                &[
                    "osd", "crush", "rule", "create-replicated", &content.rule_name,
                    &content.root.name, content.fault_domain.as_str(),
                ],
            )
            .await?;
        if !out.success() && !out.stderr.contains("already exists") {
            return Err(ToolError::Command {
                kind: ToolKind::Ceph,
                command: format!("ceph osd crush rule create-replicated {}", content.rule_name),
                rc: out.rc,
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    async fn crush_prune(&self, old: &CrushContent, new: &CrushContent) -> Result<()> {
        let keep_osds = new.osd_ids();
        for (bucket, osd) in old.osds() {
            if !keep_osds.contains(&osd.id) {
                self.ceph_idempotent(&["osd", "crush", "unlink", &osd.name, &bucket.name])
                    .await?;
            }
        }
        let keep_buckets: Vec<&str> = new.buckets().into_iter().map(|(_, b)| b.name.as_str()).collect();
        for (_, bucket) in old.buckets().into_iter().rev() {
            if !keep_buckets.contains(&bucket.name.as_str()) {
                self.ceph_idempotent(&["osd", "crush", "rm", &bucket.name]).await?;
            }
        }
        Ok(())
    }

    async fn crush_delete(&self, content: &CrushContent) -> Result<()> {
        self.ceph_idempotent(&["osd", "crush", "rule", "rm", &content.rule_name])
            .await?;
        for (bucket, osd) in content.osds() {
            self.ceph_idempotent(&["osd", "crush", "unlink", &osd.name, &bucket.name])
                .await?;
        }
        for (_, bucket) in content.buckets().into_iter().rev() {
            if !self.ceph_idempotent(&["osd", "crush", "rm", &bucket.name]).await? {
                debug!(bucket = %bucket.name, "crush bucket already gone");
            }
        }
        Ok(())
    }

    async fn osd_new(&self, fsid: &str) -> Result<i64> {
        let out = self.ceph(&["osd", "new", fsid]).await?;
        out.stdout
            .trim()
            .parse()
            .map_err(|e| ToolError::parse("ceph osd new", e))
    }

    async fn osd_purge(&self, osd_id: i64) -> Result<bool> {
        let id = osd_id.to_string();
        self.ceph_idempotent(&["osd", "purge", &id, "--yes-i-really-mean-it"])
            .await
    }

    async fn mark_osds_out(&self, names: &[String]) -> Result<()> {
        for name in names {
            if !self.ceph_idempotent(&["osd", "out", name]).await? {
                warn!(osd = %name, "osd unknown to ceph, not marked out");
            }
        }
        Ok(())
    }

    async fn config_set(&self, who: &str, key: &str, value: &str) -> Result<()> {
        self.ceph(&["config", "set", who, key, value]).await?;
        Ok(())
    }

    async fn config_remove(&self, who: &str, key: &str) -> Result<bool> {
        self.ceph_idempotent(&["config", "rm", who, key]).await
    }

    async fn rbd_create(&self, pool: &str, image: &str, size_mb: u64) -> Result<()> {
        let spec = format!("{pool}/{image}");
        let size = size_mb.to_string();
        let args = ["create", spec.as_str(), "--size", size.as_str()];
        self.run("rbd", &args)
            .await?
            .check(ToolKind::Ceph, &render("rbd", &args))?;
        Ok(())
    }

    async fn rbd_remove(&self, pool: &str, image: &str) -> Result<bool> {
        let spec = format!("{pool}/{image}");
        let args = ["rm", spec.as_str()];
        self.run("rbd", &args)
            .await?
            .normalize(ToolKind::Ceph, &render("rbd", &args))
    }

    async fn rbd_snap_create(&self, pool: &str, image: &str, snap: &str) -> Result<()> {
        let spec = format!("{pool}/{image}@{snap}");
        let args = ["snap", "create", spec.as_str()];
        self.run("rbd", &args)
            .await?
            .check(ToolKind::Ceph, &render("rbd", &args))?;
        Ok(())
    }

    async fn rbd_snap_remove(&self, pool: &str, image: &str, snap: &str) -> Result<bool> {
        let spec = format!("{pool}/{image}@{snap}");
        let args = ["snap", "rm", spec.as_str()];
        self.run("rbd", &args)
            .await?
            .normalize(ToolKind::Ceph, &render("rbd", &args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedExecutor;

    fn content() -> CrushContent {
        CrushContent {
            rule_name: "rule-p1".into(),
            fault_domain: FaultDomain::Host,
            root: CrushBucket {
                id: -1,
                name: "root-p1".into(),
                bucket_type: BucketType::Root,
                osds: vec![],
                children: vec![
                    CrushBucket {
                        id: -2,
                        name: "p1-node1".into(),
                        bucket_type: BucketType::Host,
                        children: vec![],
                        osds: vec![CrushOsd { id: 1, name: "osd.1".into(), weight: 1.0 }],
                    },
                    CrushBucket {
                        id: -3,
                        name: "p1-node2".into(),
                        bucket_type: BucketType::Host,
                        children: vec![],
                        osds: vec![CrushOsd { id: 2, name: "osd.2".into(), weight: 1.0 }],
                    },
                ],
            },
        }
    }

    #[test]
    fn test_content_queries() {
        let c = content();
        assert_eq!(c.osd_ids(), vec![1, 2]);
        assert_eq!(c.fault_domains(), vec!["p1-node1", "p1-node2"]);
        assert_eq!(c.buckets().len(), 3);
    }

    #[tokio::test]
    async fn test_osd_new_parses_id() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond("ceph osd new", CommandOutput::ok("7\n"));
        let ceph = CephCli::new(exec.clone());
        assert_eq!(ceph.osd_new("f-1").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_crush_delete_is_idempotent() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond("ceph osd crush", CommandOutput::failed(2, "Error ENOENT: does not exist"));
        let ceph = CephCli::new(exec.clone());
        ceph.crush_delete(&content()).await.unwrap();
        // rule, two unlinks, three buckets
        assert_eq!(exec.commands().len(), 6);
    }

    #[tokio::test]
    async fn test_mark_out_tolerates_unknown() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond("ceph osd out osd.9", CommandOutput::failed(2, "osd.9 does not exist"));
        let ceph = CephCli::new(exec.clone());
        ceph.mark_osds_out(&["osd.1".into(), "osd.9".into()]).await.unwrap();
        assert_eq!(exec.commands(), vec!["ceph osd out osd.1", "ceph osd out osd.9"]);
    }

    #[tokio::test]
    async fn test_pool_create_without_specify_rep_sets_size() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            "ceph osd pool ls detail",
            CommandOutput::ok(r#"[{"pool_id": 4, "pool_name": "pool-abc"}]"#),
        );
        let ceph = CephCli::new(exec.clone());
        let spec = PoolSpec {
            pool_name: "pool-abc".into(),
            pool_type: PoolType::Replicated,
            replicate_size: 3,
            pg_num: 64,
            application: "rbd".into(),
        };
        assert_eq!(ceph.pool_create(&spec, false, &content()).await.unwrap(), 4);
        let cmds = exec.commands();
        assert!(cmds.contains(&"ceph osd pool set pool-abc size 3".to_string()));
        assert!(cmds.iter().all(|c| !c.contains("--size")));
    }

    #[tokio::test]
    async fn test_pool_create_with_specify_rep() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            "ceph osd pool ls detail",
            CommandOutput::ok(r#"[{"pool_id": 9, "pool_name": "pool-x"}]"#),
        );
        let ceph = CephCli::new(exec.clone());
        let spec = PoolSpec {
            pool_name: "pool-x".into(),
            pool_type: PoolType::Replicated,
            replicate_size: 2,
            pg_num: 32,
            application: "rbd".into(),
        };
        ceph.pool_create(&spec, true, &content()).await.unwrap();
        let cmds = exec.commands();
        assert!(cmds.iter().any(|c| c.ends_with("replicated rule-p1 --size 2")));
        assert!(!cmds.contains(&"ceph osd pool set pool-x size 2".to_string()));
    }

    #[tokio::test]
    async fn test_crush_prune_unlinks_removed_osds() {
        let exec = Arc::new(ScriptedExecutor::new());
        let ceph = CephCli::new(exec.clone());
        let old = content();
        let mut new = content();
        new.root.children.truncate(1);
        ceph.crush_prune(&old, &new).await.unwrap();
        assert_eq!(
            exec.commands(),
            vec!["ceph osd crush unlink osd.2 p1-node2", "ceph osd crush rm p1-node2"]
        );
    }
}
