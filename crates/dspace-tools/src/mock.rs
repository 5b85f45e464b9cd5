// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory tool implementations for tests.
//!
//! Every fake records the verbs it saw and can be told to fail a verb, so
//! callers can drive their error paths without a cluster.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use dspace_protocol::api::{DiskInfo, LedState, ObjectPolicySpec, PartitionInfo};
use serde_json::{Value, json};

use crate::ceph::{CephTool, CrushContent, PoolSpec, RuleInfo};
use crate::disk::DiskProbe;
use crate::error::{Result, ToolError, ToolKind};
use crate::executor::{CommandOutput, Executor, render};
use crate::metrics::{MetricSource, PgStateSummary, Sample};
use crate::radosgw::RadosgwAdmin;
use crate::service::{ContainerRuntime, ContainerSpec, ServiceControl, UnitStatus};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn injected(kind: ToolKind, verb: &str) -> ToolError {
    ToolError::Command {
        kind,
        command: verb.to_string(),
        rc: 1,
        stderr: "injected failure".to_string(),
    }
}

/// Executor answering from a prefix table; unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: Mutex<Vec<(String, CommandOutput)>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix`. The longest matching prefix wins.
    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        lock(&self.responses).push((prefix.to_string(), output));
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn host(&self) -> &str {
        "scripted"
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let rendered = render(program, args);
        lock(&self.commands).push(rendered.clone());
        let responses = lock(&self.responses);
        Ok(responses
            .iter()
            .filter(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

#[derive(Default)]
struct CephState {
    health: Option<String>,
    next_pool_id: i64,
    next_osd_id: i64,
    next_rule_id: i64,
    pools: BTreeMap<String, (i64, u32)>,
    rules: BTreeMap<String, (i64, CrushContent)>,
    osds: BTreeSet<i64>,
    out: Vec<String>,
    configs: BTreeMap<(String, String), String>,
    images: BTreeSet<String>,
    snaps: BTreeSet<String>,
    calls: Vec<String>,
    failing: BTreeSet<String>,
}

/// Ceph cluster kept in memory.
#[derive(Default)]
pub struct FakeCeph {
    state: Mutex<CephState>,
}

impl FakeCeph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `verb` (the trait method name) fail.
    pub fn fail_on(&self, verb: &str) {
        lock(&self.state).failing.insert(verb.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing.clear();
    }

    pub fn set_health(&self, health: &str) {
        lock(&self.state).health = Some(health.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn rule(&self, name: &str) -> Option<CrushContent> {
        lock(&self.state).rules.get(name).map(|(_, c)| c.clone())
    }

    pub fn pool_size(&self, name: &str) -> Option<u32> {
        lock(&self.state).pools.get(name).map(|(_, size)| *size)
    }

    pub fn osds_out(&self) -> Vec<String> {
        lock(&self.state).out.clone()
    }

    pub fn config(&self, who: &str, key: &str) -> Option<String> {
        lock(&self.state)
            .configs
            .get(&(who.to_string(), key.to_string()))
            .cloned()
    }

    pub fn has_image(&self, pool: &str, image: &str) -> bool {
        lock(&self.state).images.contains(&format!("{pool}/{image}"))
    }

    pub fn has_snap(&self, pool: &str, image: &str, snap: &str) -> bool {
        lock(&self.state).snaps.contains(&format!("{pool}/{image}@{snap}"))
    }

    fn enter(&self, verb: &str) -> Result<std::sync::MutexGuard<'_, CephState>> {
        let mut state = lock(&self.state);
        state.calls.push(verb.to_string());
        if state.failing.contains(verb) {
            return Err(injected(ToolKind::Ceph, verb));
        }
        Ok(state)
    }
}

#[async_trait]
impl CephTool for FakeCeph {
    async fn status(&self) -> Result<Value> {
        let state = self.enter("status")?;
        Ok(json!({
            "health": {"status": state.health.clone().unwrap_or_else(|| "HEALTH_OK".into())},
            "osdmap": {"num_osds": state.osds.len()},
        }))
    }

    async fn health(&self) -> Result<String> {
        let state = self.enter("health")?;
        Ok(state.health.clone().unwrap_or_else(|| "HEALTH_OK".into()))
    }

    async fn pool_create(&self, spec: &PoolSpec, _specify_rep: bool, crush: &CrushContent) -> Result<i64> {
        let mut state = self.enter("pool_create")?;
        state.next_rule_id += 1;
        let rule_id = state.next_rule_id;
        state.rules.insert(crush.rule_name.clone(), (rule_id, crush.clone()));
        state.next_pool_id += 1;
        let id = state.next_pool_id;
        state.pools.insert(spec.pool_name.clone(), (id, spec.replicate_size));
        Ok(id)
    }

    async fn pool_delete(&self, pool_name: &str) -> Result<bool> {
        let mut state = self.enter("pool_delete")?;
        Ok(state.pools.remove(pool_name).is_some())
    }

    async fn pool_set_size(&self, pool_name: &str, size: u32) -> Result<()> {
        let mut state = self.enter("pool_set_size")?;
        match state.pools.get_mut(pool_name) {
            Some(pool) => {
                pool.1 = size;
                Ok(())
            }
            None => Err(ToolError::NotFound(format!("pool {pool_name}"))),
        }
    }

    async fn rule_get(&self, rule_name: &str) -> Result<RuleInfo> {
        let state = self.enter("rule_get")?;
        state
            .rules
            .get(rule_name)
            .map(|(rule_id, _)| RuleInfo { rule_id: *rule_id })
            .ok_or_else(|| ToolError::NotFound(format!("rule {rule_name}")))
    }

    async fn crush_apply(&self, content: &CrushContent) -> Result<()> {
        let mut state = self.enter("crush_apply")?;
        let rule_id = match state.rules.get(&content.rule_name) {
            Some((id, _)) => *id,
            None => {
                state.next_rule_id += 1;
                state.next_rule_id
            }
        };
        state.rules.insert(content.rule_name.clone(), (rule_id, content.clone()));
        Ok(())
    }

    async fn crush_prune(&self, _old: &CrushContent, _new: &CrushContent) -> Result<()> {
        self.enter("crush_prune")?;
        Ok(())
    }

    async fn crush_delete(&self, content: &CrushContent) -> Result<()> {
        let mut state = self.enter("crush_delete")?;
        state.rules.remove(&content.rule_name);
        Ok(())
    }

    async fn osd_new(&self, _fsid: &str) -> Result<i64> {
        let mut state = self.enter("osd_new")?;
        let id = state.next_osd_id;
        state.next_osd_id += 1;
        state.osds.insert(id);
        Ok(id)
    }

    async fn osd_purge(&self, osd_id: i64) -> Result<bool> {
        let mut state = self.enter("osd_purge")?;
        Ok(state.osds.remove(&osd_id))
    }

    async fn mark_osds_out(&self, names: &[String]) -> Result<()> {
        let mut state = self.enter("mark_osds_out")?;
        state.out.extend(names.iter().cloned());
        Ok(())
    }

    async fn config_set(&self, who: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.enter("config_set")?;
        state
            .configs
            .insert((who.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn config_remove(&self, who: &str, key: &str) -> Result<bool> {
        let mut state = self.enter("config_remove")?;
        Ok(state
            .configs
            .remove(&(who.to_string(), key.to_string()))
            .is_some())
    }

    async fn rbd_create(&self, pool: &str, image: &str, _size_mb: u64) -> Result<()> {
        let mut state = self.enter("rbd_create")?;
        state.images.insert(format!("{pool}/{image}"));
        Ok(())
    }

    async fn rbd_remove(&self, pool: &str, image: &str) -> Result<bool> {
        let mut state = self.enter("rbd_remove")?;
        Ok(state.images.remove(&format!("{pool}/{image}")))
    }

    async fn rbd_snap_create(&self, pool: &str, image: &str, snap: &str) -> Result<()> {
        let mut state = self.enter("rbd_snap_create")?;
        state.snaps.insert(format!("{pool}/{image}@{snap}"));
        Ok(())
    }

    async fn rbd_snap_remove(&self, pool: &str, image: &str, snap: &str) -> Result<bool> {
        let mut state = self.enter("rbd_snap_remove")?;
        Ok(state.snaps.remove(&format!("{pool}/{image}@{snap}")))
    }
}

#[derive(Default)]
struct ServiceState {
    statuses: BTreeMap<String, UnitStatus>,
    containers: BTreeMap<String, ContainerSpec>,
    calls: Vec<String>,
    failing: BTreeSet<String>,
}

/// Units known by name; unknown units report `Missing`.
#[derive(Default)]
pub struct FakeServiceControl {
    state: Mutex<ServiceState>,
}

impl FakeServiceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, name: &str, status: UnitStatus) {
        lock(&self.state).statuses.insert(name.to_string(), status);
    }

    pub fn fail_on(&self, verb: &str) {
        lock(&self.state).failing.insert(verb.to_string());
    }

    /// Recorded calls as `"<verb> <name>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Spec of a container created through [`ContainerRuntime::run`].
    pub fn container(&self, name: &str) -> Option<ContainerSpec> {
        lock(&self.state).containers.get(name).cloned()
    }

    fn act(&self, verb: &str, name: &str, next: Option<UnitStatus>) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(format!("{verb} {name}"));
        if state.failing.contains(verb) {
            return Err(injected(ToolKind::Systemd, verb));
        }
        if let Some(next) = next {
            state.statuses.insert(name.to_string(), next);
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceControl for FakeServiceControl {
    async fn status(&self, name: &str) -> Result<UnitStatus> {
        let state = lock(&self.state);
        if state.failing.contains("status") {
            return Err(injected(ToolKind::Systemd, "status"));
        }
        Ok(state.statuses.get(name).copied().unwrap_or(UnitStatus::Missing))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.act("start", name, Some(UnitStatus::Active))
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.act("restart", name, Some(UnitStatus::Active))
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.act("stop", name, Some(UnitStatus::Inactive))
    }

    async fn enable(&self, name: &str) -> Result<()> {
        self.act("enable", name, None)
    }

    async fn disable(&self, name: &str) -> Result<()> {
        self.act("disable", name, None)
    }

    async fn rm(&self, name: &str) -> Result<bool> {
        self.act("rm", name, None)?;
        let mut state = lock(&self.state);
        state.containers.remove(name);
        Ok(state.statuses.remove(name).is_some())
    }
}

#[async_trait]
impl ContainerRuntime for FakeServiceControl {
    async fn run(&self, spec: &ContainerSpec) -> Result<()> {
        self.act("run", &spec.name, Some(UnitStatus::Running))?;
        lock(&self.state).containers.insert(spec.name.clone(), spec.clone());
        Ok(())
    }
}

#[derive(Default)]
struct DiskState {
    disks: Vec<DiskInfo>,
    leds: BTreeMap<String, LedState>,
}

/// Disk inventory set by the test.
#[derive(Default)]
pub struct FakeDiskProbe {
    state: Mutex<DiskState>,
}

impl FakeDiskProbe {
    pub fn new(disks: Vec<DiskInfo>) -> Self {
        Self {
            state: Mutex::new(DiskState {
                disks,
                leds: BTreeMap::new(),
            }),
        }
    }

    pub fn set_disks(&self, disks: Vec<DiskInfo>) {
        lock(&self.state).disks = disks;
    }

    pub fn led(&self, name: &str) -> LedState {
        lock(&self.state).leds.get(name).copied().unwrap_or_default()
    }

    fn with_disk<T>(&self, name: &str, f: impl FnOnce(&mut DiskInfo) -> T) -> Result<T> {
        let mut state = lock(&self.state);
        state
            .disks
            .iter_mut()
            .find(|d| d.name == name)
            .map(f)
            .ok_or_else(|| ToolError::NotFound(format!("disk {name}")))
    }
}

#[async_trait]
impl DiskProbe for FakeDiskProbe {
    async fn probe(&self) -> Result<Vec<DiskInfo>> {
        Ok(lock(&self.state).disks.clone())
    }

    async fn smart(&self, name: &str) -> Result<Value> {
        self.with_disk(name, |d| {
            json!({"device": {"name": d.name}, "smart_status": {"passed": true}})
        })
    }

    async fn light(&self, name: &str, led: LedState) -> Result<()> {
        self.with_disk(name, |_| ())?;
        lock(&self.state).leds.insert(name.to_string(), led);
        Ok(())
    }

    async fn partitions_create(&self, name: &str, num: u32) -> Result<Vec<PartitionInfo>> {
        self.with_disk(name, |d| {
            let size = d.size / u64::from(num.max(1));
            d.partitions = (1..=num)
                .map(|i| PartitionInfo {
                    uuid: format!("{}-part{i}", d.identity()),
                    name: format!("{}{i}", d.name),
                    size,
                })
                .collect();
            d.partitions.clone()
        })
    }

    async fn partitions_remove(&self, name: &str) -> Result<()> {
        self.with_disk(name, |d| d.partitions.clear())
    }
}

/// Metric source answering pg-state queries from a table.
#[derive(Default)]
pub struct FakeMetricSource {
    pg_states: Mutex<BTreeMap<i64, PgStateSummary>>,
}

impl FakeMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pg_states(&self, pool_id: i64, summary: PgStateSummary) {
        lock(&self.pg_states).insert(pool_id, summary);
    }
}

#[async_trait]
impl MetricSource for FakeMetricSource {
    async fn query(&self, promql: &str) -> Result<Vec<Sample>> {
        let states = lock(&self.pg_states);
        Ok(states
            .iter()
            .map(|(pool_id, s)| {
                let value = match promql {
                    "ceph_pg_total" => s.total,
                    "ceph_pg_degraded" => s.degraded,
                    "ceph_pg_recovering" => s.recovering,
                    "ceph_pg_undersized" => s.undersized,
                    "ceph_pg_inconsistent" => s.inconsistent,
                    _ => 0,
                };
                Sample {
                    labels: BTreeMap::from([("pool_id".to_string(), pool_id.to_string())]),
                    value: value as f64,
                }
            })
            .collect())
    }
}

#[derive(Default)]
struct RadosgwState {
    zones: BTreeSet<String>,
    placements: BTreeMap<String, ObjectPolicySpec>,
    default_placement: Option<String>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeRadosgw {
    state: Mutex<RadosgwState>,
}

impl FakeRadosgw {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zones(&self) -> Vec<String> {
        lock(&self.state).zones.iter().cloned().collect()
    }

    pub fn placement(&self, name: &str) -> Option<ObjectPolicySpec> {
        lock(&self.state).placements.get(name).cloned()
    }

    pub fn default_placement(&self) -> Option<String> {
        lock(&self.state).default_placement.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }
}

#[async_trait]
impl RadosgwAdmin for FakeRadosgw {
    async fn zone_ensure(&self, _realm: &str, _zonegroup: &str, zone: &str) -> Result<bool> {
        let mut state = lock(&self.state);
        state.calls.push(format!("zone_ensure {zone}"));
        Ok(state.zones.insert(zone.to_string()))
    }

    async fn placement_create(&self, spec: &ObjectPolicySpec) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(format!("placement_create {}", spec.name));
        state.placements.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn placement_modify(&self, spec: &ObjectPolicySpec) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(format!("placement_modify {}", spec.name));
        if !state.placements.contains_key(&spec.name) {
            return Err(ToolError::NotFound(format!("placement {}", spec.name)));
        }
        state.placements.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn placement_delete(&self, _zone: &str, name: &str) -> Result<bool> {
        let mut state = lock(&self.state);
        state.calls.push(format!("placement_delete {name}"));
        Ok(state.placements.remove(name).is_some())
    }

    async fn placement_set_default(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(format!("placement_set_default {name}"));
        state.default_placement = Some(name.to_string());
        Ok(())
    }

    async fn period_update(&self) -> Result<()> {
        lock(&self.state).calls.push("period_update".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_longest_prefix_wins() {
        let exec = ScriptedExecutor::new();
        exec.respond("ceph", CommandOutput::failed(1, "generic"));
        exec.respond("ceph osd new", CommandOutput::ok("3"));
        assert_eq!(exec.run("ceph", &["osd", "new", "x"]).await.unwrap().stdout, "3");
        assert_eq!(exec.run("ceph", &["status"]).await.unwrap().rc, 1);
        assert!(exec.run("rbd", &["ls"]).await.unwrap().success());
        assert_eq!(exec.commands().len(), 3);
    }

    #[tokio::test]
    async fn test_fake_ceph_failure_injection() {
        let ceph = FakeCeph::new();
        assert_eq!(ceph.osd_new("a").await.unwrap(), 0);
        ceph.fail_on("osd_new");
        assert!(ceph.osd_new("b").await.is_err());
        ceph.clear_failures();
        assert_eq!(ceph.osd_new("c").await.unwrap(), 1);
        assert_eq!(ceph.calls(), vec!["osd_new", "osd_new", "osd_new"]);
    }
}
