// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory stand-ins for the admin's outbound seams: agents, the
//! websocket fan-out, mail and daemon restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dspace_protocol::api::{
    IscsiMapping, IscsiTargetSpec, LedState, ObjectPolicySpec, OsdInstallSpec, PartitionInfo,
    RgwInstallSpec, RouterInstallSpec, ServiceStatus,
};
use dspace_protocol::{RequestContext, Result, StorError};
use serde_json::{Value, json};

use crate::agent_client::AgentApi;
use crate::alert::Mailer;
use crate::models::Service;
use crate::notify::{Notifier, SendMessage};
use crate::registry::Dialer;
use crate::store::Record;
use crate::supervisor::Restarter;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn injected(verb: &str) -> StorError {
    StorError::CommandFailed {
        reason: format!("injected failure in {verb}"),
    }
}

#[derive(Default)]
struct AgentState {
    calls: Vec<String>,
    failing: BTreeSet<String>,
    reachable: BTreeSet<String>,
    partitions: BTreeMap<String, Vec<PartitionInfo>>,
    targets: BTreeMap<String, Vec<IscsiMapping>>,
    policies: BTreeMap<String, ObjectPolicySpec>,
    statuses: BTreeMap<String, ServiceStatus>,
}

/// Agent that records calls and keeps just enough state to answer them.
#[derive(Default)]
pub struct FakeAgent {
    state: Mutex<AgentState>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `verb` fail.
    pub fn fail_on(&self, verb: &str) {
        lock(&self.state).failing.insert(verb.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing.clear();
    }

    pub fn set_reachable(&self, ip: &str, reachable: bool) {
        let mut state = lock(&self.state);
        if reachable {
            state.reachable.insert(ip.to_string());
        } else {
            state.reachable.remove(ip);
        }
    }

    pub fn set_status(&self, name: &str, status: ServiceStatus) {
        lock(&self.state).statuses.insert(name.to_string(), status);
    }

    /// `verb` or `verb:arg` for every call, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn called(&self, verb: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| c.as_str() == verb || c.starts_with(&format!("{verb}:")))
            .count()
    }

    pub fn target(&self, iqn: &str) -> Option<Vec<IscsiMapping>> {
        lock(&self.state).targets.get(iqn).cloned()
    }

    pub fn policy(&self, name: &str) -> Option<ObjectPolicySpec> {
        lock(&self.state).policies.get(name).cloned()
    }

    fn enter(&self, verb: &str, arg: impl std::fmt::Display) -> Result<MutexGuard<'_, AgentState>> {
        let mut state = lock(&self.state);
        let arg = arg.to_string();
        state.calls.push(if arg.is_empty() { verb.to_string() } else { format!("{verb}:{arg}") });
        if state.failing.contains(verb) {
            return Err(injected(verb));
        }
        Ok(state)
    }
}

#[async_trait]
impl AgentApi for FakeAgent {
    async fn check_dsa_status(&self, _ctx: &RequestContext) -> Result<bool> {
        self.enter("check_dsa_status", "")?;
        Ok(true)
    }

    async fn disk_partitions_create(
        &self,
        _ctx: &RequestContext,
        disk_name: &str,
        num: u32,
    ) -> Result<Vec<PartitionInfo>> {
        let mut state = self.enter("disk_partitions_create", disk_name)?;
        let parts: Vec<PartitionInfo> = (1..=num)
            .map(|n| PartitionInfo {
                uuid: format!("{disk_name}-part-{n}"),
                name: format!("{disk_name}{n}"),
                size: 1 << 30,
            })
            .collect();
        state.partitions.insert(disk_name.to_string(), parts.clone());
        Ok(parts)
    }

    async fn disk_partitions_remove(&self, _ctx: &RequestContext, disk_name: &str) -> Result<()> {
        let mut state = self.enter("disk_partitions_remove", disk_name)?;
        state.partitions.remove(disk_name);
        Ok(())
    }

    async fn disk_light(&self, _ctx: &RequestContext, disk_name: &str, led: LedState) -> Result<()> {
        self.enter("disk_light", format!("{disk_name}={led:?}"))?;
        Ok(())
    }

    async fn disk_smart_get(&self, _ctx: &RequestContext, disk_name: &str) -> Result<Value> {
        self.enter("disk_smart_get", disk_name)?;
        Ok(json!({"device": disk_name, "smart_status": {"passed": true}}))
    }

    async fn ceph_osd_install(&self, _ctx: &RequestContext, spec: &OsdInstallSpec) -> Result<()> {
        self.enter("ceph_osd_install", spec.osd_id)?;
        Ok(())
    }

    async fn ceph_osd_uninstall(&self, _ctx: &RequestContext, spec: &OsdInstallSpec) -> Result<()> {
        self.enter("ceph_osd_uninstall", spec.osd_id)?;
        Ok(())
    }

    async fn ceph_osd_restart(&self, _ctx: &RequestContext, osd_id: i64) -> Result<()> {
        self.enter("ceph_osd_restart", osd_id)?;
        Ok(())
    }

    async fn radosgw_zone_ensure(
        &self,
        _ctx: &RequestContext,
        _realm: &str,
        _zonegroup: &str,
        zone: &str,
    ) -> Result<bool> {
        self.enter("radosgw_zone_ensure", zone)?;
        Ok(true)
    }

    async fn ceph_rgw_install(&self, _ctx: &RequestContext, spec: &RgwInstallSpec) -> Result<()> {
        self.enter("ceph_rgw_install", &spec.name)?;
        Ok(())
    }

    async fn ceph_rgw_uninstall(&self, _ctx: &RequestContext, name: &str) -> Result<()> {
        self.enter("ceph_rgw_uninstall", name)?;
        Ok(())
    }

    async fn create_object_policy(&self, _ctx: &RequestContext, spec: &ObjectPolicySpec) -> Result<()> {
        let mut state = self.enter("create_object_policy", &spec.name)?;
        state.policies.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn delete_object_policy(&self, _ctx: &RequestContext, _zone: &str, name: &str) -> Result<bool> {
        let mut state = self.enter("delete_object_policy", name)?;
        Ok(state.policies.remove(name).is_some())
    }

    async fn set_default_object_policy(&self, _ctx: &RequestContext, name: &str) -> Result<()> {
        self.enter("set_default_object_policy", name)?;
        Ok(())
    }

    async fn period_update(&self, _ctx: &RequestContext) -> Result<()> {
        self.enter("period_update", "")?;
        Ok(())
    }

    async fn rgw_router_install(&self, _ctx: &RequestContext, spec: &RouterInstallSpec) -> Result<()> {
        let mut state = self.enter("rgw_router_install", &spec.name)?;
        // keepalived brings the virtual ip up
        state.reachable.insert(spec.virtual_ip.clone());
        Ok(())
    }

    async fn rgw_router_update(&self, _ctx: &RequestContext, spec: &RouterInstallSpec) -> Result<()> {
        self.enter("rgw_router_update", &spec.name)?;
        Ok(())
    }

    async fn rgw_router_uninstall(&self, _ctx: &RequestContext, name: &str) -> Result<()> {
        self.enter("rgw_router_uninstall", name)?;
        Ok(())
    }

    async fn systemd_service_restart(&self, _ctx: &RequestContext, name: &str) -> Result<()> {
        self.enter("systemd_service_restart", name)?;
        Ok(())
    }

    async fn systemd_service_status(&self, _ctx: &RequestContext, name: &str) -> Result<ServiceStatus> {
        let state = self.enter("systemd_service_status", name)?;
        Ok(state.statuses.get(name).copied().unwrap_or(ServiceStatus::Active))
    }

    async fn docker_service_restart(&self, _ctx: &RequestContext, name: &str) -> Result<()> {
        self.enter("docker_service_restart", name)?;
        Ok(())
    }

    async fn docker_service_status(&self, _ctx: &RequestContext, name: &str) -> Result<ServiceStatus> {
        let state = self.enter("docker_service_status", name)?;
        Ok(state.statuses.get(name).copied().unwrap_or(ServiceStatus::Active))
    }

    async fn iscsi_target_create(&self, _ctx: &RequestContext, spec: &IscsiTargetSpec) -> Result<()> {
        let mut state = self.enter("iscsi_target_create", &spec.iqn)?;
        if state.targets.contains_key(&spec.iqn) {
            return Err(StorError::NameDuplicate {
                resource: "iscsi_target".into(),
                name: spec.iqn.clone(),
            });
        }
        state.targets.insert(spec.iqn.clone(), Vec::new());
        Ok(())
    }

    async fn iscsi_target_delete(&self, _ctx: &RequestContext, iqn: &str) -> Result<bool> {
        let mut state = self.enter("iscsi_target_delete", iqn)?;
        Ok(state.targets.remove(iqn).is_some())
    }

    async fn iscsi_mappings_apply(
        &self,
        _ctx: &RequestContext,
        iqn: &str,
        mappings: &[IscsiMapping],
    ) -> Result<()> {
        let mut state = self.enter("iscsi_mappings_apply", iqn)?;
        match state.targets.get_mut(iqn) {
            Some(current) => {
                *current = mappings.to_vec();
                Ok(())
            }
            None => Err(StorError::not_found("iscsi_target", iqn)),
        }
    }

    async fn ping(&self, _ctx: &RequestContext, ip: &str) -> Result<bool> {
        let state = self.enter("ping", ip)?;
        Ok(state.reachable.contains(ip))
    }
}

/// Hands out one shared [`FakeAgent`] for every address.
pub struct FakeDialer {
    agent: Arc<FakeAgent>,
    dialed: Mutex<Vec<SocketAddr>>,
}

impl FakeDialer {
    pub fn new(agent: Arc<FakeAgent>) -> Self {
        Self {
            agent,
            dialed: Mutex::new(Vec::new()),
        }
    }

    pub fn dialed(&self) -> Vec<SocketAddr> {
        lock(&self.dialed).clone()
    }
}

impl Dialer for FakeDialer {
    fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn AgentApi>> {
        lock(&self.dialed).push(addr);
        Ok(self.agent.clone())
    }
}

/// Keeps every event instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, SendMessage)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(cluster_id, message)` pairs in send order.
    pub fn messages(&self) -> Vec<(String, SendMessage)> {
        lock(&self.messages).clone()
    }

    pub fn op_types(&self) -> Vec<String> {
        lock(&self.messages).iter().map(|(_, m)| m.op_type.clone()).collect()
    }

    pub fn count(&self, op_type: &str) -> usize {
        lock(&self.messages).iter().filter(|(_, m)| m.op_type == op_type).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, ctx: &RequestContext, message: SendMessage) {
        lock(&self.messages).push((ctx.cluster_id.clone(), message));
    }
}

/// Collects mail; can be told to fail.
#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<(Vec<String>, String, String)>>,
    failing: Mutex<bool>,
}

impl FakeMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        *lock(&self.failing) = true;
    }

    /// `(to, subject, body)` of every delivered mail.
    pub fn sent(&self) -> Vec<(Vec<String>, String, String)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
        if *lock(&self.failing) {
            return Err(injected("smtp"));
        }
        lock(&self.sent).push((to.to_vec(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Records restart requests; fails while told to.
#[derive(Default)]
pub struct FakeRestarter {
    restarts: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl FakeRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    /// Service names in restart order.
    pub fn restarts(&self) -> Vec<String> {
        lock(&self.restarts).clone()
    }
}

#[async_trait]
impl Restarter for FakeRestarter {
    async fn restart(&self, _ctx: &RequestContext, service: &Record<Service>) -> Result<()> {
        lock(&self.restarts).push(service.name.clone());
        if *lock(&self.failing) {
            return Err(injected("restart"));
        }
        Ok(())
    }
}
