// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory admin for driving the agent loops in tests.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dspace_protocol::api::{DiskInfo, NodeServiceManifest, ServiceUpdate};
use dspace_protocol::{RequestContext, Result, StorError};
use serde_json::{Value, json};

use crate::admin_client::AdminApi;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Default)]
struct AdminState {
    failing: BTreeSet<String>,
    manifest: NodeServiceManifest,
    reports: Vec<Vec<DiskInfo>>,
    online: Vec<DiskInfo>,
    offline: Vec<String>,
    updates: Vec<ServiceUpdate>,
    registered: Vec<(String, i64, String, u16)>,
}

/// Admin that records what agents push and serves a settable manifest.
#[derive(Default)]
pub struct RecordingAdmin {
    state: Mutex<AdminState>,
}

impl RecordingAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, method: &str) {
        lock(&self.state).failing.insert(method.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing.clear();
    }

    pub fn set_manifest(&self, manifest: NodeServiceManifest) {
        lock(&self.state).manifest = manifest;
    }

    pub fn reports(&self) -> Vec<Vec<DiskInfo>> {
        lock(&self.state).reports.clone()
    }

    pub fn online(&self) -> Vec<DiskInfo> {
        lock(&self.state).online.clone()
    }

    pub fn offline(&self) -> Vec<String> {
        lock(&self.state).offline.clone()
    }

    pub fn updates(&self) -> Vec<ServiceUpdate> {
        lock(&self.state).updates.clone()
    }

    /// `(service, node_id, ip, port)` of every registration.
    pub fn registered(&self) -> Vec<(String, i64, String, u16)> {
        lock(&self.state).registered.clone()
    }

    fn enter(&self, method: &str) -> Result<MutexGuard<'_, AdminState>> {
        let state = lock(&self.state);
        if state.failing.contains(method) {
            return Err(StorError::RpcTransport {
                reason: format!("injected failure in {method}"),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl AdminApi for RecordingAdmin {
    async fn disk_reporter(&self, _ctx: &RequestContext, disks: &[DiskInfo], _node_id: i64) -> Result<Value> {
        self.enter("disk_reporter")?.reports.push(disks.to_vec());
        Ok(json!({"added": disks.len(), "updated": 0, "removed": 0, "errored": 0}))
    }

    async fn disk_online(&self, _ctx: &RequestContext, info: &DiskInfo, _node_id: i64) -> Result<()> {
        self.enter("disk_online")?.online.push(info.clone());
        Ok(())
    }

    async fn disk_offline(&self, _ctx: &RequestContext, name: &str, _node_id: i64) -> Result<()> {
        self.enter("disk_offline")?.offline.push(name.to_string());
        Ok(())
    }

    async fn service_update(&self, _ctx: &RequestContext, services: &ServiceUpdate, _node_id: i64) -> Result<()> {
        self.enter("service_update")?.updates.push(services.clone());
        Ok(())
    }

    async fn node_services_manifest(&self, _ctx: &RequestContext, _node_id: i64) -> Result<NodeServiceManifest> {
        Ok(self.enter("node_services_manifest")?.manifest.clone())
    }

    async fn rpc_service_register(
        &self,
        _ctx: &RequestContext,
        service: &str,
        node_id: i64,
        ip: &str,
        port: u16,
    ) -> Result<()> {
        self.enter("rpc_service_register")?
            .registered
            .push((service.to_string(), node_id, ip.to_string(), port));
        Ok(())
    }
}
