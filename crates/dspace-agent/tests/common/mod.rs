// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixture: an agent over in-memory tools, a tempdir host and a recording admin.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use dspace_agent::mock::RecordingAdmin;
use dspace_agent::{AgentRuntime, AgentState, AgentTools, Config};
use dspace_protocol::api::{DiskInfo, DiskType};
use dspace_protocol::{Dispatcher, RequestContext, RpcRequest, StorError};
use dspace_tools::{Lio, Yum};
use dspace_tools::mock::{FakeDiskProbe, FakeRadosgw, FakeServiceControl, ScriptedExecutor};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::TempDir;

pub const CLUSTER: &str = "c1";
pub const NODE_ID: i64 = 7;
pub const TIB: u64 = 1 << 40;

pub fn disk(name: &str, guid: &str) -> DiskInfo {
    DiskInfo {
        name: name.into(),
        guid: Some(guid.into()),
        wwid: None,
        serial: Some(format!("SN-{guid}")),
        size: 4 * TIB,
        disk_type: DiskType::Hdd,
        slot: None,
        is_system: false,
        partitions: Vec::new(),
    }
}

pub fn system_disk(name: &str, guid: &str) -> DiskInfo {
    DiskInfo {
        is_system: true,
        ..disk(name, guid)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub runtime: AgentRuntime,
    pub exec: Arc<ScriptedExecutor>,
    pub disks: Arc<FakeDiskProbe>,
    pub systemd: Arc<FakeServiceControl>,
    pub docker: Arc<FakeServiceControl>,
    pub radosgw: Arc<FakeRadosgw>,
    pub admin: Arc<RecordingAdmin>,
    pub ctx: RequestContext,
}

pub fn test_config(root: &std::path::Path) -> Config {
    let root = root.to_path_buf();
    Config::from_lookup(move |key| {
        let path = |p: &str| Some(root.join(p).to_string_lossy().into_owned());
        match key {
            "DSPACE_NODE_ID" => Some(NODE_ID.to_string()),
            "DSPACE_CLUSTER_ID" => Some(CLUSTER.to_string()),
            "DSPACE_ADMIN_ADDR" => Some("127.0.0.1:2080".to_string()),
            "DSPACE_NODE_IP" => Some("10.0.0.7".to_string()),
            "DSPACE_ISCSI_CONFIGFS" => path("configfs"),
            "DSPACE_ISCSI_SAVE_FILE" => path("etc/target/saveconfig.json"),
            "DSPACE_LOG_ROOT" => path("log"),
            "DSPACE_CEPH_DATA_DIR" => path("ceph"),
            "DSPACE_ROUTER_CONF_DIR" => path("routers"),
            _ => None,
        }
    })
    .unwrap()
}

impl Harness {
    pub async fn new(inventory: Vec<DiskInfo>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.log_root).unwrap();

        let exec = Arc::new(ScriptedExecutor::new());
        let disks = Arc::new(FakeDiskProbe::new(inventory));
        let systemd = Arc::new(FakeServiceControl::new());
        let docker = Arc::new(FakeServiceControl::new());
        let radosgw = Arc::new(FakeRadosgw::new());
        let admin = Arc::new(RecordingAdmin::new());
        let tools = AgentTools {
            exec: exec.clone(),
            disks: disks.clone(),
            systemd: systemd.clone(),
            docker: docker.clone(),
            iscsi: Arc::new(Lio::new(&config.iscsi_configfs, &config.iscsi_save_file)),
            radosgw: radosgw.clone(),
            packages: Arc::new(Yum::new(exec.clone())),
        };
        let runtime = AgentRuntime::builder(config)
            .tools(tools)
            .admin(admin.clone())
            .without_listeners()
            .without_loops()
            .start()
            .await
            .unwrap();
        Self {
            dir,
            runtime,
            exec,
            disks,
            systemd,
            docker,
            radosgw,
            admin,
            ctx: RequestContext::admin(CLUSTER),
        }
    }

    pub fn state(&self) -> &Arc<AgentState> {
        self.runtime.state()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.runtime.dispatcher()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write a file under the log root.
    pub fn log_file(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.state().config.log_root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Call `method` with keyword arguments and decode the result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, kwargs: Value) -> Result<T, StorError> {
        let request = RpcRequest::with_params(&self.ctx, method, &kwargs)?;
        let value = self.dispatcher().call(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call `method` with positional arguments.
    pub async fn call_positional<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T, StorError> {
        let mut request = RpcRequest::new(&self.ctx, method, Default::default())?;
        request.args = args;
        let value = self.dispatcher().call(request).await?;
        Ok(serde_json::from_value(value)?)
    }
}
