// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixture: a full admin over an in-memory store and in-memory tools.

#![allow(dead_code)]

use std::sync::Arc;

use dspace_admin::config::Config;
use dspace_admin::mock::{FakeAgent, FakeDialer, FakeRestarter, RecordingNotifier};
use dspace_admin::models::{
    ActionLog, ActionStatus, Cluster, ClusterStatus, Disk, DiskPartition, DiskRole, DiskStatus, Node, NodeStatus,
    Osd, OsdStatus, PartitionRole, Pool, PoolRole, PoolStatus,
};
use dspace_admin::store::{Filter, Record, SqliteStore, Store};
use dspace_admin::{AdminRuntime, AdminState};
use dspace_protocol::api::{DiskType, LedState};
use dspace_protocol::{Dispatcher, RequestContext, RpcRequest, StorError};
use dspace_tools::mock::{FakeCeph, FakeMetricSource};
use dspace_tools::{FaultDomain, PoolType};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub const CLUSTER: &str = "c1";
pub const TIB: u64 = 1 << 40;

pub struct Harness {
    pub runtime: AdminRuntime,
    pub store: Arc<dyn Store>,
    pub ceph: Arc<FakeCeph>,
    pub agent: Arc<FakeAgent>,
    pub notifier: Arc<RecordingNotifier>,
    pub restarter: Arc<FakeRestarter>,
    pub ctx: RequestContext,
}

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "DSPACE_DATABASE_URL" => Some("sqlite::memory:".to_string()),
        "DSPACE_HEARTBEAT_CHECK" => Some("false".to_string()),
        "DSPACE_SERVICE_AUTO_RESTART" => Some("false".to_string()),
        "DSPACE_TASK_WORKERS" => Some("4".to_string()),
        _ => None,
    })
    .unwrap()
}

impl Harness {
    pub async fn new() -> Self {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        store
            .create(
                CLUSTER,
                &Cluster {
                    display_name: "test".into(),
                    status: ClusterStatus::Active,
                },
            )
            .await
            .unwrap();
        let ceph = Arc::new(FakeCeph::new());
        let agent = Arc::new(FakeAgent::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let restarter = Arc::new(FakeRestarter::new());
        let runtime = AdminRuntime::builder(test_config())
            .store(store.clone())
            .ceph(ceph.clone())
            .metrics(Arc::new(FakeMetricSource::new()))
            .dialer(Arc::new(FakeDialer::new(agent.clone())))
            .notifier(notifier.clone())
            .restarter(restarter.clone())
            .without_listeners()
            .start()
            .await
            .unwrap();
        Self {
            runtime,
            store,
            ceph,
            agent,
            notifier,
            restarter,
            ctx: RequestContext::admin(CLUSTER),
        }
    }

    pub fn state(&self) -> &Arc<AdminState> {
        self.runtime.state()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.runtime.dispatcher()
    }

    /// Call `method` with keyword arguments and decode the result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, kwargs: Value) -> Result<T, StorError> {
        let request = RpcRequest::with_params(&self.ctx, method, &kwargs)?;
        let value = self.dispatcher().call(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call `method` with positional arguments, the way agents do.
    pub async fn call_positional(&self, method: &str, args: Vec<Value>) -> Result<Value, StorError> {
        let mut request = RpcRequest::new(&self.ctx, method, Default::default())?;
        request.args = args;
        self.dispatcher().call(request).await
    }

    /// Wait for every submitted task to finish.
    pub async fn settle(&self) {
        self.state().tasks.wait_idle().await;
    }

    pub async fn node(&self, hostname: &str, last_octet: u8) -> Record<Node> {
        self.store
            .create(
                CLUSTER,
                &Node {
                    hostname: hostname.into(),
                    ip_address: format!("10.0.0.{last_octet}"),
                    cluster_ip: format!("10.1.0.{last_octet}"),
                    public_ip: format!("10.2.0.{last_octet}"),
                    gateway_ip: None,
                    password: None,
                    ssh_user: "root".into(),
                    ssh_port: 22,
                    role_monitor: false,
                    role_storage: true,
                    role_admin: false,
                    role_object_gateway: true,
                    role_block_gateway: true,
                    rack_id: None,
                    datacenter_id: None,
                    object_gateway_ip_address: None,
                    status: NodeStatus::Active,
                },
            )
            .await
            .unwrap()
    }

    pub async fn disk(&self, node_id: i64, name: &str, status: DiskStatus) -> Record<Disk> {
        self.store
            .create(
                CLUSTER,
                &Disk {
                    node_id,
                    name: name.into(),
                    guid: Some(format!("guid-{node_id}-{name}")),
                    role: DiskRole::Data,
                    disk_type: DiskType::Hdd,
                    size: 4 * TIB,
                    slot: None,
                    wwid: None,
                    serial: None,
                    led: LedState::Off,
                    partition_num: 0,
                    status,
                },
            )
            .await
            .unwrap()
    }

    /// An active osd on a fresh in-use disk of `node`.
    pub async fn osd(&self, node: &Record<Node>, osd_id: i64) -> Record<Osd> {
        let disk = self.disk(node.id, &format!("sd{osd_id}"), DiskStatus::Inuse).await;
        self.store
            .create(
                CLUSTER,
                &Osd {
                    node_id: node.id,
                    osd_id,
                    osd_name: format!("osd.{osd_id}"),
                    fsid: format!("fsid-{osd_id}"),
                    disk_id: disk.id,
                    disk_type: DiskType::Hdd,
                    db_partition_id: None,
                    wal_partition_id: None,
                    cache_partition_id: None,
                    journal_partition_id: None,
                    crush_rule_id: None,
                    status: OsdStatus::Active,
                },
            )
            .await
            .unwrap()
    }

    /// An available accelerate disk on `node_id` split into `roles.len()` partitions.
    pub async fn accelerate(&self, node_id: i64, name: &str, roles: &[PartitionRole]) -> (Record<Disk>, Vec<Record<DiskPartition>>) {
        let disk = self.disk(node_id, name, DiskStatus::Available).await;
        let disk = self
            .store
            .patch::<Disk>(disk.id, serde_json::json!({"role": DiskRole::Accelerate, "disk_type": "ssd"}))
            .await
            .unwrap();
        let mut partitions = Vec::new();
        for (i, role) in roles.iter().enumerate() {
            let partition = self
                .store
                .create(
                    CLUSTER,
                    &DiskPartition {
                        node_id,
                        disk_id: disk.id,
                        uuid: format!("{name}-part{}", i + 1),
                        name: format!("{name}{}", i + 1),
                        size: TIB / 4,
                        role: *role,
                        status: DiskStatus::Available,
                    },
                )
                .await
                .unwrap();
            partitions.push(partition);
        }
        (disk, partitions)
    }

    /// An active pool of `role` that exists only in the store.
    pub async fn pool(&self, name: &str, role: PoolRole) -> Record<Pool> {
        self.store
            .create(
                CLUSTER,
                &Pool {
                    pool_name: format!("pool-{name}"),
                    display_name: name.into(),
                    pool_type: PoolType::Replicated,
                    role,
                    speed_type: None,
                    replicate_size: 3,
                    failure_domain_type: FaultDomain::Host,
                    crush_rule_id: None,
                    osd_num: 3,
                    ceph_pool_id: Some(1),
                    status: PoolStatus::Active,
                },
            )
            .await
            .unwrap()
    }

    /// Audit rows of `resource_type`, oldest first.
    pub async fn actions(&self, resource_type: &str) -> Vec<Record<ActionLog>> {
        let mut rows = self
            .store
            .all::<ActionLog>(&self.ctx, &[Filter::eq("resource_type", resource_type)])
            .await
            .unwrap();
        rows.sort_by_key(|r| r.id);
        rows
    }

    /// No audit row of any kind is left open.
    pub async fn assert_no_open_actions(&self) {
        let open = self
            .store
            .all::<ActionLog>(&self.ctx, &[Filter::eq("status", ActionStatus::UnderWay)])
            .await
            .unwrap();
        assert!(open.is_empty(), "actions left under way: {open:?}");
    }

    /// Three hosts with one active osd each.
    pub async fn three_hosts(&self) -> Vec<Record<Osd>> {
        let mut osds = Vec::new();
        for i in 1..=3u8 {
            let node = self.node(&format!("host{i}"), i).await;
            osds.push(self.osd(&node, i64::from(i)).await);
        }
        osds
    }
}
