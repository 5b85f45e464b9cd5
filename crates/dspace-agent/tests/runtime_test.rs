// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The agent over a real QUIC link, and the admin client against a loopback admin.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use dspace_agent::mock::RecordingAdmin;
use dspace_agent::{AdminApi, AgentRuntime, AgentTools, RpcAdminClient};
use dspace_protocol::api::{DiskInfo, NodeServiceManifest};
use dspace_protocol::{CallTimeout, Dispatcher, RequestContext, RpcClient, RpcServer, StorError};
use serde::Deserialize;
use serde_json::{Value, json};

#[tokio::test]
async fn test_agent_answers_over_quic() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.agent_addr = "127.0.0.1:0".parse().unwrap();
    let exec = Arc::new(dspace_tools::mock::ScriptedExecutor::new());
    let tools = AgentTools {
        exec: exec.clone(),
        disks: Arc::new(dspace_tools::mock::FakeDiskProbe::new(vec![])),
        systemd: Arc::new(dspace_tools::mock::FakeServiceControl::new()),
        docker: Arc::new(dspace_tools::mock::FakeServiceControl::new()),
        iscsi: Arc::new(dspace_tools::Lio::new(&config.iscsi_configfs, &config.iscsi_save_file)),
        radosgw: Arc::new(dspace_tools::mock::FakeRadosgw::new()),
        packages: Arc::new(dspace_tools::Yum::new(exec)),
    };
    let runtime = AgentRuntime::builder(config)
        .tools(tools)
        .admin(Arc::new(RecordingAdmin::new()))
        .without_loops()
        .start()
        .await
        .unwrap();
    let addr = runtime.local_addr().unwrap();

    let client = RpcClient::peer(addr).unwrap();
    let ctx = RequestContext::admin(CLUSTER);
    let alive: bool = client
        .call(&ctx, "check_dsa_status", &json!({}), CallTimeout::Default)
        .await
        .unwrap();
    assert!(alive);

    let err = client
        .call::<_, Value>(&ctx, "ceph_osd_restart", &json!({}), CallTimeout::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::InvalidInput { .. }), "{err:?}");

    client.close().await;
    tokio::time::timeout(Duration::from_secs(5), runtime.shutdown())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_loops_stop_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(vec![]).await;
    let runtime = AgentRuntime::builder(test_config(dir.path()))
        .tools(h.state().tools.clone())
        .admin(h.admin.clone())
        .without_listeners()
        .start()
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), runtime.shutdown())
        .await
        .unwrap()
        .unwrap();
}

#[derive(Debug, Deserialize)]
struct DiskOffline {
    name: String,
    node_id: i64,
}

type Seen = Arc<Mutex<Vec<String>>>;

/// A stand-in admin taking the agent-facing methods positionally.
async fn loopback_admin(seen: Seen) -> (Arc<RpcServer>, SocketAddr) {
    let mut d = Dispatcher::new();
    let log = seen.clone();
    d.register_with_params(
        "disk_offline",
        &["name", "node_id"],
        move |_ctx: RequestContext, req: DiskOffline| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("offline {} {}", req.name, req.node_id));
                Ok::<_, StorError>(())
            }
        },
    );
    #[derive(Deserialize)]
    struct Reporter {
        disks: Vec<DiskInfo>,
        node_id: i64,
    }
    let log = seen.clone();
    d.register_with_params(
        "disk_reporter",
        &["disks", "node_id"],
        move |_ctx: RequestContext, req: Reporter| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("report {} {}", req.disks.len(), req.node_id));
                Ok::<_, StorError>(json!({"added": req.disks.len()}))
            }
        },
    );
    #[derive(Deserialize)]
    struct Manifest {
        node_id: i64,
    }
    d.register_with_params(
        "node_services_manifest",
        &["node_id"],
        |_ctx: RequestContext, req: Manifest| async move {
            Ok::<_, StorError>(NodeServiceManifest {
                node_id: req.node_id,
                services: Vec::new(),
            })
        },
    );

    let server = Arc::new(RpcServer::self_signed("127.0.0.1:0".parse().unwrap()).unwrap());
    let addr = server.local_addr().unwrap();
    let serving = server.clone();
    let dispatcher = Arc::new(d);
    tokio::spawn(async move { serving.serve(dispatcher).await });
    (server, addr)
}

#[tokio::test]
async fn test_admin_client_sends_positional_arguments() {
    let seen: Seen = Arc::default();
    let (server, addr) = loopback_admin(seen.clone()).await;
    let admin = RpcAdminClient::new(Arc::new(RpcClient::peer(addr).unwrap()));
    let ctx = RequestContext::admin(CLUSTER);

    admin.disk_offline(&ctx, "sdb", NODE_ID).await.unwrap();
    let summary = admin
        .disk_reporter(&ctx, &[disk("sdc", "g-c")], NODE_ID)
        .await
        .unwrap();
    assert_eq!(summary["added"], 1);
    let manifest = admin.node_services_manifest(&ctx, NODE_ID).await.unwrap();
    assert_eq!(manifest.node_id, NODE_ID);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![format!("offline sdb {NODE_ID}"), format!("report 1 {NODE_ID}")]
    );

    let err = admin.service_update(&ctx, &Default::default(), NODE_ID).await.unwrap_err();
    assert!(matches!(err, StorError::NoSuchMethod { .. }));
    server.close();
}
