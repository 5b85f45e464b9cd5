// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service heartbeats folded by the supervisor.

mod common;

use common::{CLUSTER, Harness};
use dspace_admin::models::{AlertLog, Service};
use dspace_admin::store::{Filter, Record};
use dspace_admin::registry::AGENT_SERVICE;
use dspace_protocol::api::{DSA_SERVICE, ROLE_BASE, ServiceKind, ServiceStatus};
use serde_json::{Value, json};

fn heartbeat(status: &str) -> Value {
    json!({
        "role_storage": [{
            "name": "ceph-osd@1",
            "status": status,
            "node_id": 0,
            "service_name": "ceph-osd@1.service",
        }]
    })
}

#[tokio::test]
async fn test_positional_heartbeat_registers_and_alerts_once() {
    let h = Harness::new().await;
    let node = h.node("host1", 1).await;

    for status in ["active", "active", "inactive", "inactive"] {
        h.call_positional("service_update", vec![heartbeat(status), json!(node.id)])
            .await
            .unwrap();
    }

    assert_eq!(h.notifier.count("SERVICE_INACTIVE"), 1);
    let state = h.state().supervisor.state(CLUSTER, node.id, "ceph-osd@1").await.unwrap();
    assert_eq!(state.status, ServiceStatus::Inactive);

    let rows: Vec<Record<Service>> = h.call("service_list", json!({"node_id": node.id})).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ServiceStatus::Inactive);
    assert_eq!(rows[0].role, "role_storage");

    let alerts = h
        .store
        .all::<AlertLog>(&h.ctx, &[Filter::eq("type", "service_status")])
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    // auto restart is off in the fixture
    assert!(h.restarter.restarts().is_empty());
}

#[tokio::test]
async fn test_recovery_raises_info_alert() {
    let h = Harness::new().await;
    let node = h.node("host1", 1).await;

    for status in ["active", "inactive", "active"] {
        h.call_positional("service_update", vec![heartbeat(status), json!(node.id)])
            .await
            .unwrap();
    }

    assert_eq!(h.notifier.count("SERVICE_INACTIVE"), 1);
    assert_eq!(h.notifier.count("SERVICE_ACTIVE"), 1);
    let alerts = h
        .store
        .all::<AlertLog>(&h.ctx, &[Filter::eq("type", "service_status")])
        .await
        .unwrap();
    assert_eq!(alerts.len(), 2);
}

#[tokio::test]
async fn test_heartbeat_for_unknown_role_is_ignored() {
    let h = Harness::new().await;
    let node = h.node("host1", 1).await;
    let update = json!({
        "role_monitor": [{
            "name": "ceph-mon@host1",
            "status": "active",
            "node_id": node.id,
            "service_name": "ceph-mon@host1.service",
        }]
    });

    h.call::<Value>("service_update", json!({"services": update, "node_id": node.id}))
        .await
        .unwrap();

    let rows: Vec<Record<Service>> = h.call("service_list", json!({})).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_agent_registration_creates_its_service_row_once() {
    let h = Harness::new().await;
    let node = h.node("host1", 1).await;

    for _ in 0..2 {
        h.call_positional(
            "rpc_service_register",
            vec![json!(AGENT_SERVICE), json!(node.id), json!("10.0.0.1"), json!(2082)],
        )
        .await
        .unwrap();
    }
    h.call_positional(
        "rpc_service_register",
        vec![json!("websocket"), json!(node.id), json!("10.0.0.1"), json!(2081)],
    )
    .await
    .unwrap();

    let rows = h
        .store
        .all::<Service>(&h.ctx, &[Filter::eq("node_id", node.id)])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, DSA_SERVICE);
    assert_eq!(rows[0].role, ROLE_BASE);
    assert_eq!(rows[0].kind, ServiceKind::Container);
    assert_eq!(rows[0].service_name, "dspace-agent");

    // supervised from the start, so a silent agent times out
    let state = h.state().supervisor.state(CLUSTER, node.id, DSA_SERVICE).await.unwrap();
    assert_eq!(state.service_id, rows[0].id);
    assert_eq!(state.status, ServiceStatus::Active);
}
