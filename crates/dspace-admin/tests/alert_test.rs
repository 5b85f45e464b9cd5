// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Alert rules, groups, the alert log and the action log.

mod common;

use common::Harness;
use dspace_admin::models::{ActionLog, ActionStatus, AlertGroup, AlertLevel, AlertLog, AlertRule, DiskStatus, EmailGroup};
use dspace_admin::store::{Filter, Record};
use dspace_protocol::StorError;
use serde_json::{Value, json};

async fn rule(h: &Harness, rule_type: &str) -> Record<AlertRule> {
    h.store
        .first::<AlertRule>(&h.ctx, &[Filter::eq("type", rule_type)])
        .await
        .unwrap()
        .unwrap()
}

async fn offline_disk(h: &Harness, name: &str) {
    let node = h.node(&format!("node-{name}"), 1).await;
    h.disk(node.id, name, DiskStatus::Available).await;
    let _: Value = h
        .call("disk_offline", json!({"name": name, "node_id": node.id}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_default_rules_are_seeded() {
    let h = Harness::new().await;
    let rules = h.store.all::<AlertRule>(&h.ctx, &[]).await.unwrap();
    let mut types: Vec<&str> = rules.iter().map(|r| r.rule_type.as_str()).collect();
    types.sort();
    assert_eq!(types, vec!["disk_offline", "disk_online", "service_status"]);
    assert!(rules.iter().all(|r| r.enabled));
}

#[tokio::test]
async fn test_disabled_rule_raises_nothing() {
    let h = Harness::new().await;
    let offline = rule(&h, "disk_offline").await;

    let updated: Record<AlertRule> = h
        .call("alert_rule_update", json!({"rule_id": offline.id, "enabled": false}))
        .await
        .unwrap();
    assert!(!updated.enabled);

    offline_disk(&h, "sdb").await;
    assert!(h.store.all::<AlertLog>(&h.ctx, &[]).await.unwrap().is_empty());
    // the event still goes out
    assert_eq!(h.notifier.count("DISK_OFFLINE"), 1);
}

#[tokio::test]
async fn test_rule_update_needs_a_change() {
    let h = Harness::new().await;
    let offline = rule(&h, "disk_offline").await;
    let err = h
        .call::<Value>("alert_rule_update", json!({"rule_id": offline.id}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_rule_level_applies_to_new_alerts() {
    let h = Harness::new().await;
    let offline = rule(&h, "disk_offline").await;
    let _: Record<AlertRule> = h
        .call("alert_rule_update", json!({"rule_id": offline.id, "level": "FATAL"}))
        .await
        .unwrap();

    offline_disk(&h, "sdb").await;
    let logs: Vec<Record<AlertLog>> = h.call("alert_log_list", json!({"level": "FATAL"})).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, AlertLevel::Fatal);
}

#[tokio::test]
async fn test_mark_read_counts_only_unread() {
    let h = Harness::new().await;
    offline_disk(&h, "sdb").await;
    offline_disk(&h, "sdc").await;

    let unread: Vec<Record<AlertLog>> = h.call("alert_log_list", json!({"read": false})).await.unwrap();
    assert_eq!(unread.len(), 2);
    // newest first
    assert!(unread[0].id > unread[1].id);

    let marked: usize = h
        .call("alert_log_mark_read", json!({"alert_log_ids": [unread[0].id]}))
        .await
        .unwrap();
    assert_eq!(marked, 1);
    let again: usize = h
        .call("alert_log_mark_read", json!({"alert_log_ids": [unread[0].id, unread[1].id]}))
        .await
        .unwrap();
    assert_eq!(again, 1);

    let unread: Vec<Record<AlertLog>> = h.call("alert_log_list", json!({"read": false})).await.unwrap();
    assert!(unread.is_empty());
}

#[tokio::test]
async fn test_groups_validate_members() {
    let h = Harness::new().await;
    let offline = rule(&h, "disk_offline").await;

    let err = h
        .call::<Value>("email_group_create", json!({"name": "ops", "emails": ["not an address"]}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::InvalidInput { .. }));

    let emails: Record<EmailGroup> = h
        .call("email_group_create", json!({"name": "ops", "emails": ["ops@example.com"]}))
        .await
        .unwrap();
    let dup = h
        .call::<Value>("email_group_create", json!({"name": "ops", "emails": ["a@example.com"]}))
        .await
        .unwrap_err();
    assert!(matches!(dup, StorError::NameDuplicate { .. }));

    let missing = h
        .call::<Value>(
            "alert_group_create",
            json!({"name": "disks", "alert_rule_ids": [offline.id], "email_group_ids": [9999]}),
        )
        .await
        .unwrap_err();
    assert!(matches!(missing, StorError::NotFound { .. }));

    let group: Record<AlertGroup> = h
        .call(
            "alert_group_create",
            json!({"name": "disks", "alert_rule_ids": [offline.id], "email_group_ids": [emails.id]}),
        )
        .await
        .unwrap();
    assert_eq!(group.email_group_ids, vec![emails.id]);
}

#[tokio::test]
async fn test_action_log_records_synchronous_and_task_outcomes() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    let path: Value = h.call("volume_access_path_create", json!({"name": "ap1"})).await.unwrap();
    let path_id = path["id"].as_i64().unwrap();
    h.agent.fail_on("iscsi_target_create");
    let _: Value = h
        .call(
            "volume_access_path_mount_gateway",
            json!({"access_path_id": path_id, "node_id": node.id}),
        )
        .await
        .unwrap();
    h.settle().await;

    let logs: Vec<Record<ActionLog>> = h
        .call("action_log_list", json!({"resource_type": "volume_access_path"}))
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    // newest first
    assert_eq!(logs[0].action, "mount_gateway");
    assert_eq!(logs[0].status, ActionStatus::Fail);
    assert!(logs[0].err_msg.is_some());
    assert!(logs[0].finish_time.is_some());
    assert_eq!(logs[1].action, "create");
    assert_eq!(logs[1].status, ActionStatus::Success);
    assert_eq!(logs[1].resource_id, Some(path_id));

    let failed: Vec<Record<ActionLog>> = h
        .call("action_log_list", json!({"status": "fail", "limit": 5}))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);

    let one: Record<ActionLog> = h
        .call("action_log_get", json!({"action_log_id": logs[1].id}))
        .await
        .unwrap();
    assert_eq!(one.id, logs[1].id);
}
