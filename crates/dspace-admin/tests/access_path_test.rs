// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! iSCSI access paths: gateways, client groups and mappings.

mod common;

use common::{CLUSTER, Harness};
use dspace_admin::handlers::GATEWAY_CIDR_KEY;
use dspace_admin::models::{
    AccessPathStatus, Node, Pool, PoolRole, PoolStatus, Volume, VolumeAccessPath, VolumeClientGroup,
    VolumeGateway, VolumeMapping, VolumeStatus,
};
use dspace_admin::store::{Filter, Record};
use dspace_protocol::StorError;
use dspace_tools::{FaultDomain, PoolType};
use serde_json::{Value, json};

const INITIATOR: &str = "iqn.1994-05.com.redhat:client1";

async fn access_path(h: &Harness) -> Record<VolumeAccessPath> {
    h.call("volume_access_path_create", json!({"name": "ap1"})).await.unwrap()
}

async fn mount(h: &Harness, path: &Record<VolumeAccessPath>, node: &Record<Node>) {
    let pending: Record<VolumeAccessPath> = h
        .call(
            "volume_access_path_mount_gateway",
            json!({"access_path_id": path.id, "node_id": node.id}),
        )
        .await
        .unwrap();
    assert_eq!(pending.status, AccessPathStatus::Processing);
    h.settle().await;
}

async fn volume(h: &Harness) -> Record<Volume> {
    let pool = h
        .store
        .create(
            CLUSTER,
            &Pool {
                pool_name: "pool-abc".into(),
                display_name: "rbd".into(),
                pool_type: PoolType::Replicated,
                role: PoolRole::Data,
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
        .unwrap();
    h.store
        .create(
            CLUSTER,
            &Volume {
                name: "volume-abc".into(),
                display_name: "vol1".into(),
                pool_id: pool.id,
                size_mb: 1024,
                status: VolumeStatus::Active,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_mount_gateway_advertises_public_ip() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    let path = access_path(&h).await;

    mount(&h, &path, &node).await;

    let gateways = h
        .store
        .all::<VolumeGateway>(&h.ctx, &[Filter::eq("access_path_id", path.id)])
        .await
        .unwrap();
    assert_eq!(gateways.len(), 1);
    assert_eq!(gateways[0].node_id, node.id);
    assert_eq!(gateways[0].ip, "10.2.0.1");

    let node = h.store.load::<Node>(node.id).await.unwrap();
    assert_eq!(node.object_gateway_ip_address.as_deref(), Some("10.2.0.1"));
    let path = h.store.load::<VolumeAccessPath>(path.id).await.unwrap();
    assert_eq!(path.status, AccessPathStatus::Active);
    assert!(h.agent.target(&path.iqn).is_some());
    assert_eq!(h.notifier.count("VOLUME_ACCESS_PATH_MOUNT_GATEWAY_SUCCESS"), 1);
}

#[tokio::test]
async fn test_mount_gateway_prefers_gateway_ip() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    h.store
        .patch::<Node>(node.id, json!({"gateway_ip": "192.168.5.1"}))
        .await
        .unwrap();
    let path = access_path(&h).await;

    mount(&h, &path, &node).await;

    let node = h.store.load::<Node>(node.id).await.unwrap();
    assert_eq!(node.object_gateway_ip_address.as_deref(), Some("192.168.5.1"));
}

#[tokio::test]
async fn test_mount_gateway_checks_cidr() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    h.store
        .sys_config_set(CLUSTER, GATEWAY_CIDR_KEY, &json!("172.16.0.0/16"))
        .await
        .unwrap();
    let path = access_path(&h).await;

    let err = h
        .call::<Value>(
            "volume_access_path_mount_gateway",
            json!({"access_path_id": path.id, "node_id": node.id}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::CidrMismatch { .. }));
    assert_eq!(
        h.store.load::<VolumeAccessPath>(path.id).await.unwrap().status,
        AccessPathStatus::Active
    );
}

#[tokio::test]
async fn test_failed_mount_leaves_path_in_error() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    let path = access_path(&h).await;
    h.agent.fail_on("iscsi_target_create");

    mount(&h, &path, &node).await;

    let path = h.store.load::<VolumeAccessPath>(path.id).await.unwrap();
    assert_eq!(path.status, AccessPathStatus::Error);
    assert!(h.store.all::<VolumeGateway>(&h.ctx, &[]).await.unwrap().is_empty());
    assert_eq!(h.notifier.count("VOLUME_ACCESS_PATH_MOUNT_GATEWAY_ERROR"), 1);
}

#[tokio::test]
async fn test_mapping_pushes_target_and_blocks_unmount() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    let path = access_path(&h).await;
    mount(&h, &path, &node).await;
    let vol = volume(&h).await;
    let group: Record<VolumeClientGroup> = h
        .call(
            "volume_client_group_create",
            json!({"name": "hosts", "initiators": [INITIATOR]}),
        )
        .await
        .unwrap();

    let _: Record<VolumeAccessPath> = h
        .call(
            "volume_access_path_create_mapping",
            json!({"access_path_id": path.id, "client_group_id": group.id, "volume_ids": [vol.id]}),
        )
        .await
        .unwrap();
    h.settle().await;

    let mappings = h.store.all::<VolumeMapping>(&h.ctx, &[]).await.unwrap();
    assert_eq!(mappings.len(), 1);
    let target = h.agent.target(&path.iqn).unwrap();
    assert_eq!(target.len(), 1);
    assert_eq!(target[0].initiators, vec![INITIATOR.to_string()]);
    assert_eq!(target[0].volumes[0].image, "volume-abc");
    assert_eq!(
        h.store.load::<VolumeClientGroup>(group.id).await.unwrap().access_path_id,
        Some(path.id)
    );

    let err = h
        .call::<Value>(
            "volume_access_path_unmount_gateway",
            json!({"access_path_id": path.id, "node_id": node.id}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::AccessPathHasMappings { .. }));

    let err = h
        .call::<Value>("volume_client_group_delete", json!({"client_group_id": group.id}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("is mapped"), "{err}");
}

#[tokio::test]
async fn test_unmount_clears_advertised_address() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    let path = access_path(&h).await;
    mount(&h, &path, &node).await;

    let _: Record<VolumeAccessPath> = h
        .call(
            "volume_access_path_unmount_gateway",
            json!({"access_path_id": path.id, "node_id": node.id}),
        )
        .await
        .unwrap();
    h.settle().await;

    assert!(h.store.all::<VolumeGateway>(&h.ctx, &[]).await.unwrap().is_empty());
    assert_eq!(h.store.load::<Node>(node.id).await.unwrap().object_gateway_ip_address, None);
    assert!(h.agent.target(&path.iqn).is_none());
}

#[tokio::test]
async fn test_client_group_rejects_malformed_initiator() {
    let h = Harness::new().await;
    let err = h
        .call::<Value>(
            "volume_client_group_create",
            json!({"name": "bad", "initiators": ["not-an-iqn"]}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::IqnMalformed { .. }));
}

const OTHER_INITIATOR: &str = "iqn.1994-05.com.redhat:client2";

async fn group(h: &Harness, name: &str, initiator: &str) -> Record<VolumeClientGroup> {
    h.call(
        "volume_client_group_create",
        json!({"name": name, "initiators": [initiator]}),
    )
    .await
    .unwrap()
}

async fn map(h: &Harness, path: &Record<VolumeAccessPath>, group: &Record<VolumeClientGroup>, vol: &Record<Volume>) {
    let _: Record<VolumeAccessPath> = h
        .call(
            "volume_access_path_create_mapping",
            json!({"access_path_id": path.id, "client_group_id": group.id, "volume_ids": [vol.id]}),
        )
        .await
        .unwrap();
    h.settle().await;
}

#[tokio::test]
async fn test_volume_is_exported_through_one_path_only() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    let first = access_path(&h).await;
    let second: Record<VolumeAccessPath> = h
        .call("volume_access_path_create", json!({"name": "ap2"}))
        .await
        .unwrap();
    mount(&h, &first, &node).await;
    mount(&h, &second, &node).await;
    let vol = volume(&h).await;
    let hosts = group(&h, "hosts", INITIATOR).await;
    let others = group(&h, "others", OTHER_INITIATOR).await;
    map(&h, &first, &hosts, &vol).await;

    let err = h
        .call::<Value>(
            "volume_access_path_create_mapping",
            json!({"access_path_id": second.id, "client_group_id": others.id, "volume_ids": [vol.id]}),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already mapped"), "{err}");

    // nor twice through the same path
    let err = h
        .call::<Value>(
            "volume_access_path_create_mapping",
            json!({"access_path_id": first.id, "client_group_id": others.id, "volume_ids": [vol.id]}),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already mapped"), "{err}");

    assert_eq!(h.store.all::<VolumeMapping>(&h.ctx, &[]).await.unwrap().len(), 1);
    assert!(h.agent.target(&second.iqn).unwrap().iter().all(|m| m.volumes.is_empty()));
    assert_eq!(
        h.store.load::<VolumeAccessPath>(second.id).await.unwrap().status,
        AccessPathStatus::Active
    );
}

#[tokio::test]
async fn test_change_client_group_moves_the_export() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    let path = access_path(&h).await;
    mount(&h, &path, &node).await;
    let vol = volume(&h).await;
    let hosts = group(&h, "hosts", INITIATOR).await;
    let others = group(&h, "others", OTHER_INITIATOR).await;
    map(&h, &path, &hosts, &vol).await;

    let _: Record<VolumeAccessPath> = h
        .call(
            "volume_access_path_change_client_group",
            json!({"access_path_id": path.id, "client_group_id": hosts.id, "new_client_group_id": others.id}),
        )
        .await
        .unwrap();
    h.settle().await;

    let target = h.agent.target(&path.iqn).unwrap();
    assert_eq!(target.len(), 1);
    assert_eq!(target[0].initiators, vec![OTHER_INITIATOR.to_string()]);
    assert_eq!(target[0].volumes[0].image, "volume-abc");

    let mappings = h.store.all::<VolumeMapping>(&h.ctx, &[]).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].client_group_id, others.id);
    assert_eq!(h.store.load::<VolumeClientGroup>(hosts.id).await.unwrap().access_path_id, None);
    assert_eq!(
        h.store.load::<VolumeClientGroup>(others.id).await.unwrap().access_path_id,
        Some(path.id)
    );
    assert_eq!(h.notifier.count("VOLUME_ACCESS_PATH_CHANGE_CLIENT_GROUP_SUCCESS"), 1);

    // the freed group may be deleted now
    let _: Record<VolumeClientGroup> = h
        .call("volume_client_group_delete", json!({"client_group_id": hosts.id}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remove_mapping_releases_volume_and_group() {
    let h = Harness::new().await;
    let node = h.node("gw1", 1).await;
    let path = access_path(&h).await;
    mount(&h, &path, &node).await;
    let vol = volume(&h).await;
    let hosts = group(&h, "hosts", INITIATOR).await;
    map(&h, &path, &hosts, &vol).await;

    let err = h
        .call::<Value>(
            "volume_access_path_remove_mapping",
            json!({"access_path_id": path.id, "client_group_id": hosts.id, "volume_ids": [vol.id + 100]}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::NotFound { .. }), "{err:?}");

    let _: Record<VolumeAccessPath> = h
        .call(
            "volume_access_path_remove_mapping",
            json!({"access_path_id": path.id, "client_group_id": hosts.id, "volume_ids": [vol.id]}),
        )
        .await
        .unwrap();
    h.settle().await;

    assert!(h.store.all::<VolumeMapping>(&h.ctx, &[]).await.unwrap().is_empty());
    let target = h.agent.target(&path.iqn).unwrap();
    assert!(target.iter().all(|m| m.volumes.is_empty()));
    assert_eq!(h.store.load::<VolumeClientGroup>(hosts.id).await.unwrap().access_path_id, None);

    // an unmapped volume can be mapped again
    map(&h, &path, &hosts, &vol).await;
    assert_eq!(h.store.all::<VolumeMapping>(&h.ctx, &[]).await.unwrap().len(), 1);
}
