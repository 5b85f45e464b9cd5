// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Block volumes and their snapshots.

mod common;

use common::Harness;
use dspace_admin::models::{ActionStatus, Pool, PoolRole, Volume, VolumeSnapshot, VolumeStatus};
use dspace_admin::store::Record;
use dspace_protocol::StorError;
use serde_json::{Value, json};

async fn volume(h: &Harness, pool: &Record<Pool>, name: &str) -> Record<Volume> {
    let volume: Record<Volume> = h
        .call("volume_create", json!({"name": name, "pool_id": pool.id, "size_mb": 1024}))
        .await
        .unwrap();
    assert_eq!(volume.status, VolumeStatus::Creating);
    h.settle().await;
    h.store.load::<Volume>(volume.id).await.unwrap()
}

#[tokio::test]
async fn test_volume_and_snapshot_lifecycle() {
    let h = Harness::new().await;
    let pool = h.pool("rbd", PoolRole::Data).await;
    let vol = volume(&h, &pool, "v1").await;
    assert_eq!(vol.status, VolumeStatus::Active);
    assert!(h.ceph.has_image("pool-rbd", &vol.name));

    let snap: Record<VolumeSnapshot> = h
        .call("volume_snapshot_create", json!({"volume_id": vol.id, "name": "before-upgrade"}))
        .await
        .unwrap();
    h.settle().await;
    let snap = h.store.load::<VolumeSnapshot>(snap.id).await.unwrap();
    assert_eq!(snap.status, VolumeStatus::Active);
    assert!(h.ceph.has_snap("pool-rbd", &vol.name, &snap.name));

    let err = h.call::<Value>("volume_delete", json!({"volume_id": vol.id})).await.unwrap_err();
    assert!(matches!(err, StorError::PreconditionFailed { .. }), "{err:?}");

    let _: Record<VolumeSnapshot> = h
        .call("volume_snapshot_delete", json!({"snapshot_id": snap.id}))
        .await
        .unwrap();
    h.settle().await;
    assert!(!h.ceph.has_snap("pool-rbd", &vol.name, &snap.name));

    let _: Record<Volume> = h.call("volume_delete", json!({"volume_id": vol.id})).await.unwrap();
    h.settle().await;
    assert!(!h.ceph.has_image("pool-rbd", &vol.name));
    assert!(h.store.all::<Volume>(&h.ctx, &[]).await.unwrap().is_empty());

    for kind in ["volume", "volume_snapshot"] {
        let actions = h.actions(kind).await;
        assert_eq!(actions.len(), 2, "{kind}");
        assert!(actions.iter().all(|a| a.status == ActionStatus::Success), "{kind}");
    }
}

#[tokio::test]
async fn test_volume_create_validates_pool_and_name() {
    let h = Harness::new().await;
    let index = h.pool("index", PoolRole::Index).await;
    let err = h
        .call::<Value>("volume_create", json!({"name": "v1", "pool_id": index.id, "size_mb": 10}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::InvalidInput { .. }), "{err:?}");

    let pool = h.pool("rbd", PoolRole::Data).await;
    volume(&h, &pool, "v1").await;
    let err = h
        .call::<Value>("volume_create", json!({"name": "v1", "pool_id": pool.id, "size_mb": 10}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::NameDuplicate { .. }), "{err:?}");
}

#[tokio::test]
async fn test_failed_image_create_leaves_volume_in_error() {
    let h = Harness::new().await;
    let pool = h.pool("rbd", PoolRole::Data).await;
    h.ceph.fail_on("rbd_create");

    let vol = volume(&h, &pool, "v1").await;
    assert_eq!(vol.status, VolumeStatus::Error);
    assert_eq!(h.notifier.count("VOLUME_CREATE_ERROR"), 1);

    // error volumes are deletable
    h.ceph.clear_failures();
    let _: Record<Volume> = h.call("volume_delete", json!({"volume_id": vol.id})).await.unwrap();
    h.settle().await;
    assert!(h.store.all::<Volume>(&h.ctx, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_busy_volume_delete_closes_its_action() {
    let h = Harness::new().await;
    let pool = h.pool("rbd", PoolRole::Data).await;
    let vol = volume(&h, &pool, "v1").await;
    h.store
        .patch::<Volume>(vol.id, json!({"status": VolumeStatus::Deleting}))
        .await
        .unwrap();

    let err = h.call::<Value>("volume_delete", json!({"volume_id": vol.id})).await.unwrap_err();
    assert!(matches!(err, StorError::Busy { .. }), "{err:?}");
    let delete = h.actions("volume").await.pop().unwrap();
    assert_eq!(delete.action, "delete");
    assert_eq!(delete.status, ActionStatus::Fail);
    assert!(delete.finish_time.is_some());
    h.assert_no_open_actions().await;
}
