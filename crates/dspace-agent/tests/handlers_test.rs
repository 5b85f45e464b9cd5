// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent methods through the dispatcher.

mod common;

use common::*;
use dspace_protocol::StorError;
use dspace_protocol::api::{IscsiMapping, LedState, PartitionInfo, ServiceStatus};
use dspace_tools::{CommandOutput, UnitStatus};
use serde_json::{Value, json};

#[tokio::test]
async fn test_every_agent_method_is_registered() {
    let h = Harness::new(vec![]).await;
    let names = h.dispatcher().method_names();
    for method in [
        "check_dsa_status",
        "ping",
        "disk_partitions_create",
        "disk_partitions_remove",
        "disk_light",
        "disk_smart_get",
        "ceph_osd_install",
        "ceph_osd_uninstall",
        "ceph_osd_restart",
        "ceph_osd_offline",
        "ceph_rgw_install",
        "ceph_rgw_uninstall",
        "rgw_router_install",
        "rgw_router_update",
        "rgw_router_uninstall",
        "systemd_service_restart",
        "systemd_service_status",
        "docker_service_restart",
        "docker_service_status",
        "create_object_policy",
        "modify_object_policy",
        "delete_object_policy",
        "set_default_object_policy",
        "period_update",
        "iscsi_target_create",
        "iscsi_target_delete",
        "iscsi_mappings_apply",
        "read_log_file_content",
        "log_file_size",
        "pull_logfile",
    ] {
        assert!(names.contains(&method), "{method} not registered");
    }
    assert!(h.call::<bool>("check_dsa_status", json!({})).await.unwrap());
}

#[tokio::test]
async fn test_partitions_create_and_remove() {
    let h = Harness::new(vec![disk("sdb", "g-b"), system_disk("sda", "g-a")]).await;

    let parts: Vec<PartitionInfo> = h
        .call("disk_partitions_create", json!({"disk_name": "sdb", "num": 4}))
        .await
        .unwrap();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0].name, "sdb1");

    let again = h
        .call::<Value>("disk_partitions_create", json!({"disk_name": "sdb", "num": 2}))
        .await;
    assert!(matches!(again, Err(StorError::PreconditionFailed { .. })));

    h.call::<()>("disk_partitions_remove", json!({"disk_name": "sdb"}))
        .await
        .unwrap();
    let parts: Vec<PartitionInfo> = h
        .call("disk_partitions_create", json!({"disk_name": "sdb", "num": 2}))
        .await
        .unwrap();
    assert_eq!(parts.len(), 2);
}

#[tokio::test]
async fn test_partitions_refuse_system_and_unknown_disks() {
    let h = Harness::new(vec![system_disk("sda", "g-a")]).await;
    assert!(matches!(
        h.call::<Value>("disk_partitions_create", json!({"disk_name": "sda", "num": 2}))
            .await,
        Err(StorError::PreconditionFailed { .. })
    ));
    assert!(matches!(
        h.call::<Value>("disk_partitions_create", json!({"disk_name": "sdz", "num": 2}))
            .await,
        Err(StorError::NotFound { .. })
    ));
    assert!(matches!(
        h.call::<Value>("disk_partitions_create", json!({"disk_name": "sda", "num": 0}))
            .await,
        Err(StorError::InvalidInput { .. })
    ));
}

#[tokio::test]
async fn test_disk_light_and_smart() {
    let h = Harness::new(vec![disk("sdb", "g-b")]).await;
    h.call_positional::<()>("disk_light", vec![json!("sdb"), json!("on")])
        .await
        .unwrap();
    assert_eq!(h.disks.led("sdb"), LedState::On);

    let smart: Value = h.call("disk_smart_get", json!({"disk_name": "sdb"})).await.unwrap();
    assert_eq!(smart["smart_status"]["passed"], json!(true));
}

#[tokio::test]
async fn test_osd_install_prepares_activates_and_starts() {
    let h = Harness::new(vec![disk("sdb", "g-b")]).await;
    let spec = json!({
        "osd_id": 3,
        "fsid": "f-3",
        "disk_name": "sdb",
        "db_partition": "sdc1",
    });
    h.call::<()>("ceph_osd_install", json!({"spec": spec})).await.unwrap();

    let commands = h.exec.commands();
    assert_eq!(commands[0], "rpm -q ceph-osd");
    assert!(commands[1].starts_with("ceph-volume lvm prepare --bluestore --osd-id 3"));
    assert!(commands[1].contains("--block.db /dev/sdc1"));
    assert!(commands[2].starts_with("ceph-volume lvm activate --no-systemd 3 f-3"));
    assert_eq!(h.systemd.calls(), vec!["enable ceph-osd@3", "start ceph-osd@3"]);
}

#[tokio::test]
async fn test_osd_install_stops_on_prepare_failure() {
    let h = Harness::new(vec![disk("sdb", "g-b")]).await;
    h.exec
        .respond("ceph-volume lvm prepare", CommandOutput::failed(1, "device busy"));
    let spec = json!({"osd_id": 3, "fsid": "f-3", "disk_name": "sdb"});
    let err = h.call::<()>("ceph_osd_install", json!({"spec": spec})).await;
    assert!(matches!(err, Err(StorError::CephError { .. })));
    assert!(h.systemd.calls().is_empty());
}

#[tokio::test]
async fn test_osd_install_installs_missing_package() {
    let h = Harness::new(vec![disk("sdb", "g-b")]).await;
    h.exec
        .respond("rpm -q ceph-osd", CommandOutput::failed(1, "package ceph-osd is not installed"));
    let spec = json!({"osd_id": 4, "fsid": "f-4", "disk_name": "sdb"});
    h.call::<()>("ceph_osd_install", json!({"spec": spec})).await.unwrap();
    assert_eq!(h.exec.commands()[1], "yum install -y ceph-osd");
}

#[tokio::test]
async fn test_osd_uninstall_tolerates_zap_failures_of_partitions() {
    let h = Harness::new(vec![]).await;
    h.systemd.set_status("ceph-osd@3", UnitStatus::Active);
    h.exec
        .respond("ceph-volume lvm zap /dev/sdc1", CommandOutput::failed(1, "gone"));
    let spec = json!({"osd_id": 3, "fsid": "f-3", "disk_name": "sdb", "db_partition": "sdc1"});
    h.call::<()>("ceph_osd_uninstall", json!({"spec": spec})).await.unwrap();

    assert_eq!(h.systemd.calls(), vec!["rm ceph-osd@3"]);
    let commands = h.exec.commands();
    assert!(commands.iter().any(|c| c.starts_with("ceph-volume lvm zap --destroy --osd-id 3")));
    assert!(commands.iter().any(|c| c.starts_with("ceph-volume lvm zap /dev/sdc1")));
}

#[tokio::test]
async fn test_osd_restart_and_offline() {
    let h = Harness::new(vec![]).await;
    h.call::<()>("ceph_osd_restart", json!({"osd_id": 5})).await.unwrap();
    h.call::<()>("ceph_osd_offline", json!({"osd_id": 5})).await.unwrap();
    assert_eq!(h.systemd.calls(), vec!["restart ceph-osd@5", "stop ceph-osd@5"]);
    let status: ServiceStatus = h
        .call("systemd_service_status", json!({"name": "ceph-osd@5"}))
        .await
        .unwrap();
    assert_eq!(status, ServiceStatus::Inactive);
}

#[tokio::test]
async fn test_rgw_install_and_uninstall() {
    let h = Harness::new(vec![]).await;
    let spec = json!({"name": "gw1", "ip": "10.0.0.7", "port": 7480, "zone": "default"});
    h.call::<()>("ceph_rgw_install", json!({"spec": spec})).await.unwrap();

    let data = h.path("ceph/radosgw/ceph-rgw.gw1");
    assert!(data.is_dir());
    assert!(
        h.exec
            .commands()
            .iter()
            .any(|c| c.starts_with("ceph auth get-or-create client.rgw.gw1"))
    );
    assert_eq!(
        h.systemd.calls(),
        vec!["enable ceph-radosgw@rgw.gw1", "start ceph-radosgw@rgw.gw1"]
    );

    h.exec.respond("ceph auth del", CommandOutput::failed(2, "no such entity"));
    h.call::<()>("ceph_rgw_uninstall", json!({"name": "gw1"})).await.unwrap();
    assert!(!data.exists());
    assert!(h.systemd.calls().contains(&"rm ceph-radosgw@rgw.gw1".to_string()));
}

#[tokio::test]
async fn test_rgw_install_rejects_path_names() {
    let h = Harness::new(vec![]).await;
    let spec = json!({"name": "../etc", "ip": "10.0.0.7", "port": 7480, "zone": "default"});
    assert!(matches!(
        h.call::<()>("ceph_rgw_install", json!({"spec": spec})).await,
        Err(StorError::InvalidInput { .. })
    ));
    assert!(h.exec.commands().is_empty());
}

#[tokio::test]
async fn test_object_policies_and_zone() {
    let h = Harness::new(vec![]).await;
    let created: bool = h
        .call(
            "radosgw_zone_ensure",
            json!({"realm": "r", "zonegroup": "zg", "zone": "z1"}),
        )
        .await
        .unwrap();
    assert!(created);

    let policy = json!({"name": "fast", "zone": "z1", "index_pool": "idx", "data_pool": "data"});
    h.call::<()>("create_object_policy", json!({"spec": policy})).await.unwrap();
    h.call::<()>("set_default_object_policy", json!({"name": "fast"}))
        .await
        .unwrap();
    h.call::<()>("period_update", json!({})).await.unwrap();
    assert_eq!(h.radosgw.default_placement().as_deref(), Some("fast"));

    let deleted: bool = h
        .call("delete_object_policy", json!({"zone": "z1", "name": "fast"}))
        .await
        .unwrap();
    assert!(deleted);
    assert!(h.radosgw.placement("fast").is_none());
}

fn router(backends: &[&str]) -> Value {
    json!({
        "name": "r1",
        "virtual_ip": "10.0.0.100",
        "virtual_router_id": 51,
        "port": 80,
        "backends": backends,
        "priority": 100,
    })
}

#[tokio::test]
async fn test_router_install_update_uninstall() {
    let h = Harness::new(vec![]).await;
    h.exec.respond(
        "ip -o route get",
        CommandOutput::ok("10.0.0.100 dev bond0 src 10.0.0.7 uid 0\n    cache \n"),
    );

    h.call::<()>("rgw_router_install", json!({"spec": router(&["10.0.0.1:7480"])}))
        .await
        .unwrap();
    let conf = h.path("routers/r1");
    let keepalived = std::fs::read_to_string(conf.join("keepalived.conf")).unwrap();
    assert!(keepalived.contains("interface bond0"));
    let container = h.docker.container("rgw-router-r1").unwrap();
    assert!(container.privileged && container.host_network);
    assert_eq!(container.image, "dspace/rgw-router");

    h.call::<()>(
        "rgw_router_update",
        json!({"spec": router(&["10.0.0.1:7480", "10.0.0.2:7480"])}),
    )
    .await
    .unwrap();
    let haproxy = std::fs::read_to_string(conf.join("haproxy.cfg")).unwrap();
    assert!(haproxy.contains("server rgw1 10.0.0.2:7480 check"));
    assert_eq!(h.docker.calls(), vec!["run rgw-router-r1", "restart rgw-router-r1"]);

    h.call::<()>("rgw_router_uninstall", json!({"name": "r1"})).await.unwrap();
    assert!(!conf.exists());
    assert!(h.docker.container("rgw-router-r1").is_none());
}

#[tokio::test]
async fn test_router_update_recreates_missing_container() {
    let h = Harness::new(vec![]).await;
    h.exec
        .respond("ip -o route get", CommandOutput::ok("10.0.0.100 dev eth0 src 10.0.0.7"));
    h.call::<()>("rgw_router_update", json!({"spec": router(&["10.0.0.1:7480"])}))
        .await
        .unwrap();
    assert_eq!(h.docker.calls(), vec!["run rgw-router-r1"]);
}

#[tokio::test]
async fn test_router_install_needs_a_route_to_the_vip() {
    let h = Harness::new(vec![]).await;
    let err = h
        .call::<()>("rgw_router_install", json!({"spec": router(&["10.0.0.1:7480"])}))
        .await;
    assert!(matches!(err, Err(StorError::InvalidInput { .. })));
    assert!(h.docker.calls().is_empty());
}

#[tokio::test]
async fn test_service_status_and_restart() {
    let h = Harness::new(vec![]).await;
    h.docker.set_status("dspace-agent", UnitStatus::Running);
    let status: ServiceStatus = h
        .call("docker_service_status", json!({"name": "dspace-agent"}))
        .await
        .unwrap();
    assert_eq!(status, ServiceStatus::Active);

    let missing: ServiceStatus = h
        .call("systemd_service_status", json!({"name": "ceph-mon@a"}))
        .await
        .unwrap();
    assert_eq!(missing, ServiceStatus::Inactive);

    h.call::<()>("systemd_service_restart", json!({"name": "ceph-mon@a"}))
        .await
        .unwrap();
    h.call::<()>("docker_service_restart", json!({"name": "dspace-agent"}))
        .await
        .unwrap();
    assert_eq!(h.systemd.calls(), vec!["restart ceph-mon@a"]);
    assert_eq!(h.docker.calls(), vec!["restart dspace-agent"]);
}

#[tokio::test]
async fn test_ping() {
    let h = Harness::new(vec![]).await;
    h.exec
        .respond("ping -c 1 -W 1 10.0.0.99", CommandOutput::failed(1, ""));
    assert!(h.call::<bool>("ping", json!({"ip": "10.0.0.1"})).await.unwrap());
    assert!(!h.call::<bool>("ping", json!({"ip": "10.0.0.99"})).await.unwrap());
    assert!(matches!(
        h.call::<bool>("ping", json!({"ip": "10.0.0.1; reboot"})).await,
        Err(StorError::InvalidInput { .. })
    ));
}

#[tokio::test]
async fn test_iscsi_target_lifecycle() {
    let h = Harness::new(vec![]).await;
    let iqn = "iqn.2025-01.com.dspace:0a1b2c3d";
    let spec = json!({"iqn": iqn, "chap": {"username": "u", "password": "secret12345"}});
    h.call::<()>("iscsi_target_create", json!({"spec": spec})).await.unwrap();
    assert!(h.call::<()>("iscsi_target_create", json!({"spec": spec})).await.is_err());
    assert_eq!(
        h.call::<Vec<String>>("iscsi_target_list", json!({})).await.unwrap(),
        vec![iqn]
    );

    let mappings = json!([{
        "initiators": ["iqn.1994-05.com.redhat:a"],
        "volumes": [{"pool": "rbd", "image": "v1"}],
    }]);
    h.call_positional::<()>("iscsi_mappings_apply", vec![json!(iqn), mappings.clone()])
        .await
        .unwrap();
    let applied: Vec<IscsiMapping> = h.call("iscsi_mappings_get", json!({"iqn": iqn})).await.unwrap();
    assert_eq!(applied, serde_json::from_value::<Vec<IscsiMapping>>(mappings).unwrap());
    assert!(h.path("etc/target/saveconfig.json").exists());

    assert!(h.call::<bool>("iscsi_target_delete", json!({"iqn": iqn})).await.unwrap());
    assert!(!h.call::<bool>("iscsi_target_delete", json!({"iqn": iqn})).await.unwrap());
}
