// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent method table.

use std::sync::Arc;

use dspace_protocol::{Dispatcher, NoArgs, RequestContext};
use tracing::info;

use crate::handlers::{AgentState, disk, iscsi, logs, osd, radosgw, router, service};

/// Register `$name` as `$handler(&state, &ctx, req)`.
macro_rules! route {
    ($dispatcher:expr, $state:expr, $name:literal, $params:expr, $handler:path) => {{
        let state = $state.clone();
        $dispatcher.register_with_params($name, $params, move |ctx: RequestContext, req| {
            let state = state.clone();
            async move { $handler(&state, &ctx, req).await }
        });
    }};
    ($dispatcher:expr, $state:expr, $name:literal, $handler:path) => {
        route!($dispatcher, $state, $name, &[], $handler)
    };
}

/// Register a method without parameters as `$handler(&state, &ctx)`.
macro_rules! route_bare {
    ($dispatcher:expr, $state:expr, $name:literal, $handler:path) => {{
        let state = $state.clone();
        $dispatcher.register($name, move |ctx: RequestContext, _: NoArgs| {
            let state = state.clone();
            async move { $handler(&state, &ctx).await }
        });
    }};
}

pub fn agent_dispatcher(state: Arc<AgentState>) -> Dispatcher {
    let mut d = Dispatcher::new();

    route_bare!(d, state, "check_dsa_status", service::handle_check_dsa_status);
    route!(d, state, "ping", &["ip"], service::handle_ping);
    route!(d, state, "systemd_service_status", &["name"], service::handle_systemd_service_status);
    route!(d, state, "systemd_service_restart", &["name"], service::handle_systemd_service_restart);
    route!(d, state, "docker_service_status", &["name"], service::handle_docker_service_status);
    route!(d, state, "docker_service_restart", &["name"], service::handle_docker_service_restart);

    route!(d, state, "disk_partitions_create", &["disk_name", "num"], disk::handle_disk_partitions_create);
    route!(d, state, "disk_partitions_remove", &["disk_name"], disk::handle_disk_partitions_remove);
    route!(d, state, "disk_light", &["disk_name", "led"], disk::handle_disk_light);
    route!(d, state, "disk_smart_get", &["disk_name"], disk::handle_disk_smart_get);

    route!(d, state, "ceph_osd_install", &["spec"], osd::handle_ceph_osd_install);
    route!(d, state, "ceph_osd_uninstall", &["spec"], osd::handle_ceph_osd_uninstall);
    route!(d, state, "ceph_osd_restart", &["osd_id"], osd::handle_ceph_osd_restart);
    route!(d, state, "ceph_osd_offline", &["osd_id"], osd::handle_ceph_osd_offline);

    route!(
        d,
        state,
        "radosgw_zone_ensure",
        &["realm", "zonegroup", "zone"],
        radosgw::handle_radosgw_zone_ensure
    );
    route!(d, state, "ceph_rgw_install", &["spec"], radosgw::handle_ceph_rgw_install);
    route!(d, state, "ceph_rgw_uninstall", &["name"], radosgw::handle_ceph_rgw_uninstall);
    route!(d, state, "create_object_policy", &["spec"], radosgw::handle_create_object_policy);
    route!(d, state, "modify_object_policy", &["spec"], radosgw::handle_modify_object_policy);
    route!(d, state, "delete_object_policy", &["zone", "name"], radosgw::handle_delete_object_policy);
    route!(d, state, "set_default_object_policy", &["name"], radosgw::handle_set_default_object_policy);
    route_bare!(d, state, "period_update", radosgw::handle_period_update);

    route!(d, state, "rgw_router_install", &["spec"], router::handle_rgw_router_install);
    route!(d, state, "rgw_router_update", &["spec"], router::handle_rgw_router_update);
    route!(d, state, "rgw_router_uninstall", &["name"], router::handle_rgw_router_uninstall);

    route!(d, state, "iscsi_target_create", &["spec"], iscsi::handle_iscsi_target_create);
    route!(d, state, "iscsi_target_delete", &["iqn"], iscsi::handle_iscsi_target_delete);
    route_bare!(d, state, "iscsi_target_list", iscsi::handle_iscsi_target_list);
    route!(d, state, "iscsi_mappings_apply", &["iqn", "mappings"], iscsi::handle_iscsi_mappings_apply);
    route!(d, state, "iscsi_mappings_get", &["iqn"], iscsi::handle_iscsi_mappings_get);

    route!(
        d,
        state,
        "read_log_file_content",
        &["path", "offset", "length"],
        logs::handle_read_log_file_content
    );
    route!(d, state, "log_file_size", &["path"], logs::handle_log_file_size);
    route!(d, state, "pull_logfile", &["path"], logs::handle_pull_logfile);

    info!(methods = d.method_names().len(), "agent methods registered");
    d
}
