// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Admin method table.
//!
//! Every northbound and agent-facing method is registered here against the
//! shared [`AdminState`]. Methods that agents call positionally declare
//! their parameter names.

use std::sync::Arc;

use dspace_protocol::{Dispatcher, NoArgs, RequestContext};
use tracing::info;

use crate::handlers::{
    AdminState, access_path, action_log, alert, cluster, disk, node, object_policy, osd, pool, radosgw, service,
    volume,
};

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

pub fn admin_dispatcher(state: Arc<AdminState>) -> Dispatcher {
    let mut d = Dispatcher::new();

    route_bare!(d, state, "cluster_get", cluster::handle_cluster_get);
    route_bare!(d, state, "cluster_health", cluster::handle_cluster_health);

    route!(d, state, "node_get", node::handle_node_get);
    route_bare!(d, state, "node_list", node::handle_node_list);
    route!(d, state, "node_services_manifest", &["node_id"], node::handle_node_services_manifest);
    route!(
        d,
        state,
        "rpc_service_register",
        &["service", "node_id", "ip", "port"],
        node::handle_rpc_service_register
    );

    route!(d, state, "disk_reporter", &["disks", "node_id"], disk::handle_disk_reporter);
    route!(d, state, "disk_online", &["info", "node_id"], disk::handle_disk_online);
    route!(d, state, "disk_offline", &["name", "node_id"], disk::handle_disk_offline);
    route!(d, state, "disk_list", disk::handle_disk_list);
    route!(d, state, "disk_light", disk::handle_disk_light);
    route!(d, state, "disk_smart_get", disk::handle_disk_smart_get);
    route!(d, state, "disk_partitions_create", disk::handle_disk_partitions_create);
    route!(d, state, "disk_partitions_remove", disk::handle_disk_partitions_remove);

    route!(d, state, "osd_create", osd::handle_osd_create);
    route!(d, state, "osd_delete", osd::handle_osd_delete);
    route!(d, state, "osd_restart", osd::handle_osd_restart);
    route!(d, state, "osd_list", osd::handle_osd_list);

    route!(d, state, "pool_create", pool::handle_pool_create);
    route!(d, state, "pool_delete", pool::handle_pool_delete);
    route!(d, state, "pool_increase_disk", pool::handle_pool_increase_disk);
    route!(d, state, "pool_decrease_disk", pool::handle_pool_decrease_disk);
    route_bare!(d, state, "pool_undo", pool::handle_pool_undo);
    route_bare!(d, state, "pool_list", pool::handle_pool_list);

    route!(d, state, "volume_create", volume::handle_volume_create);
    route!(d, state, "volume_delete", volume::handle_volume_delete);
    route!(d, state, "volume_snapshot_create", volume::handle_volume_snapshot_create);
    route!(d, state, "volume_snapshot_delete", volume::handle_volume_snapshot_delete);

    route!(d, state, "volume_access_path_create", access_path::handle_access_path_create);
    route!(d, state, "volume_access_path_delete", access_path::handle_access_path_delete);
    route!(d, state, "volume_access_path_mount_gateway", access_path::handle_access_path_mount_gateway);
    route!(d, state, "volume_access_path_unmount_gateway", access_path::handle_access_path_unmount_gateway);
    route!(d, state, "volume_access_path_create_mapping", access_path::handle_access_path_create_mapping);
    route!(
        d,
        state,
        "volume_access_path_change_client_group",
        access_path::handle_access_path_change_client_group
    );
    route!(d, state, "volume_access_path_remove_mapping", access_path::handle_access_path_remove_mapping);
    route!(d, state, "volume_client_group_create", access_path::handle_client_group_create);
    route!(d, state, "volume_client_group_delete", access_path::handle_client_group_delete);

    route!(d, state, "radosgw_create", radosgw::handle_radosgw_create);
    route!(d, state, "radosgw_delete", radosgw::handle_radosgw_delete);
    route!(d, state, "radosgw_router_create", radosgw::handle_radosgw_router_create);
    route!(d, state, "radosgw_router_update", radosgw::handle_radosgw_router_update);
    route!(d, state, "radosgw_router_delete", radosgw::handle_radosgw_router_delete);
    route!(d, state, "object_policy_create", object_policy::handle_object_policy_create);
    route!(d, state, "object_policy_delete", object_policy::handle_object_policy_delete);

    {
        let state = state.clone();
        d.register_with_params(
            "service_update",
            &["services", "node_id"],
            move |_ctx: RequestContext, req: service::ServiceUpdateRequest| {
                let state = state.clone();
                async move { service::handle_service_update(&state, req).await }
            },
        );
    }
    route!(d, state, "service_list", service::handle_service_list);

    route!(d, state, "action_log_list", action_log::handle_action_log_list);
    route!(d, state, "action_log_get", action_log::handle_action_log_get);

    route!(d, state, "alert_rule_update", alert::handle_alert_rule_update);
    route!(d, state, "alert_group_create", alert::handle_alert_group_create);
    route!(d, state, "email_group_create", alert::handle_email_group_create);
    route!(d, state, "alert_log_list", alert::handle_alert_log_list);
    route!(d, state, "alert_log_mark_read", alert::handle_alert_log_mark_read);

    info!(methods = d.method_names().len(), "admin methods registered");
    d
}
