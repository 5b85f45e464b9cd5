// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Radosgw routers: keepalived holding the virtual ip and HAProxy
//! balancing over the gateways, together in one container per node.
//!
//! The configs are rendered on the host and mounted into the container,
//! so an update only rewrites them and restarts the container.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::PathBuf;

use dspace_protocol::api::{RouterInstallSpec, router_container};
use dspace_protocol::{RequestContext, Result, StorError};
use dspace_tools::{ContainerSpec, ToolKind, UnitStatus};
use tracing::{debug, info};

use super::{AgentState, NameRequest, SpecRequest, check_name};

const CONTAINER_CONF_DIR: &str = "/etc/rgw-router";

/// Host dir holding the rendered configs of router `name`.
pub fn conf_dir(state: &AgentState, name: &str) -> PathBuf {
    state.config.router_conf_dir.join(name)
}

pub fn render_keepalived(spec: &RouterInstallSpec, interface: &str) -> String {
    format!(
        "vrrp_script chk_haproxy {{
    script \"killall -0 haproxy\"
    interval 2
}}

vrrp_instance rgw_{name} {{
    state BACKUP
    interface {interface}
    virtual_router_id {vrid}
    priority {priority}
    advert_int 1
    virtual_ipaddress {{
        {vip}
    }}
    track_script {{
        chk_haproxy
    }}
}}
",
        name = spec.name,
        vrid = spec.virtual_router_id,
        priority = spec.priority,
        vip = spec.virtual_ip,
    )
}

pub fn render_haproxy(spec: &RouterInstallSpec) -> String {
    let mut cfg = String::from(
        "global
    maxconn 8000

defaults
    mode http
    timeout connect 5s
    timeout client 60s
    timeout server 60s
",
    );
    let _ = write!(cfg, "\nfrontend rgw_{}\n    bind *:{}\n", spec.name, spec.port);
    if let Some(https) = spec.https_port {
        let _ = writeln!(
            cfg,
            "    bind *:{https} ssl crt {CONTAINER_CONF_DIR}/{}.pem",
            spec.name
        );
    }
    let _ = write!(
        cfg,
        "    default_backend rgw_{name}_gateways\n\nbackend rgw_{name}_gateways\n    balance roundrobin\n    option httpchk HEAD /\n",
        name = spec.name
    );
    for (i, backend) in spec.backends.iter().enumerate() {
        let _ = writeln!(cfg, "    server rgw{i} {backend} check");
    }
    cfg
}

fn validate(spec: &RouterInstallSpec) -> Result<()> {
    check_name("router", &spec.name)?;
    spec.virtual_ip
        .parse::<IpAddr>()
        .map_err(|_| StorError::invalid(format!("virtual ip {} is not an address", spec.virtual_ip)))?;
    if !(1..=255).contains(&spec.virtual_router_id) {
        return Err(StorError::invalid("virtual router id must be within 1..=255"));
    }
    Ok(())
}

/// Interface the kernel routes the virtual ip through.
async fn vrrp_interface(state: &AgentState, vip: &str) -> Result<String> {
    let route = state
        .run_checked(ToolKind::Shell, "ip", &["-o", "route", "get", vip])
        .await?;
    let mut words = route.split_whitespace();
    while let Some(word) = words.next() {
        if word == "dev"
            && let Some(dev) = words.next()
        {
            return Ok(dev.to_string());
        }
    }
    Err(StorError::invalid(format!("no interface routes {vip}")))
}

async fn write_configs(state: &AgentState, spec: &RouterInstallSpec) -> Result<PathBuf> {
    let interface = vrrp_interface(state, &spec.virtual_ip).await?;
    let dir = conf_dir(state, &spec.name);
    let io = |e: std::io::Error| StorError::CommandFailed {
        reason: format!("router config {}: {e}", dir.display()),
    };
    tokio::fs::create_dir_all(&dir).await.map_err(io)?;
    tokio::fs::write(dir.join("keepalived.conf"), render_keepalived(spec, &interface))
        .await
        .map_err(io)?;
    tokio::fs::write(dir.join("haproxy.cfg"), render_haproxy(spec))
        .await
        .map_err(io)?;
    debug!(router = %spec.name, interface = %interface, "router configs written");
    Ok(dir)
}

fn container_spec(state: &AgentState, name: &str, dir: &std::path::Path) -> ContainerSpec {
    ContainerSpec {
        name: router_container(name),
        image: format!("{}/rgw-router", state.config.image_namespace),
        env: Vec::new(),
        volumes: vec![(dir.to_string_lossy().into_owned(), CONTAINER_CONF_DIR.to_string())],
        privileged: true,
        host_network: true,
        command: Vec::new(),
    }
}

pub async fn handle_rgw_router_install(
    state: &AgentState,
    _ctx: &RequestContext,
    req: SpecRequest<RouterInstallSpec>,
) -> Result<()> {
    let spec = req.spec;
    validate(&spec)?;
    let _guard = state.install_guard().await;
    info!(
        router = %spec.name,
        vip = %spec.virtual_ip,
        backends = spec.backends.len(),
        priority = spec.priority,
        "installing radosgw router"
    );

    let dir = write_configs(state, &spec).await?;
    state.tools.docker.run(&container_spec(state, &spec.name, &dir)).await?;
    info!(router = %spec.name, "radosgw router installed");
    Ok(())
}

/// Rewrite the configs and bounce the container, creating it if it is gone.
pub async fn handle_rgw_router_update(
    state: &AgentState,
    _ctx: &RequestContext,
    req: SpecRequest<RouterInstallSpec>,
) -> Result<()> {
    let spec = req.spec;
    validate(&spec)?;
    let _guard = state.install_guard().await;

    let dir = write_configs(state, &spec).await?;
    let container = router_container(&spec.name);
    match state.tools.docker.status(&container).await? {
        UnitStatus::Missing => state.tools.docker.run(&container_spec(state, &spec.name, &dir)).await?,
        _ => state.tools.docker.restart(&container).await?,
    }
    info!(router = %spec.name, backends = spec.backends.len(), "radosgw router updated");
    Ok(())
}

pub async fn handle_rgw_router_uninstall(state: &AgentState, _ctx: &RequestContext, req: NameRequest) -> Result<()> {
    check_name("router", &req.name)?;
    let _guard = state.install_guard().await;

    state.tools.docker.rm(&router_container(&req.name)).await?;
    let dir = conf_dir(state, &req.name);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(StorError::CommandFailed {
                reason: format!("remove {}: {e}", dir.display()),
            });
        }
    }
    info!(router = %req.name, "radosgw router uninstalled");
    Ok(())
}
