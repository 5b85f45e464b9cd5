// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Id of the node this agent runs on
    pub node_id: i64,
    pub cluster_id: String,
    /// Address other nodes reach this agent on
    pub node_ip: String,
    /// Admin RPC address
    pub admin_addr: SocketAddr,
    /// Agent RPC listen address
    pub agent_addr: SocketAddr,
    /// Period of the service and hotplug cron
    pub cron_interval: Duration,
    /// Container image prefix
    pub image_namespace: String,
    pub iscsi_configfs: PathBuf,
    pub iscsi_save_file: PathBuf,
    /// Only files under this directory can be read through the log methods
    pub log_root: PathBuf,
    /// Ceph daemon data dirs (`/var/lib/ceph`)
    pub ceph_data_dir: PathBuf,
    /// Rendered keepalived and haproxy configs of each router
    pub router_conf_dir: PathBuf,
    pub rpc_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DSPACE_NODE_ID`, `DSPACE_CLUSTER_ID`: identity of this node
    /// - `DSPACE_ADMIN_ADDR`: `ip:port` of the admin RPC service
    ///
    /// Optional (with defaults):
    /// - `DSPACE_NODE_IP`: advertised address (default: `127.0.0.1`)
    /// - `DSPACE_AGENT_PORT`: agent RPC port (default: 2082)
    /// - `DSPACE_CRON_INTERVAL`: seconds between heartbeats (default: 60)
    /// - `DSPACE_IMAGE_NAMESPACE`: container prefix (default: `dspace`)
    /// - `DSPACE_ISCSI_CONFIGFS`, `DSPACE_ISCSI_SAVE_FILE`: LIO locations
    /// - `DSPACE_LOG_ROOT`: readable log tree (default: `/var/log`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let node_id: i64 = required("DSPACE_NODE_ID")?
            .parse()
            .map_err(|_| ConfigError::Invalid("DSPACE_NODE_ID", "must be an integer"))?;
        let admin_addr: SocketAddr = required("DSPACE_ADMIN_ADDR")?
            .parse()
            .map_err(|_| ConfigError::Invalid("DSPACE_ADMIN_ADDR", "must be ip:port"))?;

        let agent_port: u16 = parse(&lookup, "DSPACE_AGENT_PORT", "2082", "must be a valid port number")?;
        let cron_secs: u64 = parse(&lookup, "DSPACE_CRON_INTERVAL", "60", "must be a number of seconds")?;
        if cron_secs == 0 {
            return Err(ConfigError::Invalid("DSPACE_CRON_INTERVAL", "must be a number of seconds"));
        }
        let rpc_timeout_ms: u64 = parse(&lookup, "DSPACE_RPC_TIMEOUT_MS", "5000", "must be a number of milliseconds")?;

        Ok(Self {
            node_id,
            cluster_id: required("DSPACE_CLUSTER_ID")?,
            node_ip: get("DSPACE_NODE_IP", "127.0.0.1"),
            admin_addr,
            agent_addr: SocketAddr::from(([0, 0, 0, 0], agent_port)),
            cron_interval: Duration::from_secs(cron_secs),
            image_namespace: get("DSPACE_IMAGE_NAMESPACE", "dspace"),
            iscsi_configfs: get("DSPACE_ISCSI_CONFIGFS", "/sys/kernel/config/target").into(),
            iscsi_save_file: get("DSPACE_ISCSI_SAVE_FILE", "/etc/target/saveconfig.json").into(),
            log_root: get("DSPACE_LOG_ROOT", "/var/log").into(),
            ceph_data_dir: get("DSPACE_CEPH_DATA_DIR", "/var/lib/ceph").into(),
            router_conf_dir: get("DSPACE_ROUTER_CONF_DIR", "/etc/dspace/routers").into(),
            rpc_timeout: Duration::from_millis(rpc_timeout_ms),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
    message: &'static str,
) -> Result<T, ConfigError> {
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(key, message))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
