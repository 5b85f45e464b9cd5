// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// SMTP relay used for alert mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Admin service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Id of the node this admin runs on
    pub node_id: i64,
    /// Admin RPC listen address
    pub admin_addr: SocketAddr,
    /// Port agents listen on when no endpoint row exists
    pub agent_port: u16,
    /// UI websocket listen address
    pub websocket_addr: SocketAddr,
    /// Internal `send_message` RPC listen address
    pub websocket_rpc_addr: SocketAddr,
    /// Worker-pool bound
    pub task_workers: usize,
    /// Run the service supervisor loop
    pub heartbeat_check: bool,
    pub service_heartbeat_interval: Duration,
    pub service_max_interval: Duration,
    /// Default of the per-cluster auto restart flag
    pub service_auto_restart: bool,
    pub auto_restart_ignore: Vec<String>,
    /// Container image prefix
    pub image_namespace: String,
    pub rgw_min_port: u16,
    pub rgw_max_port: u16,
    pub ceph_confs_path: String,
    pub prometheus_url: String,
    pub rpc_timeout: Duration,
    /// Exit the process on programming errors inside tasks
    pub debug: bool,
    pub alert_log_retention_days: u32,
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `DSPACE_DATABASE_URL`: store location (default: `sqlite:.data/dspace.db?mode=rwc`)
    /// - `DSPACE_NODE_ID`: node this admin runs on (default: 0)
    /// - `DSPACE_ADMIN_PORT`: admin RPC port (default: 2080)
    /// - `DSPACE_AGENT_PORT`: agent RPC port (default: 2082)
    /// - `DSPACE_WEBSOCKET_PORT`, `DSPACE_WEBSOCKET_RPC_PORT` (default: 2081, 2083)
    /// - `DSPACE_TASK_WORKERS`: worker-pool bound (default: 16)
    /// - `DSPACE_HEARTBEAT_CHECK`, `DSPACE_SERVICE_HEARTBEAT_INTERVAL`, `DSPACE_SERVICE_MAX_INTERVAL`
    /// - `DSPACE_SERVICE_AUTO_RESTART`, `DSPACE_AUTO_RESTART_IGNORE` (comma separated)
    /// - `DSPACE_SMTP_HOST` and friends: alert mail relay, mail is off when unset
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let admin_port: u16 = parse(&lookup, "DSPACE_ADMIN_PORT", "2080", "must be a valid port number")?;
        let websocket_port: u16 =
            parse(&lookup, "DSPACE_WEBSOCKET_PORT", "2081", "must be a valid port number")?;
        let websocket_rpc_port: u16 =
            parse(&lookup, "DSPACE_WEBSOCKET_RPC_PORT", "2083", "must be a valid port number")?;

        let task_workers: usize =
            parse(&lookup, "DSPACE_TASK_WORKERS", "16", "must be a positive integer")?;
        if task_workers == 0 {
            return Err(ConfigError::Invalid("DSPACE_TASK_WORKERS", "must be a positive integer"));
        }

        let rgw_min_port: u16 = parse(&lookup, "DSPACE_RGW_MIN_PORT", "7480", "must be a valid port number")?;
        let rgw_max_port: u16 = parse(&lookup, "DSPACE_RGW_MAX_PORT", "7580", "must be a valid port number")?;
        if rgw_min_port > rgw_max_port {
            return Err(ConfigError::Invalid(
                "DSPACE_RGW_MIN_PORT",
                "must not exceed DSPACE_RGW_MAX_PORT",
            ));
        }

        let heartbeat_secs: u64 =
            parse(&lookup, "DSPACE_SERVICE_HEARTBEAT_INTERVAL", "60", "must be a number of seconds")?;
        let max_interval_secs: u64 =
            parse(&lookup, "DSPACE_SERVICE_MAX_INTERVAL", "180", "must be a number of seconds")?;
        let rpc_timeout_ms: u64 = parse(&lookup, "DSPACE_RPC_TIMEOUT_MS", "5000", "must be a number of milliseconds")?;

        let smtp = match lookup("DSPACE_SMTP_HOST").filter(|h| !h.is_empty()) {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse(&lookup, "DSPACE_SMTP_PORT", "25", "must be a valid port number")?,
                from: get("DSPACE_SMTP_FROM", "dspace@localhost"),
                username: lookup("DSPACE_SMTP_USER"),
                password: lookup("DSPACE_SMTP_PASSWORD"),
            }),
            None => None,
        };

        Ok(Self {
            database_url: get("DSPACE_DATABASE_URL", "sqlite:.data/dspace.db?mode=rwc"),
            node_id: parse(&lookup, "DSPACE_NODE_ID", "0", "must be an integer")?,
            admin_addr: SocketAddr::from(([0, 0, 0, 0], admin_port)),
            agent_port: parse(&lookup, "DSPACE_AGENT_PORT", "2082", "must be a valid port number")?,
            websocket_addr: SocketAddr::from(([0, 0, 0, 0], websocket_port)),
            websocket_rpc_addr: SocketAddr::from(([0, 0, 0, 0], websocket_rpc_port)),
            task_workers,
            heartbeat_check: parse_bool(&lookup, "DSPACE_HEARTBEAT_CHECK", true)?,
            service_heartbeat_interval: Duration::from_secs(heartbeat_secs),
            service_max_interval: Duration::from_secs(max_interval_secs),
            service_auto_restart: parse_bool(&lookup, "DSPACE_SERVICE_AUTO_RESTART", true)?,
            auto_restart_ignore: get("DSPACE_AUTO_RESTART_IGNORE", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            image_namespace: get("DSPACE_IMAGE_NAMESPACE", "dspace"),
            rgw_min_port,
            rgw_max_port,
            ceph_confs_path: get("DSPACE_CEPH_CONFS_PATH", "/etc/ceph"),
            prometheus_url: get("DSPACE_PROMETHEUS_URL", "http://127.0.0.1:9090"),
            rpc_timeout: Duration::from_millis(rpc_timeout_ms),
            debug: parse_bool(&lookup, "DSPACE_DEBUG", false)?,
            alert_log_retention_days: parse(
                &lookup,
                "DSPACE_ALERT_LOG_RETENTION_DAYS",
                "30",
                "must be a number of days",
            )?,
            smtp,
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

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(key, "must be true or false")),
        },
    }
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
