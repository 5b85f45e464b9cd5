// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closed error taxonomy shared by admin, agent and every RPC peer.
//!
//! Errors cross the wire as `{class, code, message, kwargs}` so that the
//! calling side can rebuild the typed variant. A class this build does not
//! know degrades to [`StorError::Failed`] with the original message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Coarse error grouping, mirrored by the numeric [`StorError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorGroup {
    Input,
    NotFound,
    Conflict,
    Precondition,
    Downstream,
    Programming,
}

/// Every error a dspace component can return.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "class", content = "kwargs")]
#[non_exhaustive]
pub enum StorError {
    // Input
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
    #[error("iqn {iqn} is malformed")]
    IqnMalformed { iqn: String },
    #[error("ip {ip} is not in {cidr}")]
    CidrMismatch { ip: String, cidr: String },
    #[error("quota exceeded: {reason}")]
    QuotaExceeded { reason: String },
    #[error("partition role {role} is not supported by {flavor}")]
    PartitionRoleUnsupported { role: String, flavor: String },
    #[error("action {action} not found")]
    ActionNotFound { action: String },

    // Not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },
    #[error("endpoint of {service} on node {node_id} not found")]
    EndpointNotFound { service: String, node_id: i64 },
    #[error("cluster {cluster_id} not found")]
    ClusterNotFound { cluster_id: String },
    #[error("log file {path} not found")]
    LogFileNotFound { path: String },

    // Conflict
    #[error("{resource} named {name} already exists")]
    NameDuplicate { resource: String, name: String },
    #[error("port {port} is already in use")]
    PortInUse { port: u16 },
    #[error("ip {ip} is already in use")]
    IpInUse { ip: String },
    #[error("virtual router id {vrid} is already in use")]
    VirtualRouterIdInUse { vrid: u32 },
    #[error("{resource} {id} is busy")]
    Busy { resource: String, id: String },

    // Precondition
    #[error("pool {pool} is still used by {dependants}")]
    PoolHasDependants { pool: String, dependants: String },
    #[error("access path {name} still has gateways")]
    AccessPathHasGateways { name: String },
    #[error("access path {name} still has mappings")]
    AccessPathHasMappings { name: String },
    #[error("access path {name} still has client groups")]
    AccessPathHasClientGroups { name: String },
    #[error("node {hostname} has the monitor role")]
    NodeHasMonRole { hostname: String },
    #[error("license expired at {expired_at}")]
    LicenseExpired { expired_at: String },
    #[error(
        "removing {removing} fault domains is unsafe (replicate size {replicate_size}, available {available})"
    )]
    FaultDomainRemovalUnsafe {
        removing: usize,
        replicate_size: u32,
        available: usize,
    },
    #[error("precondition failed: {reason}")]
    PreconditionFailed { reason: String },

    // Downstream
    #[error("ceph error: {reason}")]
    CephError { reason: String },
    #[error("radosgw-admin error: {reason}")]
    RadosgwAdminError { reason: String },
    #[error("s3 error: {reason}")]
    S3Error { reason: String },
    #[error("systemd error: {reason}")]
    SystemdError { reason: String },
    #[error("ssh authentication to {host} failed")]
    SshAuthFailed { host: String },
    #[error("command `{command}` timed out after {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },
    #[error("docker socket {path} is missing")]
    DockerSocketMissing { path: String },
    #[error("command failed: {reason}")]
    CommandFailed { reason: String },
    #[error("rpc transport error: {reason}")]
    RpcTransport { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },

    // Programming
    #[error("no such method: {method}")]
    NoSuchMethod { method: String },
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
    #[error("schema corruption: {reason}")]
    SchemaCorruption { reason: String },
    #[error("protocol version mismatch (server {server}, client {client})")]
    VersionMismatch { server: String, client: String },
    #[error("{message}")]
    Failed { message: String },
}

pub type Result<T> = std::result::Result<T, StorError>;

impl StorError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        StorError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        StorError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn busy(resource: &str, id: impl ToString) -> Self {
        StorError::Busy {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        StorError::PreconditionFailed {
            reason: reason.into(),
        }
    }

    pub fn ceph(reason: impl Into<String>) -> Self {
        StorError::CephError {
            reason: reason.into(),
        }
    }

    pub fn serialization(err: impl std::fmt::Display) -> Self {
        StorError::Serialization {
            reason: err.to_string(),
        }
    }

    /// The group this error belongs to.
    pub fn group(&self) -> ErrorGroup {
        use StorError::*;
        match self {
            InvalidInput { .. }
            | IqnMalformed { .. }
            | CidrMismatch { .. }
            | QuotaExceeded { .. }
            | PartitionRoleUnsupported { .. }
            | ActionNotFound { .. } => ErrorGroup::Input,
            NotFound { .. }
            | EndpointNotFound { .. }
            | ClusterNotFound { .. }
            | LogFileNotFound { .. } => ErrorGroup::NotFound,
            NameDuplicate { .. }
            | PortInUse { .. }
            | IpInUse { .. }
            | VirtualRouterIdInUse { .. }
            | Busy { .. } => ErrorGroup::Conflict,
            PoolHasDependants { .. }
            | AccessPathHasGateways { .. }
            | AccessPathHasMappings { .. }
            | AccessPathHasClientGroups { .. }
            | NodeHasMonRole { .. }
            | LicenseExpired { .. }
            | FaultDomainRemovalUnsafe { .. }
            | PreconditionFailed { .. } => ErrorGroup::Precondition,
            CephError { .. }
            | RadosgwAdminError { .. }
            | S3Error { .. }
            | SystemdError { .. }
            | SshAuthFailed { .. }
            | CommandTimeout { .. }
            | ConnectTimeout { .. }
            | DockerSocketMissing { .. }
            | CommandFailed { .. }
            | RpcTransport { .. }
            | Database { .. } => ErrorGroup::Downstream,
            NoSuchMethod { .. }
            | Serialization { .. }
            | SchemaCorruption { .. }
            | VersionMismatch { .. }
            | Failed { .. } => ErrorGroup::Programming,
        }
    }

    /// HTTP-like numeric code used by the REST adapter.
    pub fn code(&self) -> u16 {
        match self.group() {
            ErrorGroup::Input => 400,
            ErrorGroup::NotFound => 404,
            ErrorGroup::Conflict => 409,
            ErrorGroup::Precondition => 412,
            ErrorGroup::Downstream => 502,
            ErrorGroup::Programming => 500,
        }
    }

    /// Programming errors crash the worker that hit them.
    pub fn is_programming(&self) -> bool {
        self.group() == ErrorGroup::Programming
    }

    /// Name of the variant, as carried in the wire `class` field.
    pub fn class(&self) -> String {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map
                .get("class")
                .and_then(Value::as_str)
                .unwrap_or("Failed")
                .to_string(),
            _ => "Failed".to_string(),
        }
    }
}

impl From<serde_json::Error> for StorError {
    fn from(err: serde_json::Error) -> Self {
        StorError::serialization(err)
    }
}

/// Error as carried inside an [`crate::envelope::RpcResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub class: String,
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub kwargs: Value,
}

impl From<&StorError> for WireError {
    fn from(err: &StorError) -> Self {
        let (class, kwargs) = match serde_json::to_value(err) {
            Ok(Value::Object(mut map)) => {
                let class = map
                    .remove("class")
                    .and_then(|c| c.as_str().map(str::to_string))
                    .unwrap_or_else(|| "Failed".to_string());
                let kwargs = map.remove("kwargs").unwrap_or(Value::Null);
                (class, kwargs)
            }
            _ => ("Failed".to_string(), Value::Null),
        };
        WireError {
            class,
            code: err.code(),
            message: err.to_string(),
            kwargs,
        }
    }
}

impl From<WireError> for StorError {
    fn from(wire: WireError) -> Self {
        let tagged = serde_json::json!({ "class": wire.class, "kwargs": wire.kwargs });
        serde_json::from_value(tagged).unwrap_or(StorError::Failed {
            message: wire.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_groups() {
        assert_eq!(StorError::invalid("x").code(), 400);
        assert_eq!(StorError::not_found("pool", 3).code(), 404);
        assert_eq!(StorError::busy("osd", 1).code(), 409);
        assert_eq!(StorError::PortInUse { port: 7480 }.code(), 409);
        assert_eq!(StorError::precondition("x").code(), 412);
        assert_eq!(StorError::ceph("x").code(), 502);
        assert_eq!(
            StorError::NoSuchMethod {
                method: "m".into()
            }
            .code(),
            500
        );
    }

    #[test]
    fn test_wire_rebuilds_typed_error() {
        let err = StorError::FaultDomainRemovalUnsafe {
            removing: 2,
            replicate_size: 2,
            available: 3,
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.class, "FaultDomainRemovalUnsafe");
        assert_eq!(wire.code, 412);
        assert_eq!(wire.kwargs["removing"], 2);

        let text = serde_json::to_string(&wire).unwrap();
        let back: WireError = serde_json::from_str(&text).unwrap();
        assert_eq!(StorError::from(back), err);
    }

    #[test]
    fn test_unknown_class_degrades_to_failed() {
        let wire = WireError {
            class: "QuotaOfUniverseExceeded".into(),
            code: 400,
            message: "too many universes".into(),
            kwargs: serde_json::json!({"n": 2}),
        };
        assert_eq!(
            StorError::from(wire),
            StorError::Failed {
                message: "too many universes".into()
            }
        );
    }

    #[test]
    fn test_known_class_with_bad_kwargs_degrades() {
        let wire = WireError {
            class: "PortInUse".into(),
            code: 409,
            message: "port busy".into(),
            kwargs: serde_json::json!({"port": "not-a-number"}),
        };
        assert!(matches!(StorError::from(wire), StorError::Failed { .. }));
    }

    #[test]
    fn test_class_name() {
        assert_eq!(StorError::busy("pool", 1).class(), "Busy");
        assert!(StorError::serialization("bad").is_programming());
    }
}
