// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for tool calls.

use dspace_protocol::StorError;
use thiserror::Error;

/// Which external program family failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Ceph,
    RadosgwAdmin,
    Systemd,
    Docker,
    Shell,
    Iscsi,
    Prometheus,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// Program exited with a non-zero code that was not normalized.
    #[error("{kind:?} command `{command}` failed with {rc}: {stderr}")]
    Command {
        kind: ToolKind,
        command: String,
        rc: i32,
        stderr: String,
    },

    #[error("command `{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("ssh authentication to {0} failed")]
    SshAuth(String),

    #[error("docker socket {0} is missing")]
    DockerSocketMissing(String),

    /// Object already exists where creation requires absence.
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unexpected output from {command}: {reason}")]
    Parse { command: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ToolError>;

impl ToolError {
    pub fn parse(command: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ToolError::Parse {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ToolError> for StorError {
    fn from(err: ToolError) -> Self {
        let reason = err.to_string();
        match err {
            ToolError::Command { kind, .. } => match kind {
                ToolKind::Ceph => StorError::CephError { reason },
                ToolKind::RadosgwAdmin => StorError::RadosgwAdminError { reason },
                ToolKind::Systemd | ToolKind::Docker => StorError::SystemdError { reason },
                ToolKind::Shell | ToolKind::Iscsi | ToolKind::Prometheus => {
                    StorError::CommandFailed { reason }
                }
            },
            ToolError::Timeout { command, seconds } => StorError::CommandTimeout { command, seconds },
            ToolError::SshAuth(host) => StorError::SshAuthFailed { host },
            ToolError::DockerSocketMissing(path) => StorError::DockerSocketMissing { path },
            ToolError::AlreadyExists(name) => StorError::NameDuplicate {
                resource: "object".to_string(),
                name,
            },
            ToolError::NotFound(id) => StorError::not_found("object", id),
            ToolError::Parse { .. } => StorError::CephError { reason },
            ToolError::Http(_) => StorError::RpcTransport { reason },
            ToolError::Io(_) | ToolError::Json(_) => StorError::CommandFailed { reason },
        }
    }
}
