// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command execution on the local node or over SSH.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ToolError, ToolKind};

/// Stderr fragments that mean "the thing is already gone".
const MISSING_PATTERNS: &[&str] = &[
    "not loaded",
    "No such object",
    "No such container",
    "does not exist",
    "not found",
    "ENOENT",
];

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            rc: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(rc: i32, stderr: impl Into<String>) -> Self {
        Self {
            rc,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.rc == 0
    }

    /// True when a failed command only reports a missing object.
    pub fn is_missing(&self) -> bool {
        !self.success()
            && MISSING_PATTERNS
                .iter()
                .any(|p| self.stderr.contains(p) || self.stdout.contains(p))
    }

    /// Fail on any non-zero return code.
    pub fn check(self, kind: ToolKind, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Command {
                kind,
                command: command.to_string(),
                rc: self.rc,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// `Ok(true)` on success, `Ok(false)` when the target is missing, error otherwise.
    pub fn normalize(self, kind: ToolKind, command: &str) -> Result<bool> {
        if self.success() {
            Ok(true)
        } else if self.is_missing() {
            Ok(false)
        } else {
            Err(ToolError::Command {
                kind,
                command: command.to_string(),
                rc: self.rc,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Host the commands run on, for logs and errors.
    fn host(&self) -> &str;

    /// Run `program args...` and capture its output. Non-zero exit is not an error here.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Render a command for logs and error messages.
pub fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

async fn capture(mut cmd: Command, rendered: String, timeout: Duration) -> Result<CommandOutput> {
    cmd.kill_on_drop(true);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ToolError::Timeout {
            command: rendered,
            seconds: timeout.as_secs(),
        })??;
    Ok(CommandOutput {
        rc: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Runs commands on this node.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    timeout: Duration,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
        }
    }
}

impl LocalExecutor {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn host(&self) -> &str {
        "localhost"
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let rendered = render(program, args);
        debug!(command = %rendered, "running local command");
        let mut cmd = Command::new(program);
        cmd.args(args);
        capture(cmd, rendered, self.timeout).await
    }
}

/// Runs commands on a remote node through the `ssh` client.
///
/// Password authentication goes through `sshpass`; key authentication is
/// used when no password is configured.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            password,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn ssh_args(&self, remote: String) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-p".to_string(),
            self.port.to_string(),
            format!("{}@{}", self.user, self.host),
            remote,
        ]
    }
}

#[async_trait]
impl Executor for SshExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let remote = render(program, args);
        debug!(host = %self.host, command = %remote, "running remote command");
        let ssh_args = self.ssh_args(remote.clone());
        let cmd = match &self.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-p").arg(password).arg("ssh").args(&ssh_args);
                cmd
            }
            None => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-o").arg("BatchMode=yes").args(&ssh_args);
                cmd
            }
        };
        let output = capture(cmd, remote, self.timeout).await?;
        // ssh reports its own failures with 255; sshpass uses 5 for a bad password
        let auth_failed = (output.rc == 5 && self.password.is_some())
            || (output.rc == 255 && output.stderr.contains("Permission denied"));
        if auth_failed {
            return Err(ToolError::SshAuth(self.host.clone()));
        }
        Ok(output)
    }
}
