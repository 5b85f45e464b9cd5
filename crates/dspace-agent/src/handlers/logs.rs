// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log file retrieval.
//!
//! Paths are resolved against the configured log root, relative or
//! absolute, and anything resolving outside of it is refused. Contents
//! travel base64 encoded in [`LogChunk`]s.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use base64::{Engine as _, engine::general_purpose};
use dspace_protocol::api::LogChunk;
use dspace_protocol::{RequestContext, Result, StorError};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use super::AgentState;

/// Largest slice a single read returns.
pub const MAX_CHUNK: u64 = 4 * 1024 * 1024;
/// Largest file `pull_logfile` returns whole.
pub const MAX_PULL: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct LogPathRequest {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogReadRequest {
    pub path: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_length")]
    pub length: u64,
}

fn default_length() -> u64 {
    MAX_CHUNK
}

fn not_found(path: &str) -> StorError {
    StorError::LogFileNotFound { path: path.to_string() }
}

/// Resolve `path` to a regular file under `root`.
pub async fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let requested = Path::new(path);
    if requested.components().any(|c| c == Component::ParentDir) {
        return Err(StorError::invalid(format!("log path {path} leaves the log root")));
    }
    let candidate = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    let root = tokio::fs::canonicalize(root).await.map_err(|_| not_found(path))?;
    let resolved = tokio::fs::canonicalize(&candidate).await.map_err(|_| not_found(path))?;
    if !resolved.starts_with(&root) {
        return Err(StorError::invalid(format!("log path {path} leaves the log root")));
    }
    let meta = tokio::fs::metadata(&resolved).await.map_err(|_| not_found(path))?;
    if !meta.is_file() {
        return Err(not_found(path));
    }
    Ok(resolved)
}

fn io_failed(path: &str, e: std::io::Error) -> StorError {
    StorError::CommandFailed {
        reason: format!("read {path}: {e}"),
    }
}

pub async fn handle_log_file_size(state: &AgentState, _ctx: &RequestContext, req: LogPathRequest) -> Result<u64> {
    let file = resolve(&state.config.log_root, &req.path).await?;
    let meta = tokio::fs::metadata(&file).await.map_err(|e| io_failed(&req.path, e))?;
    Ok(meta.len())
}

pub async fn handle_read_log_file_content(
    state: &AgentState,
    _ctx: &RequestContext,
    req: LogReadRequest,
) -> Result<LogChunk> {
    let file = resolve(&state.config.log_root, &req.path).await?;
    let mut handle = tokio::fs::File::open(&file).await.map_err(|e| io_failed(&req.path, e))?;
    let size = handle.metadata().await.map_err(|e| io_failed(&req.path, e))?.len();

    let offset = req.offset.min(size);
    let want = req.length.min(MAX_CHUNK).min(size - offset);
    handle
        .seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| io_failed(&req.path, e))?;
    let mut buf = Vec::with_capacity(want as usize);
    handle
        .take(want)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| io_failed(&req.path, e))?;

    let length = buf.len() as u64;
    debug!(path = %req.path, offset, length, "log chunk read");
    Ok(LogChunk {
        offset,
        length,
        data: general_purpose::STANDARD.encode(&buf),
        eof: offset + length >= size,
    })
}

/// The whole file in one chunk, for files small enough to ship at once.
pub async fn handle_pull_logfile(state: &AgentState, _ctx: &RequestContext, req: LogPathRequest) -> Result<LogChunk> {
    let file = resolve(&state.config.log_root, &req.path).await?;
    let size = tokio::fs::metadata(&file)
        .await
        .map_err(|e| io_failed(&req.path, e))?
        .len();
    if size > MAX_PULL {
        return Err(StorError::invalid(format!(
            "log file {} is {size} bytes, read it in chunks",
            req.path
        )));
    }
    let bytes = tokio::fs::read(&file).await.map_err(|e| io_failed(&req.path, e))?;
    let length = bytes.len() as u64;
    info!(path = %req.path, length, "log file pulled");
    Ok(LogChunk {
        offset: 0,
        length,
        data: general_purpose::STANDARD.encode(&bytes),
        eof: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_confines_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("log");
        std::fs::create_dir_all(root.join("ceph")).unwrap();
        std::fs::write(root.join("ceph/ceph.log"), "x").unwrap();
        std::fs::write(dir.path().join("secret"), "x").unwrap();

        let relative = resolve(&root, "ceph/ceph.log").await.unwrap();
        let absolute = resolve(&root, root.join("ceph/ceph.log").to_str().unwrap()).await.unwrap();
        assert_eq!(relative, absolute);

        assert!(matches!(
            resolve(&root, "../secret").await,
            Err(StorError::InvalidInput { .. })
        ));
        assert!(matches!(
            resolve(&root, dir.path().join("secret").to_str().unwrap()).await,
            Err(StorError::InvalidInput { .. })
        ));
        assert!(matches!(
            resolve(&root, "ceph").await,
            Err(StorError::LogFileNotFound { .. })
        ));
        assert!(matches!(
            resolve(&root, "nope.log").await,
            Err(StorError::LogFileNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("log");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(dir.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("secret"), root.join("link.log")).unwrap();

        assert!(matches!(
            resolve(&root, "link.log").await,
            Err(StorError::InvalidInput { .. })
        ));
    }
}
