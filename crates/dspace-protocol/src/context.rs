// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authenticated request context carried as the first argument of every call.

use serde::{Deserialize, Serialize};

use crate::error::StorError;

/// Cluster id that disables per-cluster filtering.
pub const ANY_CLUSTER: &str = "*";

/// Visibility of soft-deleted rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadDeleted {
    #[default]
    No,
    Yes,
    Only,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub user_id: Option<i64>,
    pub cluster_id: String,
    #[serde(default)]
    pub client_ip: Option<String>,
    /// Websocket endpoint of the admin that received the originating request.
    #[serde(default)]
    pub ws_ip: Option<String>,
    pub request_id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub read_deleted: ReadDeleted,
}

impl RequestContext {
    /// Context used by internal callers (workers, loops, agents).
    pub fn admin(cluster_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            cluster_id: cluster_id.into(),
            client_ip: None,
            ws_ip: None,
            request_id: format!("req-{}", uuid::Uuid::new_v4()),
            is_admin: true,
            read_deleted: ReadDeleted::No,
        }
    }

    pub fn user(user_id: i64, cluster_id: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            client_ip: Some(client_ip.into()),
            is_admin: false,
            ..Self::admin(cluster_id)
        }
    }

    pub fn with_ws_ip(mut self, ws_ip: impl Into<String>) -> Self {
        self.ws_ip = Some(ws_ip.into());
        self
    }

    pub fn with_read_deleted(&self, read_deleted: ReadDeleted) -> Self {
        Self {
            read_deleted,
            ..self.clone()
        }
    }

    /// Same request, retargeted at another cluster.
    pub fn for_cluster(&self, cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            ..self.clone()
        }
    }

    pub fn is_any_cluster(&self) -> bool {
        self.cluster_id == ANY_CLUSTER
    }

    pub fn to_json(&self) -> Result<String, StorError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, StorError> {
        Ok(serde_json::from_str(raw)?)
    }
}
