// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Audit rows opened by every mutating method and closed by its worker.

use std::sync::Arc;

use chrono::Utc;
use dspace_protocol::{RequestContext, Result};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::models::{ActionLog, ActionStatus};
use crate::store::{Filter, Record, Store};

/// Top-level keys whose values differ, as `{key: {"before", "after"}}`.
pub fn diff(before: Option<&Value>, after: Option<&Value>) -> Value {
    let empty = Map::new();
    let b = before.and_then(Value::as_object).unwrap_or(&empty);
    let a = after.and_then(Value::as_object).unwrap_or(&empty);
    let mut out = Map::new();
    for key in b.keys().chain(a.keys()) {
        if out.contains_key(key) || matches!(key.as_str(), "updated_at" | "revision") {
            continue;
        }
        let (old, new) = (b.get(key), a.get(key));
        if old != new {
            out.insert(
                key.clone(),
                json!({"before": old.cloned().unwrap_or(Value::Null), "after": new.cloned().unwrap_or(Value::Null)}),
            );
        }
    }
    Value::Object(out)
}

/// Opens and closes [`ActionLog`] rows.
#[derive(Clone)]
pub struct ActionLogger {
    store: Arc<dyn Store>,
}

/// What an action is about.
#[derive(Debug, Clone, Default)]
pub struct ActionTarget {
    pub resource_type: String,
    pub resource_id: Option<i64>,
    pub resource_name: Option<String>,
    pub before: Option<Value>,
}

impl ActionTarget {
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: i64) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    pub fn before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }
}

impl ActionLogger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Insert an `under_way` row; returns its id.
    pub async fn begin(&self, ctx: &RequestContext, action: &str, target: ActionTarget) -> Result<i64> {
        let row = self
            .store
            .create(
                &ctx.cluster_id,
                &ActionLog {
                    user_id: ctx.user_id,
                    client_ip: ctx.client_ip.clone(),
                    resource_type: target.resource_type,
                    resource_id: target.resource_id,
                    resource_name: target.resource_name,
                    action: action.to_string(),
                    begin_time: Utc::now(),
                    finish_time: None,
                    before_data: target.before,
                    after_data: None,
                    diff_data: None,
                    status: ActionStatus::UnderWay,
                    err_msg: None,
                },
            )
            .await?;
        debug!(action_id = row.id, action, request_id = %ctx.request_id, "action started");
        Ok(row.id)
    }

    /// Record the resource id once it exists (create actions).
    pub async fn attach(&self, action_id: i64, resource_id: i64) -> Result<()> {
        self.store
            .patch::<ActionLog>(action_id, json!({"resource_id": resource_id}))
            .await?;
        Ok(())
    }

    /// Close the row; only an `under_way` row can be finished.
    pub async fn finish(
        &self,
        action_id: i64,
        status: ActionStatus,
        err_msg: Option<String>,
        after: Option<Value>,
    ) -> Result<()> {
        let row: Record<ActionLog> = self.store.load(action_id).await?;
        let diff_data = diff(row.before_data.as_ref(), after.as_ref());
        let closed = self
            .store
            .cas::<ActionLog>(
                action_id,
                json!({
                    "status": status,
                    "err_msg": err_msg,
                    "after_data": after,
                    "diff_data": diff_data,
                    "finish_time": Utc::now(),
                }),
                &[Filter::eq("status", ActionStatus::UnderWay)],
            )
            .await?;
        if !closed {
            warn!(action_id, "action already finished");
        }
        Ok(())
    }

    pub async fn list(&self, ctx: &RequestContext, filters: &[Filter]) -> Result<Vec<Record<ActionLog>>> {
        let mut rows = self.store.all::<ActionLog>(ctx, filters).await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn get(&self, ctx: &RequestContext, id: i64) -> Result<Record<ActionLog>> {
        self.store.fetch(ctx, id).await
    }
}
