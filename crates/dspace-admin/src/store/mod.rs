// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource store.
//!
//! Rows are JSON documents grouped by kind and scoped by cluster. The only
//! primitive that gates state transitions is [`Store::conditional_update`]:
//! it applies `values` only when every expectation still holds and reports
//! how many rows changed, so two racing writers can never both win.

pub mod record;
pub mod sqlite;

pub use record::{Record, Resource};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dspace_protocol::{ReadDeleted, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Expected value of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    Eq(Value),
    In(Vec<Value>),
    Not(Box<Expected>),
}

impl Expected {
    pub fn matches(&self, actual: &Value) -> bool {
        match self {
            Expected::Eq(v) => v == actual,
            Expected::In(vs) => vs.iter().any(|v| v == actual),
            Expected::Not(inner) => !inner.matches(actual),
        }
    }
}

/// A field expectation, used both as a list filter and as a CAS guard.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub expected: Expected,
}

fn to_value(v: impl Serialize) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

impl Filter {
    pub fn eq(field: &str, value: impl Serialize) -> Self {
        Self {
            field: field.to_string(),
            expected: Expected::Eq(to_value(value)),
        }
    }

    pub fn one_of<V: Serialize>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            field: field.to_string(),
            expected: Expected::In(values.into_iter().map(to_value).collect()),
        }
    }

    pub fn not(field: &str, value: impl Serialize) -> Self {
        Self {
            field: field.to_string(),
            expected: Expected::Not(Box::new(Expected::Eq(to_value(value)))),
        }
    }

    pub fn is_null(field: &str) -> Self {
        Self::eq(field, Value::Null)
    }

    /// Missing fields compare as `null`.
    pub fn matches(&self, data: &Value) -> bool {
        self.expected
            .matches(data.get(&self.field).unwrap_or(&Value::Null))
    }
}

/// One stored row before its document is decoded into a typed resource.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub kind: String,
    pub id: i64,
    pub cluster_id: String,
    pub data: Value,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert(&self, kind: &str, cluster_id: &str, data: Value) -> Result<RawRecord>;

    async fn get(&self, kind: &str, id: i64, read_deleted: ReadDeleted) -> Result<Option<RawRecord>>;

    /// Rows of `kind` in `cluster_id` (`"*"` for every cluster) matching all filters, by id.
    async fn list(
        &self,
        kind: &str,
        cluster_id: &str,
        filters: &[Filter],
        read_deleted: ReadDeleted,
    ) -> Result<Vec<RawRecord>>;

    /// Merge `values` into the row iff every expectation holds. Returns rows changed.
    async fn conditional_update(
        &self,
        kind: &str,
        id: i64,
        values: &Map<String, Value>,
        expected: &[Filter],
    ) -> Result<u64>;

    /// Merge `values` and mark the row deleted. `false` when already gone.
    async fn soft_delete(&self, kind: &str, id: i64, values: &Map<String, Value>) -> Result<bool>;

    /// Hard-delete rows of `kind` created before `before`.
    async fn purge_before(&self, kind: &str, before: DateTime<Utc>) -> Result<u64>;

    async fn sys_config_get(&self, cluster_id: &str, key: &str) -> Result<Option<Value>>;

    async fn sys_config_set(&self, cluster_id: &str, key: &str, value: &Value) -> Result<()>;

    /// Atomically replace the value and return the previous one.
    async fn sys_config_swap(&self, cluster_id: &str, key: &str, value: &Value) -> Result<Option<Value>>;
}

/// Merge top-level keys of `values` into `data`.
pub(crate) fn merge(data: &mut Value, values: &Map<String, Value>) {
    if let Value::Object(map) = data {
        for (k, v) in values {
            map.insert(k.clone(), v.clone());
        }
    }
}
