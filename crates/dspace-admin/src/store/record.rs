// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed access on top of the raw document store.

use std::ops::Deref;

use chrono::{DateTime, Utc};
use dspace_protocol::{ReadDeleted, RequestContext, Result, StorError, Tagged};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Filter, RawRecord, Store};

/// A resource type persisted in the store under `KIND`.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
}

/// A stored resource with its bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: i64,
    pub cluster_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub inner: T,
}

impl<T> Deref for Record<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Resource> Record<T> {
    fn from_raw(raw: RawRecord) -> Result<Self> {
        let inner = serde_json::from_value(raw.data).map_err(|e| StorError::SchemaCorruption {
            reason: format!("{} {}: {e}", raw.kind, raw.id),
        })?;
        Ok(Self {
            id: raw.id,
            cluster_id: raw.cluster_id,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            deleted: raw.deleted,
            deleted_at: raw.deleted_at,
            inner,
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl<T: Resource> Tagged for Record<T> {
    const CLASS: &'static str = T::KIND;
}

fn object(values: Value) -> Result<Map<String, Value>> {
    match values {
        Value::Object(map) => Ok(map),
        other => Err(StorError::Failed {
            message: format!("update values must be an object, got {other}"),
        }),
    }
}

fn visible_to(ctx: &RequestContext, cluster_id: &str) -> bool {
    ctx.is_any_cluster() || ctx.cluster_id == cluster_id
}

impl dyn Store {
    pub async fn create<T: Resource>(&self, cluster_id: &str, obj: &T) -> Result<Record<T>> {
        let raw = self.insert(T::KIND, cluster_id, serde_json::to_value(obj)?).await?;
        Record::from_raw(raw)
    }

    /// Unscoped lookup of a live row.
    pub async fn find<T: Resource>(&self, id: i64) -> Result<Option<Record<T>>> {
        self.get(T::KIND, id, ReadDeleted::No)
            .await?
            .map(Record::from_raw)
            .transpose()
    }

    /// Unscoped lookup of a live row; `NotFound` when absent.
    pub async fn load<T: Resource>(&self, id: i64) -> Result<Record<T>> {
        self.find::<T>(id)
            .await?
            .ok_or_else(|| StorError::not_found(T::KIND, id))
    }

    /// Lookup honouring the context's cluster and soft-delete visibility.
    pub async fn fetch<T: Resource>(&self, ctx: &RequestContext, id: i64) -> Result<Record<T>> {
        self.get(T::KIND, id, ctx.read_deleted)
            .await?
            .filter(|raw| visible_to(ctx, &raw.cluster_id))
            .map(Record::from_raw)
            .transpose()?
            .ok_or_else(|| StorError::not_found(T::KIND, id))
    }

    pub async fn all<T: Resource>(&self, ctx: &RequestContext, filters: &[Filter]) -> Result<Vec<Record<T>>> {
        self.list(T::KIND, &ctx.cluster_id, filters, ctx.read_deleted)
            .await?
            .into_iter()
            .map(Record::from_raw)
            .collect()
    }

    pub async fn first<T: Resource>(&self, ctx: &RequestContext, filters: &[Filter]) -> Result<Option<Record<T>>> {
        Ok(self.all::<T>(ctx, filters).await?.into_iter().next())
    }

    /// Unconditional merge; returns the updated row.
    pub async fn patch<T: Resource>(&self, id: i64, values: Value) -> Result<Record<T>> {
        self.conditional_update(T::KIND, id, &object(values)?, &[]).await?;
        self.load::<T>(id).await
    }

    /// Compare-and-swap; `true` when this caller won.
    pub async fn cas<T: Resource>(&self, id: i64, values: Value, expected: &[Filter]) -> Result<bool> {
        Ok(self
            .conditional_update(T::KIND, id, &object(values)?, expected)
            .await?
            == 1)
    }

    /// Compare-and-swap that reports a lost race as `Busy`.
    pub async fn transition<T: Resource>(&self, id: i64, expected: &[Filter], values: Value) -> Result<Record<T>> {
        if !self.cas::<T>(id, values, expected).await? {
            return Err(StorError::busy(T::KIND, id));
        }
        self.load::<T>(id).await
    }

    pub async fn remove<T: Resource>(&self, id: i64, values: Value) -> Result<bool> {
        self.soft_delete(T::KIND, id, &object(values)?).await
    }

    pub async fn sys_config<V: DeserializeOwned>(&self, cluster_id: &str, key: &str) -> Result<Option<V>> {
        self.sys_config_get(cluster_id, key)
            .await?
            .map(|v| serde_json::from_value(v).map_err(StorError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        status: String,
    }

    impl Resource for Widget {
        const KIND: &'static str = "widget";
    }

    async fn store() -> Arc<dyn Store> {
        Arc::new(SqliteStore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_typed_roundtrip_and_scoping() {
        let store = store().await;
        let w = store
            .create("c1", &Widget { name: "w".into(), status: "active".into() })
            .await
            .unwrap();
        assert_eq!(w.name, "w");

        let ctx = RequestContext::admin("c1");
        assert_eq!(store.fetch::<Widget>(&ctx, w.id).await.unwrap().inner, w.inner);

        let other = RequestContext::admin("c2");
        let err = store.fetch::<Widget>(&other, w.id).await.unwrap_err();
        assert!(matches!(err, StorError::NotFound { .. }));
        assert!(store.fetch::<Widget>(&RequestContext::admin("*"), w.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_transition_reports_busy() {
        let store = store().await;
        let w = store
            .create("c1", &Widget { name: "w".into(), status: "active".into() })
            .await
            .unwrap();
        let moved: Record<Widget> = store
            .transition(w.id, &[Filter::eq("status", "active")], json!({"status": "deleting"}))
            .await
            .unwrap();
        assert_eq!(moved.status, "deleting");
        let err = store
            .transition::<Widget>(w.id, &[Filter::eq("status", "active")], json!({"status": "deleting"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorError::Busy { .. }));
    }

    #[tokio::test]
    async fn test_deleted_rows_visible_on_request() {
        let store = store().await;
        let w = store
            .create("c1", &Widget { name: "w".into(), status: "active".into() })
            .await
            .unwrap();
        assert!(store.remove::<Widget>(w.id, json!({"status": "deleted"})).await.unwrap());
        let ctx = RequestContext::admin("c1");
        assert!(store.all::<Widget>(&ctx, &[]).await.unwrap().is_empty());
        let with_deleted = ctx.with_read_deleted(ReadDeleted::Yes);
        let rows = store.all::<Widget>(&with_deleted, &[]).await.unwrap();
        assert!(rows[0].deleted);
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = Record {
            id: 3,
            cluster_id: "c1".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
            deleted_at: None,
            inner: Widget { name: "w".into(), status: "active".into() },
        };
        let value = record.to_value().unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["name"], "w");
        let tagged = dspace_protocol::tag(&record).unwrap();
        assert_eq!(tagged["__class"], "widget");
    }
}
