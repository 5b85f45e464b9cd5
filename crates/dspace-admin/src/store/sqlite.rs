// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dspace_protocol::{ANY_CLUSTER, ReadDeleted, Result, StorError};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use super::{Filter, RawRecord, Store, merge};

pub(crate) static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

fn db_error(operation: &str) -> impl FnOnce(sqlx::Error) -> StorError + '_ {
    move |e| StorError::Database {
        reason: format!("{operation}: {e}"),
    }
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
    kind: String,
    id: i64,
    cluster_id: String,
    data: String,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
}

impl ResourceRow {
    fn decode(self) -> Result<RawRecord> {
        let data = serde_json::from_str(&self.data).map_err(|e| StorError::SchemaCorruption {
            reason: format!("{} {}: {e}", self.kind, self.id),
        })?;
        Ok(RawRecord {
            kind: self.kind,
            id: self.id,
            cluster_id: self.cluster_id,
            data,
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted: self.deleted,
            deleted_at: self.deleted_at,
        })
    }
}

fn deleted_clause(read_deleted: ReadDeleted) -> &'static str {
    match read_deleted {
        ReadDeleted::No => " AND deleted = 0",
        ReadDeleted::Yes => "",
        ReadDeleted::Only => " AND deleted = 1",
    }
}

const COLUMNS: &str = "kind, id, cluster_id, data, revision, created_at, updated_at, deleted, deleted_at";

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. The schema must already be migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url`, creating the file and its directory when needed, and migrate.
    pub async fn connect(url: &str) -> Result<Self> {
        if let Some(path) = url
            .strip_prefix("sqlite:")
            .map(|rest| rest.split('?').next().unwrap_or(rest))
            .filter(|p| !p.is_empty() && !p.starts_with(":memory:"))
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorError::Database {
                reason: format!("create_dir {}: {e}", parent.display()),
            })?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(db_error("connect"))?;
        Self::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Single-connection in-memory store, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error("connect"))?;
        Self::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(pool: &SqlitePool) -> Result<()> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| StorError::Database {
                reason: format!("migrate: {e}"),
            })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert(&self, kind: &str, cluster_id: &str, data: Value) -> Result<RawRecord> {
        let now = Utc::now();
        let body = serde_json::to_string(&data)?;
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            r#"
            INSERT INTO resources (kind, id, cluster_id, data, revision, created_at, updated_at, deleted)
            VALUES (?, (SELECT COALESCE(MAX(id), 0) + 1 FROM resources WHERE kind = ?), ?, ?, 0, ?, ?, 0)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(kind)
        .bind(kind)
        .bind(cluster_id)
        .bind(&body)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("insert"))?;
        debug!(kind, id = row.id, cluster_id, "row inserted");
        row.decode()
    }

    async fn get(&self, kind: &str, id: i64, read_deleted: ReadDeleted) -> Result<Option<RawRecord>> {
        sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {COLUMNS} FROM resources WHERE kind = ? AND id = ?{}",
            deleted_clause(read_deleted)
        ))
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get"))?
        .map(ResourceRow::decode)
        .transpose()
    }

    async fn list(
        &self,
        kind: &str,
        cluster_id: &str,
        filters: &[Filter],
        read_deleted: ReadDeleted,
    ) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {COLUMNS} FROM resources WHERE kind = ? AND (? = ? OR cluster_id = ?){} ORDER BY id",
            deleted_clause(read_deleted)
        ))
        .bind(kind)
        .bind(cluster_id)
        .bind(ANY_CLUSTER)
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list"))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record = row.decode()?;
            if filters.iter().all(|f| f.matches(&record.data)) {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn conditional_update(
        &self,
        kind: &str,
        id: i64,
        values: &Map<String, Value>,
        expected: &[Filter],
    ) -> Result<u64> {
        loop {
            let Some(current) = self.get(kind, id, ReadDeleted::No).await? else {
                return Ok(0);
            };
            if !expected.iter().all(|f| f.matches(&current.data)) {
                return Ok(0);
            }
            let mut data = current.data;
            merge(&mut data, values);
            let result = sqlx::query(
                r#"
                UPDATE resources
                SET data = ?, revision = revision + 1, updated_at = ?
                WHERE kind = ? AND id = ? AND revision = ? AND deleted = 0
                "#,
            )
            .bind(serde_json::to_string(&data)?)
            .bind(Utc::now())
            .bind(kind)
            .bind(id)
            .bind(current.revision)
            .execute(&self.pool)
            .await
            .map_err(db_error("conditional_update"))?;
            if result.rows_affected() == 1 {
                return Ok(1);
            }
            // another writer bumped the revision in between; re-check against its result
            debug!(kind, id, "revision moved, re-evaluating expectations");
        }
    }

    async fn soft_delete(&self, kind: &str, id: i64, values: &Map<String, Value>) -> Result<bool> {
        loop {
            let Some(current) = self.get(kind, id, ReadDeleted::No).await? else {
                return Ok(false);
            };
            let mut data = current.data;
            merge(&mut data, values);
            let now = Utc::now();
            let result = sqlx::query(
                r#"
                UPDATE resources
                SET data = ?, revision = revision + 1, updated_at = ?, deleted = 1, deleted_at = ?
                WHERE kind = ? AND id = ? AND revision = ? AND deleted = 0
                "#,
            )
            .bind(serde_json::to_string(&data)?)
            .bind(now)
            .bind(now)
            .bind(kind)
            .bind(id)
            .bind(current.revision)
            .execute(&self.pool)
            .await
            .map_err(db_error("soft_delete"))?;
            if result.rows_affected() == 1 {
                return Ok(true);
            }
        }
    }

    async fn purge_before(&self, kind: &str, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM resources WHERE kind = ? AND created_at < ?")
            .bind(kind)
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(db_error("purge"))?;
        Ok(result.rows_affected())
    }

    async fn sys_config_get(&self, cluster_id: &str, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM sys_configs WHERE cluster_id = ? AND key = ?")
                .bind(cluster_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("sys_config_get"))?;
        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| StorError::SchemaCorruption {
                reason: format!("sys_config {key}: {e}"),
            })
        })
        .transpose()
    }

    async fn sys_config_set(&self, cluster_id: &str, key: &str, value: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sys_configs (cluster_id, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cluster_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(cluster_id)
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error("sys_config_set"))?;
        Ok(())
    }

    async fn sys_config_swap(&self, cluster_id: &str, key: &str, value: &Value) -> Result<Option<Value>> {
        let body = serde_json::to_string(value)?;
        loop {
            let raw: Option<String> =
                sqlx::query_scalar("SELECT value FROM sys_configs WHERE cluster_id = ? AND key = ?")
                    .bind(cluster_id)
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error("sys_config_swap"))?;
            let Some(raw) = raw else {
                self.sys_config_set(cluster_id, key, value).await?;
                return Ok(None);
            };
            let result = sqlx::query(
                "UPDATE sys_configs SET value = ?, updated_at = ? WHERE cluster_id = ? AND key = ? AND value = ?",
            )
            .bind(&body)
            .bind(Utc::now())
            .bind(cluster_id)
            .bind(key)
            .bind(&raw)
            .execute(&self.pool)
            .await
            .map_err(db_error("sys_config_swap"))?;
            if result.rows_affected() == 1 {
                let previous = serde_json::from_str(&raw).map_err(|e| StorError::SchemaCorruption {
                    reason: format!("sys_config {key}: {e}"),
                })?;
                return Ok(Some(previous));
            }
        }
    }
}
