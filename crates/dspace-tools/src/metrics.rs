// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prometheus-backed metric queries.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ToolError};

/// Placement-group state counters of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgStateSummary {
    pub total: u64,
    pub degraded: u64,
    pub recovering: u64,
    pub undersized: u64,
    pub inconsistent: u64,
}

/// Health sub-status derived from pg states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Healthy,
    Warning,
    Degraded,
    Recovering,
}

impl PgStateSummary {
    pub fn health(&self) -> PoolHealth {
        if self.recovering > 0 {
            PoolHealth::Recovering
        } else if self.degraded > 0 {
            PoolHealth::Degraded
        } else if self.undersized > 0 || self.inconsistent > 0 {
            PoolHealth::Warning
        } else {
            PoolHealth::Healthy
        }
    }
}

/// One instant-vector sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Evaluate an instant PromQL query.
    async fn query(&self, promql: &str) -> Result<Vec<Sample>>;

    /// Pg state counters for every pool, keyed by ceph pool id.
    async fn pool_pg_states(&self) -> Result<BTreeMap<i64, PgStateSummary>> {
        let mut out: BTreeMap<i64, PgStateSummary> = BTreeMap::new();
        for (metric, slot) in [
            ("ceph_pg_total", 0usize),
            ("ceph_pg_degraded", 1),
            ("ceph_pg_recovering", 2),
            ("ceph_pg_undersized", 3),
            ("ceph_pg_inconsistent", 4),
        ] {
            for sample in self.query(metric).await? {
                let Some(pool_id) = sample.labels.get("pool_id").and_then(|v| v.parse().ok()) else {
                    continue;
                };
                let entry = out.entry(pool_id).or_default();
                let value = sample.value.max(0.0) as u64;
                match slot {
                    0 => entry.total = value,
                    1 => entry.degraded = value,
                    2 => entry.recovering = value,
                    3 => entry.undersized = value,
                    _ => entry.inconsistent = value,
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    /// `[unix_ts, "value"]`
    value: (f64, String),
}

pub(crate) fn parse_query_response(body: &str) -> Result<Vec<Sample>> {
    let resp: QueryResponse = serde_json::from_str(body)?;
    if resp.status != "success" {
        return Err(ToolError::parse(
            "prometheus query",
            resp.error.unwrap_or_else(|| resp.status.clone()),
        ));
    }
    Ok(resp
        .data
        .map(|d| d.result)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| {
            s.value.1.parse::<f64>().ok().map(|value| Sample {
                labels: s.metric,
                value,
            })
        })
        .collect())
}

pub struct PrometheusSource {
    base_url: String,
    http: reqwest::Client,
}

impl PrometheusSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl MetricSource for PrometheusSource {
    async fn query(&self, promql: &str) -> Result<Vec<Sample>> {
        debug!(query = %promql, "prometheus query");
        let body = self
            .http
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", promql)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_query_response(&body)
    }
}
