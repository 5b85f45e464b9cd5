// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster health roll-up.
//!
//! Pool health sub-statuses are derived from placement-group metrics and
//! only ever replace one of the settled pool statuses, so a pool in the
//! middle of an operation keeps its transitional status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dspace_protocol::{ANY_CLUSTER, RequestContext, Result};
use dspace_tools::{CephTool, MetricSource, PoolHealth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::models::{Cluster, Node, Osd, Pool, PoolStatus};
use crate::store::{Filter, Store};

const HEALTH_UNKNOWN: &str = "HEALTH_UNKNOWN";

/// Counts by status plus the ceph health string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub cluster_id: String,
    pub ceph_health: String,
    pub nodes: BTreeMap<String, usize>,
    pub osds: BTreeMap<String, usize>,
    pub pools: BTreeMap<String, usize>,
}

fn status_of(health: PoolHealth) -> PoolStatus {
    match health {
        PoolHealth::Healthy => PoolStatus::Active,
        PoolHealth::Warning => PoolStatus::Warning,
        PoolHealth::Degraded => PoolStatus::Degraded,
        PoolHealth::Recovering => PoolStatus::Recovering,
    }
}

fn count_by<S: Serialize>(statuses: impl Iterator<Item = S>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for status in statuses {
        let key = match serde_json::to_value(status) {
            Ok(serde_json::Value::String(s)) => s,
            _ => "unknown".to_string(),
        };
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

pub struct HealthMonitor {
    store: Arc<dyn Store>,
    ceph: Arc<dyn CephTool>,
    metrics: Arc<dyn MetricSource>,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        ceph: Arc<dyn CephTool>,
        metrics: Arc<dyn MetricSource>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            ceph,
            metrics,
            poll_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Overwrite settled pool statuses from pg metrics. Returns pools changed.
    pub async fn refresh_pools(&self, ctx: &RequestContext) -> Result<usize> {
        let states = self.metrics.pool_pg_states().await?;
        let pools = self
            .store
            .all::<Pool>(ctx, &[Filter::one_of("status", PoolStatus::HEALTH)])
            .await?;
        let mut changed = 0;
        for pool in pools {
            let Some(summary) = pool.ceph_pool_id.and_then(|id| states.get(&id)) else {
                continue;
            };
            let status = status_of(summary.health());
            if status == pool.status {
                continue;
            }
            let won = self
                .store
                .cas::<Pool>(
                    pool.id,
                    json!({"status": status}),
                    &[Filter::one_of("status", PoolStatus::HEALTH)],
                )
                .await?;
            if won {
                debug!(pool_id = pool.id, from = ?pool.status, to = ?status, "pool health changed");
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub async fn cluster_health(&self, ctx: &RequestContext) -> Result<ClusterHealth> {
        if let Err(e) = self.refresh_pools(ctx).await {
            warn!(cluster_id = %ctx.cluster_id, error = %e, "pool health not refreshed");
        }
        let ceph_health = self.ceph.health().await.unwrap_or_else(|e| {
            warn!(cluster_id = %ctx.cluster_id, error = %e, "ceph health unavailable");
            HEALTH_UNKNOWN.to_string()
        });
        let nodes = self.store.all::<Node>(ctx, &[]).await?;
        let osds = self.store.all::<Osd>(ctx, &[]).await?;
        let pools = self.store.all::<Pool>(ctx, &[]).await?;
        Ok(ClusterHealth {
            cluster_id: ctx.cluster_id.clone(),
            ceph_health,
            nodes: count_by(nodes.iter().map(|n| n.status)),
            osds: count_by(osds.iter().map(|o| o.status)),
            pools: count_by(pools.iter().map(|p| p.status)),
        })
    }

    async fn refresh_all(&self) -> Result<usize> {
        let clusters = self
            .store
            .all::<Cluster>(&RequestContext::admin(ANY_CLUSTER), &[])
            .await?;
        let mut changed = 0;
        for cluster in clusters {
            changed += self
                .refresh_pools(&RequestContext::admin(cluster.cluster_id.clone()))
                .await?;
        }
        Ok(changed)
    }

    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Health monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Health monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.poll_interval) => {
                    match self.refresh_all().await {
                        Ok(0) => {}
                        Ok(changed) => info!(changed, "pool health refreshed"),
                        Err(e) => error!(error = %e, "Failed to refresh pool health"),
                    }
                }
            }
        }

        info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use dspace_tools::mock::{FakeCeph, FakeMetricSource};
    use dspace_tools::{FaultDomain, PgStateSummary, PoolType};

    fn pool(name: &str, ceph_id: i64, status: PoolStatus) -> Pool {
        Pool {
            pool_name: name.into(),
            display_name: name.into(),
            pool_type: PoolType::Replicated,
            role: crate::models::PoolRole::Data,
            speed_type: None,
            replicate_size: 3,
            failure_domain_type: FaultDomain::Host,
            crush_rule_id: None,
            osd_num: 3,
            ceph_pool_id: Some(ceph_id),
            status,
        }
    }

    #[tokio::test]
    async fn test_refresh_only_touches_settled_pools() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let metrics = Arc::new(FakeMetricSource::new());
        let degraded = PgStateSummary {
            total: 32,
            degraded: 4,
            ..Default::default()
        };
        metrics.set_pg_states(1, degraded);
        metrics.set_pg_states(2, degraded);
        metrics.set_pg_states(3, PgStateSummary { total: 32, ..Default::default() });

        let settled = store.create("c1", &pool("a", 1, PoolStatus::Active)).await.unwrap();
        let busy = store.create("c1", &pool("b", 2, PoolStatus::Processing)).await.unwrap();
        let healed = store.create("c1", &pool("c", 3, PoolStatus::Recovering)).await.unwrap();

        let monitor = HealthMonitor::new(
            store.clone(),
            Arc::new(FakeCeph::new()),
            metrics,
            Duration::from_secs(60),
        );
        let ctx = RequestContext::admin("c1");
        assert_eq!(monitor.refresh_pools(&ctx).await.unwrap(), 2);

        assert_eq!(store.load::<Pool>(settled.id).await.unwrap().status, PoolStatus::Degraded);
        assert_eq!(store.load::<Pool>(busy.id).await.unwrap().status, PoolStatus::Processing);
        assert_eq!(store.load::<Pool>(healed.id).await.unwrap().status, PoolStatus::Active);

        let health = monitor.cluster_health(&ctx).await.unwrap();
        assert_eq!(health.pools.get("processing"), Some(&1));
        assert_eq!(health.pools.get("degraded"), Some(&1));
        assert!(health.osds.is_empty());
    }
}
