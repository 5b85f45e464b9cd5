// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Admin method implementations.
//!
//! Mutating methods validate, open an action, move the resource into a
//! transitional status with a conditional update and hand the slow part to
//! the task pool. The worker ends through [`complete`], which closes the
//! action and announces the outcome on the websocket bus.

pub mod access_path;
pub mod action_log;
pub mod alert;
pub mod cluster;
pub mod disk;
pub mod node;
pub mod object_policy;
pub mod osd;
pub mod pool;
pub mod radosgw;
pub mod service;
pub mod volume;

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use dspace_protocol::{RequestContext, Result, StorError};
use dspace_tools::{CephTool, MetricSource};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::action_log::ActionLogger;
use crate::alert::{AlertEngine, LettreMailer, Mailer};
use crate::config::Config;
use crate::health::HealthMonitor;
use crate::locks::NamedLocks;
use crate::models::ActionStatus;
use crate::notify::{Notifier, SendMessage, op_type};
use crate::registry::AgentRegistry;
use crate::store::{Record, Resource, Store};
use crate::supervisor::{Restarter, ServiceSupervisor, SupervisorConfig};
use crate::tasks::TaskPool;

/// Ceph flavor name kept in sys config.
pub const CEPH_VERSION_KEY: &str = "ceph_version_name";
/// The branded flavor: specify-rep pool creation and cache partitions.
pub const BRANDED_FLAVOR: &str = "T2stor";
const DEFAULT_FLAVOR: &str = "ceph";
/// Sys config key of the cidr that gateway and router addresses must lie in.
pub const GATEWAY_CIDR_KEY: &str = "gateway_cidr";

/// Shared state of every admin method.
pub struct AdminState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub ceph: Arc<dyn CephTool>,
    pub health: Arc<HealthMonitor>,
    pub registry: Arc<AgentRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub alerts: AlertEngine,
    pub actions: ActionLogger,
    pub tasks: TaskPool,
    pub locks: NamedLocks,
    pub supervisor: Arc<ServiceSupervisor>,
    pub start_time: std::time::Instant,
}

impl AdminState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        ceph: Arc<dyn CephTool>,
        metrics: Arc<dyn MetricSource>,
        registry: Arc<AgentRegistry>,
        notifier: Arc<dyn Notifier>,
        restarter: Arc<dyn Restarter>,
    ) -> Result<Self> {
        let mailer: Option<Arc<dyn Mailer>> = match &config.smtp {
            Some(smtp) => Some(Arc::new(LettreMailer::new(smtp)?)),
            None => None,
        };
        let alerts = AlertEngine::new(store.clone(), mailer);
        let supervisor = Arc::new(ServiceSupervisor::new(
            store.clone(),
            notifier.clone(),
            alerts.clone(),
            restarter,
            SupervisorConfig {
                heartbeat_interval: config.service_heartbeat_interval,
                max_interval: config.service_max_interval,
                auto_restart: config.service_auto_restart,
                auto_restart_ignore: config.auto_restart_ignore.clone(),
                ..SupervisorConfig::default()
            },
        ));
        let health = Arc::new(HealthMonitor::new(
            store.clone(),
            ceph.clone(),
            metrics,
            config.service_heartbeat_interval,
        ));
        Ok(Self {
            tasks: TaskPool::new(config.task_workers, config.debug),
            actions: ActionLogger::new(store.clone()),
            locks: NamedLocks::new(),
            config,
            store,
            ceph,
            health,
            registry,
            notifier,
            alerts,
            supervisor,
            start_time: std::time::Instant::now(),
        })
    }

    pub async fn ceph_flavor(&self, cluster_id: &str) -> Result<String> {
        Ok(self
            .store
            .sys_config::<String>(cluster_id, CEPH_VERSION_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_FLAVOR.to_string()))
    }

    pub async fn is_branded(&self, cluster_id: &str) -> Result<bool> {
        Ok(self.ceph_flavor(cluster_id).await? == BRANDED_FLAVOR)
    }

    /// Reject `ip` when the cluster restricts gateway addresses to a cidr.
    pub async fn check_gateway_ip(&self, cluster_id: &str, ip: &str) -> Result<()> {
        match self.store.sys_config::<String>(cluster_id, GATEWAY_CIDR_KEY).await? {
            Some(cidr) => ensure_in_cidr(ip, &cidr),
            None => Ok(()),
        }
    }
}

/// Close the action of a finished task and announce the outcome.
///
/// Downstream failures are swallowed here: the caller already holds the
/// transitional resource. Programming errors are returned so the task pool
/// can fail fast.
pub(crate) async fn complete<T: Resource>(
    state: &AdminState,
    ctx: &RequestContext,
    action_id: i64,
    resource: &str,
    action: &str,
    outcome: Result<Record<T>>,
) -> Result<()> {
    match outcome {
        Ok(record) => {
            info!(resource, action, id = record.id, "task succeeded");
            state
                .actions
                .finish(action_id, ActionStatus::Success, None, Some(record.to_value()?))
                .await?;
            let message = SendMessage::new(
                op_type(resource, &format!("{action}_success")),
                format!("{resource} {action} succeeded"),
            )
            .about(&record);
            state.notifier.send(ctx, message).await;
            Ok(())
        }
        Err(e) => {
            warn!(resource, action, error = %e, "task failed");
            state
                .actions
                .finish(action_id, ActionStatus::Fail, Some(e.to_string()), None)
                .await?;
            let message = SendMessage::new(
                op_type(resource, &format!("{action}_error")),
                format!("{resource} {action} failed: {e}"),
            )
            .resource_type(resource);
            state.notifier.send(ctx, message).await;
            if e.is_programming() { Err(e) } else { Ok(()) }
        }
    }
}

/// Close the action of a synchronous method; its error reaches the caller.
pub(crate) async fn conclude<T: Resource>(
    state: &AdminState,
    action_id: i64,
    outcome: Result<Record<T>>,
) -> Result<Record<T>> {
    match &outcome {
        Ok(record) => {
            state
                .actions
                .finish(action_id, ActionStatus::Success, None, Some(record.to_value()?))
                .await?
        }
        Err(e) => {
            state
                .actions
                .finish(action_id, ActionStatus::Fail, Some(e.to_string()), None)
                .await?
        }
    }
    outcome
}

/// Close the action as failed when the synchronous half of a method errs
/// after opening it, e.g. a lost conditional update.
pub(crate) async fn abandon<T>(state: &AdminState, action_id: i64, outcome: Result<T>) -> Result<T> {
    if let Err(e) = &outcome {
        if let Err(close) = state
            .actions
            .finish(action_id, ActionStatus::Fail, Some(e.to_string()), None)
            .await
        {
            warn!(action_id, error = %close, "failed action not closed");
        }
    }
    outcome
}

/// Best-effort status write used on the failure path of a task.
pub(crate) async fn mark<T: Resource>(state: &AdminState, id: i64, status: impl Serialize) {
    if let Err(e) = state.store.patch::<T>(id, json!({"status": status})).await {
        warn!(kind = T::KIND, id, error = %e, "failure status not recorded");
    }
}

/// Run `outcome`'s error path through [`mark`] before handing it on.
pub(crate) async fn settle<T: Resource, S: Serialize>(
    state: &AdminState,
    id: i64,
    failed: S,
    outcome: Result<Record<T>>,
) -> Result<Record<T>> {
    if outcome.is_err() {
        mark::<T>(state, id, failed).await;
    }
    outcome
}

/// Reject `ip` unless it lies inside `cidr`.
pub(crate) fn ensure_in_cidr(ip: &str, cidr: &str) -> Result<()> {
    let addr = IpAddr::from_str(ip).map_err(|_| StorError::invalid(format!("{ip} is not an ip address")))?;
    let net = cidr::IpCidr::from_str(cidr).map_err(|_| StorError::invalid(format!("{cidr} is not a cidr")))?;
    if !net.contains(&addr) {
        return Err(StorError::CidrMismatch {
            ip: ip.to_string(),
            cidr: cidr.to_string(),
        });
    }
    Ok(())
}
