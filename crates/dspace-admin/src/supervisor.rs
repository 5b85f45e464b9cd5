// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service supervisor.
//!
//! Every managed daemon gets a helper holding the last status seen for it.
//! Agent heartbeats and the periodic timeout check are folded into that
//! status through [`fold`]; transitions are persisted, announced on the
//! websocket bus, raised as alerts and, for daemons that went down, followed
//! by a restart. Folds of one helper are linearized by the helper's lock.
//!
//! The node agent (`DSA`) is the transport of every other heartbeat, so only
//! its own silence is acted upon, and it is restarted over SSH.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dspace_protocol::api::{
    DSA_SERVICE, ROLE_ADMIN, ROLE_BASE, ROLE_OBJECT_GATEWAY, ROLE_RADOSGW_ROUTER, ROLE_STORAGE, ServiceKind,
    ServiceReport, ServiceStatus, ServiceUpdate,
};
use dspace_protocol::{ANY_CLUSTER, RequestContext, Result};
use dspace_tools::{Docker, ServiceControl, SshExecutor};
use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertEngine};
use crate::models::{
    AlertLevel, Cluster, ClusterStatus, GatewayStatus, Node, NodeStatus, Radosgw, RadosgwRouter,
    Service,
};
use crate::notify::{Notifier, SendMessage, op_type};
use crate::registry::{AGENT_SERVICE, AgentRegistry};
use crate::store::{Filter, Record, Resource, Store};

/// Roles whose service rows are created on first heartbeat.
const AUTO_CREATED_ROLES: [&str; 4] = [ROLE_STORAGE, ROLE_ADMIN, ROLE_OBJECT_GATEWAY, ROLE_RADOSGW_ROUTER];

const AUTO_RESTART_KEY: &str = "service_auto_restart";

/// Outcome of folding one observed status into the last known one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Active again; bump the heartbeat counter
    Count,
    Move {
        to: ServiceStatus,
        alert: Option<AlertLevel>,
        restart: bool,
        cancel_restart: bool,
    },
    Stay,
}

impl Transition {
    fn to(to: ServiceStatus) -> Self {
        Transition::Move {
            to,
            alert: None,
            restart: false,
            cancel_restart: false,
        }
    }
}

/// The supervisor state machine.
pub fn fold(last: ServiceStatus, incoming: ServiceStatus) -> Transition {
    use ServiceStatus::*;
    match (last, incoming) {
        (Active, Active) => Transition::Count,
        (Inactive, Active) => Transition::Move {
            to: Active,
            alert: Some(AlertLevel::Info),
            restart: false,
            cancel_restart: false,
        },
        (Starting, Active) => Transition::Move {
            to: Active,
            alert: None,
            restart: false,
            cancel_restart: true,
        },
        (Error, Active) => Transition::to(Active),
        (Active, Inactive) => Transition::Move {
            to: Inactive,
            alert: Some(AlertLevel::Warn),
            restart: true,
            cancel_restart: false,
        },
        (Inactive, Starting) => Transition::to(Starting),
        (Active, Error) => Transition::Move {
            to: Error,
            alert: Some(AlertLevel::Error),
            restart: false,
            cancel_restart: false,
        },
        (Inactive | Starting, Error) => Transition::to(Error),
        _ => Transition::Stay,
    }
}

/// Restarts one daemon on its node.
#[async_trait]
pub trait Restarter: Send + Sync {
    async fn restart(&self, ctx: &RequestContext, service: &Record<Service>) -> Result<()>;
}

/// Restarts the agent container over SSH and everything else through the agent.
pub struct NodeRestarter {
    store: Arc<dyn Store>,
    registry: Arc<AgentRegistry>,
    ssh_timeout: Duration,
}

impl NodeRestarter {
    pub fn new(store: Arc<dyn Store>, registry: Arc<AgentRegistry>, ssh_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            ssh_timeout,
        }
    }
}

#[async_trait]
impl Restarter for NodeRestarter {
    async fn restart(&self, ctx: &RequestContext, service: &Record<Service>) -> Result<()> {
        if service.name == DSA_SERVICE {
            let node = self.store.load::<Node>(service.node_id).await?;
            let ssh = SshExecutor::new(&node.ip_address, &node.ssh_user, node.password.clone())
                .port(node.ssh_port)
                .timeout(self.ssh_timeout);
            Docker::remote(Arc::new(ssh)).restart(&service.service_name).await?;
            self.registry.evict(&service.cluster_id, AGENT_SERVICE, service.node_id);
            return Ok(());
        }

        let name = service.service_name.clone();
        let kind = service.kind;
        self.registry
            .with_agent(ctx, service.node_id, |agent| async move {
                match kind {
                    ServiceKind::Systemd => agent.systemd_service_restart(ctx, &name).await,
                    ServiceKind::Container => agent.docker_service_restart(ctx, &name).await,
                }
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub heartbeat_interval: Duration,
    pub max_interval: Duration,
    /// Used when the cluster has no `service_auto_restart` setting
    pub auto_restart: bool,
    pub auto_restart_ignore: Vec<String>,
    pub restart_attempts: u32,
    pub restart_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(180),
            auto_restart: true,
            auto_restart_ignore: Vec::new(),
            restart_attempts: 3,
            restart_backoff: Duration::from_secs(5),
        }
    }
}

type HelperKey = (String, i64, String);

struct Helper {
    service_id: i64,
    cluster_id: String,
    node_id: i64,
    name: String,
    service_name: String,
    role: String,
    last_status: ServiceStatus,
    last_update_at: Instant,
    is_timeout: bool,
    counter: u64,
    restart: Option<AbortHandle>,
}

impl Helper {
    fn new(service: &Record<Service>) -> Self {
        Self {
            service_id: service.id,
            cluster_id: service.cluster_id.clone(),
            node_id: service.node_id,
            name: service.name.clone(),
            service_name: service.service_name.clone(),
            role: service.role.clone(),
            last_status: service.status,
            last_update_at: Instant::now(),
            is_timeout: false,
            counter: service.counter,
            restart: None,
        }
    }

    fn is_dsa(&self) -> bool {
        self.name == DSA_SERVICE
    }

    fn ctx(&self) -> RequestContext {
        RequestContext::admin(self.cluster_id.clone())
    }

    fn restart_in_flight(&self) -> bool {
        self.restart.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// What the supervisor currently believes about one daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperState {
    pub service_id: i64,
    pub status: ServiceStatus,
    pub counter: u64,
    pub is_timeout: bool,
    pub restarting: bool,
}

type SharedHelper = Arc<AsyncMutex<Helper>>;

pub struct ServiceSupervisor {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    alerts: AlertEngine,
    restarter: Arc<dyn Restarter>,
    config: SupervisorConfig,
    helpers: Mutex<HashMap<HelperKey, SharedHelper>>,
    shutdown: Arc<Notify>,
}

impl ServiceSupervisor {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        alerts: AlertEngine,
        restarter: Arc<dyn Restarter>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            alerts,
            restarter,
            config,
            helpers: Mutex::new(HashMap::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    fn helpers(&self) -> MutexGuard<'_, HashMap<HelperKey, SharedHelper>> {
        self.helpers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn helper_for(&self, service: &Record<Service>) -> SharedHelper {
        let key = (service.cluster_id.clone(), service.node_id, service.name.clone());
        self.helpers()
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(Helper::new(service))))
            .clone()
    }

    /// Create helpers for every agent across clusters. Returns how many exist.
    pub async fn load(&self) -> Result<usize> {
        let ctx = RequestContext::admin(ANY_CLUSTER);
        let agents = self
            .store
            .all::<Service>(&ctx, &[Filter::eq("name", DSA_SERVICE)])
            .await?;
        for agent in &agents {
            self.helper_for(agent);
        }
        info!(agents = agents.len(), "service supervisor loaded");
        Ok(self.helpers().len())
    }

    /// Record the agent container of `node_id` as a supervised service.
    /// Registration repeats on every agent start; an existing row is kept.
    pub async fn track_agent(&self, ctx: &RequestContext, node_id: i64, container: &str) -> Result<Record<Service>> {
        let existing = self
            .store
            .first::<Service>(ctx, &[Filter::eq("name", DSA_SERVICE), Filter::eq("node_id", node_id)])
            .await?;
        let service = match existing {
            Some(service) => service,
            None => {
                let service = self
                    .store
                    .create(
                        &ctx.cluster_id,
                        &Service {
                            name: DSA_SERVICE.to_string(),
                            node_id,
                            role: ROLE_BASE.to_string(),
                            service_name: container.to_string(),
                            kind: ServiceKind::Container,
                            status: ServiceStatus::Active,
                            counter: 0,
                        },
                    )
                    .await?;
                info!(node_id, "agent service registered");
                service
            }
        };
        self.helper_for(&service);
        Ok(service)
    }

    pub async fn state(&self, cluster_id: &str, node_id: i64, name: &str) -> Option<HelperState> {
        let helper = self
            .helpers()
            .get(&(cluster_id.to_string(), node_id, name.to_string()))
            .cloned()?;
        let h = helper.lock().await;
        Some(HelperState {
            service_id: h.service_id,
            status: h.last_status,
            counter: h.counter,
            is_timeout: h.is_timeout,
            restarting: h.restart_in_flight(),
        })
    }

    /// Absorb one agent heartbeat.
    pub async fn service_update(self: &Arc<Self>, update: ServiceUpdate, node_id: i64) -> Result<()> {
        let node = self.store.load::<Node>(node_id).await?;
        let ctx = RequestContext::admin(node.cluster_id.clone());
        for (role, reports) in update {
            for report in reports {
                let Some(service) = self.service_row(&ctx, &role, node_id, &report).await? else {
                    continue;
                };
                let helper = self.helper_for(&service);
                let mut h = helper.lock().await;
                h.last_update_at = Instant::now();
                h.is_timeout = false;
                self.apply(&helper, &mut h, report.status).await;
            }
        }
        Ok(())
    }

    async fn service_row(
        &self,
        ctx: &RequestContext,
        role: &str,
        node_id: i64,
        report: &ServiceReport,
    ) -> Result<Option<Record<Service>>> {
        let existing = self
            .store
            .first::<Service>(
                ctx,
                &[Filter::eq("name", &report.name), Filter::eq("node_id", node_id)],
            )
            .await?;
        if existing.is_some() {
            return Ok(existing);
        }
        if !AUTO_CREATED_ROLES.contains(&role) {
            warn!(role, service = %report.name, node_id, "heartbeat for unknown service ignored");
            return Ok(None);
        }
        let service = self
            .store
            .create(
                &ctx.cluster_id,
                &Service {
                    name: report.name.clone(),
                    node_id,
                    role: role.to_string(),
                    service_name: report.service_name.clone(),
                    kind: report.kind,
                    status: report.status,
                    counter: 0,
                },
            )
            .await?;
        info!(service = %service.name, node_id, role, "service registered");
        Ok(Some(service))
    }

    /// One timeout pass over every helper.
    pub async fn check_all(self: &Arc<Self>) {
        let helpers: Vec<(HelperKey, SharedHelper)> = self
            .helpers()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        debug!(helpers = helpers.len(), "checking service heartbeats");
        for (key, helper) in helpers {
            match self.check(&helper).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(cluster_id = %key.0, node_id = key.1, service = %key.2, "node gone, helper dropped");
                    self.helpers().remove(&key);
                }
                Err(e) => warn!(service = %key.2, error = %e, "service check failed"),
            }
        }
    }

    /// `false` when the helper should be dropped.
    async fn check(self: &Arc<Self>, helper: &SharedHelper) -> Result<bool> {
        let mut h = helper.lock().await;
        let Some(node) = self.store.find::<Node>(h.node_id).await? else {
            if let Some(restart) = h.restart.take() {
                restart.abort();
            }
            return Ok(false);
        };
        if node.status == NodeStatus::Deleting || self.cluster_deleting(&h.cluster_id).await? {
            return Ok(true);
        }
        if !h.is_timeout && h.last_update_at.elapsed() > self.config.max_interval {
            h.is_timeout = true;
            warn!(service = %h.name, node_id = h.node_id, "service heartbeat timed out");
            if h.is_dsa() {
                self.apply(helper, &mut h, ServiceStatus::Inactive).await;
            }
        }
        Ok(true)
    }

    async fn cluster_deleting(&self, cluster_id: &str) -> Result<bool> {
        let cluster = self
            .store
            .first::<Cluster>(&RequestContext::admin(cluster_id), &[])
            .await?;
        Ok(cluster.is_some_and(|c| c.status == ClusterStatus::Deleting))
    }

    async fn apply(self: &Arc<Self>, shared: &SharedHelper, h: &mut Helper, incoming: ServiceStatus) {
        match fold(h.last_status, incoming) {
            Transition::Stay => {}
            Transition::Count => {
                h.counter += 1;
                if let Err(e) = self
                    .store
                    .patch::<Service>(h.service_id, json!({"counter": h.counter}))
                    .await
                {
                    warn!(service = %h.name, error = %e, "heartbeat counter not persisted");
                }
            }
            Transition::Move {
                to,
                alert,
                restart,
                cancel_restart,
            } => {
                let from = h.last_status;
                h.last_status = to;
                info!(service = %h.name, node_id = h.node_id, from = from.as_str(), to = to.as_str(), "service status changed");
                if cancel_restart && let Some(handle) = h.restart.take() {
                    handle.abort();
                }
                self.publish(h, to, alert).await;
                if restart {
                    self.schedule_restart(shared, h).await;
                }
            }
        }
    }

    async fn publish(&self, h: &Helper, status: ServiceStatus, alert: Option<AlertLevel>) {
        let ctx = h.ctx();
        let record = match self
            .store
            .patch::<Service>(h.service_id, json!({"status": status}))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(service = %h.name, error = %e, "service status not persisted");
                return;
            }
        };
        if let Err(e) = self.mirror_gateway(&ctx, h, status).await {
            warn!(service = %h.name, error = %e, "gateway status not mirrored");
        }

        let text = format!("service {} on node {} is {}", h.name, h.node_id, status.as_str());
        self.notifier
            .send(
                &ctx,
                SendMessage::new(op_type("service", status.as_str()), text.clone()).about(&record),
            )
            .await;
        if let Some(level) = alert {
            let alert = Alert::new("service_status", "service", text)
                .resource(h.service_id, h.name.clone())
                .level(level);
            if let Err(e) = self.alerts.emit(&ctx, alert).await {
                warn!(service = %h.name, error = %e, "service alert failed");
            }
        }
    }

    /// Gateways and routers carry their daemon's status on their own row.
    async fn mirror_gateway(&self, ctx: &RequestContext, h: &Helper, status: ServiceStatus) -> Result<()> {
        let status = match status {
            ServiceStatus::Active => GatewayStatus::Active,
            ServiceStatus::Inactive | ServiceStatus::Starting => GatewayStatus::Inactive,
            ServiceStatus::Error => GatewayStatus::Error,
        };
        match h.role.as_str() {
            ROLE_OBJECT_GATEWAY => self.mirror::<Radosgw>(ctx, &h.name, status).await,
            ROLE_RADOSGW_ROUTER => self.mirror::<RadosgwRouter>(ctx, &h.name, status).await,
            _ => Ok(()),
        }
    }

    async fn mirror<T: Resource>(&self, ctx: &RequestContext, name: &str, status: GatewayStatus) -> Result<()> {
        let Some(row) = self.store.first::<T>(ctx, &[Filter::eq("name", name)]).await? else {
            return Ok(());
        };
        let settled = [GatewayStatus::Active, GatewayStatus::Inactive, GatewayStatus::Error];
        self.store
            .cas::<T>(row.id, json!({"status": status}), &[Filter::one_of("status", settled)])
            .await?;
        Ok(())
    }

    async fn restart_allowed(&self, h: &Helper) -> bool {
        let ignored = &self.config.auto_restart_ignore;
        if ignored.contains(&h.name) || ignored.contains(&h.service_name) {
            return false;
        }
        match self.store.sys_config::<bool>(&h.cluster_id, AUTO_RESTART_KEY).await {
            Ok(flag) => flag.unwrap_or(self.config.auto_restart),
            Err(e) => {
                warn!(cluster_id = %h.cluster_id, error = %e, "auto restart flag unreadable");
                self.config.auto_restart
            }
        }
    }

    async fn schedule_restart(self: &Arc<Self>, shared: &SharedHelper, h: &mut Helper) {
        if h.restart_in_flight() {
            return;
        }
        if !self.restart_allowed(h).await {
            info!(service = %h.name, node_id = h.node_id, "auto restart disabled");
            return;
        }
        let this = self.clone();
        let helper = shared.clone();
        let task = tokio::spawn(this.restart_loop(helper));
        h.restart = Some(task.abort_handle());
    }

    /// Boxed: the loop folds through [`Self::apply`], which spawns it.
    fn restart_loop(self: Arc<Self>, helper: SharedHelper) -> BoxFuture<'static, ()> {
        Box::pin(self.restart_with_retries(helper))
    }

    async fn restart_with_retries(self: Arc<Self>, helper: SharedHelper) {
        let (ctx, service_id, name) = {
            let mut h = helper.lock().await;
            if h.last_status != ServiceStatus::Inactive {
                return;
            }
            self.apply(&helper, &mut h, ServiceStatus::Starting).await;
            (h.ctx(), h.service_id, h.name.clone())
        };
        let service = match self.store.load::<Service>(service_id).await {
            Ok(service) => service,
            Err(e) => {
                error!(service = %name, error = %e, "service row unavailable for restart");
                return;
            }
        };

        let attempts = self.config.restart_attempts.max(1);
        for attempt in 1..=attempts {
            info!(service = %name, node_id = service.node_id, attempt, "restarting service");
            match self.restarter.restart(&ctx, &service).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(service = %name, attempt, error = %e, "service restart failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.restart_backoff).await;
                    }
                }
            }
        }

        error!(service = %name, attempts, "service restart gave up");
        let mut h = helper.lock().await;
        self.apply(&helper, &mut h, ServiceStatus::Error).await;
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            heartbeat_interval_secs = self.config.heartbeat_interval.as_secs(),
            max_interval_secs = self.config.max_interval.as_secs(),
            "Service supervisor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Service supervisor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.heartbeat_interval) => {
                    self.check_all().await;
                }
            }
        }

        info!("Service supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeRestarter, RecordingNotifier};
    use crate::models::AlertLog;
    use crate::store::SqliteStore;
    use ServiceStatus::*;

    #[test]
    fn test_fold_table() {
        assert_eq!(fold(Active, Active), Transition::Count);
        assert!(matches!(
            fold(Inactive, Active),
            Transition::Move { to: Active, alert: Some(AlertLevel::Info), .. }
        ));
        assert!(matches!(
            fold(Starting, Active),
            Transition::Move { to: Active, cancel_restart: true, .. }
        ));
        assert!(matches!(
            fold(Active, Inactive),
            Transition::Move { to: Inactive, alert: Some(AlertLevel::Warn), restart: true, .. }
        ));
        assert_eq!(fold(Inactive, Inactive), Transition::Stay);
        assert_eq!(fold(Starting, Inactive), Transition::Stay);
        assert_eq!(fold(Error, Inactive), Transition::Stay);
        assert_eq!(fold(Active, Starting), Transition::Stay);
        assert_eq!(fold(Inactive, Starting), Transition::to(Starting));
        assert!(matches!(
            fold(Active, Error),
            Transition::Move { to: Error, alert: Some(AlertLevel::Error), .. }
        ));
        assert_eq!(fold(Starting, Error), Transition::to(Error));
        assert_eq!(fold(Error, Error), Transition::Stay);
    }

    struct Fixture {
        store: Arc<dyn Store>,
        notifier: Arc<RecordingNotifier>,
        restarter: Arc<FakeRestarter>,
        supervisor: Arc<ServiceSupervisor>,
        node_id: i64,
    }

    async fn fixture(config: SupervisorConfig) -> Fixture {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        crate::alert::seed_default_rules(&store, "c1").await.unwrap();
        let node = store
            .create(
                "c1",
                &Node {
                    hostname: "n1".into(),
                    ip_address: "10.0.0.1".into(),
                    cluster_ip: "10.1.0.1".into(),
                    public_ip: "10.2.0.1".into(),
                    gateway_ip: None,
                    password: None,
                    ssh_user: "root".into(),
                    ssh_port: 22,
                    role_monitor: true,
                    role_storage: true,
                    role_admin: true,
                    role_object_gateway: false,
                    role_block_gateway: false,
                    rack_id: None,
                    datacenter_id: None,
                    object_gateway_ip_address: None,
                    status: NodeStatus::Active,
                },
            )
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let restarter = Arc::new(FakeRestarter::new());
        let supervisor = Arc::new(ServiceSupervisor::new(
            store.clone(),
            notifier.clone(),
            AlertEngine::new(store.clone(), None),
            restarter.clone(),
            config,
        ));
        Fixture {
            store,
            notifier,
            restarter,
            supervisor,
            node_id: node.id,
        }
    }

    fn heartbeat(node_id: i64, name: &str, status: ServiceStatus) -> ServiceUpdate {
        let mut update = ServiceUpdate::new();
        update.insert(
            ROLE_STORAGE.to_string(),
            vec![ServiceReport {
                name: name.to_string(),
                status,
                node_id,
                service_name: format!("{name}.service"),
                kind: ServiceKind::Systemd,
            }],
        );
        update
    }

    fn quick_restarts() -> SupervisorConfig {
        SupervisorConfig {
            restart_backoff: Duration::from_millis(10),
            ..SupervisorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_active_heartbeats_count() {
        let f = fixture(quick_restarts()).await;
        for _ in 0..3 {
            f.supervisor
                .service_update(heartbeat(f.node_id, "ceph-osd@1", Active), f.node_id)
                .await
                .unwrap();
        }
        let state = f.supervisor.state("c1", f.node_id, "ceph-osd@1").await.unwrap();
        assert_eq!(state.counter, 3);
        let row = f.store.load::<Service>(state.service_id).await.unwrap();
        assert_eq!(row.counter, 3);
        assert_eq!(row.role, ROLE_STORAGE);
        assert!(f.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_base_service_is_ignored() {
        let f = fixture(quick_restarts()).await;
        let mut update = ServiceUpdate::new();
        update.insert(
            "base".to_string(),
            vec![ServiceReport {
                name: "chronyd".into(),
                status: Active,
                node_id: f.node_id,
                service_name: "chronyd".into(),
                kind: ServiceKind::Systemd,
            }],
        );
        f.supervisor.service_update(update, f.node_id).await.unwrap();
        assert!(f.supervisor.state("c1", f.node_id, "chronyd").await.is_none());
    }

    #[tokio::test]
    async fn test_inactive_heartbeats_restart_once() {
        let f = fixture(quick_restarts()).await;
        f.supervisor
            .service_update(heartbeat(f.node_id, "ceph-osd@1", Active), f.node_id)
            .await
            .unwrap();
        for _ in 0..3 {
            f.supervisor
                .service_update(heartbeat(f.node_id, "ceph-osd@1", Inactive), f.node_id)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(f.notifier.count("SERVICE_INACTIVE"), 1);
        assert_eq!(f.notifier.count("SERVICE_STARTING"), 1);
        assert_eq!(f.restarter.restarts(), vec!["ceph-osd@1"]);

        f.supervisor
            .service_update(heartbeat(f.node_id, "ceph-osd@1", Active), f.node_id)
            .await
            .unwrap();
        let state = f.supervisor.state("c1", f.node_id, "ceph-osd@1").await.unwrap();
        assert_eq!(state.status, Active);
        assert!(!state.restarting);

        let ctx = RequestContext::admin("c1");
        let alerts = f.store.all::<AlertLog>(&ctx, &[]).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warn);
    }

    #[tokio::test]
    async fn test_failed_restarts_end_in_error() {
        let f = fixture(quick_restarts()).await;
        f.restarter.set_failing(true);
        f.supervisor
            .service_update(heartbeat(f.node_id, "ceph-osd@1", Active), f.node_id)
            .await
            .unwrap();
        f.supervisor
            .service_update(heartbeat(f.node_id, "ceph-osd@1", Inactive), f.node_id)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(f.restarter.restarts().len(), 3);
        let state = f.supervisor.state("c1", f.node_id, "ceph-osd@1").await.unwrap();
        assert_eq!(state.status, Error);
        assert_eq!(f.notifier.count("SERVICE_ERROR"), 1);
    }

    #[tokio::test]
    async fn test_restart_respects_cluster_flag_and_ignore_list() {
        let f = fixture(SupervisorConfig {
            auto_restart_ignore: vec!["ceph-mon@n1".into()],
            ..quick_restarts()
        })
        .await;
        f.store
            .sys_config_set("c1", AUTO_RESTART_KEY, &json!(false))
            .await
            .unwrap();
        for name in ["ceph-osd@1", "ceph-mon@n1"] {
            f.supervisor
                .service_update(heartbeat(f.node_id, name, Active), f.node_id)
                .await
                .unwrap();
            f.supervisor
                .service_update(heartbeat(f.node_id, name, Inactive), f.node_id)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.restarter.restarts().is_empty());
        assert_eq!(f.notifier.count("SERVICE_INACTIVE"), 2);

        // with the flag back on only the ignored service stays down
        f.store
            .sys_config_set("c1", AUTO_RESTART_KEY, &json!(true))
            .await
            .unwrap();
        for name in ["ceph-osd@1", "ceph-mon@n1"] {
            f.supervisor
                .service_update(heartbeat(f.node_id, name, Active), f.node_id)
                .await
                .unwrap();
            f.supervisor
                .service_update(heartbeat(f.node_id, name, Inactive), f.node_id)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.restarter.restarts(), vec!["ceph-osd@1"]);
        let mon = f.supervisor.state("c1", f.node_id, "ceph-mon@n1").await.unwrap();
        assert_eq!(mon.status, Inactive);
        assert!(!mon.restarting);
    }

    #[tokio::test]
    async fn test_agent_timeout_marks_inactive() {
        let f = fixture(SupervisorConfig {
            max_interval: Duration::from_millis(20),
            ..quick_restarts()
        })
        .await;
        f.store
            .create(
                "c1",
                &Service {
                    name: DSA_SERVICE.into(),
                    node_id: f.node_id,
                    role: "base".into(),
                    service_name: "dspace-agent".into(),
                    kind: ServiceKind::Container,
                    status: Active,
                    counter: 0,
                },
            )
            .await
            .unwrap();
        f.supervisor
            .service_update(heartbeat(f.node_id, "ceph-osd@1", Active), f.node_id)
            .await
            .unwrap();
        assert_eq!(f.supervisor.load().await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        f.supervisor.check_all().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let agent = f.supervisor.state("c1", f.node_id, DSA_SERVICE).await.unwrap();
        assert!(agent.is_timeout);
        assert_eq!(f.restarter.restarts(), vec![DSA_SERVICE]);
        // only the agent's silence is authoritative
        let osd = f.supervisor.state("c1", f.node_id, "ceph-osd@1").await.unwrap();
        assert!(osd.is_timeout);
        assert_eq!(osd.status, Active);
    }

    #[tokio::test]
    async fn test_deleted_node_drops_helper() {
        let f = fixture(quick_restarts()).await;
        f.supervisor
            .service_update(heartbeat(f.node_id, "ceph-osd@1", Active), f.node_id)
            .await
            .unwrap();
        f.store.remove::<Node>(f.node_id, json!({})).await.unwrap();
        f.supervisor.check_all().await;
        assert!(f.supervisor.state("c1", f.node_id, "ceph-osd@1").await.is_none());
    }
}
