// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic heartbeat and hotplug scan.
//!
//! Each tick asks the admin what this node runs, observes every listed
//! daemon concurrently and pushes the result as one `service_update`, then
//! re-probes the block devices and reports disks that came or went since
//! the last tick. Nothing a tick does can stop the loop.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dspace_protocol::Result;
use dspace_protocol::api::{DiskInfo, ServiceReport, ServiceUpdate};
use futures::future::join_all;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::handlers::AgentState;
use crate::handlers::service::observe;

/// A disk that appeared or vanished between two probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Online(DiskInfo),
    Offline(DiskInfo),
}

/// Last disk set the admin was told about, keyed by [`DiskInfo::identity`].
///
/// Empty until the setup reporter seeds it with the full inventory, so no
/// events are produced for disks the admin has never seen in a report.
#[derive(Default)]
pub struct Hotplug {
    known: Mutex<Option<BTreeMap<String, DiskInfo>>>,
}

impl Hotplug {
    pub fn new() -> Self {
        Self::default()
    }

    fn known(&self) -> MutexGuard<'_, Option<BTreeMap<String, DiskInfo>>> {
        self.known.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn seed(&self, disks: &[DiskInfo]) {
        let map = disks.iter().map(|d| (d.identity().to_string(), d.clone())).collect();
        *self.known() = Some(map);
    }

    pub fn is_seeded(&self) -> bool {
        self.known().is_some()
    }

    /// Events that take the known set to `current`.
    pub fn diff(&self, current: &[DiskInfo]) -> Vec<HotplugEvent> {
        let known = self.known();
        let Some(known) = known.as_ref() else {
            return Vec::new();
        };
        let mut events: Vec<HotplugEvent> = current
            .iter()
            .filter(|d| !known.contains_key(d.identity()))
            .cloned()
            .map(HotplugEvent::Online)
            .collect();
        events.extend(
            known
                .iter()
                .filter(|(id, _)| !current.iter().any(|d| d.identity() == id.as_str()))
                .map(|(_, d)| HotplugEvent::Offline(d.clone())),
        );
        events
    }

    /// Record that the admin accepted `event`.
    pub fn confirm(&self, event: &HotplugEvent) {
        let mut known = self.known();
        let Some(known) = known.as_mut() else {
            return;
        };
        match event {
            HotplugEvent::Online(disk) => {
                known.insert(disk.identity().to_string(), disk.clone());
            }
            HotplugEvent::Offline(disk) => {
                known.remove(disk.identity());
            }
        }
    }
}

/// What one tick achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Services reported, `None` when the heartbeat did not reach the admin
    pub services: Option<usize>,
    pub online: usize,
    pub offline: usize,
    /// Hotplug events left for the next tick
    pub pending: usize,
}

pub struct Cron {
    state: Arc<AgentState>,
    hotplug: Arc<Hotplug>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl Cron {
    pub fn new(state: Arc<AgentState>, hotplug: Arc<Hotplug>) -> Self {
        let interval = state.config.cron_interval;
        Self {
            state,
            hotplug,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "Agent cron started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Agent cron received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {
                    let summary = self.tick().await;
                    debug!(?summary, "cron tick done");
                }
            }
        }
        info!("Agent cron stopped");
    }

    pub async fn tick(&self) -> TickSummary {
        let services = match self.report_services().await {
            Ok(n) => Some(n),
            Err(e) => {
                error!(error = %e, "service heartbeat failed");
                None
            }
        };
        let mut summary = TickSummary {
            services,
            ..Default::default()
        };
        if let Err(e) = self.scan_disks(&mut summary).await {
            error!(error = %e, "hotplug scan failed");
        }
        summary
    }

    /// Observe every daemon of the node manifest and push one heartbeat.
    pub async fn report_services(&self) -> Result<usize> {
        let ctx = self.state.ctx();
        let node_id = self.state.config.node_id;
        let manifest = self.state.admin.node_services_manifest(&ctx, node_id).await?;

        let statuses = join_all(manifest.services.iter().map(|s| observe(&self.state, s))).await;
        let mut update = ServiceUpdate::new();
        for (service, status) in manifest.services.iter().zip(statuses) {
            update.entry(service.role.clone()).or_default().push(ServiceReport {
                name: service.name.clone(),
                status,
                node_id,
                service_name: service.service_name.clone(),
                kind: service.kind,
            });
        }

        let count = manifest.services.len();
        self.state.admin.service_update(&ctx, &update, node_id).await?;
        debug!(services = count, roles = update.len(), "heartbeat sent");
        Ok(count)
    }

    async fn scan_disks(&self, summary: &mut TickSummary) -> Result<()> {
        if !self.hotplug.is_seeded() {
            debug!("disk inventory not reported yet, hotplug scan skipped");
            return Ok(());
        }
        let disks = self.state.tools.disks.probe().await?;
        let ctx = self.state.ctx();
        let node_id = self.state.config.node_id;

        for event in self.hotplug.diff(&disks) {
            let sent = match &event {
                HotplugEvent::Online(disk) => self.state.admin.disk_online(&ctx, disk, node_id).await,
                HotplugEvent::Offline(disk) => self.state.admin.disk_offline(&ctx, &disk.name, node_id).await,
            };
            match sent {
                Ok(()) => {
                    match &event {
                        HotplugEvent::Online(disk) => {
                            info!(disk = %disk.name, id = %disk.identity(), "disk online");
                            summary.online += 1;
                        }
                        HotplugEvent::Offline(disk) => {
                            info!(disk = %disk.name, id = %disk.identity(), "disk offline");
                            summary.offline += 1;
                        }
                    }
                    self.hotplug.confirm(&event);
                }
                Err(e) => {
                    warn!(?event, error = %e, "hotplug event not delivered, retrying next tick");
                    summary.pending += 1;
                }
            }
        }
        Ok(())
    }
}
