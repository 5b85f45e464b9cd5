// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Alert engine.
//!
//! An event whose type matches an enabled [`AlertRule`] becomes an
//! [`AlertLog`] row, and the row is mailed to every email group reachable
//! through the alert groups that contain the rule. Mail is sent once; a
//! failure leaves the row in `email_failed`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dspace_protocol::{RequestContext, Result, StorError};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::SmtpConfig;
use crate::models::{AlertGroup, AlertLevel, AlertLog, AlertLogStatus, AlertRule, EmailGroup};
use crate::store::{Filter, Record, Store};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()>;
}

/// SMTP relay mailer.
pub struct LettreMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

fn mail_error(e: impl std::fmt::Display) -> StorError {
    StorError::CommandFailed {
        reason: format!("smtp: {e}"),
    }
}

impl LettreMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| StorError::invalid(format!("sender {}: {e}", config.from)))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for LettreMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
        let mut message = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for address in to {
            message = message.to(address.parse::<Mailbox>().map_err(mail_error)?);
        }
        let message = message.body(body.to_string()).map_err(mail_error)?;
        self.transport.send(message).await.map_err(mail_error)?;
        Ok(())
    }
}

/// An event offered to the alert engine.
#[derive(Debug, Clone)]
pub struct Alert {
    pub rule_type: String,
    pub resource_type: String,
    pub resource_id: Option<i64>,
    pub resource_name: Option<String>,
    pub value: String,
    /// Overrides the rule's level
    pub level: Option<AlertLevel>,
}

impl Alert {
    pub fn new(rule_type: &str, resource_type: &str, value: impl Into<String>) -> Self {
        Self {
            rule_type: rule_type.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: None,
            resource_name: None,
            value: value.into(),
            level: None,
        }
    }

    pub fn resource(mut self, id: i64, name: impl Into<String>) -> Self {
        self.resource_id = Some(id);
        self.resource_name = Some(name.into());
        self
    }

    pub fn level(mut self, level: AlertLevel) -> Self {
        self.level = Some(level);
        self
    }
}

/// Rules every cluster starts with.
pub fn default_rules() -> Vec<AlertRule> {
    [
        ("disk_offline", "disk", AlertLevel::Error),
        ("disk_online", "disk", AlertLevel::Info),
        ("service_status", "service", AlertLevel::Warn),
    ]
    .into_iter()
    .map(|(rule_type, resource_type, level)| AlertRule {
        rule_type: rule_type.to_string(),
        resource_type: resource_type.to_string(),
        level,
        enabled: true,
    })
    .collect()
}

/// Insert the default rules the cluster does not have yet.
pub async fn seed_default_rules(store: &Arc<dyn Store>, cluster_id: &str) -> Result<usize> {
    let ctx = RequestContext::admin(cluster_id);
    let mut created = 0;
    for rule in default_rules() {
        let exists = store
            .first::<AlertRule>(&ctx, &[Filter::eq("type", &rule.rule_type)])
            .await?
            .is_some();
        if !exists {
            store.create(cluster_id, &rule).await?;
            created += 1;
        }
    }
    if created > 0 {
        info!(cluster_id, created, "default alert rules seeded");
    }
    Ok(created)
}

#[derive(Clone)]
pub struct AlertEngine {
    store: Arc<dyn Store>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn Store>, mailer: Option<Arc<dyn Mailer>>) -> Self {
        Self { store, mailer }
    }

    async fn recipients(&self, ctx: &RequestContext, rule_id: i64) -> Result<Vec<String>> {
        let groups = self.store.all::<AlertGroup>(ctx, &[]).await?;
        let mut emails = BTreeSet::new();
        for group in groups.iter().filter(|g| g.alert_rule_ids.contains(&rule_id)) {
            for email_group_id in &group.email_group_ids {
                match self.store.find::<EmailGroup>(*email_group_id).await? {
                    Some(eg) => emails.extend(eg.inner.emails),
                    None => warn!(email_group_id, "alert group references a missing email group"),
                }
            }
        }
        Ok(emails.into_iter().collect())
    }

    /// Record `alert` if an enabled rule of its type exists; `None` otherwise.
    pub async fn emit(&self, ctx: &RequestContext, alert: Alert) -> Result<Option<Record<AlertLog>>> {
        let Some(rule) = self
            .store
            .first::<AlertRule>(ctx, &[Filter::eq("type", &alert.rule_type)])
            .await?
        else {
            debug!(rule_type = %alert.rule_type, "no alert rule");
            return Ok(None);
        };
        if !rule.enabled {
            debug!(rule_type = %alert.rule_type, "alert rule disabled");
            return Ok(None);
        }

        let level = alert.level.unwrap_or(rule.level);
        let log = self
            .store
            .create(
                &ctx.cluster_id,
                &AlertLog {
                    rule_type: alert.rule_type.clone(),
                    resource_type: alert.resource_type.clone(),
                    resource_id: alert.resource_id,
                    resource_name: alert.resource_name.clone(),
                    level,
                    alert_value: alert.value.clone(),
                    status: AlertLogStatus::None,
                    read: false,
                },
            )
            .await?;
        info!(alert_id = log.id, rule_type = %alert.rule_type, ?level, "alert raised");

        let recipients = self.recipients(ctx, rule.id).await?;
        let Some(mailer) = self.mailer.as_ref().filter(|_| !recipients.is_empty()) else {
            return Ok(Some(log));
        };
        let subject = format!("[{level:?}] {} {}", alert.resource_type, alert.rule_type);
        let status = match mailer.send(&recipients, &subject, &alert.value).await {
            Ok(()) => AlertLogStatus::Sent,
            Err(e) => {
                error!(alert_id = log.id, error = %e, "alert mail failed");
                AlertLogStatus::EmailFailed
            }
        };
        let log = self.store.patch::<AlertLog>(log.id, json!({"status": status})).await?;
        Ok(Some(log))
    }
}

/// Deletes alert logs older than the retention window.
pub struct AlertLogCleaner {
    store: Arc<dyn Store>,
    retention: Duration,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
}

impl AlertLogCleaner {
    pub fn new(store: Arc<dyn Store>, retention_days: u32) -> Self {
        Self {
            store,
            retention: Duration::from_secs(u64::from(retention_days) * 24 * 3600),
            poll_interval: Duration::from_secs(3600),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn run(&self) {
        info!(retention_days = self.retention.as_secs() / 86400, "Alert log cleaner started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Alert log cleaner received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.poll_interval) => {
                    if let Err(e) = self.purge_expired().await {
                        error!(error = %e, "Failed to purge alert logs");
                    }
                }
            }
        }
        info!("Alert log cleaner stopped");
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let age = chrono::Duration::from_std(self.retention)
            .map_err(|e| StorError::invalid(format!("retention out of range: {e}")))?;
        let purged = self.store.purge_before("alert_log", Utc::now() - age).await?;
        if purged > 0 {
            info!(purged, "alert logs purged");
        }
        Ok(purged)
    }
}
