// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Alert rules, groups and the alert log.

use dspace_protocol::{RequestContext, Result, StorError};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use super::{AdminState, conclude};
use crate::action_log::ActionTarget;
use crate::models::{AlertGroup, AlertLevel, AlertLog, AlertRule, EmailGroup};
use crate::store::{Filter, Record};

#[derive(Debug, Clone, Deserialize)]
pub struct AlertRuleUpdateRequest {
    pub rule_id: i64,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub level: Option<AlertLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertGroupCreateRequest {
    pub name: String,
    #[serde(default)]
    pub alert_rule_ids: Vec<i64>,
    #[serde(default)]
    pub email_group_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailGroupCreateRequest {
    pub name: String,
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertLogListRequest {
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub level: Option<AlertLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertLogMarkReadRequest {
    pub alert_log_ids: Vec<i64>,
}

pub async fn handle_alert_rule_update(
    state: &AdminState,
    ctx: &RequestContext,
    req: AlertRuleUpdateRequest,
) -> Result<Record<AlertRule>> {
    let rule = state.store.fetch::<AlertRule>(ctx, req.rule_id).await?;
    let mut values = Map::new();
    if let Some(enabled) = req.enabled {
        values.insert("enabled".into(), Value::Bool(enabled));
    }
    if let Some(level) = req.level {
        values.insert("level".into(), serde_json::to_value(level)?);
    }
    if values.is_empty() {
        return Err(StorError::invalid("nothing to update"));
    }
    let action_id = state
        .actions
        .begin(
            ctx,
            "update",
            ActionTarget::new("alert_rule")
                .id(rule.id)
                .name(rule.rule_type.clone())
                .before(rule.to_value()?),
        )
        .await?;
    let outcome = state.store.patch::<AlertRule>(rule.id, Value::Object(values)).await;
    conclude(state, action_id, outcome).await
}

pub async fn handle_alert_group_create(
    state: &AdminState,
    ctx: &RequestContext,
    req: AlertGroupCreateRequest,
) -> Result<Record<AlertGroup>> {
    if state
        .store
        .first::<AlertGroup>(ctx, &[Filter::eq("name", &req.name)])
        .await?
        .is_some()
    {
        return Err(StorError::NameDuplicate {
            resource: "alert_group".to_string(),
            name: req.name,
        });
    }
    for id in &req.alert_rule_ids {
        state.store.fetch::<AlertRule>(ctx, *id).await?;
    }
    for id in &req.email_group_ids {
        state.store.fetch::<EmailGroup>(ctx, *id).await?;
    }
    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("alert_group").name(req.name.clone()))
        .await?;
    let outcome = state
        .store
        .create(
            &ctx.cluster_id,
            &AlertGroup {
                name: req.name,
                alert_rule_ids: req.alert_rule_ids,
                email_group_ids: req.email_group_ids,
            },
        )
        .await;
    if let Ok(group) = &outcome {
        state.actions.attach(action_id, group.id).await?;
    }
    conclude(state, action_id, outcome).await
}

pub async fn handle_email_group_create(
    state: &AdminState,
    ctx: &RequestContext,
    req: EmailGroupCreateRequest,
) -> Result<Record<EmailGroup>> {
    if req.emails.is_empty() {
        return Err(StorError::invalid("email group needs at least one address"));
    }
    for email in &req.emails {
        email
            .parse::<lettre::Address>()
            .map_err(|e| StorError::invalid(format!("{email}: {e}")))?;
    }
    if state
        .store
        .first::<EmailGroup>(ctx, &[Filter::eq("name", &req.name)])
        .await?
        .is_some()
    {
        return Err(StorError::NameDuplicate {
            resource: "email_group".to_string(),
            name: req.name,
        });
    }
    let action_id = state
        .actions
        .begin(ctx, "create", ActionTarget::new("email_group").name(req.name.clone()))
        .await?;
    let outcome = state
        .store
        .create(
            &ctx.cluster_id,
            &EmailGroup {
                name: req.name,
                emails: req.emails,
            },
        )
        .await;
    if let Ok(group) = &outcome {
        state.actions.attach(action_id, group.id).await?;
    }
    conclude(state, action_id, outcome).await
}

pub async fn handle_alert_log_list(
    state: &AdminState,
    ctx: &RequestContext,
    req: AlertLogListRequest,
) -> Result<Vec<Record<AlertLog>>> {
    let mut filters = Vec::new();
    if let Some(read) = req.read {
        filters.push(Filter::eq("read", read));
    }
    if let Some(level) = req.level {
        filters.push(Filter::eq("level", level));
    }
    let mut rows = state.store.all::<AlertLog>(ctx, &filters).await?;
    rows.reverse();
    Ok(rows)
}

/// Returns how many rows flipped to read.
pub async fn handle_alert_log_mark_read(
    state: &AdminState,
    ctx: &RequestContext,
    req: AlertLogMarkReadRequest,
) -> Result<usize> {
    let mut marked = 0;
    for id in req.alert_log_ids {
        state.store.fetch::<AlertLog>(ctx, id).await?;
        if state
            .store
            .cas::<AlertLog>(id, json!({"read": true}), &[Filter::eq("read", false)])
            .await?
        {
            marked += 1;
        }
    }
    info!(marked, "alert logs marked read");
    Ok(marked)
}
