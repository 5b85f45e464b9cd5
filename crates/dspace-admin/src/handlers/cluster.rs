// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster lookups and the health roll-up.

use dspace_protocol::{RequestContext, Result, StorError};
use tracing::debug;

use super::AdminState;
use crate::health::ClusterHealth;
use crate::models::Cluster;
use crate::store::Record;

/// The cluster the context is scoped to.
pub(crate) async fn current_cluster(state: &AdminState, ctx: &RequestContext) -> Result<Record<Cluster>> {
    state
        .store
        .first::<Cluster>(ctx, &[])
        .await?
        .ok_or_else(|| StorError::ClusterNotFound {
            cluster_id: ctx.cluster_id.clone(),
        })
}

pub async fn handle_cluster_get(state: &AdminState, ctx: &RequestContext) -> Result<Record<Cluster>> {
    current_cluster(state, ctx).await
}

pub async fn handle_cluster_health(state: &AdminState, ctx: &RequestContext) -> Result<ClusterHealth> {
    current_cluster(state, ctx).await?;
    let health = state.health.cluster_health(ctx).await?;
    debug!(cluster_id = %ctx.cluster_id, ceph_health = %health.ceph_health, "cluster health computed");
    Ok(health)
}
