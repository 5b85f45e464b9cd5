// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Narrow async interfaces over the host tools the control plane drives.
//!
//! Each tool is a trait with a production implementation that shells out
//! through an [`Executor`] (locally or over SSH) and an in-memory fake in
//! [`mock`]. Tool failures are [`ToolError`]s and convert into the
//! downstream kinds of [`dspace_protocol::StorError`].

pub mod ceph;
pub mod disk;
pub mod error;
pub mod executor;
pub mod iscsi;
pub mod metrics;
pub mod mock;
pub mod net;
pub mod package;
pub mod radosgw;
pub mod service;

pub use ceph::{BucketType, CephCli, CephTool, CrushBucket, CrushContent, CrushOsd, FaultDomain, PoolSpec, PoolType, RuleInfo};
pub use disk::{DiskProbe, LsblkProbe};
pub use error::{Result, ToolError, ToolKind};
pub use executor::{CommandOutput, Executor, LocalExecutor, SshExecutor};
pub use iscsi::{IscsiTool, Lio};
pub use metrics::{MetricSource, PgStateSummary, PoolHealth, PrometheusSource};
pub use package::{PackageManager, Yum};
pub use radosgw::{RadosgwAdmin, RadosgwAdminCli};
pub use service::{ContainerRuntime, ContainerSpec, Docker, ServiceControl, Systemctl, UnitStatus};
