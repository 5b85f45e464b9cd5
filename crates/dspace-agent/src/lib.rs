// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DSpace Agent - per-node executor of the dspace control plane
//!
//! The agent runs on every node of the appliance. The admin dials it to
//! install and remove daemons, partition disks, manage iSCSI targets and
//! read logs; the agent in turn pushes the node's disk inventory, hotplug
//! events and service heartbeats to the admin.
//!
//! ```text
//!   dspace-admin ──── agent RPC (QUIC, port 2082) ────► dspace-agent
//!        ▲                                                 │
//!        └── disk_reporter, disk_online/offline, ──────────┘
//!            service_update, rpc_service_register
//! ```
//!
//! | Loop | Period | Does |
//! |------|--------|------|
//! | [`reporter::SetupReporter`] | once, retried | endpoint registration, disk inventory |
//! | [`cron::Cron`] | `DSPACE_CRON_INTERVAL` | service heartbeat, hotplug scan |

pub mod admin_client;
pub mod config;
pub mod cron;
pub mod handlers;
pub mod mock;
pub mod reporter;
pub mod runtime;
pub mod server;

pub use admin_client::{AdminApi, RpcAdminClient};
pub use config::Config;
pub use handlers::{AgentState, AgentTools};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder};
