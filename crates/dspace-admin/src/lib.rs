// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DSpace Admin - central control plane of a Ceph storage appliance
//!
//! The admin owns the resource store and drives every change to the
//! cluster. Operators call it over the RPC fabric; node agents call it with
//! disk inventories, hotplug events and service heartbeats.
//!
//! # Architecture
//!
//! ```text
//!        operator UI / REST adapter                 UI websocket clients
//!                    │                                       ▲
//!                    │ admin RPC (QUIC, port 2080)           │ /ws (port 2081)
//!                    ▼                                       │
//! ┌───────────────────────────────────────┐        ┌──────────────────┐
//! │              dspace-admin             │ events │  websocket hub   │
//! │  handlers ─ task pool ─ action log    │───────►│  send_message    │
//! │  supervisor ─ health ─ alert engine   │        │  (port 2083)     │
//! └───────────────────────────────────────┘        └──────────────────┘
//!          │                 │
//!          │ store (SQLite)  │ agent RPC (QUIC, port 2082)
//!          ▼                 ▼
//!   resources, sys config   dspace-agent on every node
//! ```
//!
//! # Mutating methods
//!
//! | Step | Where |
//! |------|-------|
//! | validate input and preconditions | handler |
//! | open an action log row | [`action_log::ActionLogger::begin`] |
//! | move the resource to a transitional status | [`store::Store::conditional_update`] |
//! | hand the slow part to the bounded pool | [`tasks::TaskPool::submit`] |
//! | close the action, announce the outcome | `handlers::complete` |
//!
//! The caller receives the transitional resource immediately.

pub mod action_log;
pub mod agent_client;
pub mod alert;
pub mod config;
pub mod crush;
pub mod handlers;
pub mod health;
pub mod locks;
pub mod mock;
pub mod models;
pub mod notify;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod store;
pub mod supervisor;
pub mod tasks;
pub mod websocket;

pub use config::Config;
pub use handlers::AdminState;
pub use runtime::{AdminRuntime, AdminRuntimeBuilder};
