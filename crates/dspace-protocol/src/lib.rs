// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DSpace Protocol - QUIC + JSON communication layer
//!
//! This crate provides the wire protocol between:
//! - the REST adapter and the admin service
//! - the admin service and every node agent (both directions)
//! - the admin service and the websocket notifier of each admin node
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    dspace-protocol                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Dispatch: method name -> typed handler, NoSuchMethod       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Envelope: context, method, args, kwargs, version           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: JSON (serde_json), tagged errors/objects    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn)                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dspace_protocol::{CallTimeout, RequestContext, RpcClient};
//!
//! let client = RpcClient::peer("10.0.0.5:2082".parse()?)?;
//! let ctx = RequestContext::admin("cluster-1");
//! let alive: bool = client
//!     .call(&ctx, "check_dsa_status", &serde_json::json!({}), CallTimeout::Default)
//!     .await?;
//! ```

pub mod api;
pub mod client;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod server;
pub mod tagged;

pub use client::{CallTimeout, ClientError, RpcClient, RpcClientConfig};
pub use context::{ANY_CLUSTER, ReadDeleted, RequestContext};
pub use dispatch::{Dispatcher, NoArgs};
pub use envelope::{PROTOCOL_VERSION, RpcRequest, RpcResponse};
pub use error::{ErrorGroup, Result, StorError, WireError};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use server::{ConnectionHandler, RpcServer, RpcServerConfig, ServerError, StreamHandler};
pub use tagged::{Tagged, TaggedObject, tag, untag};
