// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Websocket service of an admin node.
//!
//! UI clients connect on `/ws` and receive every event published through the
//! internal `send_message` RPC method. Slow clients skip events instead of
//! holding the others back.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use dspace_protocol::{Dispatcher, RequestContext, StorError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::notify::SendMessage;

/// What a UI client receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEvent {
    pub msg: String,
    pub cluster_id: String,
    pub refresh: bool,
    pub payload: Value,
    pub resource_type: Option<String>,
    pub operation_type: String,
}

pub struct WebSocketHub {
    tx: broadcast::Sender<String>,
}

impl WebSocketHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Push an event to every connected client; returns how many got it.
    pub fn publish(&self, ctx: &RequestContext, message: SendMessage) -> usize {
        let event = WsEvent {
            msg: message.msg,
            cluster_id: ctx.cluster_id.clone(),
            refresh: true,
            payload: message.obj,
            resource_type: message.resource_type,
            operation_type: message.op_type,
        };
        match serde_json::to_string(&event) {
            Ok(text) => self.tx.send(text).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "unserializable event dropped");
                0
            }
        }
    }

    /// Register `send_message` on the internal RPC dispatcher.
    pub fn register(self: &Arc<Self>, dispatcher: &mut Dispatcher) {
        let hub = self.clone();
        dispatcher.register_with_params(
            "send_message",
            &["obj", "op_type", "msg", "resource_type"],
            move |ctx: RequestContext, req: SendMessage| {
                let hub = hub.clone();
                async move {
                    let delivered = hub.publish(&ctx, req);
                    debug!(delivered, "event published");
                    Ok::<_, StorError>(delivered)
                }
            },
        );
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new().route("/ws", get(ws_handler)).with_state(self.clone())
    }

    /// Serve UI connections until `shutdown` flips.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "websocket service listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<WebSocketHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_loop(hub, socket))
}

async fn client_loop(hub: Arc<WebSocketHub>, mut socket: WebSocket) {
    let mut rx = hub.subscribe();
    debug!("ui client connected");
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ui client lagging, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("ui client disconnected");
}
