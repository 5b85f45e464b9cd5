// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC client for calling admin, agent and websocket peers.
//!
//! The client never retries. A call either returns the peer's result, the
//! peer's typed error, or a transport error mapped into [`StorError`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, TransportConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::context::RequestContext;
use crate::envelope::{RpcRequest, RpcResponse};
use crate::error::StorError;
use crate::frame::{Frame, FrameError, read_frame, write_frame};

/// Errors that can occur in the QUIC client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("write error: {0}")]
    Write(#[from] quinn::WriteError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed: {0}")]
    ClosedStream(#[from] quinn::ClosedStream),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("no connection established")]
    NotConnected,

    #[error("connection to {0} timed out")]
    ConnectTimeout(SocketAddr),

    #[error("call {method} timed out after {elapsed_ms}ms")]
    CallTimeout { method: String, elapsed_ms: u64 },
}

impl From<ClientError> for StorError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ConnectTimeout(addr) => StorError::ConnectTimeout {
                addr: addr.to_string(),
            },
            ClientError::CallTimeout { method, elapsed_ms } => StorError::CommandTimeout {
                command: method,
                seconds: elapsed_ms / 1000,
            },
            other => StorError::RpcTransport {
                reason: other.to_string(),
            },
        }
    }
}

/// Configuration for the QUIC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Peer address to connect to
    pub server_addr: SocketAddr,
    /// Server name for TLS verification
    pub server_name: String,
    /// Skip certificate verification. Intra-cluster peers use self-signed certificates.
    pub dangerous_skip_cert_verification: bool,
    /// Keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Timeout applied by [`RpcClient::call`] when the caller does not pick one
    pub default_call_timeout_ms: u64,
}

impl RpcClientConfig {
    pub fn for_peer(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            server_name: "localhost".to_string(),
            dangerous_skip_cert_verification: true,
            keep_alive_interval_ms: 10_000,
            idle_timeout_ms: 600_000,
            connect_timeout_ms: 5_000,
            default_call_timeout_ms: 5_000,
        }
    }
}

/// How long a call may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTimeout {
    /// The client's configured short-call timeout
    Default,
    /// A specific timeout
    After(Duration),
    /// No timeout, for install and uninstall tasks
    Unbounded,
}

pub struct RpcClient {
    endpoint: Endpoint,
    connection: Mutex<Option<Connection>>,
    config: RpcClientConfig,
}

impl RpcClient {
    /// Create a new client with the given configuration
    pub fn new(config: RpcClientConfig) -> Result<Self, ClientError> {
        let bind: SocketAddr = if config.server_addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };
        let mut endpoint = Endpoint::client(bind)?;

        let client_config = Self::build_client_config(&config)?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            connection: Mutex::new(None),
            config,
        })
    }

    pub fn peer(server_addr: SocketAddr) -> Result<Self, ClientError> {
        Self::new(RpcClientConfig::for_peer(server_addr))
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    fn build_client_config(config: &RpcClientConfig) -> Result<ClientConfig, ClientError> {
        let crypto = if config.dangerous_skip_cert_verification {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        let mut transport = TransportConfig::default();
        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }
        let idle = Duration::from_millis(config.idle_timeout_ms)
            .try_into()
            .map_err(|_| ClientError::Tls("idle timeout out of range".to_string()))?;
        transport.max_idle_timeout(Some(idle));

        let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ClientError::Tls(e.to_string()))?;
        let mut client_config = ClientConfig::new(Arc::new(quic));
        client_config.transport_config(Arc::new(transport));

        Ok(client_config)
    }

    /// Connect to the peer, reusing a live connection
    #[instrument(skip(self), fields(addr = %self.config.server_addr))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut conn_guard = self.connection.lock().await;

        if let Some(ref conn) = *conn_guard
            && conn.close_reason().is_none()
        {
            debug!("reusing existing connection");
            return Ok(());
        }

        info!("connecting to peer");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connecting = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)?;

        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| ClientError::ConnectTimeout(self.config.server_addr))??;

        *conn_guard = Some(connection);
        Ok(())
    }

    async fn get_connection(&self) -> Result<Connection, ClientError> {
        self.connect().await?;
        let conn_guard = self.connection.lock().await;
        conn_guard.clone().ok_or(ClientError::NotConnected)
    }

    /// Send one envelope and wait for the response envelope
    pub async fn request(&self, request: &RpcRequest) -> Result<RpcResponse, ClientError> {
        let conn = self.get_connection().await?;
        let (mut send, mut recv) = conn.open_bi().await?;

        let frame = Frame::request(request)?;
        write_frame(&mut send, &frame).await?;
        send.finish()?;

        let response_frame = read_frame(&mut recv).await?;
        Ok(response_frame.decode()?)
    }

    /// Call `method` and decode its result.
    #[instrument(skip(self, ctx, params), fields(request_id = %ctx.request_id))]
    pub async fn call<P, T>(
        &self,
        ctx: &RequestContext,
        method: &str,
        params: &P,
        timeout: CallTimeout,
    ) -> Result<T, StorError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = RpcRequest::with_params(ctx, method, &params)?;
        let value = self.call_raw(request, timeout).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn call_raw(
        &self,
        request: RpcRequest,
        timeout: CallTimeout,
    ) -> Result<Value, StorError> {
        let limit = match timeout {
            CallTimeout::Default => Some(Duration::from_millis(self.config.default_call_timeout_ms)),
            CallTimeout::After(d) => Some(d),
            CallTimeout::Unbounded => None,
        };
        let response = match limit {
            Some(limit) => tokio::time::timeout(limit, self.request(&request))
                .await
                .map_err(|_| ClientError::CallTimeout {
                    method: request.method.clone(),
                    elapsed_ms: limit.as_millis() as u64,
                })??,
            None => self.request(&request).await?,
        };
        response.into_result()
    }

    /// Future-returning variant: the call runs on its own task.
    pub fn spawn_call<P: Serialize + ?Sized>(
        self: &Arc<Self>,
        ctx: &RequestContext,
        method: &str,
        params: &P,
        timeout: CallTimeout,
    ) -> JoinHandle<Result<Value, StorError>> {
        let client = self.clone();
        let request = RpcRequest::with_params(ctx, method, &params);
        tokio::spawn(async move { client.call_raw(request?, timeout).await })
    }

    /// Fire-and-forget: failures are logged and dropped.
    pub fn cast<P: Serialize + ?Sized>(self: &Arc<Self>, ctx: &RequestContext, method: &str, params: &P) {
        let method_name = method.to_string();
        let addr = self.config.server_addr;
        let handle = self.spawn_call(ctx, method, params, CallTimeout::Default);
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(method = %method_name, %addr, error = %e, "cast failed"),
                Err(e) => warn!(method = %method_name, %addr, error = %e, "cast task aborted"),
            }
        });
    }

    /// Close the connection gracefully
    pub async fn close(&self) {
        let mut conn_guard = self.connection.lock().await;
        if let Some(conn) = conn_guard.take() {
            conn.close(0u32.into(), b"client closing");
        }
    }

    pub async fn is_connected(&self) -> bool {
        let conn_guard = self.connection.lock().await;
        conn_guard
            .as_ref()
            .is_some_and(|conn| conn.close_reason().is_none())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.connection.try_lock()
            && let Some(conn) = guard.take()
        {
            conn.close(0u32.into(), b"client dropped");
        }
    }
}

/// Certificate verifier for self-signed intra-cluster certificates
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_config_defaults() {
        let config = RpcClientConfig::for_peer("10.0.0.5:2082".parse().unwrap());
        assert_eq!(config.server_name, "localhost");
        assert!(config.dangerous_skip_cert_verification);
        assert_eq!(config.connect_timeout_ms, 5_000);
        assert_eq!(config.default_call_timeout_ms, 5_000);
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = RpcClient::peer("127.0.0.1:2082".parse().unwrap());
        assert!(client.is_ok(), "failed to create client: {:?}", client.err());
        assert!(!client.unwrap().is_connected().await);
    }

    #[test]
    fn test_timeouts_map_to_typed_errors() {
        let addr: SocketAddr = "10.0.0.5:2082".parse().unwrap();
        assert_eq!(
            StorError::from(ClientError::ConnectTimeout(addr)),
            StorError::ConnectTimeout {
                addr: "10.0.0.5:2082".into()
            }
        );
        assert!(matches!(
            StorError::from(ClientError::CallTimeout {
                method: "ceph_osd_install".into(),
                elapsed_ms: 5_000
            }),
            StorError::CommandTimeout { seconds: 5, .. }
        ));
        assert!(matches!(
            StorError::from(ClientError::NotConnected),
            StorError::RpcTransport { .. }
        ));
    }
}
