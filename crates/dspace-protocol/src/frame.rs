// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for QUIC stream framing.
//!
//! Each QUIC stream carries one RPC call with the following frame format:
//! - 4 bytes: payload length (big-endian)
//! - 2 bytes: message type
//! - N bytes: JSON payload

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (64 MB). Log chunks and crush maps stay far below it.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Frame header size (4 bytes length + 2 bytes type)
pub const HEADER_SIZE: usize = 6;

/// Message types for the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Request envelope
    Request = 1,
    /// Response envelope (success or typed error)
    Response = 2,
    /// Start of a streamed log transfer
    StreamStart = 3,
    /// Data chunk of a streamed log transfer
    StreamData = 4,
    /// End of a streamed log transfer
    StreamEnd = 5,
    /// Transport-level failure, payload is a plain message
    Error = 6,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::StreamStart),
            4 => Ok(MessageType::StreamData),
            5 => Ok(MessageType::StreamEnd),
            6 => Ok(MessageType::Error),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected message type {0:?}")]
    Unexpected(MessageType),

    #[error("peer reported failure: {0}")]
    Remote(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A framed message with type and payload
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new request frame
    pub fn request<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Request, msg)
    }

    /// Create a new response frame
    pub fn response<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Response, msg)
    }

    /// Create a transport error frame carrying a plain message
    pub fn error(message: &str) -> Self {
        Self {
            message_type: MessageType::Error,
            payload: Bytes::copy_from_slice(message.as_bytes()),
        }
    }

    /// Create a new frame with the given type and message
    pub fn new<M: Serialize>(message_type: MessageType, msg: &M) -> Result<Self, FrameError> {
        let payload = serde_json::to_vec(msg)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type,
            payload: Bytes::from(payload),
        })
    }

    /// Decode the payload as a JSON message
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, FrameError> {
        match self.message_type {
            MessageType::Error => Err(FrameError::Remote(
                String::from_utf8_lossy(&self.payload).into_owned(),
            )),
            _ => Ok(serde_json::from_slice(&self.payload)?),
        }
    }

    /// Encode the frame to bytes for wire transmission
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.message_type as u16);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decode a frame from bytes
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame header",
            )));
        }

        let length = bytes.get_u32() as usize;
        let message_type = MessageType::try_from(bytes.get_u16())?;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }

        if bytes.len() < length {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame payload",
            )));
        }

        let payload = bytes.split_to(length);
        Ok(Self {
            message_type,
            payload,
        })
    }
}

/// Write a frame to an async writer
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode();
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Read a frame from an async reader
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let message_type = MessageType::try_from(u16::from_be_bytes([header[4], header[5]]))?;

    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        message_type,
        payload: Bytes::from(payload),
    })
}

/// Framed codec for encoding/decoding frames on a stream
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Read the next frame from the stream
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.stream).await
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    /// Write a frame to the stream
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        write_frame(&mut self.stream, frame).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Send a request and wait for a response
    pub async fn request<Req: Serialize, Resp: DeserializeOwned>(
        &mut self,
        request: &Req,
    ) -> Result<Resp, FrameError> {
        let frame = Frame::request(request)?;
        self.write_frame(&frame).await?;

        let response_frame = self.read_frame().await?;
        match response_frame.message_type {
            MessageType::Response | MessageType::Error => response_frame.decode(),
            other => Err(FrameError::Unexpected(other)),
        }
    }

    /// Send a response
    pub async fn respond<Resp: Serialize>(&mut self, response: &Resp) -> Result<(), FrameError> {
        let frame = Frame::response(response)?;
        self.write_frame(&frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        ip: String,
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::Request as u16, 1);
        assert_eq!(MessageType::Response as u16, 2);
        assert_eq!(MessageType::StreamStart as u16, 3);
        assert_eq!(MessageType::StreamData as u16, 4);
        assert_eq!(MessageType::StreamEnd as u16, 5);
        assert_eq!(MessageType::Error as u16, 6);
    }

    #[test]
    fn test_invalid_message_type() {
        assert!(matches!(
            MessageType::try_from(42u16),
            Err(FrameError::InvalidMessageType(42))
        ));
    }

    #[test]
    fn test_frame_encode_decode() {
        let msg = Ping {
            ip: "10.0.0.1".to_string(),
        };
        let frame = Frame::request(&msg).unwrap();
        let encoded = frame.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + frame.payload.len());

        let decoded = Frame::decode_from_bytes(encoded).unwrap();
        assert_eq!(decoded.message_type, MessageType::Request);
        assert_eq!(decoded.decode::<Ping>().unwrap(), msg);
    }

    #[test]
    fn test_decode_truncated_header() {
        let result = Frame::decode_from_bytes(Bytes::from_static(&[0, 0, 1]));
        assert!(matches!(result, Err(FrameError::Io(_))));
    }

    #[test]
    fn test_decode_oversized_length() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.put_u16(1);
        let result = Frame::decode_from_bytes(buf.freeze());
        assert!(matches!(result, Err(FrameError::FrameTooLarge(_))));
    }

    #[test]
    fn test_error_frame_decodes_to_remote() {
        let frame = Frame::error("boom");
        let err = frame.decode::<Ping>().unwrap_err();
        assert!(matches!(err, FrameError::Remote(ref m) if m == "boom"));
    }

    #[tokio::test]
    async fn test_read_write_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = FramedStream::new(client);
        let mut server = FramedStream::new(server);

        let echo = tokio::spawn(async move {
            let frame = server.read_frame().await.unwrap();
            let ping: Ping = frame.decode().unwrap();
            server.respond(&ping).await.unwrap();
        });

        let reply: Ping = client
            .request(&Ping {
                ip: "192.168.1.9".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(reply.ip, "192.168.1.9");
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_on_closed_stream() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut server = FramedStream::new(server);
        assert!(matches!(
            server.read_frame().await,
            Err(FrameError::ConnectionClosed)
        ));
    }
}
