// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! HEL/ACK/ERR handshake messages and limit negotiation.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{ProtocolVersionRange, TransportLimits, MIN_BUFFER_SIZE};
use crate::encoding::{BinaryDecode, BinaryEncode};
use crate::error::{ChannelError, TransportError, UaError, UaResult};
use crate::status::StatusCode;
use crate::transport::chunk::{ChunkHeader, ChunkType, MessageType, MESSAGE_HEADER_LEN};

/// Protocol version spoken by this stack.
pub const PROTOCOL_VERSION: u32 = 0;

/// A version no server will ever speak; used to probe rejection.
pub const INCOMPATIBLE_PROTOCOL_VERSION: u32 = 0xDEAD_BEEF;

/// Longest endpoint URL accepted in HEL.
const MAX_ENDPOINT_URL_LEN: usize = 4096;

fn frame(message_type: MessageType, payload: BytesMut) -> Bytes {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LEN + payload.len());
    ChunkHeader {
        message_type,
        chunk_type: ChunkType::Final,
        message_size: (MESSAGE_HEADER_LEN + payload.len()) as u32,
        secure_channel_id: None,
    }
    .encode(&mut buf);
    buf.put_slice(&payload);
    buf.freeze()
}

fn unframe(expected: MessageType, mut chunk: Bytes) -> UaResult<Bytes> {
    let header = ChunkHeader::decode(&mut chunk)?;
    if header.message_type != expected {
        return Err(TransportError::malformed(format!(
            "expected {expected}, received {}",
            header.message_type
        ))
        .into());
    }
    Ok(chunk)
}

// =============================================================================
// HEL
// =============================================================================

/// Client hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    /// Requested protocol version.
    pub protocol_version: u32,
    /// Largest chunk the client accepts.
    pub receive_buffer_size: u32,
    /// Largest chunk the client sends.
    pub send_buffer_size: u32,
    /// Largest response message the client accepts.
    pub max_message_size: u32,
    /// Most chunks per response the client accepts.
    pub max_chunk_count: u32,
    /// Endpoint the client connects to.
    pub endpoint_url: String,
}

impl HelloMessage {
    /// Builds a hello from local limits.
    pub fn new(protocol_version: u32, limits: &TransportLimits, endpoint_url: &str) -> Self {
        Self {
            protocol_version,
            receive_buffer_size: limits.receive_buffer_size,
            send_buffer_size: limits.send_buffer_size,
            max_message_size: limits.max_message_size,
            max_chunk_count: limits.max_chunk_count,
            endpoint_url: endpoint_url.to_string(),
        }
    }

    /// Encodes a complete HEL chunk.
    pub fn to_chunk(&self) -> Bytes {
        let mut payload = BytesMut::new();
        self.protocol_version.encode(&mut payload);
        self.receive_buffer_size.encode(&mut payload);
        self.send_buffer_size.encode(&mut payload);
        self.max_message_size.encode(&mut payload);
        self.max_chunk_count.encode(&mut payload);
        self.endpoint_url.encode(&mut payload);
        frame(MessageType::Hello, payload)
    }

    /// Decodes a complete HEL chunk.
    pub fn from_chunk(chunk: Bytes) -> UaResult<Self> {
        let mut buf = unframe(MessageType::Hello, chunk)?;
        let message = Self {
            protocol_version: u32::decode(&mut buf)?,
            receive_buffer_size: u32::decode(&mut buf)?,
            send_buffer_size: u32::decode(&mut buf)?,
            max_message_size: u32::decode(&mut buf)?,
            max_chunk_count: u32::decode(&mut buf)?,
            endpoint_url: String::decode(&mut buf)?,
        };
        if message.endpoint_url.len() > MAX_ENDPOINT_URL_LEN {
            return Err(TransportError::malformed("endpoint URL too long").into());
        }
        Ok(message)
    }
}

// =============================================================================
// ACK
// =============================================================================

/// Server acknowledge carrying the revised limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeMessage {
    /// Version the server speaks.
    pub protocol_version: u32,
    /// Largest chunk the server accepts.
    pub receive_buffer_size: u32,
    /// Largest chunk the server sends.
    pub send_buffer_size: u32,
    /// Largest request message the server accepts.
    pub max_message_size: u32,
    /// Most chunks per request the server accepts.
    pub max_chunk_count: u32,
}

impl AcknowledgeMessage {
    /// Encodes a complete ACK chunk.
    pub fn to_chunk(&self) -> Bytes {
        let mut payload = BytesMut::new();
        self.protocol_version.encode(&mut payload);
        self.receive_buffer_size.encode(&mut payload);
        self.send_buffer_size.encode(&mut payload);
        self.max_message_size.encode(&mut payload);
        self.max_chunk_count.encode(&mut payload);
        frame(MessageType::Acknowledge, payload)
    }

    /// Decodes a complete ACK chunk.
    pub fn from_chunk(chunk: Bytes) -> UaResult<Self> {
        let mut buf = unframe(MessageType::Acknowledge, chunk)?;
        Ok(Self {
            protocol_version: u32::decode(&mut buf)?,
            receive_buffer_size: u32::decode(&mut buf)?,
            send_buffer_size: u32::decode(&mut buf)?,
            max_message_size: u32::decode(&mut buf)?,
            max_chunk_count: u32::decode(&mut buf)?,
        })
    }
}

// =============================================================================
// ERR
// =============================================================================

/// Error message sent before the connection is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Reason status.
    pub status: StatusCode,
    /// Human readable reason.
    pub reason: String,
}

impl ErrorMessage {
    /// Creates an error message.
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// Creates an error message describing `error`.
    pub fn from_error(error: &UaError) -> Self {
        Self::new(error.status_code(), error.to_string())
    }

    /// Encodes a complete ERR chunk.
    pub fn to_chunk(&self) -> Bytes {
        let mut payload = BytesMut::new();
        self.status.encode(&mut payload);
        self.reason.encode(&mut payload);
        frame(MessageType::Error, payload)
    }

    /// Decodes a complete ERR chunk.
    pub fn from_chunk(chunk: Bytes) -> UaResult<Self> {
        let mut buf = unframe(MessageType::Error, chunk)?;
        Ok(Self {
            status: StatusCode::decode(&mut buf)?,
            reason: String::decode(&mut buf)?,
        })
    }

    /// Converts the message into the error the client reports.
    pub fn into_error(self) -> UaError {
        if self.status == StatusCode::BadProtocolVersionUnsupported {
            return ChannelError::ProtocolVersionUnsupported {
                requested: INCOMPATIBLE_PROTOCOL_VERSION,
            }
            .into();
        }
        ChannelError::Rejected {
            status: self.status,
            reason: self.reason,
        }
        .into()
    }
}

// =============================================================================
// Negotiation
// =============================================================================

/// Decides which version to answer a peer's `requested` version with.
///
/// Version 0 and versions at or above `range.min` are accepted and answered
/// with `range.max`; the reserved sentinel and versions below the range fail.
pub fn negotiate_protocol_version(
    range: &ProtocolVersionRange,
    requested: u32,
) -> Result<u32, ChannelError> {
    if requested == INCOMPATIBLE_PROTOCOL_VERSION || (requested != 0 && requested < range.min) {
        return Err(ChannelError::ProtocolVersionUnsupported { requested });
    }
    Ok(range.max)
}

/// Limits in force on one connection after HEL/ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Largest chunk this side sends.
    pub send_buffer_size: usize,
    /// Largest chunk this side accepts.
    pub receive_buffer_size: usize,
    /// Largest message the peer accepts (0 = unlimited).
    pub send_max_message_size: usize,
    /// Most chunks per message the peer accepts (0 = unlimited).
    pub send_max_chunk_count: usize,
    /// Largest message this side accepts (0 = unlimited).
    pub receive_max_message_size: usize,
    /// Most chunks per message this side accepts (0 = unlimited).
    pub receive_max_chunk_count: usize,
}

impl ConnectionLimits {
    /// Limits used before negotiation finishes.
    pub fn initial(local: &TransportLimits) -> Self {
        Self {
            send_buffer_size: local.send_buffer_size as usize,
            receive_buffer_size: local.receive_buffer_size as usize,
            send_max_message_size: 0,
            send_max_chunk_count: 0,
            receive_max_message_size: local.max_message_size as usize,
            receive_max_chunk_count: local.max_chunk_count as usize,
        }
    }

    /// Revises the server's limits against a client hello.
    pub fn negotiate_server(
        local: &TransportLimits,
        server_version: u32,
        hello: &HelloMessage,
    ) -> UaResult<(Self, AcknowledgeMessage)> {
        check_peer_buffer("receive", hello.receive_buffer_size)?;
        check_peer_buffer("send", hello.send_buffer_size)?;

        let receive_buffer_size = local.receive_buffer_size.min(hello.send_buffer_size);
        let send_buffer_size = local.send_buffer_size.min(hello.receive_buffer_size);
        let ack = AcknowledgeMessage {
            protocol_version: server_version,
            receive_buffer_size,
            send_buffer_size,
            max_message_size: local.max_message_size,
            max_chunk_count: local.max_chunk_count,
        };
        let limits = Self {
            send_buffer_size: send_buffer_size as usize,
            receive_buffer_size: receive_buffer_size as usize,
            send_max_message_size: hello.max_message_size as usize,
            send_max_chunk_count: hello.max_chunk_count as usize,
            receive_max_message_size: local.max_message_size as usize,
            receive_max_chunk_count: local.max_chunk_count as usize,
        };
        Ok((limits, ack))
    }

    /// Revises the client's limits against a server acknowledge.
    pub fn negotiate_client(local: &TransportLimits, ack: &AcknowledgeMessage) -> UaResult<Self> {
        check_peer_buffer("receive", ack.receive_buffer_size)?;
        check_peer_buffer("send", ack.send_buffer_size)?;

        Ok(Self {
            send_buffer_size: local.send_buffer_size.min(ack.receive_buffer_size) as usize,
            receive_buffer_size: local.receive_buffer_size.min(ack.send_buffer_size) as usize,
            send_max_message_size: ack.max_message_size as usize,
            send_max_chunk_count: ack.max_chunk_count as usize,
            receive_max_message_size: local.max_message_size as usize,
            receive_max_chunk_count: local.max_chunk_count as usize,
        })
    }
}

fn check_peer_buffer(which: &str, size: u32) -> UaResult<()> {
    if size < MIN_BUFFER_SIZE {
        return Err(TransportError::malformed(format!(
            "peer {which} buffer size {size} is below {MIN_BUFFER_SIZE}"
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_chunk() {
        let hello = HelloMessage::new(0, &TransportLimits::default(), "opc.tcp://localhost:4840");
        let chunk = hello.to_chunk();
        assert_eq!(&chunk[..4], b"HELF");
        assert_eq!(
            u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as usize,
            chunk.len()
        );
        assert_eq!(HelloMessage::from_chunk(chunk).unwrap(), hello);
    }

    #[test]
    fn test_error_chunk_maps_version_status() {
        let message = ErrorMessage::new(StatusCode::BadProtocolVersionUnsupported, "no");
        let decoded = ErrorMessage::from_chunk(message.to_chunk()).unwrap();
        assert_eq!(
            decoded.into_error().status_code(),
            StatusCode::BadProtocolVersionUnsupported
        );
    }

    #[test]
    fn test_ack_rejected_as_hello() {
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 8192,
            send_buffer_size: 8192,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        assert!(HelloMessage::from_chunk(ack.to_chunk()).is_err());
    }

    #[test]
    fn test_version_negotiation() {
        let range = ProtocolVersionRange { min: 0, max: 0 };
        assert_eq!(negotiate_protocol_version(&range, 0).unwrap(), 0);
        assert_eq!(negotiate_protocol_version(&range, 7).unwrap(), 0);
        assert!(negotiate_protocol_version(&range, INCOMPATIBLE_PROTOCOL_VERSION).is_err());

        let range = ProtocolVersionRange { min: 2, max: 3 };
        assert_eq!(negotiate_protocol_version(&range, 0).unwrap(), 3);
        assert_eq!(negotiate_protocol_version(&range, 2).unwrap(), 3);
        assert!(negotiate_protocol_version(&range, 1).is_err());
    }

    #[test]
    fn test_server_negotiation_takes_minimum() {
        let local = TransportLimits::default();
        let hello = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 16_384,
            send_buffer_size: 8192,
            max_message_size: 1_000_000,
            max_chunk_count: 10,
            endpoint_url: String::new(),
        };
        let (limits, ack) = ConnectionLimits::negotiate_server(&local, 0, &hello).unwrap();
        assert_eq!(limits.send_buffer_size, 16_384);
        assert_eq!(limits.receive_buffer_size, 8192);
        assert_eq!(limits.send_max_chunk_count, 10);
        assert_eq!(ack.receive_buffer_size, 8192);

        let client = ConnectionLimits::negotiate_client(&local, &ack).unwrap();
        assert_eq!(client.send_buffer_size, 8192);
    }

    #[test]
    fn test_tiny_peer_buffer_rejected() {
        let hello = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 1024,
            send_buffer_size: 8192,
            max_message_size: 0,
            max_chunk_count: 0,
            endpoint_url: String::new(),
        };
        assert!(ConnectionLimits::negotiate_server(&TransportLimits::default(), 0, &hello).is_err());
    }
}
