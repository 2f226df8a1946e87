// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Chunk headers and the stream framer.
//!
//! ```text
//! 0      3    4          8              12
//! +------+----+----------+--------------+-----------------+------------------+------
//! | type | ct | size(LE) | channel id   | security header | sequence header  | body
//! +------+----+----------+--------------+-----------------+------------------+------
//!  HEL/ACK/ERR stop after `size`; OPN/CLO/MSG carry the channel id and headers.
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{TransportError, UaError, UaResult};

/// Length of the fixed message header.
pub const MESSAGE_HEADER_LEN: usize = 8;
/// Length of the header including the secure channel id.
pub const SECURE_HEADER_LEN: usize = 12;
/// Length of the sequence header.
pub const SEQUENCE_HEADER_LEN: usize = 8;

// =============================================================================
// MessageType / ChunkType
// =============================================================================

/// The three-letter message type of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Hello from client.
    Hello,
    /// Acknowledge from server.
    Acknowledge,
    /// Error, followed by connection close.
    Error,
    /// Open secure channel.
    OpenChannel,
    /// Close secure channel.
    CloseChannel,
    /// Service message.
    Message,
}

impl MessageType {
    /// Returns the wire tag.
    pub const fn as_bytes(&self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::OpenChannel => b"OPN",
            Self::CloseChannel => b"CLO",
            Self::Message => b"MSG",
        }
    }

    /// Parses a wire tag.
    pub fn from_bytes(raw: &[u8]) -> UaResult<Self> {
        match raw {
            b"HEL" => Ok(Self::Hello),
            b"ACK" => Ok(Self::Acknowledge),
            b"ERR" => Ok(Self::Error),
            b"OPN" => Ok(Self::OpenChannel),
            b"CLO" => Ok(Self::CloseChannel),
            b"MSG" => Ok(Self::Message),
            other => Err(TransportError::message_type_invalid(other).into()),
        }
    }

    /// Returns `true` for types that carry a secure channel id.
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::OpenChannel | Self::CloseChannel | Self::Message)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Position of a chunk inside its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Last chunk of a message.
    Final,
    /// More chunks follow.
    Intermediate,
    /// The sender abandoned the message.
    Abort,
}

impl ChunkType {
    /// Returns the wire byte.
    pub const fn as_byte(&self) -> u8 {
        match self {
            Self::Final => b'F',
            Self::Intermediate => b'C',
            Self::Abort => b'A',
        }
    }

    /// Parses the wire byte.
    pub fn from_byte(raw: u8) -> UaResult<Self> {
        match raw {
            b'F' => Ok(Self::Final),
            b'C' => Ok(Self::Intermediate),
            b'A' => Ok(Self::Abort),
            other => Err(UaError::decoding(format!(
                "invalid chunk type 0x{other:02X}"
            ))),
        }
    }
}

// =============================================================================
// ChunkHeader
// =============================================================================

/// Decoded fixed header of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Message type.
    pub message_type: MessageType,
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Total chunk size including this header.
    pub message_size: u32,
    /// Secure channel id for OPN/CLO/MSG.
    pub secure_channel_id: Option<u32>,
}

impl ChunkHeader {
    /// Returns the encoded header length.
    pub fn encoded_len(&self) -> usize {
        if self.message_type.is_secure() {
            SECURE_HEADER_LEN
        } else {
            MESSAGE_HEADER_LEN
        }
    }

    /// Writes the header.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.message_type.as_bytes());
        buf.put_u8(self.chunk_type.as_byte());
        buf.put_u32_le(self.message_size);
        if let Some(id) = self.secure_channel_id {
            buf.put_u32_le(id);
        }
    }

    /// Reads the header from the front of `buf`.
    pub fn decode(buf: &mut Bytes) -> UaResult<Self> {
        if buf.remaining() < MESSAGE_HEADER_LEN {
            return Err(UaError::decoding("chunk shorter than message header"));
        }
        let message_type = MessageType::from_bytes(&buf[..3])?;
        let chunk_type = ChunkType::from_byte(buf[3])?;
        buf.advance(4);
        let message_size = buf.get_u32_le();
        let secure_channel_id = if message_type.is_secure() {
            if buf.remaining() < 4 {
                return Err(UaError::decoding("chunk is missing the secure channel id"));
            }
            Some(buf.get_u32_le())
        } else {
            None
        };
        Ok(Self {
            message_type,
            chunk_type,
            message_size,
            secure_channel_id,
        })
    }
}

// =============================================================================
// ChunkCodec
// =============================================================================

/// Frames a byte stream into whole chunks.
///
/// The decoder yields each chunk including its header; it never interprets
/// security or sequence headers.
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    max_chunk_size: usize,
}

impl ChunkCodec {
    /// Creates a codec accepting chunks up to `max_chunk_size` bytes.
    pub fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size }
    }

    /// Updates the limit after buffer sizes have been negotiated.
    pub fn set_max_chunk_size(&mut self, max_chunk_size: usize) {
        self.max_chunk_size = max_chunk_size;
    }

    /// Returns the current limit.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

impl Decoder for ChunkCodec {
    type Item = Bytes;
    type Error = UaError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MESSAGE_HEADER_LEN {
            return Ok(None);
        }

        MessageType::from_bytes(&src[..3])?;
        ChunkType::from_byte(src[3])?;
        let size = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;

        if size < MESSAGE_HEADER_LEN {
            return Err(UaError::decoding(format!(
                "chunk size {size} is smaller than the header"
            )));
        }
        if size > self.max_chunk_size {
            return Err(TransportError::too_large(size, self.max_chunk_size).into());
        }
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(size).freeze()))
    }
}

impl Encoder<Bytes> for ChunkCodec {
    type Error = UaError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    fn frame(message_type: &[u8; 3], size: u32, body_len: usize) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_slice(message_type);
        buf.put_u8(b'F');
        buf.put_u32_le(size);
        buf.put_bytes(0, body_len);
        buf
    }

    #[test]
    fn test_partial_then_complete() {
        let mut codec = ChunkCodec::new(1024);
        let full = frame(b"MSG", 20, 12);

        let mut src = BytesMut::from(&full[..10]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&full[10..]);
        let chunk = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(chunk.len(), 20);
        assert!(src.is_empty());
    }

    #[test]
    fn test_two_chunks_in_one_read() {
        let mut codec = ChunkCodec::new(1024);
        let mut src = frame(b"HEL", 10, 2);
        src.extend_from_slice(&frame(b"MSG", 12, 4));

        assert_eq!(codec.decode(&mut src).unwrap().unwrap().len(), 10);
        assert_eq!(codec.decode(&mut src).unwrap().unwrap().len(), 12);
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn test_rejects_unknown_type() {
        let mut codec = ChunkCodec::new(1024);
        let mut src = frame(b"XYZ", 8, 0);
        let error = codec.decode(&mut src).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadTcpMessageTypeInvalid);
        assert!(error.is_fatal());
    }

    #[test]
    fn test_rejects_oversized_chunk() {
        let mut codec = ChunkCodec::new(64);
        let mut src = frame(b"MSG", 65, 0);
        let error = codec.decode(&mut src).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadTcpMessageTooLarge);
    }

    #[test]
    fn test_rejects_undersized_chunk() {
        let mut codec = ChunkCodec::new(64);
        let mut src = frame(b"MSG", 4, 0);
        assert!(codec.decode(&mut src).is_err());
    }

    #[test]
    fn test_header_round_trip() {
        let header = ChunkHeader {
            message_type: MessageType::OpenChannel,
            chunk_type: ChunkType::Final,
            message_size: 99,
            secure_channel_id: Some(7),
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), header.encoded_len());
        let decoded = ChunkHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }
}
