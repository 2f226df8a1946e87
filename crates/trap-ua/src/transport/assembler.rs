// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Reassembly of multi-chunk messages and splitting of outgoing bodies.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::encoding::BinaryDecode;
use crate::error::{TransportError, UaResult};
use crate::status::StatusCode;
use crate::transport::chunk::ChunkType;

/// Outcome of feeding one chunk body to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// The message is complete.
    Complete(Bytes),
    /// More chunks are expected.
    Incomplete,
    /// The sender abandoned the message.
    Aborted {
        /// Status carried in the abort chunk.
        status: StatusCode,
        /// Reason carried in the abort chunk.
        reason: String,
    },
}

#[derive(Debug, Default)]
struct Partial {
    chunks: Vec<Bytes>,
    size: usize,
}

/// Buffers intermediate chunks per request id.
#[derive(Debug)]
pub struct ChunkAssembler {
    partial: HashMap<u32, Partial>,
    max_message_size: usize,
    max_chunk_count: usize,
}

impl ChunkAssembler {
    /// Creates an assembler; zero limits mean unlimited.
    pub fn new(max_message_size: usize, max_chunk_count: usize) -> Self {
        Self {
            partial: HashMap::new(),
            max_message_size,
            max_chunk_count,
        }
    }

    /// Updates the limits after negotiation.
    pub fn set_limits(&mut self, max_message_size: usize, max_chunk_count: usize) {
        self.max_message_size = max_message_size;
        self.max_chunk_count = max_chunk_count;
    }

    /// Number of messages waiting for more chunks.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Feeds the body of one verified chunk.
    pub fn push(&mut self, request_id: u32, chunk_type: ChunkType, body: Bytes) -> UaResult<Assembled> {
        if chunk_type == ChunkType::Abort {
            self.partial.remove(&request_id);
            let mut body = body;
            let status = StatusCode::decode(&mut body).unwrap_or(StatusCode::BadRequestInterrupted);
            let reason = String::decode(&mut body).unwrap_or_default();
            return Ok(Assembled::Aborted { status, reason });
        }

        let partial = self.partial.entry(request_id).or_default();
        partial.size += body.len();
        partial.chunks.push(body);

        let (size, count) = (partial.size, partial.chunks.len());
        if self.max_message_size > 0 && size > self.max_message_size {
            self.partial.remove(&request_id);
            return Err(TransportError::too_large(size, self.max_message_size).into());
        }
        if self.max_chunk_count > 0 && count > self.max_chunk_count {
            self.partial.remove(&request_id);
            return Err(TransportError::TooManyChunks {
                count,
                limit: self.max_chunk_count,
            }
            .into());
        }

        if chunk_type == ChunkType::Intermediate {
            return Ok(Assembled::Incomplete);
        }

        let Some(mut partial) = self.partial.remove(&request_id) else {
            return Ok(Assembled::Incomplete);
        };
        if partial.chunks.len() == 1 {
            return Ok(Assembled::Complete(partial.chunks.remove(0)));
        }
        let mut message = BytesMut::with_capacity(partial.size);
        for chunk in partial.chunks {
            message.extend_from_slice(&chunk);
        }
        Ok(Assembled::Complete(message.freeze()))
    }
}

/// Splits `body` into pieces of at most `max_body` bytes; always yields at
/// least one piece.
pub fn split_body(body: Bytes, max_body: usize) -> Vec<Bytes> {
    if body.len() <= max_body || max_body == 0 {
        return vec![body];
    }
    let mut body = body;
    let mut pieces = Vec::with_capacity(body.len().div_ceil(max_body));
    while body.len() > max_body {
        pieces.push(body.split_to(max_body));
    }
    pieces.push(body);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::BinaryEncode;

    #[test]
    fn test_single_final_chunk() {
        let mut assembler = ChunkAssembler::new(0, 0);
        let result = assembler
            .push(1, ChunkType::Final, Bytes::from_static(b"abc"))
            .unwrap();
        assert_eq!(result, Assembled::Complete(Bytes::from_static(b"abc")));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_interleaved_requests() {
        let mut assembler = ChunkAssembler::new(0, 0);
        assembler.push(1, ChunkType::Intermediate, Bytes::from_static(b"he")).unwrap();
        assembler.push(2, ChunkType::Intermediate, Bytes::from_static(b"wo")).unwrap();
        assert_eq!(assembler.pending(), 2);

        let first = assembler.push(1, ChunkType::Final, Bytes::from_static(b"llo")).unwrap();
        assert_eq!(first, Assembled::Complete(Bytes::from_static(b"hello")));
        let second = assembler.push(2, ChunkType::Final, Bytes::from_static(b"rld")).unwrap();
        assert_eq!(second, Assembled::Complete(Bytes::from_static(b"world")));
    }

    #[test]
    fn test_abort_discards_partial() {
        let mut assembler = ChunkAssembler::new(0, 0);
        assembler.push(5, ChunkType::Intermediate, Bytes::from_static(b"xx")).unwrap();

        let mut body = BytesMut::new();
        StatusCode::BadRequestTooLarge.encode(&mut body);
        "too big".encode(&mut body);
        let result = assembler.push(5, ChunkType::Abort, body.freeze()).unwrap();
        assert_eq!(
            result,
            Assembled::Aborted {
                status: StatusCode::BadRequestTooLarge,
                reason: "too big".into()
            }
        );
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_limits_enforced() {
        let mut assembler = ChunkAssembler::new(4, 0);
        assembler.push(1, ChunkType::Intermediate, Bytes::from_static(b"abc")).unwrap();
        let error = assembler
            .push(1, ChunkType::Final, Bytes::from_static(b"de"))
            .unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadTcpMessageTooLarge);

        let mut assembler = ChunkAssembler::new(0, 2);
        assembler.push(1, ChunkType::Intermediate, Bytes::from_static(b"a")).unwrap();
        assembler.push(1, ChunkType::Intermediate, Bytes::from_static(b"b")).unwrap();
        assert!(assembler.push(1, ChunkType::Final, Bytes::from_static(b"c")).is_err());
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_split_body() {
        let pieces = split_body(Bytes::from_static(b"0123456789"), 4);
        assert_eq!(pieces.len(), 3);
        assert_eq!(&pieces[2][..], b"89");
        assert_eq!(split_body(Bytes::new(), 4).len(), 1);
    }
}
