// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Byte-stream transport: chunk framing, reassembly and the HEL/ACK handshake.
//!
//! Each connection has one reader and one writer task. The reader owns a
//! `FramedRead<_, ChunkCodec>`; everything that must reach the peer goes
//! through an [`Outbound`] queue drained by [`run_writer`], so responses and
//! pushed notifications never interleave inside a message.

pub mod assembler;
pub mod chunk;
pub mod hello;

use std::sync::Arc;

use bytes::Bytes;
use futures::SinkExt;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::channel::SecureChannel;
use crate::error::UaResult;

pub use assembler::{split_body, Assembled, ChunkAssembler};
pub use chunk::{ChunkCodec, ChunkHeader, ChunkType, MessageType};
pub use hello::{
    negotiate_protocol_version, AcknowledgeMessage, ConnectionLimits, ErrorMessage, HelloMessage,
    INCOMPATIBLE_PROTOCOL_VERSION, PROTOCOL_VERSION,
};

/// Capacity of the per-connection outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Work item for the writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Chunks already secured by the sender.
    Chunks(Vec<Bytes>),
    /// A body the writer secures with the channel's current token.
    Message {
        /// OPN, CLO or MSG.
        message_type: MessageType,
        /// Request id for the sequence header.
        request_id: u32,
        /// Encoded body.
        body: Bytes,
    },
    /// Flush and stop.
    Close,
}

/// Sending half of an outbound queue.
pub type OutboundSender = mpsc::Sender<Outbound>;

/// Creates an outbound queue.
pub fn outbound_queue() -> (OutboundSender, mpsc::Receiver<Outbound>) {
    mpsc::channel(OUTBOUND_QUEUE_CAPACITY)
}

/// Drains `queue` onto `writer` until [`Outbound::Close`] or the queue closes.
pub async fn run_writer<W>(
    writer: W,
    channel: Arc<Mutex<SecureChannel>>,
    mut queue: mpsc::Receiver<Outbound>,
) -> UaResult<()>
where
    W: AsyncWrite + Unpin,
{
    let max_chunk = channel.lock().limits().send_buffer_size;
    let mut framed = FramedWrite::new(writer, ChunkCodec::new(max_chunk));

    while let Some(item) = queue.recv().await {
        let chunks = match item {
            Outbound::Chunks(chunks) => chunks,
            Outbound::Message {
                message_type,
                request_id,
                body,
            } => match channel.lock().encode(message_type, request_id, body) {
                Ok(chunks) => chunks,
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    warn!(request_id, error = %error, "Dropping outbound message");
                    continue;
                }
            },
            Outbound::Close => break,
        };
        for chunk in chunks {
            framed.feed(chunk).await?;
        }
        framed.flush().await?;
    }

    debug!("Writer stopped");
    framed.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportLimits;
    use crate::types::{SecurityMode, SecurityPolicy};

    #[tokio::test]
    async fn test_writer_writes_chunks_in_order_and_stops() {
        let limits = ConnectionLimits::initial(&TransportLimits::default());
        let channel = Arc::new(Mutex::new(SecureChannel::client(
            SecurityPolicy::None,
            SecurityMode::None,
            limits,
        )));
        let (tx, rx) = outbound_queue();
        let (client, mut server) = tokio::io::duplex(4096);

        let writer = tokio::spawn(run_writer(client, channel, rx));
        tx.send(Outbound::Chunks(vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]))
            .await
            .unwrap();
        tx.send(Outbound::Close).await.unwrap();
        writer.await.unwrap().unwrap();

        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut received)
            .await
            .unwrap();
        assert_eq!(received, b"onetwo");
    }
}
