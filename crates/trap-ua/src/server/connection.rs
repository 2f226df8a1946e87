// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One accepted connection: handshake, channel negotiation and the request loop.
//!
//! The reader side runs here and processes requests one at a time, so
//! responses leave in request order. Everything written after the ACK goes
//! through the outbound queue drained by [`run_writer`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::{ChannelEvent, ChannelObservers, Inbound, OpenPolicy, ReceivedMessage, SecureChannel};
use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, RequestContext};
use crate::error::{ChannelError, TimeoutError, TransportError, UaError, UaResult};
use crate::messages::{Request, RequestBody, Response};
use crate::status::StatusCode;
use crate::transport::{
    negotiate_protocol_version, outbound_queue, run_writer, ChunkCodec, ConnectionLimits,
    ErrorMessage, HelloMessage, MessageType, Outbound, OutboundSender,
};

/// Why the request loop stopped.
#[derive(Debug)]
enum Exit {
    /// The peer sent CLO or closed the socket.
    Closed,
    /// The server is shutting down.
    Shutdown,
    /// An error that ends the channel.
    Failed(UaError),
}

/// Server side of one physical connection.
pub(crate) struct Connection {
    channel_id: u32,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    observers: ChannelObservers,
    established: bool,
}

impl Connection {
    pub(crate) fn new(
        channel_id: u32,
        peer: SocketAddr,
        config: Arc<ServerConfig>,
        dispatcher: Dispatcher,
        observers: ChannelObservers,
    ) -> Self {
        Self {
            channel_id,
            peer,
            config,
            dispatcher,
            observers,
            established: false,
        }
    }

    /// Serves the connection until it closes.
    pub(crate) async fn run<R, W>(mut self, reader: R, mut writer: W, shutdown: CancellationToken)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut framed = FramedRead::new(
            reader,
            ChunkCodec::new(self.config.transport.receive_buffer_size as usize),
        );

        let limits = match self.handshake(&mut framed, &mut writer).await {
            Ok(limits) => limits,
            Err(error) => {
                error.log("hello");
                let _ = writer.shutdown().await;
                return;
            }
        };
        framed
            .decoder_mut()
            .set_max_chunk_size(limits.receive_buffer_size);

        let channel = Arc::new(Mutex::new(SecureChannel::server(self.channel_id, limits)));
        let (outbound, queue) = outbound_queue();
        let writer_task = tokio::spawn(run_writer(writer, channel.clone(), queue));

        let exit = tokio::select! {
            exit = self.serve(&mut framed, &channel, &outbound) => exit,
            _ = shutdown.cancelled() => Exit::Shutdown,
        };
        match &exit {
            Exit::Closed => debug!(channel_id = self.channel_id, "Channel closed by peer"),
            Exit::Shutdown => debug!(channel_id = self.channel_id, "Channel closed on shutdown"),
            Exit::Failed(error) => error.log("channel"),
        }

        let _ = outbound.send(Outbound::Close).await;
        drop(outbound);
        match writer_task.await {
            Ok(Err(error)) => error.log("writer"),
            Err(error) => warn!(channel_id = self.channel_id, error = %error, "Writer task failed"),
            Ok(Ok(())) => {}
        }
        self.finish(&channel);
    }

    /// Reads HEL and answers with ACK, or with ERR on a rejected hello.
    async fn handshake<R, W>(
        &self,
        framed: &mut FramedRead<R, ChunkCodec>,
        writer: &mut W,
    ) -> UaResult<ConnectionLimits>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let timeout = self.config.channel.hello_timeout;
        let chunk = match tokio::time::timeout(timeout, framed.next()).await {
            Err(_) => return Err(TimeoutError::Handshake { duration: timeout }.into()),
            Ok(None) => return Err(TransportError::ConnectionClosed.into()),
            Ok(Some(chunk)) => chunk?,
        };

        let result = HelloMessage::from_chunk(chunk).and_then(|hello| {
            let version = negotiate_protocol_version(&self.config.protocol_versions, hello.protocol_version)?;
            trace!(
                channel_id = self.channel_id,
                requested = hello.protocol_version,
                endpoint = %hello.endpoint_url,
                "Hello received"
            );
            ConnectionLimits::negotiate_server(&self.config.transport, version, &hello)
        });

        match result {
            Ok((limits, ack)) => {
                writer.write_all(&ack.to_chunk()).await?;
                writer.flush().await?;
                Ok(limits)
            }
            Err(error) => {
                let reply = ErrorMessage::from_error(&error);
                writer.write_all(&reply.to_chunk()).await?;
                writer.flush().await?;
                Err(error)
            }
        }
    }

    async fn serve<R>(
        &mut self,
        framed: &mut FramedRead<R, ChunkCodec>,
        channel: &Arc<Mutex<SecureChannel>>,
        outbound: &OutboundSender,
    ) -> Exit
    where
        R: AsyncRead + Unpin,
    {
        while let Some(chunk) = framed.next().await {
            let decoded = chunk.and_then(|chunk| channel.lock().decode(chunk));
            let message = match decoded {
                Ok(Some(Inbound::Message(message))) => message,
                Ok(Some(Inbound::Aborted {
                    request_id,
                    status,
                    reason,
                })) => {
                    debug!(channel_id = self.channel_id, request_id, %status, reason = %reason, "Request aborted by peer");
                    continue;
                }
                Ok(None) => continue,
                Err(error) => return Exit::Failed(error),
            };

            let step = match message.message_type {
                MessageType::OpenChannel => self.open(channel, outbound, message).await,
                MessageType::CloseChannel => return Exit::Closed,
                MessageType::Message if self.established => {
                    self.request(channel, outbound, message).await
                }
                MessageType::Message => Err(ChannelError::NotOpen.into()),
                other => Err(TransportError::message_type_invalid(other.as_bytes()).into()),
            };
            if let Err(error) = step {
                return Exit::Failed(error);
            }
        }
        Exit::Closed
    }

    /// Issues or renews a token.
    async fn open(
        &mut self,
        channel: &Arc<Mutex<SecureChannel>>,
        outbound: &OutboundSender,
        message: ReceivedMessage,
    ) -> UaResult<()> {
        let result = Request::decode(message.body)
            .map_err(|e| e.error)
            .and_then(|request| match request.body {
                RequestBody::OpenSecureChannel(open) => Ok((request.header.request_handle, open)),
                other => Err(ChannelError::request_type_invalid(format!(
                    "{} sent as OPN",
                    other.name()
                ))
                .into()),
            })
            .and_then(|(handle, open)| {
                let policy = OpenPolicy {
                    offered: self.config.security.clone(),
                    versions: self.config.protocol_versions,
                    limits: self.config.channel,
                };
                let mut channel = channel.lock();
                let response = channel.accept_open(
                    message.policy_uri.as_deref().unwrap_or_default(),
                    &open,
                    &policy,
                )?;
                Ok((handle, response))
            });

        let (handle, response) = match result {
            Ok(accepted) => accepted,
            Err(error) => {
                let reply = ErrorMessage::from_error(&error).to_chunk();
                let _ = outbound.send(Outbound::Chunks(vec![reply])).await;
                return Err(error);
            }
        };

        let token_id = response.security_token.token_id;
        let revised = response.security_token.revised_lifetime;
        send(
            outbound,
            MessageType::OpenChannel,
            message.request_id,
            Response::new(handle, response).encode(),
        )
        .await?;

        if self.established {
            debug!(channel_id = self.channel_id, token_id, "Security token renewed");
            self.observers.notify(&ChannelEvent::TokenRenewed {
                channel_id: self.channel_id,
                token_id,
            });
        } else {
            self.established = true;
            let (policy, mode) = {
                let channel = channel.lock();
                (channel.policy(), channel.mode())
            };
            info!(
                channel_id = self.channel_id,
                peer = %self.peer,
                policy = policy.uri(),
                mode = mode.name(),
                lifetime_ms = revised,
                "Secure channel opened"
            );
            self.observers.notify(&ChannelEvent::NewChannel {
                channel_id: self.channel_id,
                peer: self.peer,
            });
        }
        Ok(())
    }

    /// Dispatches one service request and queues its response.
    async fn request(
        &self,
        channel: &Arc<Mutex<SecureChannel>>,
        outbound: &OutboundSender,
        message: ReceivedMessage,
    ) -> UaResult<()> {
        let started = Instant::now();
        let context = RequestContext {
            channel_id: self.channel_id,
            outbound: outbound.clone(),
        };
        let dispatched = self.dispatcher.dispatch(&context, message.body).await;
        let status = dispatched.status();
        let body = dispatched.response.encode();

        let bytes_sent = {
            let mut channel = channel.lock();
            channel.record_transaction();
            channel.encoded_len(MessageType::Message, body.len())
        };
        send(outbound, MessageType::Message, message.request_id, body).await?;

        trace!(
            channel_id = self.channel_id,
            service = dispatched.service,
            %status,
            "Transaction done"
        );
        self.observers.notify(&ChannelEvent::TransactionDone {
            channel_id: self.channel_id,
            service: dispatched.service,
            status,
            bytes_received: message.wire_size,
            bytes_sent,
            duration: started.elapsed(),
        });
        Ok(())
    }

    fn finish(&self, channel: &Arc<Mutex<SecureChannel>>) {
        let stats = {
            let mut channel = channel.lock();
            channel.close();
            channel.stats().clone()
        };
        self.dispatcher.channel_closed(self.channel_id);
        if self.established {
            info!(
                channel_id = self.channel_id,
                peer = %self.peer,
                transactions = stats.transactions,
                bytes_sent = stats.bytes_sent,
                bytes_received = stats.bytes_received,
                "Secure channel closed"
            );
            self.observers.notify(&ChannelEvent::CloseChannel {
                channel_id: self.channel_id,
                peer: self.peer,
            });
        }
    }
}

async fn send(
    outbound: &OutboundSender,
    message_type: MessageType,
    request_id: u32,
    body: Bytes,
) -> UaResult<()> {
    outbound
        .send(Outbound::Message {
            message_type,
            request_id,
            body,
        })
        .await
        .map_err(|_| UaError::channel_closed())
}

/// Rejects a connection over the channel limit with an ERR message.
///
/// The HEL is read first so the peer sees the ERR rather than a reset.
pub(crate) async fn reject_busy<S>(
    mut stream: S,
    max_channels: usize,
    receive_buffer_size: usize,
    hello_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    {
        let mut framed = FramedRead::new(&mut stream, ChunkCodec::new(receive_buffer_size));
        if tokio::time::timeout(hello_timeout, framed.next()).await.is_err() {
            trace!("No HEL before rejecting busy connection");
        }
    }
    let reply = ErrorMessage::new(
        StatusCode::BadTcpServerTooBusy,
        format!("channel limit of {max_channels} reached"),
    );
    if stream.write_all(&reply.to_chunk()).await.is_ok() {
        let _ = stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::{AddressSpace, NodeHandle};
    use crate::config::TransportLimits;
    use crate::diagnostics::Diagnostics;
    use crate::session::SessionManager;
    use crate::transport::{AcknowledgeMessage, INCOMPATIBLE_PROTOCOL_VERSION, PROTOCOL_VERSION};
    use crate::types::{AttributeId, DataValue, NodeId};
    use async_trait::async_trait;
    use tokio::io::{duplex, AsyncReadExt};

    struct Empty;

    #[async_trait]
    impl AddressSpace for Empty {
        async fn find_node(&self, _node_id: &NodeId) -> Option<NodeHandle> {
            None
        }

        async fn read_attribute(&self, _node: &NodeHandle, _attribute: AttributeId) -> DataValue {
            DataValue::from_status(StatusCode::BadNodeIdUnknown)
        }

        async fn set_value_from_source(&self, _node: &NodeHandle, _value: DataValue) -> StatusCode {
            StatusCode::BadNodeIdUnknown
        }
    }

    fn connection(observers: ChannelObservers) -> Connection {
        let config = Arc::new(ServerConfig::default());
        let sessions = Arc::new(SessionManager::new(config.sessions));
        let dispatcher = Dispatcher::new(
            config.clone(),
            sessions,
            Arc::new(Empty),
            Arc::new(Diagnostics::new()),
        );
        Connection::new(7, "127.0.0.1:50000".parse().unwrap(), config, dispatcher, observers)
    }

    async fn read_chunk(stream: &mut (impl AsyncRead + Unpin)) -> Bytes {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await.unwrap();
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut chunk = header.to_vec();
        chunk.resize(size, 0);
        stream.read_exact(&mut chunk[8..]).await.unwrap();
        Bytes::from(chunk)
    }

    #[tokio::test]
    async fn test_sentinel_version_is_rejected_without_channel_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let observers = ChannelObservers::new();
        let seen = events.clone();
        observers.add(Arc::new(move |e: &ChannelEvent| seen.lock().push(e.clone())));

        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(connection(observers).run(
            server_read,
            server_write,
            CancellationToken::new(),
        ));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let hello = HelloMessage::new(
            INCOMPATIBLE_PROTOCOL_VERSION,
            &TransportLimits::default(),
            "opc.tcp://localhost:4840",
        );
        client_write.write_all(&hello.to_chunk()).await.unwrap();

        let reply = ErrorMessage::from_chunk(read_chunk(&mut client_read).await).unwrap();
        assert_eq!(reply.status, StatusCode::BadProtocolVersionUnsupported);
        task.await.unwrap();
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_hello_is_acknowledged_and_close_without_open_is_silent() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let observers = ChannelObservers::new();
        let seen = events.clone();
        observers.add(Arc::new(move |e: &ChannelEvent| seen.lock().push(e.clone())));

        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(connection(observers).run(
            server_read,
            server_write,
            CancellationToken::new(),
        ));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let hello = HelloMessage::new(
            PROTOCOL_VERSION,
            &TransportLimits::default(),
            "opc.tcp://localhost:4840",
        );
        client_write.write_all(&hello.to_chunk()).await.unwrap();
        let ack = AcknowledgeMessage::from_chunk(read_chunk(&mut client_read).await).unwrap();
        assert_eq!(ack.protocol_version, ServerConfig::default().protocol_versions.max);

        drop(client_write);
        drop(client_read);
        task.await.unwrap();
        assert!(events.lock().is_empty());
    }
}
