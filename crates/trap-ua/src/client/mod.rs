// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client role: one secure channel per [`UaClient`], sessions on top of it.
//!
//! A client owns a reader task that completes outstanding requests and
//! routes pushed notification messages to their subscriptions, a writer
//! task fed through the outbound queue, and a renewal task that replaces
//! the security token once the configured fraction of its lifetime has
//! passed.
//!
//! # Example
//!
//! ```ignore
//! use trap_ua::client::UaClient;
//! use trap_ua::config::{ClientConfig, SessionOptions};
//!
//! let client = UaClient::connect("opc.tcp://localhost:4840", ClientConfig::default()).await?;
//! let session = client.create_session(&SessionOptions::anonymous()).await?;
//! let value = session.read_value(NodeId::string(2, "Line1.Temperature")).await?;
//! session.close().await?;
//! client.close().await;
//! ```

pub mod pending;
pub mod session;
pub mod subscription;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::{ChannelStats, Inbound, SecureChannel};
use crate::config::{ClientConfig, Endpoint, SessionOptions};
use crate::error::{TimeoutError, TransportError, UaError, UaResult};
use crate::messages::{
    expect_response, CloseSecureChannelRequest, PublishResponse, Request, RequestBody,
    RequestHeader, Response, ResponseBody, SecurityTokenRequestType,
};
use crate::transport::{
    outbound_queue, run_writer, AcknowledgeMessage, ChunkCodec, ConnectionLimits, ErrorMessage,
    HelloMessage, MessageType, Outbound, OutboundSender,
};
use crate::types::NodeId;

pub use pending::PendingRequests;
pub use session::ClientSession;
pub use subscription::{ClientMonitoredItem, ClientSubscription, SubscriptionEvent};

/// Pushed messages kept for a subscription id nobody has claimed yet.
const UNROUTED_PER_SUBSCRIPTION: usize = 64;

/// Subscription ids with unclaimed messages.
const UNROUTED_SUBSCRIPTIONS: usize = 32;

/// Delay before retrying a failed token renewal.
const RENEWAL_RETRY: Duration = Duration::from_secs(1);

// =============================================================================
// Notification routing
// =============================================================================

enum Route {
    /// Messages that arrived before the subscription registered.
    Waiting(Vec<PublishResponse>),
    Active(mpsc::Sender<PublishResponse>),
}

/// Maps subscription ids to the tasks consuming their notifications.
#[derive(Default)]
struct NotificationRoutes {
    routes: Mutex<HashMap<u32, Route>>,
}

impl NotificationRoutes {
    fn register(&self, subscription_id: u32, sender: mpsc::Sender<PublishResponse>) {
        let previous = self
            .routes
            .lock()
            .insert(subscription_id, Route::Active(sender.clone()));
        if let Some(Route::Waiting(buffered)) = previous {
            for message in buffered {
                if sender.try_send(message).is_err() {
                    warn!(subscription_id, "Dropping buffered notification");
                }
            }
        }
    }

    fn remove(&self, subscription_id: u32) {
        self.routes.lock().remove(&subscription_id);
    }

    fn deliver(&self, message: PublishResponse) {
        let subscription_id = message.subscription_id;
        let mut routes = self.routes.lock();
        let waiting = routes
            .values()
            .filter(|r| matches!(r, Route::Waiting(_)))
            .count();
        match routes.entry(subscription_id) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Route::Active(sender) => match sender.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscription_id, "Notification queue full, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        entry.remove();
                    }
                },
                Route::Waiting(buffered) if buffered.len() < UNROUTED_PER_SUBSCRIPTION => {
                    buffered.push(message);
                }
                Route::Waiting(_) => trace!(subscription_id, "Unrouted buffer full"),
            },
            Entry::Vacant(entry) if waiting < UNROUTED_SUBSCRIPTIONS => {
                entry.insert(Route::Waiting(vec![message]));
            }
            Entry::Vacant(_) => trace!(subscription_id, "Notification for unknown subscription dropped"),
        }
    }
}

// =============================================================================
// UaClient
// =============================================================================

struct Inner {
    config: ClientConfig,
    endpoint_url: String,
    channel: Arc<Mutex<SecureChannel>>,
    outbound: OutboundSender,
    pending: PendingRequests,
    routes: NotificationRoutes,
    next_request_id: AtomicU32,
    next_handle: AtomicU32,
    closed: CancellationToken,
}

/// A connected secure channel.
///
/// Cloning is cheap; every clone talks over the same channel.
#[derive(Clone)]
pub struct UaClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UaClient")
            .field("endpoint_url", &self.inner.endpoint_url)
            .field("channel_id", &self.channel_id())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl UaClient {
    /// Connects, performs HEL/ACK and opens the secure channel.
    pub async fn connect(endpoint_url: &str, config: ClientConfig) -> UaResult<Self> {
        config.validate()?;
        let endpoint = Endpoint::parse(endpoint_url)?;

        let timeout = config.connect_timeout;
        let connected = tokio::time::timeout(timeout, async {
            let mut stream = TcpStream::connect(endpoint.socket_address()).await?;
            stream.set_nodelay(true)?;
            let limits = hello(&mut stream, &config, endpoint_url).await?;
            Ok::<_, UaError>((stream, limits))
        })
        .await;
        let (stream, limits) = match connected {
            Ok(result) => result?,
            Err(_) => {
                return Err(TimeoutError::Connect {
                    endpoint: endpoint_url.to_string(),
                    duration: timeout,
                }
                .into())
            }
        };

        let (reader, writer) = stream.into_split();
        let channel = Arc::new(Mutex::new(SecureChannel::client(
            config.security_policy,
            config.security_mode,
            limits,
        )));
        let (outbound, queue) = outbound_queue();
        let client = Self {
            inner: Arc::new(Inner {
                config,
                endpoint_url: endpoint_url.to_string(),
                channel: channel.clone(),
                outbound,
                pending: PendingRequests::new(),
                routes: NotificationRoutes::default(),
                next_request_id: AtomicU32::new(1),
                next_handle: AtomicU32::new(1),
                closed: CancellationToken::new(),
            }),
        };

        tokio::spawn({
            let closed = client.inner.closed.clone();
            async move {
                if let Err(error) = run_writer(writer, channel, queue).await {
                    error.log("client writer");
                }
                closed.cancel();
            }
        });
        let framed = FramedRead::new(reader, ChunkCodec::new(limits.receive_buffer_size));
        tokio::spawn(read_loop(Arc::downgrade(&client.inner), framed));

        if let Err(error) = client.open_channel(SecurityTokenRequestType::Issue).await {
            client.shutdown();
            return Err(error);
        }
        tokio::spawn(renewal_loop(Arc::downgrade(&client.inner)));

        info!(
            endpoint = endpoint_url,
            channel_id = client.channel_id(),
            policy = client.inner.config.security_policy.uri(),
            mode = client.inner.config.security_mode.name(),
            "Connected"
        );
        Ok(client)
    }

    /// Endpoint this client connected to.
    pub fn endpoint_url(&self) -> &str {
        &self.inner.endpoint_url
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Server-assigned channel id.
    pub fn channel_id(&self) -> u32 {
        self.inner.channel.lock().channel_id()
    }

    /// Id of the token currently used for sending.
    pub fn token_id(&self) -> Option<u32> {
        self.inner
            .channel
            .lock()
            .tokens()
            .map(|tokens| tokens.current().token_id)
    }

    /// Channel counters.
    pub fn stats(&self) -> ChannelStats {
        self.inner.channel.lock().stats().clone()
    }

    /// Returns `true` until the channel closes.
    pub fn is_open(&self) -> bool {
        !self.inner.closed.is_cancelled() && self.inner.channel.lock().is_open()
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Resolves once the channel has closed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Creates and activates a session.
    pub async fn create_session(&self, options: &SessionOptions) -> UaResult<ClientSession> {
        ClientSession::create(self.clone(), options).await
    }

    /// Replaces the security token now.
    pub async fn renew_token(&self) -> UaResult<()> {
        self.open_channel(SecurityTokenRequestType::Renew).await
    }

    /// Sends CLO and closes the connection; outstanding requests fail with
    /// `BadSecureChannelClosed`.
    pub async fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        let request_id = self.next_request_id();
        let body = Request::new(
            RequestHeader::new(NodeId::null(), self.next_handle()),
            CloseSecureChannelRequest,
        )
        .encode();
        let _ = self
            .enqueue(MessageType::CloseChannel, request_id, body)
            .await;
        self.shutdown();
        let _ = self.inner.outbound.send(Outbound::Close).await;
        info!(endpoint = %self.inner.endpoint_url, "Disconnected");
    }

    fn shutdown(&self) {
        let cancelled = self.inner.pending.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled outstanding requests");
        }
        self.inner.channel.lock().close();
        self.inner.closed.cancel();
    }

    async fn open_channel(&self, request_type: SecurityTokenRequestType) -> UaResult<()> {
        let open = self.inner.channel.lock().begin_open(
            request_type,
            self.inner.config.protocol_version,
            self.inner.config.requested_token_lifetime,
        );
        let request = Request::new(RequestHeader::new(NodeId::null(), self.next_handle()), open);
        let response = self
            .send(MessageType::OpenChannel, request)
            .await?
            .into_result("OpenSecureChannel")?;
        let response = expect_response!(response, OpenSecureChannel)?;
        self.inner.channel.lock().complete_open(&response)?;
        Ok(())
    }

    /// Sends a service request for the session identified by `token`.
    pub(crate) async fn call(
        &self,
        token: &NodeId,
        body: impl Into<RequestBody>,
    ) -> UaResult<Response> {
        let header = RequestHeader::new(token.clone(), self.next_handle())
            .with_timeout_hint(self.inner.config.request_timeout);
        self.send(MessageType::Message, Request::new(header, body))
            .await
    }

    async fn send(&self, message_type: MessageType, request: Request) -> UaResult<Response> {
        let service = request.name();
        let request_id = self.next_request_id();
        let rx = self.inner.pending.register(request_id)?;
        if let Err(error) = self
            .enqueue(message_type, request_id, request.encode())
            .await
        {
            self.inner.pending.cancel(request_id);
            return Err(error);
        }
        self.wait(service, request_id, rx).await
    }

    async fn enqueue(&self, message_type: MessageType, request_id: u32, body: Bytes) -> UaResult<()> {
        self.inner
            .outbound
            .send(Outbound::Message {
                message_type,
                request_id,
                body,
            })
            .await
            .map_err(|_| UaError::channel_closed())
    }

    async fn wait(
        &self,
        service: &'static str,
        request_id: u32,
        rx: oneshot::Receiver<UaResult<Response>>,
    ) -> UaResult<Response> {
        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(UaError::channel_closed()),
            Err(_) => {
                self.inner.pending.cancel(request_id);
                Err(TimeoutError::request(service, timeout).into())
            }
        }
    }

    pub(crate) fn register_route(&self, subscription_id: u32, sender: mpsc::Sender<PublishResponse>) {
        self.inner.routes.register(subscription_id, sender);
    }

    pub(crate) fn remove_route(&self, subscription_id: u32) {
        self.inner.routes.remove(subscription_id);
    }

    fn next_request_id(&self) -> u32 {
        next_nonzero(&self.inner.next_request_id)
    }

    fn next_handle(&self) -> u32 {
        next_nonzero(&self.inner.next_handle)
    }
}

/// Request id 0 is reserved for pushed notifications.
fn next_nonzero(counter: &AtomicU32) -> u32 {
    loop {
        let value = counter.fetch_add(1, Ordering::Relaxed);
        if value != 0 {
            return value;
        }
    }
}

/// Sends HEL and waits for ACK or ERR.
async fn hello(stream: &mut TcpStream, config: &ClientConfig, endpoint_url: &str) -> UaResult<ConnectionLimits> {
    let hello = HelloMessage::new(config.protocol_version, &config.transport, endpoint_url);
    stream.write_all(&hello.to_chunk()).await?;
    stream.flush().await?;

    let mut framed = FramedRead::new(&mut *stream, ChunkCodec::new(config.transport.receive_buffer_size as usize));
    let chunk = framed
        .next()
        .await
        .ok_or(TransportError::ConnectionClosed)??;
    if !framed.read_buffer().is_empty() {
        return Err(TransportError::malformed("data after ACK").into());
    }
    if chunk.starts_with(MessageType::Error.as_bytes()) {
        return Err(ErrorMessage::from_chunk(chunk)?.into_error());
    }
    let ack = AcknowledgeMessage::from_chunk(chunk)?;
    trace!(
        protocol_version = ack.protocol_version,
        receive_buffer_size = ack.receive_buffer_size,
        send_buffer_size = ack.send_buffer_size,
        "Acknowledge received"
    );
    ConnectionLimits::negotiate_client(&config.transport, &ack)
}

async fn read_loop<R>(inner: std::sync::Weak<Inner>, mut framed: FramedRead<R, ChunkCodec>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let Some(chunk) = framed.next().await else {
            break None;
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => break Some(error),
        };
        if chunk.starts_with(MessageType::Error.as_bytes()) {
            match ErrorMessage::from_chunk(chunk) {
                Ok(message) => {
                    warn!(status = %message.status, reason = %message.reason, "Server closed the channel");
                    inner
                        .pending
                        .fail_all(|| ErrorMessage::new(message.status, message.reason.clone()).into_error());
                }
                Err(error) => error.log("client reader"),
            }
            break None;
        }

        let decoded = inner.channel.lock().decode(chunk);
        match decoded {
            Ok(Some(Inbound::Message(message))) => route(&inner, message.request_id, message.body),
            Ok(Some(Inbound::Aborted { request_id, status, .. })) => {
                inner
                    .pending
                    .complete(request_id, Err(UaError::fault("abort", status)));
            }
            Ok(None) => {}
            Err(error) => break Some(error),
        }
    };

    if let Some(error) = reason {
        error.log("client reader");
    }
    if let Some(inner) = inner.upgrade() {
        let cancelled = inner.pending.cancel_all();
        inner.channel.lock().close();
        inner.closed.cancel();
        debug!(cancelled, "Client reader stopped");
    }
}

fn route(inner: &Inner, request_id: u32, body: Bytes) {
    let response = Response::decode(body);
    if request_id == 0 {
        match response {
            Ok(Response {
                body: ResponseBody::Publish(message),
                ..
            }) => inner.routes.deliver(message),
            Ok(other) => warn!(service = other.name(), "Unexpected pushed message"),
            Err(error) => error.log("notification"),
        }
        return;
    }
    inner.pending.complete(request_id, response);
}

async fn renewal_loop(inner: std::sync::Weak<Inner>) {
    loop {
        let (renew_at, closed) = {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let renew_at = inner
                .channel
                .lock()
                .tokens()
                .map(|tokens| tokens.current().renew_at(inner.config.renewal_fraction));
            match renew_at {
                Some(at) => (at, inner.closed.clone()),
                None => return,
            }
        };

        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(renew_at)) => {}
            _ = closed.cancelled() => return,
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let client = UaClient { inner };
        match client.renew_token().await {
            Ok(()) => debug!(
                channel_id = client.channel_id(),
                token_id = client.token_id(),
                "Security token renewed"
            ),
            Err(error) if error.is_fatal() => {
                error.log("token renewal");
                return;
            }
            Err(error) => {
                error.log("token renewal");
                tokio::time::sleep(RENEWAL_RETRY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::NotificationMessage;

    fn message(subscription_id: u32, sequence_number: u32) -> PublishResponse {
        PublishResponse {
            subscription_id,
            notification_message: NotificationMessage::keep_alive(sequence_number),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_routes_buffer_until_registered() {
        let routes = NotificationRoutes::default();
        routes.deliver(message(5, 1));
        routes.deliver(message(5, 2));

        let (tx, mut rx) = mpsc::channel(8);
        routes.register(5, tx);
        routes.deliver(message(5, 3));

        for expected in 1..=3 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.notification_message.sequence_number, expected);
        }
    }

    #[tokio::test]
    async fn test_unrouted_buffer_is_bounded() {
        let routes = NotificationRoutes::default();
        for sequence in 0..(UNROUTED_PER_SUBSCRIPTION as u32 + 10) {
            routes.deliver(message(9, sequence));
        }
        for id in 100..(100 + UNROUTED_SUBSCRIPTIONS as u32 + 5) {
            routes.deliver(message(id, 1));
        }
        let routes_map = routes.routes.lock();
        assert!(routes_map.len() <= UNROUTED_SUBSCRIPTIONS);
        match routes_map.get(&9) {
            Some(Route::Waiting(buffered)) => assert_eq!(buffered.len(), UNROUTED_PER_SUBSCRIPTION),
            _ => panic!("expected a waiting route"),
        }
    }

    #[test]
    fn test_request_ids_skip_zero() {
        let counter = AtomicU32::new(u32::MAX);
        assert_eq!(next_nonzero(&counter), u32::MAX);
        assert_eq!(next_nonzero(&counter), 1);
    }
}
