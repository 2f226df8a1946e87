// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! A server-side session.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use super::identity::IdentityToken;
use crate::browse::ContinuationPoint;
use crate::messages::{PublishResponse, Response};
use crate::transport::{MessageType, Outbound, OutboundSender};
use crate::types::NodeId;

/// How a pushed notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the session's channel.
    Sent,
    /// Held until the session is bound to a channel again.
    Buffered,
}

#[derive(Debug)]
struct Binding {
    channel_id: Option<u32>,
    outbound: Option<OutboundSender>,
    detached_at: Option<Instant>,
    pending: VecDeque<Bytes>,
}

#[derive(Debug)]
struct Activation {
    identity: Option<IdentityToken>,
    activated_at: Option<DateTime<Utc>>,
    last_activity: Instant,
}

/// Session state shared by the dispatcher and the subscription engine.
#[derive(Debug)]
pub struct Session {
    session_id: NodeId,
    authentication_token: NodeId,
    name: String,
    client_application: String,
    timeout: Duration,
    max_pending: usize,
    created_at: DateTime<Utc>,
    created: Instant,
    binding: Mutex<Binding>,
    activation: Mutex<Activation>,
    continuation_points: Mutex<HashMap<Vec<u8>, ContinuationPoint>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        name: String,
        client_application: String,
        timeout: Duration,
        max_pending: usize,
        channel_id: u32,
    ) -> Self {
        Self {
            session_id: NodeId::guid(1, Uuid::new_v4()),
            authentication_token: NodeId::guid(1, Uuid::new_v4()),
            name,
            client_application,
            timeout,
            max_pending,
            created_at: Utc::now(),
            created: Instant::now(),
            binding: Mutex::new(Binding {
                channel_id: Some(channel_id),
                outbound: None,
                detached_at: None,
                pending: VecDeque::new(),
            }),
            activation: Mutex::new(Activation {
                identity: None,
                activated_at: None,
                last_activity: Instant::now(),
            }),
            continuation_points: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Public session id.
    pub fn session_id(&self) -> &NodeId {
        &self.session_id
    }

    /// Secret token identifying the session in request headers.
    pub fn authentication_token(&self) -> &NodeId {
        &self.authentication_token
    }

    /// Server-assigned name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Application name the client reported.
    pub fn client_application(&self) -> &str {
        &self.client_application
    }

    /// Revised timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Channel the session is bound to.
    pub fn channel_id(&self) -> Option<u32> {
        self.binding.lock().channel_id
    }

    /// Identity of the last activation.
    pub fn identity(&self) -> Option<IdentityToken> {
        self.activation.lock().identity.clone()
    }

    /// Time of the last activation.
    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activation.lock().activated_at
    }

    /// Returns `true` once activated.
    pub fn is_activated(&self) -> bool {
        self.activation.lock().activated_at.is_some()
    }

    /// Returns `true` once closed or expired.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Notifications held while detached.
    pub fn pending_notifications(&self) -> usize {
        self.binding.lock().pending.len()
    }

    pub(crate) fn touch(&self) {
        self.activation.lock().last_activity = Instant::now();
    }

    pub(crate) fn activate(&self, identity: IdentityToken, channel_id: u32, outbound: OutboundSender) {
        {
            let mut activation = self.activation.lock();
            activation.identity = Some(identity);
            activation.activated_at = Some(Utc::now());
            activation.last_activity = Instant::now();
        }
        self.attach(channel_id, outbound);
    }

    fn attach(&self, channel_id: u32, outbound: OutboundSender) {
        let mut binding = self.binding.lock();
        binding.channel_id = Some(channel_id);
        binding.detached_at = None;

        let mut flushed = 0usize;
        while let Some(body) = binding.pending.pop_front() {
            match outbound.try_send(push(body)) {
                Ok(()) => flushed += 1,
                Err(TrySendError::Full(Outbound::Message { body, .. }))
                | Err(TrySendError::Closed(Outbound::Message { body, .. })) => {
                    binding.pending.push_front(body);
                    break;
                }
                Err(_) => break,
            }
        }
        binding.outbound = Some(outbound);
        if flushed > 0 {
            debug!(session = %self.name, channel_id, flushed, "Flushed buffered notifications");
        }
    }

    /// Unbinds the session after its channel closed.
    pub(crate) fn detach(&self) {
        let mut binding = self.binding.lock();
        binding.channel_id = None;
        binding.outbound = None;
        binding.detached_at.get_or_insert_with(Instant::now);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.detach();
        self.continuation_points.lock().clear();
    }

    /// Returns `true` if the session should expire at `now`.
    pub(crate) fn is_expired(&self, now: Instant, grace: Duration) -> bool {
        if !self.is_activated() {
            return now.saturating_duration_since(self.created) >= self.timeout;
        }
        match self.binding.lock().detached_at {
            Some(detached_at) => now.saturating_duration_since(detached_at) >= grace,
            None => false,
        }
    }

    /// Pushes a notification message to the client.
    pub fn deliver(&self, message: PublishResponse) -> Delivery {
        let body = Response::new(0, message).encode();
        let mut binding = self.binding.lock();

        if let Some(outbound) = binding.outbound.clone() {
            match outbound.try_send(push(body)) {
                Ok(()) => return Delivery::Sent,
                Err(TrySendError::Full(item)) => {
                    warn!(session = %self.name, "Outbound queue full, buffering notification");
                    self.buffer(&mut binding, item);
                }
                Err(TrySendError::Closed(item)) => {
                    binding.outbound = None;
                    self.buffer(&mut binding, item);
                }
            }
        } else {
            binding.pending.push_back(body);
            self.trim(&mut binding);
        }
        Delivery::Buffered
    }

    fn buffer(&self, binding: &mut Binding, item: Outbound) {
        if let Outbound::Message { body, .. } = item {
            binding.pending.push_back(body);
            self.trim(binding);
        }
    }

    fn trim(&self, binding: &mut Binding) {
        while binding.pending.len() > self.max_pending.max(1) {
            binding.pending.pop_front();
        }
    }

    // =========================================================================
    // Browse continuation points
    // =========================================================================

    /// Stores a continuation point; fails when `max` points are held.
    pub(crate) fn store_continuation_point(
        &self,
        point: ContinuationPoint,
        max: usize,
    ) -> Option<Vec<u8>> {
        let mut points = self.continuation_points.lock();
        if max > 0 && points.len() >= max {
            return None;
        }
        let id = Uuid::new_v4().as_bytes().to_vec();
        points.insert(id.clone(), point);
        Some(id)
    }

    /// Removes and returns a continuation point.
    pub(crate) fn take_continuation_point(&self, id: &[u8]) -> Option<ContinuationPoint> {
        self.continuation_points.lock().remove(id)
    }

    /// Number of held continuation points.
    pub fn continuation_points(&self) -> usize {
        self.continuation_points.lock().len()
    }
}

fn push(body: Bytes) -> Outbound {
    Outbound::Message {
        message_type: MessageType::Message,
        request_id: 0,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::NotificationMessage;
    use crate::transport::outbound_queue;

    fn session(max_pending: usize) -> Session {
        Session::new(
            "Session1".into(),
            "test".into(),
            Duration::from_secs(30),
            max_pending,
            1,
        )
    }

    fn message(sequence_number: u32) -> PublishResponse {
        PublishResponse {
            subscription_id: 1,
            notification_message: NotificationMessage::keep_alive(sequence_number),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_detached_session_buffers_and_flushes() {
        let session = session(2);
        assert_eq!(session.deliver(message(1)), Delivery::Buffered);
        session.deliver(message(2));
        session.deliver(message(3));
        assert_eq!(session.pending_notifications(), 2);

        let (tx, mut rx) = outbound_queue();
        session.activate(IdentityToken::Anonymous, 9, tx);
        assert_eq!(session.pending_notifications(), 0);
        assert_eq!(session.channel_id(), Some(9));

        let mut received = 0;
        while let Ok(Outbound::Message { request_id, .. }) = rx.try_recv() {
            assert_eq!(request_id, 0);
            received += 1;
        }
        assert_eq!(received, 2);
        assert_eq!(session.deliver(message(4)), Delivery::Sent);
    }

    #[test]
    fn test_expiry() {
        let session = session(4);
        let now = Instant::now();
        assert!(!session.is_expired(now, Duration::from_secs(1)));
        assert!(session.is_expired(now + Duration::from_secs(31), Duration::from_secs(1)));

        let (tx, _rx) = outbound_queue();
        session.activate(IdentityToken::Anonymous, 1, tx);
        assert!(!session.is_expired(now + Duration::from_secs(60), Duration::from_secs(1)));
        session.detach();
        assert!(session.is_expired(Instant::now() + Duration::from_secs(2), Duration::from_secs(1)));
    }
}
