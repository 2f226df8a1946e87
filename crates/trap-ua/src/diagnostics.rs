// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Diagnostics aggregator.
//!
//! [`Diagnostics`] is a passive observer: channels report through
//! [`ChannelObserver`], sessions and subscriptions through the `record_*`
//! methods. It never touches protocol state. [`Diagnostics::snapshot`]
//! returns a serializable copy of every counter.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::trace;

use crate::channel::{ChannelEvent, ChannelObserver};
use crate::status::StatusCode;

/// Counters of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDiagnostics {
    /// Peer address and port.
    pub peer: SocketAddr,
    /// When the channel was established.
    pub opened_at: DateTime<Utc>,
    /// When the channel closed.
    pub closed_at: Option<DateTime<Utc>>,
    /// Completed round trips.
    pub transactions: u64,
    /// Round trips answered with a bad status.
    pub faults: u64,
    /// Request bytes.
    pub bytes_received: u64,
    /// Response bytes.
    pub bytes_sent: u64,
    /// Token renewals.
    pub token_renewals: u64,
}

/// Counters of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceDiagnostics {
    /// Calls.
    pub calls: u64,
    /// Calls answered with a bad status.
    pub faults: u64,
    /// Summed processing time in microseconds.
    pub total_micros: u64,
}

/// Counters of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDiagnostics {
    /// Session name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Successful activations.
    pub activations: u64,
    /// Close time.
    pub closed_at: Option<DateTime<Utc>>,
    /// `true` if the session timed out.
    pub expired: bool,
}

/// Counters of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionDiagnostics {
    /// Owning session name.
    pub session: String,
    /// Notification messages with data.
    pub notifications: u64,
    /// Data change notifications over all messages.
    pub data_changes: u64,
    /// Keep-alive messages.
    pub keep_alives: u64,
    /// Republish requests served.
    pub republished: u64,
    /// Samples discarded because a queue was full.
    pub queue_overflows: u64,
    /// `true` once deleted or expired.
    pub deleted: bool,
}

/// Totals over the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    /// Channels established.
    pub channels_opened: u64,
    /// Channels closed.
    pub channels_closed: u64,
    /// Sessions created.
    pub sessions_created: u64,
    /// Sessions closed by the client.
    pub sessions_closed: u64,
    /// Sessions that timed out.
    pub sessions_expired: u64,
    /// Rejected activations.
    pub activation_failures: u64,
    /// Subscriptions created.
    pub subscriptions_created: u64,
    /// Subscriptions deleted or expired.
    pub subscriptions_deleted: u64,
    /// Faulting change handlers and observers.
    pub handler_faults: u64,
}

#[derive(Debug, Default)]
struct AtomicTotals {
    channels_opened: AtomicU64,
    channels_closed: AtomicU64,
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_expired: AtomicU64,
    activation_failures: AtomicU64,
    subscriptions_created: AtomicU64,
    subscriptions_deleted: AtomicU64,
    handler_faults: AtomicU64,
}

impl AtomicTotals {
    fn load(&self) -> Totals {
        Totals {
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            channels_closed: self.channels_closed.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            activation_failures: self.activation_failures.load(Ordering::Relaxed),
            subscriptions_created: self.subscriptions_created.load(Ordering::Relaxed),
            subscriptions_deleted: self.subscriptions_deleted.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    /// When the aggregator was created.
    pub started_at: DateTime<Utc>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Totals.
    pub totals: Totals,
    /// Per channel id, ascending.
    pub channels: Vec<(u32, ChannelDiagnostics)>,
    /// Per service name, ascending.
    pub services: Vec<(&'static str, ServiceDiagnostics)>,
    /// Per session id string, ascending.
    pub sessions: Vec<(String, SessionDiagnostics)>,
    /// Per subscription id, ascending.
    pub subscriptions: Vec<(u32, SubscriptionDiagnostics)>,
}

impl DiagnosticsSnapshot {
    /// Counters of `channel_id`.
    pub fn channel(&self, channel_id: u32) -> Option<&ChannelDiagnostics> {
        self.channels
            .iter()
            .find(|(id, _)| *id == channel_id)
            .map(|(_, c)| c)
    }

    /// Counters of `service`.
    pub fn service(&self, service: &str) -> Option<&ServiceDiagnostics> {
        self.services
            .iter()
            .find(|(name, _)| *name == service)
            .map(|(_, s)| s)
    }

    /// Counters of `subscription_id`.
    pub fn subscription(&self, subscription_id: u32) -> Option<&SubscriptionDiagnostics> {
        self.subscriptions
            .iter()
            .find(|(id, _)| *id == subscription_id)
            .map(|(_, s)| s)
    }

    /// Renders the snapshot as pretty JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Process-wide counters.
#[derive(Debug)]
pub struct Diagnostics {
    started_at: DateTime<Utc>,
    totals: AtomicTotals,
    channels: DashMap<u32, ChannelDiagnostics>,
    services: DashMap<&'static str, ServiceDiagnostics>,
    sessions: DashMap<String, SessionDiagnostics>,
    subscriptions: DashMap<u32, SubscriptionDiagnostics>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            totals: AtomicTotals::default(),
            channels: DashMap::new(),
            services: DashMap::new(),
            sessions: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    fn channel_opened(&self, channel_id: u32, peer: SocketAddr) {
        self.totals.channels_opened.fetch_add(1, Ordering::Relaxed);
        self.channels.insert(
            channel_id,
            ChannelDiagnostics {
                peer,
                opened_at: Utc::now(),
                closed_at: None,
                transactions: 0,
                faults: 0,
                bytes_received: 0,
                bytes_sent: 0,
                token_renewals: 0,
            },
        );
    }

    fn channel_closed(&self, channel_id: u32) {
        self.totals.channels_closed.fetch_add(1, Ordering::Relaxed);
        if let Some(mut channel) = self.channels.get_mut(&channel_id) {
            channel.closed_at = Some(Utc::now());
        }
    }

    fn transaction(
        &self,
        channel_id: u32,
        service: &'static str,
        status: StatusCode,
        bytes_received: usize,
        bytes_sent: usize,
        duration: Duration,
    ) {
        if let Some(mut channel) = self.channels.get_mut(&channel_id) {
            channel.transactions += 1;
            channel.bytes_received += bytes_received as u64;
            channel.bytes_sent += bytes_sent as u64;
            if status.is_bad() {
                channel.faults += 1;
            }
        }
        let mut entry = self.services.entry(service).or_default();
        entry.calls += 1;
        if status.is_bad() {
            entry.faults += 1;
        }
        entry.total_micros += u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Records a created session.
    pub fn record_session_created(&self, session_id: &str, name: &str) {
        self.totals.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            session_id.to_string(),
            SessionDiagnostics {
                name: name.to_string(),
                created_at: Utc::now(),
                activations: 0,
                closed_at: None,
                expired: false,
            },
        );
    }

    /// Records a successful activation.
    pub fn record_session_activated(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.activations += 1;
        }
    }

    /// Records a rejected activation.
    pub fn record_activation_failure(&self) {
        self.totals.activation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a closed or expired session.
    pub fn record_session_closed(&self, session_id: &str, expired: bool) {
        let counter = if expired {
            &self.totals.sessions_expired
        } else {
            &self.totals.sessions_closed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.closed_at = Some(Utc::now());
            session.expired = expired;
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Records a created subscription.
    pub fn record_subscription_created(&self, subscription_id: u32, session: &str) {
        self.totals
            .subscriptions_created
            .fetch_add(1, Ordering::Relaxed);
        self.subscriptions.insert(
            subscription_id,
            SubscriptionDiagnostics {
                session: session.to_string(),
                notifications: 0,
                data_changes: 0,
                keep_alives: 0,
                republished: 0,
                queue_overflows: 0,
                deleted: false,
            },
        );
    }

    /// Records a deleted or expired subscription.
    pub fn record_subscription_deleted(&self, subscription_id: u32) {
        self.totals
            .subscriptions_deleted
            .fetch_add(1, Ordering::Relaxed);
        if let Some(mut subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.deleted = true;
        }
    }

    /// Records a notification message carrying `data_changes` values.
    pub fn record_notification(&self, subscription_id: u32, data_changes: usize) {
        if let Some(mut subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.notifications += 1;
            subscription.data_changes += data_changes as u64;
        }
    }

    /// Records a keep-alive message.
    pub fn record_keep_alive(&self, subscription_id: u32) {
        if let Some(mut subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.keep_alives += 1;
        }
    }

    /// Records a served Republish.
    pub fn record_republish(&self, subscription_id: u32) {
        if let Some(mut subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.republished += 1;
        }
    }

    /// Records samples dropped on queue overflow.
    pub fn record_queue_overflow(&self, subscription_id: u32, dropped: u64) {
        if let Some(mut subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.queue_overflows += dropped;
        }
    }

    /// Records a faulting handler.
    pub fn record_handler_fault(&self, context: &str) {
        trace!(context, "Handler fault recorded");
        self.totals.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of faulting handlers so far.
    pub fn handler_faults(&self) -> u64 {
        self.totals.handler_faults.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Copies every counter.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut channels: Vec<_> = self
            .channels
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        channels.sort_by_key(|(id, _)| *id);

        let mut services: Vec<_> = self
            .services
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        services.sort_by_key(|(name, _)| *name);

        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));

        let mut subscriptions: Vec<_> = self
            .subscriptions
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        subscriptions.sort_by_key(|(id, _)| *id);

        DiagnosticsSnapshot {
            started_at: self.started_at,
            taken_at: Utc::now(),
            totals: self.totals.load(),
            channels,
            services,
            sessions,
            subscriptions,
        }
    }
}

impl ChannelObserver for Diagnostics {
    fn on_event(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::NewChannel { channel_id, peer } => self.channel_opened(*channel_id, *peer),
            ChannelEvent::CloseChannel { channel_id, .. } => self.channel_closed(*channel_id),
            ChannelEvent::TransactionDone {
                channel_id,
                service,
                status,
                bytes_received,
                bytes_sent,
                duration,
            } => self.transaction(
                *channel_id,
                *service,
                *status,
                *bytes_received,
                *bytes_sent,
                *duration,
            ),
            ChannelEvent::TokenRenewed { channel_id, .. } => {
                if let Some(mut channel) = self.channels.get_mut(channel_id) {
                    channel.token_renewals += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn test_channel_events_are_counted() {
        let diagnostics = Diagnostics::new();
        diagnostics.on_event(&ChannelEvent::NewChannel {
            channel_id: 1,
            peer: peer(),
        });
        for status in [StatusCode::Good, StatusCode::BadNodeIdUnknown] {
            diagnostics.on_event(&ChannelEvent::TransactionDone {
                channel_id: 1,
                service: "Read",
                status,
                bytes_received: 100,
                bytes_sent: 200,
                duration: Duration::from_millis(2),
            });
        }
        diagnostics.on_event(&ChannelEvent::CloseChannel {
            channel_id: 1,
            peer: peer(),
        });

        let snapshot = diagnostics.snapshot();
        let channel = snapshot.channel(1).unwrap();
        assert_eq!(channel.transactions, 2);
        assert_eq!(channel.faults, 1);
        assert_eq!(channel.bytes_sent, 400);
        assert!(channel.closed_at.is_some());
        assert_eq!(snapshot.service("Read").unwrap().calls, 2);
        assert_eq!(snapshot.totals.channels_opened, 1);
        assert_eq!(snapshot.totals.channels_closed, 1);
    }

    #[test]
    fn test_session_and_subscription_counters() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_session_created("ns=1;g=a", "Session1");
        diagnostics.record_session_activated("ns=1;g=a");
        diagnostics.record_subscription_created(3, "Session1");
        diagnostics.record_notification(3, 4);
        diagnostics.record_keep_alive(3);
        diagnostics.record_queue_overflow(3, 2);
        diagnostics.record_handler_fault("on_change");
        diagnostics.record_session_closed("ns=1;g=a", true);

        let snapshot = diagnostics.snapshot();
        let subscription = snapshot.subscription(3).unwrap();
        assert_eq!(subscription.data_changes, 4);
        assert_eq!(subscription.keep_alives, 1);
        assert_eq!(subscription.queue_overflows, 2);
        assert_eq!(snapshot.totals.sessions_expired, 1);
        assert_eq!(snapshot.totals.handler_faults, 1);
        assert!(snapshot.sessions[0].1.expired);

        let json = snapshot.to_json();
        assert!(json.contains("\"handler_faults\": 1"));
    }
}
