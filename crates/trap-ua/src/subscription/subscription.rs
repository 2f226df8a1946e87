// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription state and the publish cycle.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::monitored_item::MonitoredItem;
use crate::config::{SubscriptionLimits, SubscriptionSettings};
use crate::error::SubscriptionError;
use crate::messages::{NotificationData, NotificationMessage, PublishResponse};
use crate::session::Session;
use crate::status::StatusCode;

/// Revised subscription parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionParameters {
    /// Publishing interval.
    pub publishing_interval: Duration,
    /// Undeliverable intervals before the subscription expires.
    pub lifetime_count: u32,
    /// Empty intervals before a keep-alive.
    pub keep_alive_count: u32,
    /// Most notifications per message (0 = unlimited).
    pub max_notifications_per_publish: u32,
    /// Relative priority.
    pub priority: u8,
    /// Whether data changes are published.
    pub publishing_enabled: bool,
}

impl SubscriptionParameters {
    /// Revises requested settings against server limits.
    ///
    /// The lifetime count is raised to at least three keep-alive counts.
    pub fn revise(limits: &SubscriptionLimits, settings: &SubscriptionSettings) -> Self {
        let publishing_interval = settings
            .publishing_interval
            .clamp(limits.min_publishing_interval, limits.max_publishing_interval);
        let keep_alive_count = settings
            .keep_alive_count
            .clamp(1, limits.max_keep_alive_count.max(1));
        let min_lifetime = keep_alive_count.saturating_mul(3);
        let lifetime_count = settings
            .lifetime_count
            .clamp(min_lifetime, limits.max_lifetime_count.max(min_lifetime));

        Self {
            publishing_interval,
            lifetime_count,
            keep_alive_count,
            max_notifications_per_publish: settings.max_notifications_per_publish,
            priority: settings.priority,
            publishing_enabled: settings.publishing_enabled,
        }
    }
}

/// Result of one publish cycle.
#[derive(Debug, Default)]
pub struct Tick {
    /// Messages to deliver, in order.
    pub messages: Vec<PublishResponse>,
    /// Values carried by data messages.
    pub data_changes: usize,
    /// Values lost to queue overflow since the previous cycle.
    pub overflows: u64,
    /// A keep-alive was produced.
    pub keep_alive: bool,
    /// The lifetime elapsed; the subscription must be removed.
    pub expired: bool,
}

#[derive(Debug)]
struct State {
    parameters: SubscriptionParameters,
    next_sequence: u32,
    keep_alive_counter: u32,
    lifetime_counter: u32,
    retransmission: VecDeque<NotificationMessage>,
}

impl State {
    fn take_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = if sequence == u32::MAX { 1 } else { sequence + 1 };
        sequence
    }

    fn available(&self) -> Vec<u32> {
        self.retransmission
            .iter()
            .map(|m| m.sequence_number)
            .collect()
    }
}

/// A subscription owned by a session.
#[derive(Debug)]
pub struct Subscription {
    id: u32,
    session: Arc<Session>,
    created_at: DateTime<Utc>,
    max_retransmission: usize,
    state: Mutex<State>,
    items: Mutex<BTreeMap<u32, Arc<MonitoredItem>>>,
    next_item_id: AtomicU32,
    cancel: CancellationToken,
    modified: Notify,
}

impl Subscription {
    pub(crate) fn new(
        id: u32,
        session: Arc<Session>,
        parameters: SubscriptionParameters,
        max_retransmission: usize,
    ) -> Self {
        Self {
            id,
            session,
            created_at: Utc::now(),
            max_retransmission: max_retransmission.max(1),
            state: Mutex::new(State {
                parameters,
                next_sequence: 1,
                // First empty cycle announces the subscription with a keep-alive.
                keep_alive_counter: parameters.keep_alive_count,
                lifetime_counter: 0,
                retransmission: VecDeque::new(),
            }),
            items: Mutex::new(BTreeMap::new()),
            next_item_id: AtomicU32::new(1),
            cancel: CancellationToken::new(),
            modified: Notify::new(),
        }
    }

    /// Subscription id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Owning session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current parameters.
    pub fn parameters(&self) -> SubscriptionParameters {
        self.state.lock().parameters
    }

    /// Sequence number the next data message will carry.
    pub fn next_sequence_number(&self) -> u32 {
        self.state.lock().next_sequence
    }

    /// Sequence numbers held for Republish.
    pub fn available_sequence_numbers(&self) -> Vec<u32> {
        self.state.lock().available()
    }

    /// Monitored items, ordered by id.
    pub fn items(&self) -> Vec<Arc<MonitoredItem>> {
        self.items.lock().values().cloned().collect()
    }

    /// Looks up a monitored item.
    pub fn item(&self, id: u32) -> Option<Arc<MonitoredItem>> {
        self.items.lock().get(&id).cloned()
    }

    /// Number of monitored items.
    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn modified(&self) -> &Notify {
        &self.modified
    }

    /// Returns `true` once deleted or expired.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn next_item_id(&self) -> u32 {
        self.next_item_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn insert_item(&self, item: Arc<MonitoredItem>) {
        self.items.lock().insert(item.id(), item);
    }

    pub(crate) fn remove_item(&self, id: u32) -> Option<Arc<MonitoredItem>> {
        let item = self.items.lock().remove(&id)?;
        item.stop();
        Some(item)
    }

    pub(crate) fn modify(&self, parameters: SubscriptionParameters) {
        {
            let mut state = self.state.lock();
            let enabled = state.parameters.publishing_enabled;
            state.parameters = SubscriptionParameters {
                publishing_enabled: enabled,
                ..parameters
            };
            state.lifetime_counter = 0;
        }
        self.modified.notify_one();
    }

    pub(crate) fn set_publishing_enabled(&self, enabled: bool) {
        self.state.lock().parameters.publishing_enabled = enabled;
    }

    /// Stops the publish loop and every sampler, dropping undelivered values.
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
        let items = std::mem::take(&mut *self.items.lock());
        for item in items.values() {
            item.stop();
        }
        self.state.lock().retransmission.clear();
    }

    /// Runs one publish cycle.
    pub(crate) fn tick(&self) -> Tick {
        let attached = self.session.channel_id().is_some();
        let items = self.items();
        let mut state = self.state.lock();
        let mut tick = Tick::default();

        if attached {
            state.lifetime_counter = 0;
        } else {
            state.lifetime_counter = state.lifetime_counter.saturating_add(1);
        }
        if state.lifetime_counter >= state.parameters.lifetime_count {
            let message = NotificationMessage {
                sequence_number: state.take_sequence(),
                publish_time: Utc::now(),
                notification_data: vec![NotificationData::StatusChange(StatusCode::BadTimeout)],
            };
            tick.messages.push(self.response(&state, message, false));
            tick.expired = true;
            return tick;
        }

        let mut notifications = Vec::new();
        if state.parameters.publishing_enabled {
            for item in &items {
                let (drained, lost) = item.drain();
                tick.overflows += lost;
                notifications.extend(drained);
            }
        }

        if notifications.is_empty() {
            state.keep_alive_counter = state.keep_alive_counter.saturating_add(1);
            if state.keep_alive_counter >= state.parameters.keep_alive_count {
                state.keep_alive_counter = 0;
                let message = NotificationMessage::keep_alive(state.next_sequence);
                tick.messages.push(self.response(&state, message, false));
                tick.keep_alive = true;
            }
            return tick;
        }

        state.keep_alive_counter = 0;
        let per_message = match state.parameters.max_notifications_per_publish {
            0 => notifications.len(),
            max => max as usize,
        };
        let batches: Vec<_> = notifications
            .chunks(per_message)
            .map(<[_]>::to_vec)
            .collect();
        let count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            tick.data_changes += batch.len();
            let message = NotificationMessage {
                sequence_number: state.take_sequence(),
                publish_time: Utc::now(),
                notification_data: vec![NotificationData::DataChange(batch)],
            };
            state.retransmission.push_back(message.clone());
            while state.retransmission.len() > self.max_retransmission {
                state.retransmission.pop_front();
            }
            tick.messages.push(self.response(&state, message, index + 1 < count));
        }
        tick
    }

    fn response(&self, state: &State, message: NotificationMessage, more: bool) -> PublishResponse {
        PublishResponse {
            subscription_id: self.id,
            available_sequence_numbers: state.available(),
            more_notifications: more,
            notification_message: message,
            results: Vec::new(),
        }
    }

    /// Releases an acknowledged message from the retransmission queue.
    pub fn acknowledge(&self, sequence_number: u32) -> StatusCode {
        let mut state = self.state.lock();
        state.lifetime_counter = 0;
        match state
            .retransmission
            .iter()
            .position(|m| m.sequence_number == sequence_number)
        {
            Some(index) => {
                state.retransmission.remove(index);
                StatusCode::Good
            }
            None => StatusCode::BadSequenceNumberUnknown,
        }
    }

    /// Returns an unacknowledged message again.
    pub fn republish(&self, sequence_number: u32) -> Result<NotificationMessage, SubscriptionError> {
        let state = self.state.lock();
        state
            .retransmission
            .iter()
            .find(|m| m.sequence_number == sequence_number)
            .cloned()
            .ok_or(SubscriptionError::MessageNotAvailable { sequence_number })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::NodeHandle;
    use crate::messages::{DataChangeFilter, TimestampsToReturn};
    use crate::session::IdentityToken;
    use crate::subscription::monitored_item::ItemParameters;
    use crate::transport::outbound_queue;
    use crate::types::{AttributeId, DataValue, MonitoringMode, NodeId};

    fn session(attached: bool) -> Arc<Session> {
        let session = Arc::new(Session::new(
            "Session1".into(),
            "test".into(),
            Duration::from_secs(60),
            16,
            1,
        ));
        if attached {
            let (tx, _rx) = outbound_queue();
            session.activate(IdentityToken::Anonymous, 1, tx);
        } else {
            session.detach();
        }
        session
    }

    fn parameters(keep_alive_count: u32, lifetime_count: u32) -> SubscriptionParameters {
        SubscriptionParameters {
            publishing_interval: Duration::from_millis(100),
            lifetime_count,
            keep_alive_count,
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }

    fn item(subscription: &Subscription, queue_size: usize) -> Arc<MonitoredItem> {
        let id = subscription.next_item_id();
        let item = Arc::new(MonitoredItem::new(
            id,
            subscription.id(),
            NodeHandle::new(NodeId::numeric(2, id), 0),
            ItemParameters {
                attribute: AttributeId::Value,
                client_handle: id,
                sampling_interval: Duration::from_millis(10),
                monitoring_mode: MonitoringMode::Reporting,
                filter: DataChangeFilter::default(),
                timestamps: TimestampsToReturn::Both,
                queue_size,
                discard_oldest: true,
            },
            subscription.cancellation().child_token(),
        ));
        subscription.insert_item(item.clone());
        item
    }

    #[test]
    fn test_revise_clamps_to_limits() {
        let limits = SubscriptionLimits::default();
        let settings = SubscriptionSettings {
            publishing_interval: Duration::ZERO,
            lifetime_count: 1,
            keep_alive_count: 0,
            ..Default::default()
        };
        let revised = SubscriptionParameters::revise(&limits, &settings);
        assert_eq!(revised.publishing_interval, limits.min_publishing_interval);
        assert_eq!(revised.keep_alive_count, 1);
        assert_eq!(revised.lifetime_count, 3);
    }

    #[test]
    fn test_keep_alive_then_data() {
        let subscription = Subscription::new(1, session(true), parameters(3, 30), 8);
        let item = item(&subscription, 5);

        let tick = subscription.tick();
        assert!(tick.keep_alive);
        assert_eq!(tick.messages[0].notification_message.sequence_number, 1);
        assert!(tick.messages[0].notification_message.is_keep_alive());

        assert!(subscription.tick().messages.is_empty());

        item.offer(DataValue::new(1.0));
        item.offer(DataValue::new(2.0));
        let tick = subscription.tick();
        assert_eq!(tick.data_changes, 2);
        let message = &tick.messages[0].notification_message;
        assert_eq!(message.sequence_number, 1);
        assert_eq!(message.data_changes().count(), 2);
        assert_eq!(subscription.next_sequence_number(), 2);
        assert_eq!(tick.messages[0].available_sequence_numbers, vec![1]);

        assert_eq!(subscription.acknowledge(1), StatusCode::Good);
        assert_eq!(subscription.acknowledge(1), StatusCode::BadSequenceNumberUnknown);
    }

    #[test]
    fn test_split_by_max_notifications() {
        let mut params = parameters(3, 30);
        params.max_notifications_per_publish = 2;
        let subscription = Subscription::new(1, session(true), params, 8);
        let item = item(&subscription, 10);
        for i in 0..5 {
            item.offer(DataValue::new(f64::from(i)));
        }

        let tick = subscription.tick();
        let sequences: Vec<_> = tick
            .messages
            .iter()
            .map(|m| m.notification_message.sequence_number)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(tick.messages[0].more_notifications);
        assert!(!tick.messages[2].more_notifications);
    }

    #[test]
    fn test_lifetime_expires_while_detached() {
        let subscription = Subscription::new(1, session(false), parameters(1, 3), 8);
        assert!(!subscription.tick().expired);
        assert!(!subscription.tick().expired);
        let tick = subscription.tick();
        assert!(tick.expired);
        assert_eq!(
            tick.messages[0].notification_message.status_change(),
            Some(StatusCode::BadTimeout)
        );
    }

    #[test]
    fn test_republish_window() {
        let subscription = Subscription::new(1, session(true), parameters(3, 30), 2);
        let item = item(&subscription, 1);
        for i in 0..3 {
            item.offer(DataValue::new(f64::from(i)));
            subscription.tick();
        }
        assert_eq!(subscription.available_sequence_numbers(), vec![2, 3]);
        assert!(subscription.republish(3).is_ok());
        let error = subscription.republish(1).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadMessageNotAvailable);
    }

    #[test]
    fn test_disabled_publishing_keeps_values_queued() {
        let subscription = Subscription::new(1, session(true), parameters(1, 30), 8);
        let item = item(&subscription, 5);
        subscription.set_publishing_enabled(false);
        item.offer(DataValue::new(7.0));
        assert!(subscription.tick().keep_alive);
        assert_eq!(item.queued(), 1);
    }
}
