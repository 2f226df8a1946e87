// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The subscription engine.
//!
//! Owns every subscription of the server, runs one publish task per
//! subscription and one sampling task per monitored item.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::monitored_item::{run_sampler, ItemParameters, MonitoredItem};
use super::subscription::{Subscription, SubscriptionParameters};
use crate::address_space::AddressSpace;
use crate::config::{MonitoredItemOptions, SubscriptionLimits, SubscriptionSettings};
use crate::diagnostics::Diagnostics;
use crate::error::{SubscriptionError, UaError, UaResult};
use crate::messages::{
    from_millis, millis, DataChangeFilter, MonitoredItemCreateRequest, MonitoredItemCreateResult,
    MonitoringParameters, NotificationMessage, PublishResponse, ReadValueId,
    SubscriptionAcknowledgement, TimestampsToReturn,
};
use crate::session::{Delivery, Session};
use crate::status::StatusCode;
use crate::types::{MonitoringMode, NodeId};

/// Receives every notification message the engine publishes.
///
/// Sinks run on the publish task. Errors and panics are logged and counted
/// as handler faults; they never stop the subscription.
pub trait NotificationSink: Send + Sync {
    /// Called once per published message.
    fn on_notification(&self, session: &Session, message: &PublishResponse) -> UaResult<()>;
}

/// Where a monitored item's sampler should take its values from.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Sampling {
    Interval(Duration),
    Events,
}

struct Shared {
    limits: SubscriptionLimits,
    address_space: Arc<dyn AddressSpace>,
    diagnostics: Arc<Diagnostics>,
    subscriptions: DashMap<u32, Arc<Subscription>>,
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
    next_id: AtomicU32,
}

/// Creates, publishes and deletes subscriptions.
#[derive(Clone)]
pub struct SubscriptionEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("subscriptions", &self.shared.subscriptions.len())
            .field("limits", &self.shared.limits)
            .finish()
    }
}

impl SubscriptionEngine {
    /// Creates an engine reading from `address_space`.
    pub fn new(
        limits: SubscriptionLimits,
        address_space: Arc<dyn AddressSpace>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                limits,
                address_space,
                diagnostics,
                subscriptions: DashMap::new(),
                sinks: RwLock::new(Vec::new()),
                next_id: AtomicU32::new(1),
            }),
        }
    }

    /// Limits in effect.
    pub fn limits(&self) -> &SubscriptionLimits {
        &self.shared.limits
    }

    /// Registers a notification sink.
    pub fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.shared.sinks.write().push(sink);
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.shared.subscriptions.len()
    }

    /// Returns `true` if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.shared.subscriptions.is_empty()
    }

    /// Looks up a subscription by id.
    pub fn subscription(&self, id: u32) -> Option<Arc<Subscription>> {
        self.shared.subscriptions.get(&id).map(|s| s.clone())
    }

    /// Subscriptions owned by `session`.
    pub fn subscriptions_of(&self, session: &Session) -> Vec<Arc<Subscription>> {
        let mut owned: Vec<_> = self
            .shared
            .subscriptions
            .iter()
            .filter(|s| s.session().session_id() == session.session_id())
            .map(|s| s.clone())
            .collect();
        owned.sort_by_key(|s| s.id());
        owned
    }

    fn owned(&self, session: &Session, id: u32) -> Result<Arc<Subscription>, SubscriptionError> {
        self.subscription(id)
            .filter(|s| s.session().session_id() == session.session_id())
            .ok_or(SubscriptionError::SubscriptionIdInvalid { id })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates a subscription for `session` and starts its publish task.
    #[instrument(skip_all, fields(session = %session.name()))]
    pub fn create_subscription(
        &self,
        session: &Arc<Session>,
        settings: &SubscriptionSettings,
    ) -> Result<Arc<Subscription>, SubscriptionError> {
        let max = self.shared.limits.max_subscriptions_per_session;
        if self.subscriptions_of(session).len() >= max {
            return Err(SubscriptionError::TooManySubscriptions { max });
        }

        let parameters = SubscriptionParameters::revise(&self.shared.limits, settings);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription::new(
            id,
            session.clone(),
            parameters,
            self.shared.limits.max_retransmission_queue,
        ));
        self.shared.subscriptions.insert(id, subscription.clone());
        self.shared
            .diagnostics
            .record_subscription_created(id, session.name());

        tokio::spawn(run_publisher(self.shared.clone(), subscription.clone()));
        info!(
            subscription_id = id,
            publishing_interval = ?parameters.publishing_interval,
            keep_alive_count = parameters.keep_alive_count,
            lifetime_count = parameters.lifetime_count,
            "Subscription created"
        );
        Ok(subscription)
    }

    /// Revises the parameters of a subscription; the publishing mode is kept.
    pub fn modify_subscription(
        &self,
        session: &Session,
        id: u32,
        settings: &SubscriptionSettings,
    ) -> Result<SubscriptionParameters, SubscriptionError> {
        let subscription = self.owned(session, id)?;
        let parameters = SubscriptionParameters::revise(&self.shared.limits, settings);
        subscription.modify(parameters);
        debug!(subscription_id = id, ?parameters, "Subscription modified");
        Ok(subscription.parameters())
    }

    /// Enables or disables publishing; one status per id.
    pub fn set_publishing_mode(&self, session: &Session, enabled: bool, ids: &[u32]) -> Vec<StatusCode> {
        ids.iter()
            .map(|&id| match self.owned(session, id) {
                Ok(subscription) => {
                    subscription.set_publishing_enabled(enabled);
                    StatusCode::Good
                }
                Err(e) => e.status_code(),
            })
            .collect()
    }

    /// Deletes subscriptions; one status per id.
    pub fn delete_subscriptions(&self, session: &Session, ids: &[u32]) -> Vec<StatusCode> {
        ids.iter()
            .map(|&id| match self.owned(session, id) {
                Ok(_) => {
                    self.shared.remove(id);
                    StatusCode::Good
                }
                Err(e) => e.status_code(),
            })
            .collect()
    }

    /// Deletes every subscription of a session.
    pub fn delete_for_session(&self, session_id: &NodeId) -> usize {
        let ids: Vec<u32> = self
            .shared
            .subscriptions
            .iter()
            .filter(|s| s.session().session_id() == session_id)
            .map(|s| s.id())
            .collect();
        for id in &ids {
            self.shared.remove(*id);
        }
        if !ids.is_empty() {
            debug!(%session_id, count = ids.len(), "Deleted subscriptions of session");
        }
        ids.len()
    }

    /// Stops every subscription.
    pub fn shutdown(&self) {
        let ids: Vec<u32> = self.shared.subscriptions.iter().map(|s| s.id()).collect();
        for id in ids {
            self.shared.remove(id);
        }
    }

    // =========================================================================
    // Monitored items
    // =========================================================================

    /// Creates monitored items; failures are reported per item.
    pub async fn create_monitored_items(
        &self,
        session: &Session,
        subscription_id: u32,
        timestamps: TimestampsToReturn,
        requests: &[MonitoredItemCreateRequest],
    ) -> Result<Vec<MonitoredItemCreateResult>, SubscriptionError> {
        let subscription = self.owned(session, subscription_id)?;
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let result = match self.add_item(&subscription, timestamps, request).await {
                Ok(item) => MonitoredItemCreateResult {
                    status_code: StatusCode::Good,
                    monitored_item_id: item.id(),
                    revised_sampling_interval: millis(item.parameters().sampling_interval),
                    revised_queue_size: item.parameters().queue_size as u32,
                },
                Err(status) => MonitoredItemCreateResult::from_status(status),
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Monitors one node attribute with the given options.
    pub async fn monitor(
        &self,
        session: &Session,
        subscription_id: u32,
        node_id: NodeId,
        options: &MonitoredItemOptions,
    ) -> UaResult<Arc<MonitoredItem>> {
        options.validate()?;
        let subscription = self.owned(session, subscription_id)?;
        let request = MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId::new(node_id, options.attribute),
            monitoring_mode: options.monitoring_mode,
            requested_parameters: MonitoringParameters {
                client_handle: 0,
                sampling_interval: millis(options.sampling_interval),
                filter: Some(DataChangeFilter {
                    trigger: options.trigger,
                    deadband: options.deadband,
                }),
                queue_size: options.queue_size,
                discard_oldest: options.discard_oldest,
            },
        };
        self.add_item(&subscription, TimestampsToReturn::Both, &request)
            .await
            .map_err(|status| UaError::fault("Monitor", status))
    }

    async fn add_item(
        &self,
        subscription: &Arc<Subscription>,
        timestamps: TimestampsToReturn,
        request: &MonitoredItemCreateRequest,
    ) -> Result<Arc<MonitoredItem>, StatusCode> {
        let limits = &self.shared.limits;
        if subscription.item_count() >= limits.max_monitored_items_per_subscription {
            return Err(StatusCode::BadTooManyMonitoredItems);
        }
        let attribute = request
            .item_to_monitor
            .attribute()
            .ok_or(StatusCode::BadAttributeIdInvalid)?;
        let node = self
            .shared
            .address_space
            .find_node(&request.item_to_monitor.node_id)
            .await
            .ok_or(StatusCode::BadNodeIdUnknown)?;

        let requested = &request.requested_parameters;
        let changes = self.shared.address_space.value_changes();
        let sampling = self.revise_sampling(subscription, requested.sampling_interval, changes.is_some());
        let queue_size = requested.queue_size.clamp(1, limits.max_queue_size.max(1));

        let parameters = ItemParameters {
            attribute,
            client_handle: requested.client_handle,
            sampling_interval: match sampling {
                Sampling::Interval(period) => period,
                Sampling::Events => Duration::ZERO,
            },
            monitoring_mode: request.monitoring_mode,
            filter: requested.filter.unwrap_or_default(),
            timestamps,
            queue_size: queue_size as usize,
            discard_oldest: requested.discard_oldest,
        };

        let item = Arc::new(MonitoredItem::new(
            subscription.next_item_id(),
            subscription.id(),
            node,
            parameters,
            subscription.cancellation().child_token(),
        ));
        subscription.insert_item(item.clone());

        if request.monitoring_mode != MonitoringMode::Disabled {
            tokio::spawn(run_sampler(
                item.clone(),
                self.shared.address_space.clone(),
                changes.filter(|_| sampling == Sampling::Events),
                limits.min_sampling_interval,
            ));
        }
        debug!(
            subscription_id = subscription.id(),
            item_id = item.id(),
            node_id = %item.node().node_id,
            ?sampling,
            queue_size,
            "Monitored item created"
        );
        Ok(item)
    }

    /// Negative intervals follow the publishing interval; zero follows change
    /// events when the address space offers them.
    fn revise_sampling(&self, subscription: &Subscription, requested: f64, events: bool) -> Sampling {
        let min = self.shared.limits.min_sampling_interval;
        if requested < 0.0 {
            return Sampling::Interval(subscription.parameters().publishing_interval.max(min));
        }
        let period = from_millis(requested);
        if period.is_zero() && events {
            Sampling::Events
        } else {
            Sampling::Interval(period.max(min))
        }
    }

    /// Deletes monitored items; one status per id.
    pub fn delete_monitored_items(
        &self,
        session: &Session,
        subscription_id: u32,
        ids: &[u32],
    ) -> Result<Vec<StatusCode>, SubscriptionError> {
        let subscription = self.owned(session, subscription_id)?;
        Ok(ids
            .iter()
            .map(|&id| match subscription.remove_item(id) {
                Some(_) => StatusCode::Good,
                None => StatusCode::BadMonitoredItemIdInvalid,
            })
            .collect())
    }

    // =========================================================================
    // Acknowledgement and republish
    // =========================================================================

    /// Applies acknowledgements; one status per entry.
    pub fn acknowledge(
        &self,
        session: &Session,
        acknowledgements: &[SubscriptionAcknowledgement],
    ) -> Vec<StatusCode> {
        acknowledgements
            .iter()
            .map(|ack| match self.owned(session, ack.subscription_id) {
                Ok(subscription) => subscription.acknowledge(ack.sequence_number),
                Err(e) => e.status_code(),
            })
            .collect()
    }

    /// Returns a message still held for retransmission.
    pub fn republish(
        &self,
        session: &Session,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<NotificationMessage, SubscriptionError> {
        let subscription = self.owned(session, subscription_id)?;
        let message = subscription.republish(sequence_number)?;
        self.shared.diagnostics.record_republish(subscription_id);
        Ok(message)
    }
}

impl Shared {
    fn remove(&self, id: u32) -> Option<Arc<Subscription>> {
        let (_, subscription) = self.subscriptions.remove(&id)?;
        subscription.stop();
        self.diagnostics.record_subscription_deleted(id);
        debug!(subscription_id = id, "Subscription deleted");
        Some(subscription)
    }

    /// Runs one publish cycle; returns `false` once the subscription is gone.
    fn publish(&self, subscription: &Arc<Subscription>) -> bool {
        let id = subscription.id();
        let tick = subscription.tick();
        if tick.overflows > 0 {
            self.diagnostics.record_queue_overflow(id, tick.overflows);
        }
        if tick.keep_alive {
            self.diagnostics.record_keep_alive(id);
        }

        let session = subscription.session();
        for message in tick.messages {
            let data_changes = message.notification_message.data_changes().count();
            if data_changes > 0 {
                self.diagnostics.record_notification(id, data_changes);
            }
            self.notify_sinks(session, &message);
            if session.deliver(message) == Delivery::Buffered {
                debug!(subscription_id = id, "Notification buffered for detached session");
            }
        }

        if tick.expired {
            warn!(subscription_id = id, session = %session.name(), "Subscription lifetime expired");
            self.remove(id);
            return false;
        }
        true
    }

    fn notify_sinks(&self, session: &Session, message: &PublishResponse) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.on_notification(session, message)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(subscription_id = message.subscription_id, error = %e, "Notification sink failed");
                    self.diagnostics.record_handler_fault("notification_sink");
                }
                Err(_) => {
                    error!(subscription_id = message.subscription_id, "Notification sink panicked");
                    self.diagnostics.record_handler_fault("notification_sink");
                }
            }
        }
    }
}

async fn run_publisher(shared: Arc<Shared>, subscription: Arc<Subscription>) {
    let id = subscription.id();
    'rebuild: loop {
        let period = subscription.parameters().publishing_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = subscription.cancellation().cancelled() => break 'rebuild,
                _ = subscription.modified().notified() => continue 'rebuild,
                _ = ticker.tick() => {
                    if !shared.publish(&subscription) {
                        break 'rebuild;
                    }
                }
            }
        }
    }
    debug!(subscription_id = id, "Publish task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::NodeHandle;
    use crate::session::IdentityToken;
    use crate::transport::outbound_queue;
    use crate::types::{AttributeId, DataValue};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Constant;

    #[async_trait]
    impl AddressSpace for Constant {
        async fn find_node(&self, node_id: &NodeId) -> Option<NodeHandle> {
            (node_id.namespace_index == 2).then(|| NodeHandle::new(node_id.clone(), 0))
        }

        async fn read_attribute(&self, _node: &NodeHandle, _attribute: AttributeId) -> DataValue {
            DataValue::new(42.0)
        }

        async fn set_value_from_source(&self, _node: &NodeHandle, _value: DataValue) -> StatusCode {
            StatusCode::BadNotWritable
        }
    }

    struct Faulty(Mutex<u32>);

    impl NotificationSink for Faulty {
        fn on_notification(&self, _session: &Session, _message: &PublishResponse) -> UaResult<()> {
            *self.0.lock() += 1;
            panic!("sink failure");
        }
    }

    fn engine() -> SubscriptionEngine {
        SubscriptionEngine::new(
            SubscriptionLimits {
                max_subscriptions_per_session: 2,
                max_monitored_items_per_subscription: 2,
                min_publishing_interval: Duration::from_millis(10),
                ..Default::default()
            },
            Arc::new(Constant),
            Arc::new(Diagnostics::new()),
        )
    }

    fn session() -> Arc<Session> {
        let session = Arc::new(Session::new(
            "Session1".into(),
            "test".into(),
            Duration::from_secs(60),
            16,
            1,
        ));
        let (tx, _rx) = outbound_queue();
        session.activate(IdentityToken::Anonymous, 1, tx);
        session
    }

    fn item_request(node_id: NodeId, attribute_id: u32) -> MonitoredItemCreateRequest {
        MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId {
                node_id,
                attribute_id,
                index_range: None,
            },
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle: 7,
                sampling_interval: 50.0,
                filter: None,
                queue_size: 0,
                discard_oldest: true,
            },
        }
    }

    #[tokio::test]
    async fn test_subscription_limits_and_ownership() {
        let engine = engine();
        let owner = session();
        let other = session();
        let first = engine
            .create_subscription(&owner, &SubscriptionSettings::default())
            .unwrap();
        let second = engine
            .create_subscription(&owner, &SubscriptionSettings::default())
            .unwrap();
        assert!(second.id() > first.id());
        let error = engine
            .create_subscription(&owner, &SubscriptionSettings::default())
            .unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadTooManySubscriptions);

        assert_eq!(
            engine.delete_subscriptions(&other, &[first.id()]),
            vec![StatusCode::BadSubscriptionIdInvalid]
        );
        assert_eq!(engine.delete_for_session(owner.session_id()), 2);
        assert!(engine.is_empty());
        assert!(first.is_stopped());
    }

    #[tokio::test]
    async fn test_monitored_item_results() {
        let engine = engine();
        let session = session();
        let subscription = engine
            .create_subscription(&session, &SubscriptionSettings::default())
            .unwrap();

        let results = engine
            .create_monitored_items(
                &session,
                subscription.id(),
                TimestampsToReturn::Both,
                &[
                    item_request(NodeId::numeric(2, 1), AttributeId::Value.value()),
                    item_request(NodeId::numeric(3, 1), AttributeId::Value.value()),
                    item_request(NodeId::numeric(2, 1), 999),
                    item_request(NodeId::numeric(2, 2), AttributeId::Value.value()),
                    item_request(NodeId::numeric(2, 3), AttributeId::Value.value()),
                ],
            )
            .await
            .unwrap();
        let statuses: Vec<_> = results.iter().map(|r| r.status_code).collect();
        assert_eq!(
            statuses,
            vec![
                StatusCode::Good,
                StatusCode::BadNodeIdUnknown,
                StatusCode::BadAttributeIdInvalid,
                StatusCode::Good,
                StatusCode::BadTooManyMonitoredItems,
            ]
        );
        assert_eq!(results[0].revised_queue_size, 1);
        assert_eq!(results[0].revised_sampling_interval, 50.0);

        let deleted = engine
            .delete_monitored_items(&session, subscription.id(), &[results[0].monitored_item_id, 99])
            .unwrap();
        assert_eq!(deleted, vec![StatusCode::Good, StatusCode::BadMonitoredItemIdInvalid]);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_panicking_sink_is_isolated() {
        let engine = engine();
        let sink = Arc::new(Faulty(Mutex::new(0)));
        engine.add_sink(sink.clone());
        let session = session();
        let settings = SubscriptionSettings {
            publishing_interval: Duration::from_millis(10),
            keep_alive_count: 1,
            lifetime_count: 100,
            ..Default::default()
        };
        engine.create_subscription(&session, &settings).unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(*sink.0.lock() >= 2);
        assert!(engine.shared.diagnostics.handler_faults() >= 2);
        assert_eq!(engine.len(), 1);
        engine.shutdown();
    }
}
