// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client-side subscriptions and monitored items.
//!
//! The server pushes notification messages; each subscription runs a pump
//! task that checks sequence numbers, repairs gaps with Republish, hands
//! values to the registered change handlers and acknowledges what it
//! processed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::session::ClientSession;
use crate::config::{MonitoredItemOptions, SubscriptionSettings};
use crate::error::{SubscriptionError, UaError, UaResult};
use crate::messages::*;
use crate::status::StatusCode;
use crate::types::{DataChangeTrigger, DataValue, NodeId};

/// Pushed messages buffered per subscription before the pump catches up.
const NOTIFICATION_BUFFER: usize = 256;

/// Subscriber lag tolerated on the event channel.
const EVENT_CAPACITY: usize = 1024;

/// Largest gap repaired with Republish; wider gaps are reported at once.
const MAX_REPUBLISH: u32 = 64;

/// What a subscription reports to [`ClientSubscription::events`] listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// A monitored item reported a value.
    DataChange {
        /// Client handle of the item.
        client_handle: u32,
        /// The value.
        value: DataValue,
    },
    /// The server had nothing to report.
    KeepAlive {
        /// Next sequence number announced by the server.
        sequence_number: u32,
    },
    /// A notification message was lost and could not be republished.
    SequenceMismatch {
        /// Sequence number that was missing.
        expected: u32,
        /// Sequence number received instead.
        received: u32,
    },
    /// The subscription changed state on the server.
    StatusChange(StatusCode),
}

// =============================================================================
// Sequencing
// =============================================================================

fn next_sequence(sequence_number: u32) -> u32 {
    if sequence_number == u32::MAX {
        1
    } else {
        sequence_number + 1
    }
}

/// Forward distance from `from` to `to`; `None` when `to` is behind.
fn distance(from: u32, to: u32) -> Option<u32> {
    let raw = to.wrapping_sub(from);
    if raw >= 1 << 31 {
        return None;
    }
    // Numbering skips 0 on wrap.
    Some(if to < from { raw - 1 } else { raw })
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    InOrder,
    Duplicate,
    Gap(Vec<u32>),
    Lost { expected: u32 },
}

#[derive(Debug, Default)]
struct Sequencer {
    expected: Option<u32>,
}

impl Sequencer {
    fn observe(&mut self, sequence_number: u32, keep_alive: bool) -> Step {
        let Some(expected) = self.expected else {
            self.expected = Some(if keep_alive {
                sequence_number
            } else {
                next_sequence(sequence_number)
            });
            return Step::InOrder;
        };
        let Some(gap) = distance(expected, sequence_number) else {
            return Step::Duplicate;
        };
        self.expected = Some(if keep_alive {
            sequence_number
        } else {
            next_sequence(sequence_number)
        });
        match gap {
            0 => Step::InOrder,
            n if n > MAX_REPUBLISH => Step::Lost { expected },
            n => {
                let mut missing = Vec::with_capacity(n as usize);
                let mut current = expected;
                for _ in 0..n {
                    missing.push(current);
                    current = next_sequence(current);
                }
                Step::Gap(missing)
            }
        }
    }
}

// =============================================================================
// Monitored items
// =============================================================================

type ChangeHandler = Arc<dyn Fn(&DataValue) -> UaResult<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
struct Revised {
    monitored_item_id: u32,
    sampling_interval: Duration,
    queue_size: u32,
}

struct ItemShared {
    client_handle: u32,
    node_id: NodeId,
    revised: Mutex<Revised>,
    last_value: Mutex<Option<DataValue>>,
    handlers: RwLock<Vec<ChangeHandler>>,
    notifications: AtomicU64,
    faults: Arc<AtomicU64>,
}

impl ItemShared {
    fn deliver(&self, subscription_id: u32, value: &DataValue) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        *self.last_value.lock() = Some(value.clone());

        let handlers = self.handlers.read().clone();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(value))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription_id,
                        client_handle = self.client_handle,
                        error = %error,
                        "Change handler failed"
                    );
                }
                Err(_) => {
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    error!(
                        subscription_id,
                        client_handle = self.client_handle,
                        "Change handler panicked"
                    );
                }
            }
        }
    }
}

/// A monitored item created through [`ClientSubscription::monitor`].
#[derive(Clone)]
pub struct ClientMonitoredItem {
    shared: Arc<ItemShared>,
}

impl std::fmt::Debug for ClientMonitoredItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMonitoredItem")
            .field("id", &self.id())
            .field("client_handle", &self.shared.client_handle)
            .field("node_id", &self.shared.node_id)
            .finish()
    }
}

impl ClientMonitoredItem {
    /// Server-assigned item id.
    pub fn id(&self) -> u32 {
        self.shared.revised.lock().monitored_item_id
    }

    /// Handle the server echoes in notifications.
    pub fn client_handle(&self) -> u32 {
        self.shared.client_handle
    }

    /// Monitored node.
    pub fn node_id(&self) -> &NodeId {
        &self.shared.node_id
    }

    /// Sampling interval granted by the server.
    pub fn revised_sampling_interval(&self) -> Duration {
        self.shared.revised.lock().sampling_interval
    }

    /// Queue size granted by the server.
    pub fn revised_queue_size(&self) -> u32 {
        self.shared.revised.lock().queue_size
    }

    /// Most recent value received.
    pub fn last_value(&self) -> Option<DataValue> {
        self.shared.last_value.lock().clone()
    }

    /// Values received so far.
    pub fn notification_count(&self) -> u64 {
        self.shared.notifications.load(Ordering::Relaxed)
    }

    /// Registers a change handler.
    ///
    /// Handlers run on the subscription's pump task. An error or panic is
    /// logged and counted in [`ClientSubscription::handler_faults`]; the
    /// value is not redelivered.
    pub fn on_change<F>(&self, handler: F)
    where
        F: Fn(&DataValue) -> UaResult<()> + Send + Sync + 'static,
    {
        self.shared.handlers.write().push(Arc::new(handler));
    }
}

// =============================================================================
// ClientSubscription
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Parameters {
    publishing_interval: Duration,
    lifetime_count: u32,
    keep_alive_count: u32,
}

struct Shared {
    id: u32,
    session: ClientSession,
    parameters: Mutex<Parameters>,
    items: DashMap<u32, Arc<ItemShared>>,
    next_handle: AtomicU32,
    events: broadcast::Sender<SubscriptionEvent>,
    faults: Arc<AtomicU64>,
    cancel: CancellationToken,
}

/// A subscription owned by a [`ClientSession`].
#[derive(Clone)]
pub struct ClientSubscription {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ClientSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSubscription")
            .field("id", &self.shared.id)
            .field("items", &self.shared.items.len())
            .finish()
    }
}

impl ClientSubscription {
    pub(crate) fn start(session: ClientSession, created: &CreateSubscriptionResponse) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            id: created.subscription_id,
            session,
            parameters: Mutex::new(Parameters {
                publishing_interval: from_millis(created.revised_publishing_interval),
                lifetime_count: created.revised_lifetime_count,
                keep_alive_count: created.revised_max_keep_alive_count,
            }),
            items: DashMap::new(),
            next_handle: AtomicU32::new(1),
            events,
            faults: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        });

        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        shared.session.add_route(shared.id, tx);
        tokio::spawn(pump(shared.clone(), rx));

        info!(
            subscription_id = shared.id,
            publishing_interval_ms = created.revised_publishing_interval,
            lifetime_count = created.revised_lifetime_count,
            keep_alive_count = created.revised_max_keep_alive_count,
            "Subscription created"
        );
        Self { shared }
    }

    /// Server-assigned subscription id.
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// Publishing interval granted by the server.
    pub fn revised_publishing_interval(&self) -> Duration {
        self.shared.parameters.lock().publishing_interval
    }

    /// Lifetime count granted by the server.
    pub fn revised_lifetime_count(&self) -> u32 {
        self.shared.parameters.lock().lifetime_count
    }

    /// Keep-alive count granted by the server.
    pub fn revised_keep_alive_count(&self) -> u32 {
        self.shared.parameters.lock().keep_alive_count
    }

    /// Subscribes to data changes, keep-alives and state changes.
    pub fn events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.shared.events.subscribe()
    }

    /// Change handler errors and panics so far.
    pub fn handler_faults(&self) -> u64 {
        self.shared.faults.load(Ordering::Relaxed)
    }

    /// Returns `true` once the subscription was deleted or expired.
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Monitors an attribute of `node_id`.
    pub async fn monitor(&self, node_id: NodeId, options: &MonitoredItemOptions) -> UaResult<ClientMonitoredItem> {
        options.validate()?;
        let client_handle = self.shared.next_handle.fetch_add(1, Ordering::Relaxed);
        let item = Arc::new(ItemShared {
            client_handle,
            node_id: node_id.clone(),
            revised: Mutex::new(Revised::default()),
            last_value: Mutex::new(None),
            handlers: RwLock::new(Vec::new()),
            notifications: AtomicU64::new(0),
            faults: self.shared.faults.clone(),
        });
        // Registered first so a notification racing the response still lands.
        self.shared.items.insert(client_handle, item.clone());

        let filter = (options.deadband.is_some() || options.trigger != DataChangeTrigger::default()).then_some(
            DataChangeFilter {
                trigger: options.trigger,
                deadband: options.deadband,
            },
        );
        let request = CreateMonitoredItemsRequest {
            subscription_id: self.shared.id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_create: vec![MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId::new(node_id, options.attribute),
                monitoring_mode: options.monitoring_mode,
                requested_parameters: MonitoringParameters {
                    client_handle,
                    sampling_interval: millis(options.sampling_interval),
                    filter,
                    queue_size: options.queue_size,
                    discard_oldest: options.discard_oldest,
                },
            }],
        };

        let created = async {
            let response = self
                .shared
                .session
                .call(request)
                .await?
                .into_result("CreateMonitoredItems")?;
            let mut results = expect_response!(response, CreateMonitoredItems)?.results;
            let result = results
                .pop()
                .unwrap_or_else(|| MonitoredItemCreateResult::from_status(StatusCode::BadUnexpectedError));
            if result.status_code.is_bad() {
                return Err(UaError::fault("CreateMonitoredItems", result.status_code));
            }
            Ok(result)
        }
        .await;

        let result = match created {
            Ok(result) => result,
            Err(error) => {
                self.shared.items.remove(&client_handle);
                return Err(error);
            }
        };
        *item.revised.lock() = Revised {
            monitored_item_id: result.monitored_item_id,
            sampling_interval: from_millis(result.revised_sampling_interval),
            queue_size: result.revised_queue_size,
        };
        debug!(
            subscription_id = self.shared.id,
            monitored_item_id = result.monitored_item_id,
            client_handle,
            sampling_interval_ms = result.revised_sampling_interval,
            queue_size = result.revised_queue_size,
            "Monitored item created"
        );
        Ok(ClientMonitoredItem { shared: item })
    }

    /// Deletes monitored items; returns one status per item.
    pub async fn delete_monitored_items(&self, items: &[ClientMonitoredItem]) -> UaResult<Vec<StatusCode>> {
        let response = self
            .shared
            .session
            .call(DeleteMonitoredItemsRequest {
                subscription_id: self.shared.id,
                monitored_item_ids: items.iter().map(ClientMonitoredItem::id).collect(),
            })
            .await?
            .into_result("DeleteMonitoredItems")?;
        let results = expect_response!(response, DeleteMonitoredItems)?.results;
        for (item, status) in items.iter().zip(&results) {
            if status.is_good() {
                self.shared.items.remove(&item.client_handle());
            }
        }
        Ok(results)
    }

    /// Enables or disables publishing.
    pub async fn set_publishing_mode(&self, enabled: bool) -> UaResult<StatusCode> {
        let response = self
            .shared
            .session
            .call(SetPublishingModeRequest {
                publishing_enabled: enabled,
                subscription_ids: vec![self.shared.id],
            })
            .await?
            .into_result("SetPublishingMode")?;
        let mut results = expect_response!(response, SetPublishingMode)?.results;
        Ok(results.pop().unwrap_or(StatusCode::BadUnexpectedError))
    }

    /// Changes the publishing parameters.
    pub async fn modify(&self, settings: &SubscriptionSettings) -> UaResult<()> {
        settings.validate()?;
        let response = self
            .shared
            .session
            .call(ModifySubscriptionRequest {
                subscription_id: self.shared.id,
                requested_publishing_interval: millis(settings.publishing_interval),
                requested_lifetime_count: settings.lifetime_count,
                requested_max_keep_alive_count: settings.keep_alive_count,
                max_notifications_per_publish: settings.max_notifications_per_publish,
                priority: settings.priority,
            })
            .await?
            .into_result("ModifySubscription")?;
        let revised = expect_response!(response, ModifySubscription)?;
        *self.shared.parameters.lock() = Parameters {
            publishing_interval: from_millis(revised.revised_publishing_interval),
            lifetime_count: revised.revised_lifetime_count,
            keep_alive_count: revised.revised_max_keep_alive_count,
        };
        Ok(())
    }

    /// Deletes the subscription on the server and stops its pump.
    pub async fn delete(&self) -> UaResult<()> {
        if self.shared.cancel.is_cancelled() {
            return Ok(());
        }
        let result = async {
            let response = self
                .shared
                .session
                .call(DeleteSubscriptionsRequest {
                    subscription_ids: vec![self.shared.id],
                })
                .await?
                .into_result("DeleteSubscriptions")?;
            let status = expect_response!(response, DeleteSubscriptions)?
                .results
                .pop()
                .unwrap_or(StatusCode::BadUnexpectedError);
            if status.is_bad() {
                return Err(UaError::fault("DeleteSubscriptions", status));
            }
            Ok(())
        }
        .await;
        self.shared.stop();
        info!(subscription_id = self.shared.id, "Subscription deleted");
        result
    }
}

impl Shared {
    fn stop(&self) {
        self.cancel.cancel();
        self.session.drop_route(self.id);
    }

    fn emit(&self, event: SubscriptionEvent) {
        // No listeners is fine.
        let _ = self.events.send(event);
    }

    fn process(&self, message: &NotificationMessage) {
        for notification in message.data_changes() {
            let item = self
                .items
                .get(&notification.client_handle)
                .map(|entry| entry.value().clone());
            match item {
                Some(item) => item.deliver(self.id, &notification.value),
                None => trace!(
                    subscription_id = self.id,
                    client_handle = notification.client_handle,
                    "Value for unknown client handle"
                ),
            }
            self.emit(SubscriptionEvent::DataChange {
                client_handle: notification.client_handle,
                value: notification.value.clone(),
            });
        }
    }

    async fn repair(&self, missing: Vec<u32>, received: u32) -> Vec<u32> {
        let mut recovered = Vec::new();
        for sequence_number in missing {
            match self.session.republish(self.id, sequence_number).await {
                Ok(message) => {
                    debug!(subscription_id = self.id, sequence_number, "Republished notification");
                    self.process(&message);
                    recovered.push(sequence_number);
                }
                Err(error) => {
                    trace!(error = %error, "Republish failed");
                    self.mismatch(sequence_number, received);
                }
            }
        }
        recovered
    }

    fn mismatch(&self, expected: u32, received: u32) {
        UaError::from(SubscriptionError::SequenceMismatch { expected, received }).log("notification sequence");
        self.emit(SubscriptionEvent::SequenceMismatch { expected, received });
    }

    async fn acknowledge(&self, sequence_numbers: Vec<u32>) {
        let acknowledgements = sequence_numbers
            .into_iter()
            .map(|sequence_number| SubscriptionAcknowledgement {
                subscription_id: self.id,
                sequence_number,
            })
            .collect();
        match self.session.acknowledge(acknowledgements).await {
            Ok(results) => {
                for status in results.into_iter().filter(|s| s.is_bad()) {
                    trace!(subscription_id = self.id, status = %status, "Acknowledgement rejected");
                }
            }
            Err(error) => debug!(subscription_id = self.id, error = %error, "Acknowledgement failed"),
        }
    }
}

async fn pump(shared: Arc<Shared>, mut messages: mpsc::Receiver<PublishResponse>) {
    let mut sequencer = Sequencer::default();
    loop {
        let response = tokio::select! {
            response = messages.recv() => match response {
                Some(response) => response,
                None => break,
            },
            _ = shared.cancel.cancelled() => break,
        };
        let message = response.notification_message;
        let sequence_number = message.sequence_number;
        let keep_alive = message.is_keep_alive();

        let mut processed = Vec::new();
        match sequencer.observe(sequence_number, keep_alive) {
            Step::InOrder => {}
            Step::Duplicate => {
                trace!(subscription_id = shared.id, sequence_number, "Duplicate notification skipped");
                continue;
            }
            Step::Gap(missing) => processed = shared.repair(missing, sequence_number).await,
            Step::Lost { expected } => shared.mismatch(expected, sequence_number),
        }

        if keep_alive {
            trace!(subscription_id = shared.id, sequence_number, "Keep-alive");
            shared.emit(SubscriptionEvent::KeepAlive { sequence_number });
        } else {
            shared.process(&message);
            processed.push(sequence_number);
        }
        if !processed.is_empty() {
            shared.acknowledge(processed).await;
        }

        if let Some(status) = message.status_change() {
            shared.emit(SubscriptionEvent::StatusChange(status));
            if status == StatusCode::BadTimeout {
                warn!(subscription_id = shared.id, "Subscription expired on the server");
                shared.stop();
                break;
            }
        }
    }
    debug!(subscription_id = shared.id, "Subscription pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_wraps_past_zero() {
        assert_eq!(distance(5, 5), Some(0));
        assert_eq!(distance(5, 8), Some(3));
        assert_eq!(distance(8, 5), None);
        assert_eq!(distance(u32::MAX, 1), Some(1));
        assert_eq!(distance(u32::MAX - 1, 2), Some(3));
    }

    #[test]
    fn test_sequencer_in_order_and_duplicates() {
        let mut sequencer = Sequencer::default();
        assert_eq!(sequencer.observe(1, true), Step::InOrder);
        assert_eq!(sequencer.observe(1, false), Step::InOrder);
        assert_eq!(sequencer.observe(2, false), Step::InOrder);
        assert_eq!(sequencer.observe(2, false), Step::Duplicate);
        assert_eq!(sequencer.observe(3, true), Step::InOrder);
        assert_eq!(sequencer.observe(3, false), Step::InOrder);
    }

    #[test]
    fn test_sequencer_reports_missing_numbers() {
        let mut sequencer = Sequencer::default();
        sequencer.observe(1, false);
        assert_eq!(sequencer.observe(4, false), Step::Gap(vec![2, 3]));
        assert_eq!(sequencer.observe(5, false), Step::InOrder);

        // A keep-alive announcing 7 means 6 was lost.
        assert_eq!(sequencer.observe(7, true), Step::Gap(vec![6]));
        assert_eq!(sequencer.observe(7, false), Step::InOrder);
    }

    #[test]
    fn test_sequencer_wide_gap_is_lost() {
        let mut sequencer = Sequencer::default();
        sequencer.observe(1, false);
        assert_eq!(
            sequencer.observe(2 + MAX_REPUBLISH + 1, false),
            Step::Lost { expected: 2 }
        );
    }

    #[test]
    fn test_sequencer_wraps() {
        let mut sequencer = Sequencer::default();
        sequencer.observe(u32::MAX, false);
        assert_eq!(sequencer.observe(1, false), Step::InOrder);

        let mut sequencer = Sequencer::default();
        sequencer.observe(u32::MAX - 1, false);
        assert_eq!(sequencer.observe(1, false), Step::Gap(vec![u32::MAX]));
    }
}
