// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored items: change detection, bounded queues and sampling tasks.
//!
//! The sampler is the only writer of an item's queue and the publish cycle
//! the only drainer; both go through the item's mutex.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::address_space::{AddressSpace, NodeHandle, ValueChange};
use crate::messages::{DataChangeFilter, MonitoredItemNotification, TimestampsToReturn};
use crate::types::{AttributeId, DataChangeTrigger, DataValue, MonitoringMode};

/// What happened to an offered sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued.
    Queued,
    /// Not a change under the item's filter.
    Unchanged,
    /// Queued after evicting the oldest value.
    EvictedOldest,
    /// Dropped because the queue was full.
    DroppedNewest,
    /// Recorded without queueing (sampling mode).
    Sampled,
}

impl Offer {
    /// Returns `true` if a value was lost to overflow.
    pub fn overflowed(&self) -> bool {
        matches!(self, Self::EvictedOldest | Self::DroppedNewest)
    }
}

/// Returns `true` if `new` differs from `last` under `filter`.
pub fn is_change(filter: &DataChangeFilter, last: Option<&DataValue>, new: &DataValue) -> bool {
    let Some(last) = last else {
        return true;
    };
    if last.status != new.status {
        return true;
    }
    match filter.trigger {
        DataChangeTrigger::Status => false,
        DataChangeTrigger::StatusValue => value_changed(filter.deadband, last, new),
        DataChangeTrigger::StatusValueTimestamp => {
            value_changed(filter.deadband, last, new) || last.source_timestamp != new.source_timestamp
        }
    }
}

fn value_changed(deadband: Option<f64>, last: &DataValue, new: &DataValue) -> bool {
    match (deadband, &last.value, &new.value) {
        (Some(deadband), Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() > deadband,
            _ => a != b,
        },
        _ => last.value != new.value,
    }
}

/// Bounded queue of sampled values.
#[derive(Debug)]
pub struct ItemQueue {
    values: VecDeque<DataValue>,
    capacity: usize,
    discard_oldest: bool,
    last: Option<DataValue>,
    overflows: u64,
    unreported: u64,
}

impl ItemQueue {
    /// Creates a queue holding at most `capacity` values (at least one).
    pub fn new(capacity: usize, discard_oldest: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            discard_oldest,
            last: None,
            overflows: 0,
            unreported: 0,
        }
    }

    /// Capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queued values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Last value seen by change detection.
    pub fn last(&self) -> Option<&DataValue> {
        self.last.as_ref()
    }

    /// Values lost to overflow so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Offers a sample.
    ///
    /// A queue of one always holds the newest value and never flags overflow.
    /// Larger queues evict the oldest or drop the newest when full and set
    /// the overflow bit on the value next to the gap.
    pub fn offer(&mut self, filter: &DataChangeFilter, mode: MonitoringMode, value: DataValue) -> Offer {
        if !is_change(filter, self.last.as_ref(), &value) {
            return Offer::Unchanged;
        }
        self.last = Some(value.clone());
        if mode != MonitoringMode::Reporting {
            return Offer::Sampled;
        }

        if self.capacity == 1 {
            self.values.clear();
            self.values.push_back(value);
            return Offer::Queued;
        }
        if self.values.len() < self.capacity {
            self.values.push_back(value);
            return Offer::Queued;
        }

        self.overflows += 1;
        self.unreported += 1;
        if self.discard_oldest {
            self.values.pop_front();
            self.values.push_back(value);
            if let Some(front) = self.values.front_mut() {
                front.status = front.status.with_overflow();
            }
            Offer::EvictedOldest
        } else {
            if let Some(back) = self.values.back_mut() {
                back.status = back.status.with_overflow();
            }
            Offer::DroppedNewest
        }
    }

    /// Removes and returns every queued value, oldest first.
    pub fn drain(&mut self) -> Vec<DataValue> {
        self.values.drain(..).collect()
    }

    /// Overflows since the previous call.
    pub fn take_unreported(&mut self) -> u64 {
        std::mem::take(&mut self.unreported)
    }
}

/// Revised parameters of a monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemParameters {
    /// Attribute sampled.
    pub attribute: AttributeId,
    /// Handle echoed in notifications.
    pub client_handle: u32,
    /// Sampling period; zero follows address space change events.
    pub sampling_interval: Duration,
    /// Monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Change filter.
    pub filter: DataChangeFilter,
    /// Timestamps included in notifications.
    pub timestamps: TimestampsToReturn,
    /// Queue capacity.
    pub queue_size: usize,
    /// Overflow policy.
    pub discard_oldest: bool,
}

/// A node attribute watched by a subscription.
#[derive(Debug)]
pub struct MonitoredItem {
    id: u32,
    subscription_id: u32,
    node: NodeHandle,
    parameters: ItemParameters,
    queue: Mutex<ItemQueue>,
    cancel: CancellationToken,
}

impl MonitoredItem {
    pub(crate) fn new(
        id: u32,
        subscription_id: u32,
        node: NodeHandle,
        parameters: ItemParameters,
        cancel: CancellationToken,
    ) -> Self {
        let queue = ItemQueue::new(parameters.queue_size, parameters.discard_oldest);
        Self {
            id,
            subscription_id,
            node,
            parameters,
            queue: Mutex::new(queue),
            cancel,
        }
    }

    /// Item id, unique within its subscription.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Owning subscription.
    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    /// Monitored node.
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    /// Revised parameters.
    pub fn parameters(&self) -> &ItemParameters {
        &self.parameters
    }

    /// Queued values.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Values lost to overflow.
    pub fn overflows(&self) -> u64 {
        self.queue.lock().overflows()
    }

    /// Last sampled value.
    pub fn last_value(&self) -> Option<DataValue> {
        self.queue.lock().last().cloned()
    }

    /// Offers a freshly sampled value.
    pub fn offer(&self, value: DataValue) -> Offer {
        let offer = self.queue.lock().offer(
            &self.parameters.filter,
            self.parameters.monitoring_mode,
            value,
        );
        if offer.overflowed() {
            trace!(
                subscription_id = self.subscription_id,
                item_id = self.id,
                ?offer,
                "Monitored item queue overflow"
            );
        }
        offer
    }

    /// Drains the queue into notifications, returning them with the number
    /// of values lost to overflow since the previous drain.
    pub fn drain(&self) -> (Vec<MonitoredItemNotification>, u64) {
        let (values, lost) = {
            let mut queue = self.queue.lock();
            (queue.drain(), queue.take_unreported())
        };
        let notifications = values
            .into_iter()
            .map(|mut value| {
                self.parameters.timestamps.apply(&mut value);
                MonitoredItemNotification {
                    client_handle: self.parameters.client_handle,
                    value,
                }
            })
            .collect();
        (notifications, lost)
    }

    /// Stops the sampler.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once stopped.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn sample(item: &MonitoredItem, space: &dyn AddressSpace) {
    let value = space
        .read_attribute(item.node(), item.parameters.attribute)
        .await;
    item.offer(value);
}

/// Samples `item` until it is stopped.
///
/// With a zero interval and a change feed the item follows the feed;
/// otherwise it polls at its sampling interval.
pub(crate) async fn run_sampler(
    item: Arc<MonitoredItem>,
    space: Arc<dyn AddressSpace>,
    changes: Option<broadcast::Receiver<ValueChange>>,
    fallback_interval: Duration,
) {
    if item.parameters.monitoring_mode == MonitoringMode::Disabled {
        return;
    }
    sample(&item, space.as_ref()).await;

    let period = item.parameters.sampling_interval;
    match changes {
        Some(mut changes) if period.is_zero() => loop {
            tokio::select! {
                _ = item.cancel.cancelled() => break,
                received = changes.recv() => match received {
                    Ok(change) if change.node_id == item.node.node_id
                        && item.parameters.attribute == AttributeId::Value =>
                    {
                        item.offer(change.value);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(item_id = item.id, skipped, "Change feed lagged, resampling");
                        sample(&item, space.as_ref()).await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        },
        _ => {
            let period = if period.is_zero() { fallback_interval } else { period };
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = item.cancel.cancelled() => break,
                    _ = ticker.tick() => sample(&item, space.as_ref()).await,
                }
            }
        }
    }
    debug!(
        subscription_id = item.subscription_id,
        item_id = item.id,
        "Sampler stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;
    use crate::types::Variant;

    fn filter() -> DataChangeFilter {
        DataChangeFilter::default()
    }

    fn value(v: f64) -> DataValue {
        DataValue::new(v)
    }

    fn numbers(values: &[DataValue]) -> Vec<f64> {
        values
            .iter()
            .filter_map(|v| v.value.as_ref().and_then(Variant::as_f64))
            .collect()
    }

    #[test]
    fn test_discard_oldest_keeps_most_recent() {
        let mut queue = ItemQueue::new(10, true);
        for i in 0..25 {
            queue.offer(&filter(), MonitoringMode::Reporting, value(i as f64));
        }
        let drained = queue.drain();
        assert_eq!(numbers(&drained), (15..25).map(|i| i as f64).collect::<Vec<_>>());
        assert!(drained[0].status.is_overflow());
        assert!(!drained[9].status.is_overflow());
        assert_eq!(queue.overflows(), 15);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_discard_newest_keeps_first_values() {
        let mut queue = ItemQueue::new(3, false);
        for i in 0..5 {
            queue.offer(&filter(), MonitoringMode::Reporting, value(i as f64));
        }
        let drained = queue.drain();
        assert_eq!(numbers(&drained), vec![0.0, 1.0, 2.0]);
        assert!(drained[2].status.is_overflow());
    }

    #[test]
    fn test_queue_of_one_holds_newest() {
        let mut queue = ItemQueue::new(1, false);
        for i in 0..4 {
            queue.offer(&filter(), MonitoringMode::Reporting, value(i as f64));
        }
        let drained = queue.drain();
        assert_eq!(numbers(&drained), vec![3.0]);
        assert!(!drained[0].status.is_overflow());
    }

    #[test]
    fn test_unchanged_and_deadband() {
        let mut queue = ItemQueue::new(5, false);
        let deadband = DataChangeFilter {
            deadband: Some(0.5),
            ..Default::default()
        };
        assert_eq!(queue.offer(&deadband, MonitoringMode::Reporting, value(1.0)), Offer::Queued);
        assert_eq!(queue.offer(&deadband, MonitoringMode::Reporting, value(1.0)), Offer::Unchanged);
        assert_eq!(queue.offer(&deadband, MonitoringMode::Reporting, value(1.3)), Offer::Unchanged);
        assert_eq!(queue.offer(&deadband, MonitoringMode::Reporting, value(2.0)), Offer::Queued);

        let bad = DataValue::from_status(StatusCode::BadNotReadable);
        assert_eq!(queue.offer(&deadband, MonitoringMode::Reporting, bad), Offer::Queued);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_sampling_mode_records_without_queueing() {
        let mut queue = ItemQueue::new(5, false);
        assert_eq!(queue.offer(&filter(), MonitoringMode::Sampling, value(1.0)), Offer::Sampled);
        assert!(queue.is_empty());
        assert!(queue.last().is_some());
    }
}
