// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription, monitored item, Publish and Republish messages.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::{
    decode_extension, encode_extension, encode_no_diagnostics, encode_null_extension,
    skip_diagnostics, ReadValueId, TimestampsToReturn,
};
use crate::encoding::{BinaryDecode, BinaryEncode};
use crate::error::{UaError, UaResult};
use crate::status::StatusCode;
use crate::types::{DataChangeTrigger, DataValue, MonitoringMode};

const DATA_CHANGE_FILTER: u32 = 724;
const DATA_CHANGE_NOTIFICATION: u32 = 811;
const STATUS_CHANGE_NOTIFICATION: u32 = 820;

const DEADBAND_NONE: u32 = 0;
const DEADBAND_ABSOLUTE: u32 = 1;

// =============================================================================
// Subscriptions
// =============================================================================

/// CreateSubscription request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSubscriptionRequest {
    /// Requested publishing interval in milliseconds.
    pub requested_publishing_interval: f64,
    /// Requested lifetime count.
    pub requested_lifetime_count: u32,
    /// Requested keep-alive count.
    pub requested_max_keep_alive_count: u32,
    /// Most notifications per message (0 = unlimited).
    pub max_notifications_per_publish: u32,
    /// Start with publishing enabled.
    pub publishing_enabled: bool,
    /// Relative priority.
    pub priority: u8,
}

impl BinaryEncode for CreateSubscriptionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.requested_publishing_interval.encode(buf);
        self.requested_lifetime_count.encode(buf);
        self.requested_max_keep_alive_count.encode(buf);
        self.max_notifications_per_publish.encode(buf);
        self.publishing_enabled.encode(buf);
        self.priority.encode(buf);
    }
}

impl BinaryDecode for CreateSubscriptionRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            requested_publishing_interval: f64::decode(buf)?,
            requested_lifetime_count: u32::decode(buf)?,
            requested_max_keep_alive_count: u32::decode(buf)?,
            max_notifications_per_publish: u32::decode(buf)?,
            publishing_enabled: bool::decode(buf)?,
            priority: u8::decode(buf)?,
        })
    }
}

/// Created subscription and its revised parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSubscriptionResponse {
    /// Subscription id.
    pub subscription_id: u32,
    /// Revised publishing interval in milliseconds.
    pub revised_publishing_interval: f64,
    /// Revised lifetime count.
    pub revised_lifetime_count: u32,
    /// Revised keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

impl BinaryEncode for CreateSubscriptionResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_id.encode(buf);
        self.revised_publishing_interval.encode(buf);
        self.revised_lifetime_count.encode(buf);
        self.revised_max_keep_alive_count.encode(buf);
    }
}

impl BinaryDecode for CreateSubscriptionResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            subscription_id: u32::decode(buf)?,
            revised_publishing_interval: f64::decode(buf)?,
            revised_lifetime_count: u32::decode(buf)?,
            revised_max_keep_alive_count: u32::decode(buf)?,
        })
    }
}

/// ModifySubscription request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifySubscriptionRequest {
    /// Subscription to modify.
    pub subscription_id: u32,
    /// Requested publishing interval in milliseconds.
    pub requested_publishing_interval: f64,
    /// Requested lifetime count.
    pub requested_lifetime_count: u32,
    /// Requested keep-alive count.
    pub requested_max_keep_alive_count: u32,
    /// Most notifications per message (0 = unlimited).
    pub max_notifications_per_publish: u32,
    /// Relative priority.
    pub priority: u8,
}

impl BinaryEncode for ModifySubscriptionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_id.encode(buf);
        self.requested_publishing_interval.encode(buf);
        self.requested_lifetime_count.encode(buf);
        self.requested_max_keep_alive_count.encode(buf);
        self.max_notifications_per_publish.encode(buf);
        self.priority.encode(buf);
    }
}

impl BinaryDecode for ModifySubscriptionRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            subscription_id: u32::decode(buf)?,
            requested_publishing_interval: f64::decode(buf)?,
            requested_lifetime_count: u32::decode(buf)?,
            requested_max_keep_alive_count: u32::decode(buf)?,
            max_notifications_per_publish: u32::decode(buf)?,
            priority: u8::decode(buf)?,
        })
    }
}

/// Revised parameters after ModifySubscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifySubscriptionResponse {
    /// Revised publishing interval in milliseconds.
    pub revised_publishing_interval: f64,
    /// Revised lifetime count.
    pub revised_lifetime_count: u32,
    /// Revised keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

impl BinaryEncode for ModifySubscriptionResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.revised_publishing_interval.encode(buf);
        self.revised_lifetime_count.encode(buf);
        self.revised_max_keep_alive_count.encode(buf);
    }
}

impl BinaryDecode for ModifySubscriptionResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            revised_publishing_interval: f64::decode(buf)?,
            revised_lifetime_count: u32::decode(buf)?,
            revised_max_keep_alive_count: u32::decode(buf)?,
        })
    }
}

/// SetPublishingMode request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetPublishingModeRequest {
    /// New publishing state.
    pub publishing_enabled: bool,
    /// Subscriptions to change.
    pub subscription_ids: Vec<u32>,
}

impl BinaryEncode for SetPublishingModeRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.publishing_enabled.encode(buf);
        self.subscription_ids.encode(buf);
    }
}

impl BinaryDecode for SetPublishingModeRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            publishing_enabled: bool::decode(buf)?,
            subscription_ids: Vec::<u32>::decode(buf)?,
        })
    }
}

/// Per-subscription results of SetPublishingMode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetPublishingModeResponse {
    /// One status per subscription.
    pub results: Vec<StatusCode>,
}

/// DeleteSubscriptions request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSubscriptionsRequest {
    /// Subscriptions to delete.
    pub subscription_ids: Vec<u32>,
}

impl BinaryEncode for DeleteSubscriptionsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_ids.encode(buf);
    }
}

impl BinaryDecode for DeleteSubscriptionsRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            subscription_ids: Vec::<u32>::decode(buf)?,
        })
    }
}

/// Per-subscription results of DeleteSubscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSubscriptionsResponse {
    /// One status per subscription.
    pub results: Vec<StatusCode>,
}

macro_rules! status_results {
    ($($ty:ty),+) => {
        $(
            impl BinaryEncode for $ty {
                fn encode(&self, buf: &mut BytesMut) {
                    self.results.encode(buf);
                    encode_no_diagnostics(buf);
                }
            }

            impl BinaryDecode for $ty {
                fn decode(buf: &mut Bytes) -> UaResult<Self> {
                    let results = Vec::<StatusCode>::decode(buf)?;
                    skip_diagnostics(buf)?;
                    Ok(Self { results })
                }
            }
        )+
    };
}

status_results!(
    SetPublishingModeResponse,
    DeleteSubscriptionsResponse,
    DeleteMonitoredItemsResponse
);

// =============================================================================
// Monitored items
// =============================================================================

/// Data change filter of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DataChangeFilter {
    /// Which changes are reported.
    pub trigger: DataChangeTrigger,
    /// Absolute deadband for numeric values.
    pub deadband: Option<f64>,
}

impl BinaryEncode for DataChangeFilter {
    fn encode(&self, buf: &mut BytesMut) {
        self.trigger.value().encode(buf);
        match self.deadband {
            Some(value) => {
                DEADBAND_ABSOLUTE.encode(buf);
                value.encode(buf);
            }
            None => {
                DEADBAND_NONE.encode(buf);
                0f64.encode(buf);
            }
        }
    }
}

impl BinaryDecode for DataChangeFilter {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let trigger = u32::decode(buf)?;
        let trigger = DataChangeTrigger::from_value(trigger)
            .ok_or_else(|| UaError::decoding(format!("invalid data change trigger {trigger}")))?;
        let deadband_type = u32::decode(buf)?;
        let value = f64::decode(buf)?;
        let deadband = match deadband_type {
            DEADBAND_NONE => None,
            DEADBAND_ABSOLUTE => Some(value),
            other => return Err(UaError::decoding(format!("unsupported deadband type {other}"))),
        };
        Ok(Self { trigger, deadband })
    }
}

/// Sampling and queueing parameters of a monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringParameters {
    /// Handle the client uses to match notifications.
    pub client_handle: u32,
    /// Sampling interval in milliseconds; 0 reports every change.
    pub sampling_interval: f64,
    /// Optional data change filter.
    pub filter: Option<DataChangeFilter>,
    /// Queue capacity.
    pub queue_size: u32,
    /// Evict oldest instead of dropping newest on overflow.
    pub discard_oldest: bool,
}

impl BinaryEncode for MonitoringParameters {
    fn encode(&self, buf: &mut BytesMut) {
        self.client_handle.encode(buf);
        self.sampling_interval.encode(buf);
        match &self.filter {
            Some(filter) => encode_extension(DATA_CHANGE_FILTER, filter, buf),
            None => encode_null_extension(buf),
        }
        self.queue_size.encode(buf);
        self.discard_oldest.encode(buf);
    }
}

impl BinaryDecode for MonitoringParameters {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let client_handle = u32::decode(buf)?;
        let sampling_interval = f64::decode(buf)?;
        let filter = match decode_extension(buf)? {
            None => None,
            Some((DATA_CHANGE_FILTER, mut body)) => Some(DataChangeFilter::decode(&mut body)?),
            Some((other, _)) => {
                return Err(UaError::decoding(format!("unsupported monitoring filter {other}")))
            }
        };
        Ok(Self {
            client_handle,
            sampling_interval,
            filter,
            queue_size: u32::decode(buf)?,
            discard_oldest: bool::decode(buf)?,
        })
    }
}

/// One monitored item to create.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateRequest {
    /// Attribute to monitor.
    pub item_to_monitor: ReadValueId,
    /// Initial monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Requested parameters.
    pub requested_parameters: MonitoringParameters,
}

impl BinaryEncode for MonitoredItemCreateRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.item_to_monitor.encode(buf);
        self.monitoring_mode.value().encode(buf);
        self.requested_parameters.encode(buf);
    }
}

impl BinaryDecode for MonitoredItemCreateRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let item_to_monitor = ReadValueId::decode(buf)?;
        let mode = u32::decode(buf)?;
        let monitoring_mode = MonitoringMode::from_value(mode)
            .ok_or_else(|| UaError::decoding(format!("invalid monitoring mode {mode}")))?;
        Ok(Self {
            item_to_monitor,
            monitoring_mode,
            requested_parameters: MonitoringParameters::decode(buf)?,
        })
    }
}

/// Result of creating one monitored item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitoredItemCreateResult {
    /// Operation status.
    pub status_code: StatusCode,
    /// Server-assigned item id.
    pub monitored_item_id: u32,
    /// Revised sampling interval in milliseconds.
    pub revised_sampling_interval: f64,
    /// Revised queue size.
    pub revised_queue_size: u32,
}

impl MonitoredItemCreateResult {
    /// A result carrying only a bad status.
    pub fn from_status(status_code: StatusCode) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }
}

impl BinaryEncode for MonitoredItemCreateResult {
    fn encode(&self, buf: &mut BytesMut) {
        self.status_code.encode(buf);
        self.monitored_item_id.encode(buf);
        self.revised_sampling_interval.encode(buf);
        self.revised_queue_size.encode(buf);
        encode_null_extension(buf);
    }
}

impl BinaryDecode for MonitoredItemCreateResult {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let result = Self {
            status_code: StatusCode::decode(buf)?,
            monitored_item_id: u32::decode(buf)?,
            revised_sampling_interval: f64::decode(buf)?,
            revised_queue_size: u32::decode(buf)?,
        };
        decode_extension(buf)?;
        Ok(result)
    }
}

/// CreateMonitoredItems request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateMonitoredItemsRequest {
    /// Owning subscription.
    pub subscription_id: u32,
    /// Timestamps to include in notifications.
    pub timestamps_to_return: TimestampsToReturn,
    /// Items to create.
    pub items_to_create: Vec<MonitoredItemCreateRequest>,
}

impl BinaryEncode for CreateMonitoredItemsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_id.encode(buf);
        self.timestamps_to_return.encode(buf);
        self.items_to_create.encode(buf);
    }
}

impl BinaryDecode for CreateMonitoredItemsRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            subscription_id: u32::decode(buf)?,
            timestamps_to_return: TimestampsToReturn::decode(buf)?,
            items_to_create: Vec::<MonitoredItemCreateRequest>::decode(buf)?,
        })
    }
}

/// Results of CreateMonitoredItems in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateMonitoredItemsResponse {
    /// One result per item.
    pub results: Vec<MonitoredItemCreateResult>,
}

impl BinaryEncode for CreateMonitoredItemsResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.results.encode(buf);
        encode_no_diagnostics(buf);
    }
}

impl BinaryDecode for CreateMonitoredItemsResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let results = Vec::<MonitoredItemCreateResult>::decode(buf)?;
        skip_diagnostics(buf)?;
        Ok(Self { results })
    }
}

/// DeleteMonitoredItems request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteMonitoredItemsRequest {
    /// Owning subscription.
    pub subscription_id: u32,
    /// Items to delete.
    pub monitored_item_ids: Vec<u32>,
}

impl BinaryEncode for DeleteMonitoredItemsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_id.encode(buf);
        self.monitored_item_ids.encode(buf);
    }
}

impl BinaryDecode for DeleteMonitoredItemsRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            subscription_id: u32::decode(buf)?,
            monitored_item_ids: Vec::<u32>::decode(buf)?,
        })
    }
}

/// Per-item results of DeleteMonitoredItems.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteMonitoredItemsResponse {
    /// One status per item.
    pub results: Vec<StatusCode>,
}

// =============================================================================
// Notifications
// =============================================================================

/// One changed value.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemNotification {
    /// Client handle of the item.
    pub client_handle: u32,
    /// The value.
    pub value: DataValue,
}

impl BinaryEncode for MonitoredItemNotification {
    fn encode(&self, buf: &mut BytesMut) {
        self.client_handle.encode(buf);
        self.value.encode(buf);
    }
}

impl BinaryDecode for MonitoredItemNotification {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            client_handle: u32::decode(buf)?,
            value: DataValue::decode(buf)?,
        })
    }
}

/// Payload of a notification message.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationData {
    /// Changed values.
    DataChange(Vec<MonitoredItemNotification>),
    /// The subscription changed state, e.g. it expired.
    StatusChange(StatusCode),
}

struct DataChangeBody<'a>(&'a [MonitoredItemNotification]);

impl BinaryEncode for DataChangeBody<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        (self.0.len() as i32).encode(buf);
        for item in self.0 {
            item.encode(buf);
        }
        encode_no_diagnostics(buf);
    }
}

impl BinaryEncode for NotificationData {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::DataChange(items) => encode_extension(DATA_CHANGE_NOTIFICATION, &DataChangeBody(items), buf),
            Self::StatusChange(status) => {
                encode_extension(STATUS_CHANGE_NOTIFICATION, &StatusChangeBody(*status), buf)
            }
        }
    }
}

struct StatusChangeBody(StatusCode);

impl BinaryEncode for StatusChangeBody {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
        // diagnostic info: empty
        0u8.encode(buf);
    }
}

impl BinaryDecode for NotificationData {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        match decode_extension(buf)? {
            Some((DATA_CHANGE_NOTIFICATION, mut body)) => {
                let items = Vec::<MonitoredItemNotification>::decode(&mut body)?;
                skip_diagnostics(&mut body)?;
                Ok(Self::DataChange(items))
            }
            Some((STATUS_CHANGE_NOTIFICATION, mut body)) => {
                Ok(Self::StatusChange(StatusCode::decode(&mut body)?))
            }
            Some((other, _)) => Err(UaError::decoding(format!("unsupported notification type {other}"))),
            None => Err(UaError::decoding("empty notification data")),
        }
    }
}

/// A sequenced batch of notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    /// Sequence number; keep-alives carry the next number without using it.
    pub sequence_number: u32,
    /// Time the message was produced.
    pub publish_time: DateTime<Utc>,
    /// Notifications; empty for keep-alives.
    pub notification_data: Vec<NotificationData>,
}

impl NotificationMessage {
    /// A keep-alive announcing the next sequence number.
    pub fn keep_alive(next_sequence_number: u32) -> Self {
        Self {
            sequence_number: next_sequence_number,
            publish_time: Utc::now(),
            notification_data: Vec::new(),
        }
    }

    /// Returns `true` for keep-alives.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.is_empty()
    }

    /// Iterates over all changed values.
    pub fn data_changes(&self) -> impl Iterator<Item = &MonitoredItemNotification> {
        self.notification_data
            .iter()
            .filter_map(|data| match data {
                NotificationData::DataChange(items) => Some(items),
                NotificationData::StatusChange(_) => None,
            })
            .flatten()
    }

    /// Returns the status change, if any.
    pub fn status_change(&self) -> Option<StatusCode> {
        self.notification_data.iter().find_map(|data| match data {
            NotificationData::StatusChange(status) => Some(*status),
            NotificationData::DataChange(_) => None,
        })
    }
}

impl Default for NotificationMessage {
    fn default() -> Self {
        Self::keep_alive(0)
    }
}

impl BinaryEncode for NotificationMessage {
    fn encode(&self, buf: &mut BytesMut) {
        self.sequence_number.encode(buf);
        self.publish_time.encode(buf);
        (self.notification_data.len() as i32).encode(buf);
        for data in &self.notification_data {
            data.encode(buf);
        }
    }
}

impl BinaryDecode for NotificationMessage {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            sequence_number: u32::decode(buf)?,
            publish_time: DateTime::<Utc>::decode(buf)?,
            notification_data: Vec::<NotificationData>::decode(buf)?,
        })
    }
}

/// Acknowledges one delivered notification message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionAcknowledgement {
    /// Subscription id.
    pub subscription_id: u32,
    /// Acknowledged sequence number.
    pub sequence_number: u32,
}

impl BinaryEncode for SubscriptionAcknowledgement {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_id.encode(buf);
        self.sequence_number.encode(buf);
    }
}

impl BinaryDecode for SubscriptionAcknowledgement {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            subscription_id: u32::decode(buf)?,
            sequence_number: u32::decode(buf)?,
        })
    }
}

/// Publish request carrying acknowledgements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
    /// Messages the client has received.
    pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
}

impl BinaryEncode for PublishRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_acknowledgements.encode(buf);
    }
}

impl BinaryDecode for PublishRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            subscription_acknowledgements: Vec::<SubscriptionAcknowledgement>::decode(buf)?,
        })
    }
}

/// A notification message, or the result of acknowledgements.
///
/// The server pushes notification messages unsolicited with request id 0.
/// Replies to a Publish request carry `subscription_id` 0 and one status
/// per acknowledgement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishResponse {
    /// Subscription the message belongs to.
    pub subscription_id: u32,
    /// Sequence numbers available for Republish.
    pub available_sequence_numbers: Vec<u32>,
    /// More notifications are queued.
    pub more_notifications: bool,
    /// The message.
    pub notification_message: NotificationMessage,
    /// One status per acknowledgement.
    pub results: Vec<StatusCode>,
}

impl BinaryEncode for PublishResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_id.encode(buf);
        self.available_sequence_numbers.encode(buf);
        self.more_notifications.encode(buf);
        self.notification_message.encode(buf);
        self.results.encode(buf);
        encode_no_diagnostics(buf);
    }
}

impl BinaryDecode for PublishResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let response = Self {
            subscription_id: u32::decode(buf)?,
            available_sequence_numbers: Vec::<u32>::decode(buf)?,
            more_notifications: bool::decode(buf)?,
            notification_message: NotificationMessage::decode(buf)?,
            results: Vec::<StatusCode>::decode(buf)?,
        };
        skip_diagnostics(buf)?;
        Ok(response)
    }
}

/// Republish request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepublishRequest {
    /// Subscription id.
    pub subscription_id: u32,
    /// Sequence number to retransmit.
    pub retransmit_sequence_number: u32,
}

impl BinaryEncode for RepublishRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_id.encode(buf);
        self.retransmit_sequence_number.encode(buf);
    }
}

impl BinaryDecode for RepublishRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            subscription_id: u32::decode(buf)?,
            retransmit_sequence_number: u32::decode(buf)?,
        })
    }
}

/// Retransmitted notification message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepublishResponse {
    /// The message.
    pub notification_message: NotificationMessage,
}

impl BinaryEncode for RepublishResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.notification_message.encode(buf);
    }
}

impl BinaryDecode for RepublishResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            notification_message: NotificationMessage::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_to_bytes;

    #[test]
    fn test_publish_response_with_overflow_value() {
        let mut value = DataValue::new(4.5);
        value.status = StatusCode::Good.with_overflow();
        let response = PublishResponse {
            subscription_id: 3,
            available_sequence_numbers: vec![1, 2],
            more_notifications: false,
            notification_message: NotificationMessage {
                sequence_number: 2,
                publish_time: Utc::now(),
                notification_data: vec![NotificationData::DataChange(vec![
                    MonitoredItemNotification {
                        client_handle: 9,
                        value,
                    },
                ])],
            },
            results: Vec::new(),
        };
        let mut bytes = encode_to_bytes(&response);
        let decoded = PublishResponse::decode(&mut bytes).unwrap();
        let changes: Vec<_> = decoded.notification_message.data_changes().collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].client_handle, 9);
        assert!(changes[0].value.status.is_overflow());
    }

    #[test]
    fn test_status_change_notification() {
        let message = NotificationMessage {
            sequence_number: 4,
            publish_time: Utc::now(),
            notification_data: vec![NotificationData::StatusChange(StatusCode::BadTimeout)],
        };
        let mut bytes = encode_to_bytes(&message);
        let decoded = NotificationMessage::decode(&mut bytes).unwrap();
        assert_eq!(decoded.status_change(), Some(StatusCode::BadTimeout));
        assert!(!decoded.is_keep_alive());
    }

    #[test]
    fn test_filter_with_deadband() {
        let parameters = MonitoringParameters {
            client_handle: 1,
            sampling_interval: 0.0,
            filter: Some(DataChangeFilter {
                trigger: DataChangeTrigger::StatusValue,
                deadband: Some(0.5),
            }),
            queue_size: 10,
            discard_oldest: true,
        };
        let mut bytes = encode_to_bytes(&parameters);
        assert_eq!(MonitoringParameters::decode(&mut bytes).unwrap(), parameters);
    }
}
