// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service request and response messages.
//!
//! Every message body starts with the numeric binary encoding id of its
//! type, followed by a request or response header and the service fields.
//! [`Request`] and [`Response`] wrap the header together with a typed body.

pub mod attribute;
pub mod channel;
pub mod session;
pub mod subscription;
pub mod view;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::encoding::{BinaryDecode, BinaryEncode};
use crate::error::{ServiceError, UaError, UaResult};
use crate::status::StatusCode;
use crate::types::NodeId;

pub use attribute::*;
pub use channel::*;
pub use session::*;
pub use subscription::*;
pub use view::*;

// =============================================================================
// Encoding helpers shared by the message modules
// =============================================================================

/// Writes an ExtensionObject with no body.
pub(crate) fn encode_null_extension(buf: &mut BytesMut) {
    NodeId::null().encode(buf);
    buf.put_u8(0x00);
}

/// Writes an ExtensionObject with a binary body.
pub(crate) fn encode_extension(type_id: u32, body: &impl BinaryEncode, buf: &mut BytesMut) {
    NodeId::numeric(0, type_id).encode(buf);
    buf.put_u8(0x01);
    let mut inner = BytesMut::new();
    body.encode(&mut inner);
    (inner.len() as i32).encode(buf);
    buf.put_slice(&inner);
}

/// Reads an ExtensionObject header and returns its type id and body.
pub(crate) fn decode_extension(buf: &mut Bytes) -> UaResult<Option<(u32, Bytes)>> {
    let type_id = NodeId::decode(buf)?;
    match u8::decode(buf)? {
        0x00 => Ok(None),
        0x01 => {
            let length = i32::decode(buf)?;
            let length = usize::try_from(length).unwrap_or(0);
            if buf.remaining() < length {
                return Err(UaError::decoding("extension object body truncated"));
            }
            let body = buf.split_to(length);
            let id = type_id
                .as_numeric()
                .ok_or_else(|| UaError::decoding(format!("extension type id {type_id} is not numeric")))?;
            Ok(Some((id, body)))
        }
        other => Err(UaError::decoding(format!(
            "unsupported extension object encoding 0x{other:02X}"
        ))),
    }
}

/// Writes a ByteString, null when empty.
pub(crate) fn encode_byte_string(value: &[u8], buf: &mut BytesMut) {
    if value.is_empty() {
        buf.put_i32_le(-1);
    } else {
        (value.len() as i32).encode(buf);
        buf.put_slice(value);
    }
}

/// Writes an empty DiagnosticInfo array.
pub(crate) fn encode_no_diagnostics(buf: &mut BytesMut) {
    buf.put_i32_le(-1);
}

/// Skips a DiagnosticInfo array, which must be empty.
pub(crate) fn skip_diagnostics(buf: &mut Bytes) -> UaResult<()> {
    let length = i32::decode(buf)?;
    if length > 0 {
        return Err(UaError::decoding("diagnostic infos are not supported"));
    }
    Ok(())
}

/// Duration in milliseconds as an OPC UA `Duration` (f64).
pub(crate) fn millis(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// OPC UA `Duration` (f64 milliseconds) as a [`std::time::Duration`].
pub(crate) fn from_millis(value: f64) -> std::time::Duration {
    if value.is_finite() && value > 0.0 {
        std::time::Duration::try_from_secs_f64(value / 1000.0).unwrap_or(std::time::Duration::MAX)
    } else {
        std::time::Duration::ZERO
    }
}

// =============================================================================
// Headers
// =============================================================================

/// Common header of every request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeader {
    /// Session authentication token; null before CreateSession.
    pub authentication_token: NodeId,
    /// Time the request was sent.
    pub timestamp: DateTime<Utc>,
    /// Client-assigned handle echoed in the response.
    pub request_handle: u32,
    /// Requested diagnostics mask.
    pub return_diagnostics: u32,
    /// Audit log entry id.
    pub audit_entry_id: String,
    /// Client timeout hint in milliseconds (0 = none).
    pub timeout_hint: u32,
}

impl RequestHeader {
    /// Creates a header for the given session token and handle.
    pub fn new(authentication_token: NodeId, request_handle: u32) -> Self {
        Self {
            authentication_token,
            timestamp: Utc::now(),
            request_handle,
            return_diagnostics: 0,
            audit_entry_id: String::new(),
            timeout_hint: 0,
        }
    }

    /// Sets the timeout hint.
    pub fn with_timeout_hint(mut self, timeout: std::time::Duration) -> Self {
        self.timeout_hint = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self
    }
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self::new(NodeId::null(), 0)
    }
}

impl BinaryEncode for RequestHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.authentication_token.encode(buf);
        self.timestamp.encode(buf);
        self.request_handle.encode(buf);
        self.return_diagnostics.encode(buf);
        self.audit_entry_id.encode(buf);
        self.timeout_hint.encode(buf);
        encode_null_extension(buf);
    }
}

impl BinaryDecode for RequestHeader {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let header = Self {
            authentication_token: NodeId::decode(buf)?,
            timestamp: DateTime::<Utc>::decode(buf)?,
            request_handle: u32::decode(buf)?,
            return_diagnostics: u32::decode(buf)?,
            audit_entry_id: String::decode(buf)?,
            timeout_hint: u32::decode(buf)?,
        };
        decode_extension(buf)?;
        Ok(header)
    }
}

/// Common header of every response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeader {
    /// Time the response was sent.
    pub timestamp: DateTime<Utc>,
    /// Handle copied from the request.
    pub request_handle: u32,
    /// Overall result of the service call.
    pub service_result: StatusCode,
    /// Strings referenced by diagnostics.
    pub string_table: Vec<String>,
}

impl ResponseHeader {
    /// A `Good` header for the given request handle.
    pub fn new(request_handle: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            request_handle,
            service_result: StatusCode::Good,
            string_table: Vec::new(),
        }
    }

    /// A header carrying a bad service result.
    pub fn fault(request_handle: u32, status: StatusCode) -> Self {
        Self {
            service_result: status,
            ..Self::new(request_handle)
        }
    }
}

impl BinaryEncode for ResponseHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.timestamp.encode(buf);
        self.request_handle.encode(buf);
        self.service_result.encode(buf);
        // service diagnostics: empty DiagnosticInfo
        buf.put_u8(0x00);
        self.string_table.encode(buf);
        encode_null_extension(buf);
    }
}

impl BinaryDecode for ResponseHeader {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let timestamp = DateTime::<Utc>::decode(buf)?;
        let request_handle = u32::decode(buf)?;
        let service_result = StatusCode::decode(buf)?;
        if u8::decode(buf)? != 0 {
            return Err(UaError::decoding("service diagnostics are not supported"));
        }
        let string_table = Vec::<String>::decode(buf)?;
        decode_extension(buf)?;
        Ok(Self {
            timestamp,
            request_handle,
            service_result,
            string_table,
        })
    }
}

// =============================================================================
// Message catalogue
// =============================================================================

macro_rules! message_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident($ty:ty) = $id:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant($ty),
            )+
        }

        impl $name {
            /// Binary encoding id of the body.
            pub fn type_id(&self) -> u32 {
                match self {
                    $(Self::$variant(_) => $id,)+
                }
            }

            /// Service name used in logs and diagnostics.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)+
                }
            }

            fn encode_body(&self, buf: &mut BytesMut) {
                match self {
                    $(Self::$variant(body) => body.encode(buf),)+
                }
            }

            fn decode_body(type_id: u32, buf: &mut Bytes) -> UaResult<Self> {
                match type_id {
                    $($id => Ok(Self::$variant(<$ty>::decode(buf)?)),)+
                    other => Err(ServiceError::Unsupported { type_id: other }.into()),
                }
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(body: $ty) -> Self {
                    Self::$variant(body)
                }
            }
        )+
    };
}

message_enum! {
    /// Body of a service request.
    pub enum RequestBody {
        /// Opens or renews a secure channel.
        OpenSecureChannel(OpenSecureChannelRequest) = 446,
        /// Closes a secure channel.
        CloseSecureChannel(CloseSecureChannelRequest) = 452,
        /// Creates a session.
        CreateSession(CreateSessionRequest) = 461,
        /// Activates a session.
        ActivateSession(ActivateSessionRequest) = 467,
        /// Closes a session.
        CloseSession(CloseSessionRequest) = 473,
        /// Reads attributes.
        Read(ReadRequest) = 631,
        /// Writes attributes.
        Write(WriteRequest) = 673,
        /// Browses references.
        Browse(BrowseRequest) = 527,
        /// Continues a browse.
        BrowseNext(BrowseNextRequest) = 533,
        /// Resolves browse paths.
        TranslateBrowsePaths(TranslateBrowsePathsRequest) = 554,
        /// Creates a subscription.
        CreateSubscription(CreateSubscriptionRequest) = 787,
        /// Modifies a subscription.
        ModifySubscription(ModifySubscriptionRequest) = 793,
        /// Enables or disables publishing.
        SetPublishingMode(SetPublishingModeRequest) = 799,
        /// Acknowledges notifications.
        Publish(PublishRequest) = 826,
        /// Requests retransmission of a notification message.
        Republish(RepublishRequest) = 832,
        /// Deletes subscriptions.
        DeleteSubscriptions(DeleteSubscriptionsRequest) = 847,
        /// Adds monitored items.
        CreateMonitoredItems(CreateMonitoredItemsRequest) = 751,
        /// Removes monitored items.
        DeleteMonitoredItems(DeleteMonitoredItemsRequest) = 781,
    }
}

message_enum! {
    /// Body of a service response.
    pub enum ResponseBody {
        /// Service failed; the status is in the header.
        ServiceFault(ServiceFault) = 397,
        /// Result of OpenSecureChannel.
        OpenSecureChannel(OpenSecureChannelResponse) = 449,
        /// Result of CloseSecureChannel.
        CloseSecureChannel(CloseSecureChannelResponse) = 455,
        /// Result of CreateSession.
        CreateSession(CreateSessionResponse) = 464,
        /// Result of ActivateSession.
        ActivateSession(ActivateSessionResponse) = 470,
        /// Result of CloseSession.
        CloseSession(CloseSessionResponse) = 476,
        /// Result of Read.
        Read(ReadResponse) = 634,
        /// Result of Write.
        Write(WriteResponse) = 676,
        /// Result of Browse.
        Browse(BrowseResponse) = 530,
        /// Result of BrowseNext.
        BrowseNext(BrowseNextResponse) = 536,
        /// Result of TranslateBrowsePathsToNodeIds.
        TranslateBrowsePaths(TranslateBrowsePathsResponse) = 557,
        /// Result of CreateSubscription.
        CreateSubscription(CreateSubscriptionResponse) = 790,
        /// Result of ModifySubscription.
        ModifySubscription(ModifySubscriptionResponse) = 796,
        /// Result of SetPublishingMode.
        SetPublishingMode(SetPublishingModeResponse) = 802,
        /// Notification message or publish acknowledgement result.
        Publish(PublishResponse) = 829,
        /// Result of Republish.
        Republish(RepublishResponse) = 835,
        /// Result of DeleteSubscriptions.
        DeleteSubscriptions(DeleteSubscriptionsResponse) = 850,
        /// Result of CreateMonitoredItems.
        CreateMonitoredItems(CreateMonitoredItemsResponse) = 754,
        /// Result of DeleteMonitoredItems.
        DeleteMonitoredItems(DeleteMonitoredItemsResponse) = 784,
    }
}

/// Response body of a failed service call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFault;

impl BinaryEncode for ServiceFault {
    fn encode(&self, _buf: &mut BytesMut) {}
}

impl BinaryDecode for ServiceFault {
    fn decode(_buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self)
    }
}

// =============================================================================
// Request / Response
// =============================================================================

/// A request that failed to decode after its header was read.
#[derive(Debug)]
pub struct RequestDecodeError {
    /// Handle to echo in the fault, 0 if the header was unreadable.
    pub request_handle: u32,
    /// Why decoding failed.
    pub error: UaError,
}

/// A complete service request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Common header.
    pub header: RequestHeader,
    /// Service body.
    pub body: RequestBody,
}

impl Request {
    /// Creates a request.
    pub fn new(header: RequestHeader, body: impl Into<RequestBody>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    /// Encodes the request into a message body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        NodeId::numeric(0, self.body.type_id()).encode(&mut buf);
        self.header.encode(&mut buf);
        self.body.encode_body(&mut buf);
        buf.freeze()
    }

    /// Decodes a message body.
    pub fn decode(mut buf: Bytes) -> Result<Self, RequestDecodeError> {
        let fail = |request_handle, error| RequestDecodeError {
            request_handle,
            error,
        };
        let type_id = NodeId::decode(&mut buf).map_err(|e| fail(0, e))?;
        let header = RequestHeader::decode(&mut buf).map_err(|e| fail(0, e))?;
        let handle = header.request_handle;
        let type_id = type_id
            .as_numeric()
            .ok_or_else(|| fail(handle, UaError::decoding("request type id is not numeric")))?;
        let body = RequestBody::decode_body(type_id, &mut buf).map_err(|e| fail(handle, e))?;
        Ok(Self { header, body })
    }

    /// Returns the service name.
    pub fn name(&self) -> &'static str {
        self.body.name()
    }
}

/// A complete service response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Common header.
    pub header: ResponseHeader,
    /// Service body.
    pub body: ResponseBody,
}

impl Response {
    /// Creates a `Good` response.
    pub fn new(request_handle: u32, body: impl Into<ResponseBody>) -> Self {
        Self {
            header: ResponseHeader::new(request_handle),
            body: body.into(),
        }
    }

    /// Creates a ServiceFault response.
    pub fn fault(request_handle: u32, status: StatusCode) -> Self {
        Self {
            header: ResponseHeader::fault(request_handle, status),
            body: ResponseBody::ServiceFault(ServiceFault),
        }
    }

    /// Encodes the response into a message body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        NodeId::numeric(0, self.body.type_id()).encode(&mut buf);
        self.header.encode(&mut buf);
        self.body.encode_body(&mut buf);
        buf.freeze()
    }

    /// Decodes a message body.
    pub fn decode(mut buf: Bytes) -> UaResult<Self> {
        let type_id = NodeId::decode(&mut buf)?
            .as_numeric()
            .ok_or_else(|| UaError::decoding("response type id is not numeric"))?;
        let header = ResponseHeader::decode(&mut buf)?;
        let body = ResponseBody::decode_body(type_id, &mut buf)?;
        Ok(Self { header, body })
    }

    /// Returns the service name.
    pub fn name(&self) -> &'static str {
        self.body.name()
    }

    /// Turns a fault or bad service result into an error for `service`.
    pub fn into_result(self, service: &str) -> UaResult<Self> {
        if self.header.service_result.is_bad() || matches!(self.body, ResponseBody::ServiceFault(_)) {
            let status = if self.header.service_result.is_bad() {
                self.header.service_result
            } else {
                StatusCode::BadUnexpectedError
            };
            return Err(ServiceError::fault(service, status).into());
        }
        Ok(self)
    }
}

/// Extracts a typed body from a response or reports the mismatch.
macro_rules! expect_response {
    ($response:expr, $variant:ident) => {
        match $response.body {
            $crate::messages::ResponseBody::$variant(body) => Ok(body),
            other => Err($crate::error::UaError::from(
                $crate::error::ServiceError::UnexpectedResponse {
                    expected: stringify!($variant),
                    actual: other.name(),
                },
            )),
        }
    };
}

pub(crate) use expect_response;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_layout() {
        let request = Request::new(
            RequestHeader::new(NodeId::numeric(1, 42), 7),
            CloseSessionRequest {
                delete_subscriptions: true,
            },
        );
        let decoded = Request::decode(request.encode()).unwrap();
        assert_eq!(decoded.header.request_handle, 7);
        assert_eq!(decoded.name(), "CloseSession");
        assert_eq!(decoded.body.type_id(), 473);
    }

    #[test]
    fn test_unknown_request_keeps_handle() {
        let mut buf = BytesMut::new();
        NodeId::numeric(0, 9999).encode(&mut buf);
        RequestHeader::new(NodeId::null(), 31).encode(&mut buf);
        let error = Request::decode(buf.freeze()).unwrap_err();
        assert_eq!(error.request_handle, 31);
        assert_eq!(error.error.status_code(), StatusCode::BadServiceUnsupported);
    }

    #[test]
    fn test_truncated_request() {
        let request = Request::new(RequestHeader::new(NodeId::null(), 3), ReadRequest::default());
        let mut encoded = request.encode();
        let truncated = encoded.split_to(encoded.len() - 2);
        let error = Request::decode(truncated).unwrap_err();
        assert_eq!(error.request_handle, 3);
        assert_eq!(error.error.status_code(), StatusCode::BadDecodingError);
    }

    #[test]
    fn test_fault_into_result() {
        let response = Response::fault(5, StatusCode::BadSessionIdInvalid);
        let decoded = Response::decode(response.encode()).unwrap();
        let error = decoded.into_result("Read").unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSessionIdInvalid);
    }

    #[test]
    fn test_expect_response() {
        let response = Response::new(1, CloseSessionResponse::default());
        let result: UaResult<ReadResponse> = expect_response!(response, Read);
        assert!(result.is_err());
    }
}
