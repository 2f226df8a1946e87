// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA status codes.
//!
//! A status code is a 32-bit value whose two high bits carry the severity
//! (`00` good, `01` uncertain, `10` bad), the next 14 bits the sub-code and the
//! low 16 bits the info bits. Only the codes this stack produces or inspects
//! are named; unknown codes still round-trip unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mask covering severity and sub-code.
const CODE_MASK: u32 = 0xFFFF_0000;
/// Info type `DataValue` (bit 10).
const INFO_TYPE_DATA_VALUE: u32 = 0x0000_0400;
/// Overflow info bit, valid only with `INFO_TYPE_DATA_VALUE`.
const INFO_BIT_OVERFLOW: u32 = 0x0000_0080;

/// A 32-bit OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

#[allow(non_upper_case_globals)]
impl StatusCode {
    /// The operation succeeded.
    pub const Good: Self = Self(0x0000_0000);
    /// The value is uncertain.
    pub const Uncertain: Self = Self(0x4000_0000);
    /// An unexpected error occurred.
    pub const BadUnexpectedError: Self = Self(0x8001_0000);
    /// An internal error occurred.
    pub const BadInternalError: Self = Self(0x8002_0000);
    /// A low-level communication error occurred.
    pub const BadCommunicationError: Self = Self(0x8005_0000);
    /// Encoding halted because of invalid data in the objects being serialized.
    pub const BadEncodingError: Self = Self(0x8006_0000);
    /// Decoding halted because of invalid data in the stream.
    pub const BadDecodingError: Self = Self(0x8007_0000);
    /// The message encoding/decoding limits imposed by the stack were exceeded.
    pub const BadEncodingLimitsExceeded: Self = Self(0x8008_0000);
    /// The operation timed out.
    pub const BadTimeout: Self = Self(0x800A_0000);
    /// The server does not support the requested service.
    pub const BadServiceUnsupported: Self = Self(0x800B_0000);
    /// The operation was cancelled because the application is shutting down.
    pub const BadShutdown: Self = Self(0x800C_0000);
    /// There was nothing to do because the client passed a list of operations with no elements.
    pub const BadNothingToDo: Self = Self(0x800F_0000);
    /// The request could not be processed because it specified too many operations.
    pub const BadTooManyOperations: Self = Self(0x8010_0000);
    /// An error occurred verifying security.
    pub const BadSecurityChecksFailed: Self = Self(0x8013_0000);
    /// User does not have permission to perform the requested operation.
    pub const BadUserAccessDenied: Self = Self(0x801F_0000);
    /// The user identity token is not valid.
    pub const BadIdentityTokenInvalid: Self = Self(0x8020_0000);
    /// The user identity token is valid but the server has rejected it.
    pub const BadIdentityTokenRejected: Self = Self(0x8021_0000);
    /// The specified secure channel is no longer valid.
    pub const BadSecureChannelIdInvalid: Self = Self(0x8022_0000);
    /// The nonce does appear to be not a random value or it is not the correct length.
    pub const BadNonceInvalid: Self = Self(0x8024_0000);
    /// The session id is not valid.
    pub const BadSessionIdInvalid: Self = Self(0x8025_0000);
    /// The session was closed by the client.
    pub const BadSessionClosed: Self = Self(0x8026_0000);
    /// The session cannot be used because ActivateSession has not been called.
    pub const BadSessionNotActivated: Self = Self(0x8027_0000);
    /// The subscription id is not valid.
    pub const BadSubscriptionIdInvalid: Self = Self(0x8028_0000);
    /// The header for the request is missing or invalid.
    pub const BadRequestHeaderInvalid: Self = Self(0x802A_0000);
    /// The syntax of the node id is not valid.
    pub const BadNodeIdInvalid: Self = Self(0x8033_0000);
    /// The node id refers to a node that does not exist in the server address space.
    pub const BadNodeIdUnknown: Self = Self(0x8034_0000);
    /// The attribute is not supported for the specified node.
    pub const BadAttributeIdInvalid: Self = Self(0x8035_0000);
    /// The index range is invalid or not supported.
    pub const BadIndexRangeInvalid: Self = Self(0x8036_0000);
    /// The access level does not allow reading or subscribing to the node.
    pub const BadNotReadable: Self = Self(0x803A_0000);
    /// The access level does not allow writing to the node.
    pub const BadNotWritable: Self = Self(0x803B_0000);
    /// The monitoring mode is invalid.
    pub const BadMonitoringModeInvalid: Self = Self(0x8041_0000);
    /// The monitoring item id does not refer to a valid monitored item.
    pub const BadMonitoredItemIdInvalid: Self = Self(0x8042_0000);
    /// The continuation point provided is no longer valid.
    pub const BadContinuationPointInvalid: Self = Self(0x804A_0000);
    /// The operation could not be processed because all continuation points have been allocated.
    pub const BadNoContinuationPoints: Self = Self(0x804B_0000);
    /// The browse direction is not valid.
    pub const BadBrowseDirectionInvalid: Self = Self(0x804D_0000);
    /// The security token request type is not valid.
    pub const BadRequestTypeInvalid: Self = Self(0x8053_0000);
    /// The security mode does not meet the requirements set by the server.
    pub const BadSecurityModeRejected: Self = Self(0x8054_0000);
    /// The security policy does not meet the requirements set by the server.
    pub const BadSecurityPolicyRejected: Self = Self(0x8055_0000);
    /// The server has reached its maximum number of sessions.
    pub const BadTooManySessions: Self = Self(0x8056_0000);
    /// The browse path did not match any node.
    pub const BadNoMatch: Self = Self(0x806F_0000);
    /// The value supplied for the attribute is not of the same type as the attribute's value.
    pub const BadTypeMismatch: Self = Self(0x8074_0000);
    /// The server has reached the maximum number of subscriptions.
    pub const BadTooManySubscriptions: Self = Self(0x8077_0000);
    /// There is no subscription available for this session.
    pub const BadNoSubscription: Self = Self(0x8079_0000);
    /// The sequence number is unknown to the server.
    pub const BadSequenceNumberUnknown: Self = Self(0x807A_0000);
    /// The requested notification message is no longer available.
    pub const BadMessageNotAvailable: Self = Self(0x807B_0000);
    /// The server cannot process the request because it is too busy.
    pub const BadTcpServerTooBusy: Self = Self(0x807D_0000);
    /// The type of the message specified in the header invalid.
    pub const BadTcpMessageTypeInvalid: Self = Self(0x807E_0000);
    /// The secure channel id and/or token id are not currently in use.
    pub const BadTcpSecureChannelUnknown: Self = Self(0x807F_0000);
    /// The size of the message chunk specified in the header is too large.
    pub const BadTcpMessageTooLarge: Self = Self(0x8080_0000);
    /// An internal error occurred.
    pub const BadTcpInternalError: Self = Self(0x8082_0000);
    /// The server does not recognize the endpoint url specified.
    pub const BadTcpEndpointUrlInvalid: Self = Self(0x8083_0000);
    /// The request could not be sent because of a network interruption.
    pub const BadRequestInterrupted: Self = Self(0x8084_0000);
    /// Timeout occurred while processing the request.
    pub const BadRequestTimeout: Self = Self(0x8085_0000);
    /// The secure channel has been closed.
    pub const BadSecureChannelClosed: Self = Self(0x8086_0000);
    /// The token has expired or is not recognized.
    pub const BadSecureChannelTokenUnknown: Self = Self(0x8087_0000);
    /// The sequence number is not valid.
    pub const BadSequenceNumberInvalid: Self = Self(0x8088_0000);
    /// One or more arguments are invalid.
    pub const BadInvalidArgument: Self = Self(0x80AB_0000);
    /// The network connection has been closed.
    pub const BadConnectionClosed: Self = Self(0x80AE_0000);
    /// The operation cannot be completed because the object is closed or in an invalid state.
    pub const BadInvalidState: Self = Self(0x80AF_0000);
    /// The request message size exceeds limits set by the server.
    pub const BadRequestTooLarge: Self = Self(0x80B8_0000);
    /// The response message size exceeds limits set by the client.
    pub const BadResponseTooLarge: Self = Self(0x80B9_0000);
    /// The applications do not have compatible protocol versions.
    pub const BadProtocolVersionUnsupported: Self = Self(0x80BE_0000);
    /// The request could not be processed because there are too many monitored items.
    pub const BadTooManyMonitoredItems: Self = Self(0x80DB_0000);
}

/// Names for the codes declared above, used by `Display` and `name()`.
const NAMES: &[(u32, &str)] = &[
    (0x0000_0000, "Good"),
    (0x4000_0000, "Uncertain"),
    (0x8001_0000, "BadUnexpectedError"),
    (0x8002_0000, "BadInternalError"),
    (0x8005_0000, "BadCommunicationError"),
    (0x8006_0000, "BadEncodingError"),
    (0x8007_0000, "BadDecodingError"),
    (0x8008_0000, "BadEncodingLimitsExceeded"),
    (0x800A_0000, "BadTimeout"),
    (0x800B_0000, "BadServiceUnsupported"),
    (0x800C_0000, "BadShutdown"),
    (0x800F_0000, "BadNothingToDo"),
    (0x8010_0000, "BadTooManyOperations"),
    (0x8013_0000, "BadSecurityChecksFailed"),
    (0x801F_0000, "BadUserAccessDenied"),
    (0x8020_0000, "BadIdentityTokenInvalid"),
    (0x8021_0000, "BadIdentityTokenRejected"),
    (0x8022_0000, "BadSecureChannelIdInvalid"),
    (0x8024_0000, "BadNonceInvalid"),
    (0x8025_0000, "BadSessionIdInvalid"),
    (0x8026_0000, "BadSessionClosed"),
    (0x8027_0000, "BadSessionNotActivated"),
    (0x8028_0000, "BadSubscriptionIdInvalid"),
    (0x802A_0000, "BadRequestHeaderInvalid"),
    (0x8033_0000, "BadNodeIdInvalid"),
    (0x8034_0000, "BadNodeIdUnknown"),
    (0x8035_0000, "BadAttributeIdInvalid"),
    (0x8036_0000, "BadIndexRangeInvalid"),
    (0x803A_0000, "BadNotReadable"),
    (0x803B_0000, "BadNotWritable"),
    (0x8041_0000, "BadMonitoringModeInvalid"),
    (0x8042_0000, "BadMonitoredItemIdInvalid"),
    (0x804A_0000, "BadContinuationPointInvalid"),
    (0x804B_0000, "BadNoContinuationPoints"),
    (0x804D_0000, "BadBrowseDirectionInvalid"),
    (0x8053_0000, "BadRequestTypeInvalid"),
    (0x8054_0000, "BadSecurityModeRejected"),
    (0x8055_0000, "BadSecurityPolicyRejected"),
    (0x8056_0000, "BadTooManySessions"),
    (0x806F_0000, "BadNoMatch"),
    (0x8074_0000, "BadTypeMismatch"),
    (0x8077_0000, "BadTooManySubscriptions"),
    (0x8079_0000, "BadNoSubscription"),
    (0x807A_0000, "BadSequenceNumberUnknown"),
    (0x807B_0000, "BadMessageNotAvailable"),
    (0x807D_0000, "BadTcpServerTooBusy"),
    (0x807E_0000, "BadTcpMessageTypeInvalid"),
    (0x807F_0000, "BadTcpSecureChannelUnknown"),
    (0x8080_0000, "BadTcpMessageTooLarge"),
    (0x8082_0000, "BadTcpInternalError"),
    (0x8083_0000, "BadTcpEndpointUrlInvalid"),
    (0x8084_0000, "BadRequestInterrupted"),
    (0x8085_0000, "BadRequestTimeout"),
    (0x8086_0000, "BadSecureChannelClosed"),
    (0x8087_0000, "BadSecureChannelTokenUnknown"),
    (0x8088_0000, "BadSequenceNumberInvalid"),
    (0x80AB_0000, "BadInvalidArgument"),
    (0x80AE_0000, "BadConnectionClosed"),
    (0x80AF_0000, "BadInvalidState"),
    (0x80B8_0000, "BadRequestTooLarge"),
    (0x80B9_0000, "BadResponseTooLarge"),
    (0x80BE_0000, "BadProtocolVersionUnsupported"),
    (0x80DB_0000, "BadTooManyMonitoredItems"),
];

impl StatusCode {
    /// Returns the raw 32-bit value.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns the code without info bits.
    #[inline]
    pub const fn code(self) -> Self {
        Self(self.0 & CODE_MASK)
    }

    /// Returns `true` for a good status.
    #[inline]
    pub const fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` for an uncertain status.
    #[inline]
    pub const fn is_uncertain(self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` for a bad status.
    #[inline]
    pub const fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns this code with the overflow info bit set.
    pub const fn with_overflow(self) -> Self {
        Self(self.0 | INFO_TYPE_DATA_VALUE | INFO_BIT_OVERFLOW)
    }

    /// Returns `true` if the overflow info bit is set.
    pub const fn is_overflow(self) -> bool {
        self.0 & (INFO_TYPE_DATA_VALUE | INFO_BIT_OVERFLOW)
            == (INFO_TYPE_DATA_VALUE | INFO_BIT_OVERFLOW)
    }

    /// Returns the symbolic name, ignoring info bits.
    pub fn name(self) -> &'static str {
        let code = self.0 & CODE_MASK;
        NAMES
            .iter()
            .find(|(value, _)| *value == code)
            .map(|(_, name)| *name)
            .unwrap_or(if self.is_bad() {
                "Bad"
            } else if self.is_uncertain() {
                "Uncertain"
            } else {
                "Good"
            })
    }

    /// Converts a good code into `Ok(())` and anything else into `Err(self)`.
    pub fn into_result(self) -> Result<(), StatusCode> {
        if self.is_good() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<StatusCode> for u32 {
    fn from(status: StatusCode) -> Self {
        status.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(StatusCode::Good.is_good());
        assert!(StatusCode::BadTimeout.is_bad());
        assert!(!StatusCode::BadTimeout.is_good());
        assert!(StatusCode::Uncertain.is_uncertain());
    }

    #[test]
    fn test_names() {
        assert_eq!(StatusCode::BadIdentityTokenInvalid.name(), "BadIdentityTokenInvalid");
        assert_eq!(
            StatusCode::BadProtocolVersionUnsupported.to_string(),
            "BadProtocolVersionUnsupported (0x80BE0000)"
        );
        assert_eq!(StatusCode(0x8FFF_0000).name(), "Bad");
    }

    #[test]
    fn test_overflow_bit() {
        let status = StatusCode::Good.with_overflow();
        assert!(status.is_good());
        assert!(status.is_overflow());
        assert_eq!(status.code(), StatusCode::Good);
        assert_eq!(status.name(), "Good");
        assert!(!StatusCode::Good.is_overflow());
    }

    #[test]
    fn test_into_result() {
        assert!(StatusCode::Good.into_result().is_ok());
        assert_eq!(
            StatusCode::BadNodeIdUnknown.into_result(),
            Err(StatusCode::BadNodeIdUnknown)
        );
    }
}
