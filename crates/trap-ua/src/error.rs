// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the UA stack.
//!
//! Errors are grouped by the layer that raises them. Every error maps to an
//! OPC UA [`StatusCode`] so that request-level failures can be reported in a
//! `ServiceFault` and transport-level failures can be told apart from
//! recoverable ones.
//!
//! # Error Categories
//!
//! ```text
//! UaError
//! ├── Transport     - framing, I/O and encoding failures (channel-fatal)
//! ├── Channel       - negotiation and chunk security failures
//! ├── Session       - identity, activation and binding failures
//! ├── Subscription  - subscription and monitored item failures
//! ├── Service       - request-level failures reported as status codes
//! ├── Configuration - invalid settings
//! └── Timeout       - deadlines exceeded
//! ```
//!
//! # Examples
//!
//! ```
//! use trap_ua::error::{SessionError, UaError};
//! use trap_ua::StatusCode;
//!
//! let error = UaError::session(SessionError::identity_token_invalid("empty user name"));
//! assert_eq!(error.status_code(), StatusCode::BadIdentityTokenInvalid);
//! assert!(!error.is_fatal());
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::status::StatusCode;

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for the UA stack.
#[derive(Debug, Error)]
pub enum UaError {
    /// Framing, I/O and encoding errors.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Secure channel negotiation and security errors.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Subscription and monitored item errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Request-level service errors.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl UaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a transport error.
    #[inline]
    pub fn transport(error: TransportError) -> Self {
        Self::Transport(error)
    }

    /// Creates a channel error.
    #[inline]
    pub fn channel(error: ChannelError) -> Self {
        Self::Channel(error)
    }

    /// Creates a session error.
    #[inline]
    pub fn session(error: SessionError) -> Self {
        Self::Session(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a service error.
    #[inline]
    pub fn service(error: ServiceError) -> Self {
        Self::Service(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(error: TimeoutError) -> Self {
        Self::Timeout(error)
    }

    /// Creates a decoding error for a malformed message.
    pub fn decoding(reason: impl Into<String>) -> Self {
        Self::Transport(TransportError::malformed(reason))
    }

    /// Creates an encoding error.
    pub fn encoding(reason: impl Into<String>) -> Self {
        Self::Transport(TransportError::encoding(reason))
    }

    /// Creates a service error carrying a bad status returned by the peer.
    pub fn fault(service: impl Into<String>, status: StatusCode) -> Self {
        Self::Service(ServiceError::fault(service, status))
    }

    /// Creates a channel closed error.
    pub fn channel_closed() -> Self {
        Self::Channel(ChannelError::Closed)
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns the OPC UA status code that best describes this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Transport(e) => e.status_code(),
            Self::Channel(e) => e.status_code(),
            Self::Session(e) => e.status_code(),
            Self::Subscription(e) => e.status_code(),
            Self::Service(e) => e.status_code(),
            Self::Configuration(_) => StatusCode::BadInvalidArgument,
            Self::Timeout(_) => StatusCode::BadTimeout,
        }
    }

    /// Returns `true` if the channel that observed this error must be closed
    /// without sending a response.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Channel(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Channel(e) => matches!(e, ChannelError::Closed),
            Self::Session(e) => matches!(e, SessionError::ChannelMismatch { .. }),
            Self::Subscription(_) => false,
            Self::Service(e) => matches!(
                e.status_code(),
                StatusCode::BadTimeout | StatusCode::BadTooManyOperations
            ),
            Self::Configuration(_) => false,
            Self::Timeout(_) => true,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transport(e) => e.severity(),
            Self::Channel(e) => e.severity(),
            Self::Session(_) => ErrorSeverity::Warning,
            Self::Subscription(_) => ErrorSeverity::Warning,
            Self::Service(_) => ErrorSeverity::Info,
            Self::Configuration(_) => ErrorSeverity::Critical,
            Self::Timeout(_) => ErrorSeverity::Warning,
        }
    }

    /// Returns the error category for logging and diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Channel(_) => "channel",
            Self::Session(_) => "session",
            Self::Subscription(_) => "subscription",
            Self::Service(_) => "service",
            Self::Configuration(_) => "configuration",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns a structured error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Transport(e) => e.error_code(),
            Self::Channel(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Service(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
        }
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Transport(_) => vec![
                "Check network connectivity to the endpoint",
                "Verify the negotiated buffer sizes on both peers",
            ],
            Self::Channel(ChannelError::ProtocolVersionUnsupported { .. }) => {
                vec!["Use protocol version 0 or a version the server supports"]
            }
            Self::Channel(ChannelError::PolicyRejected { .. })
            | Self::Channel(ChannelError::ModeRejected { .. }) => {
                vec!["Select a security policy and mode offered by the endpoint"]
            }
            Self::Channel(_) => vec!["Reconnect to open a new secure channel"],
            Self::Session(SessionError::IdentityTokenInvalid { .. }) => {
                vec!["Provide a non-empty user name when a password is given"]
            }
            Self::Session(_) => vec!["Create and activate a new session"],
            Self::Subscription(_) => vec!["Recreate the subscription"],
            Self::Service(_) => vec![],
            Self::Configuration(_) => vec!["Review the configuration file"],
            Self::Timeout(_) => vec![
                "Increase the request timeout",
                "Check server load",
            ],
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        let status = self.status_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                status = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                status = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                status = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
        }
    }
}

impl From<io::Error> for UaError {
    fn from(error: io::Error) -> Self {
        Self::Transport(TransportError::from(error))
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Framing, I/O and binary encoding errors. All of them close the channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying I/O error.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Unknown message type in a chunk header.
    #[error("Invalid message type '{message_type}'")]
    MessageTypeInvalid {
        /// The message type as read from the wire.
        message_type: String,
    },

    /// Chunk or message exceeds the negotiated limit.
    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Size announced or accumulated.
        size: usize,
        /// Negotiated limit.
        limit: usize,
    },

    /// Too many chunks for one message.
    #[error("Message uses {count} chunks, limit is {limit}")]
    TooManyChunks {
        /// Chunks received so far.
        count: usize,
        /// Negotiated limit.
        limit: usize,
    },

    /// Malformed data in the stream.
    #[error("Malformed message: {reason}")]
    Malformed {
        /// What was wrong.
        reason: String,
    },

    /// A value could not be encoded.
    #[error("Encoding failed: {reason}")]
    Encoding {
        /// What was wrong.
        reason: String,
    },

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,
}

impl TransportError {
    /// Creates a malformed message error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encoding(reason: impl Into<String>) -> Self {
        Self::Encoding {
            reason: reason.into(),
        }
    }

    /// Creates an invalid message type error.
    pub fn message_type_invalid(raw: &[u8]) -> Self {
        Self::MessageTypeInvalid {
            message_type: String::from_utf8_lossy(raw).into_owned(),
        }
    }

    /// Creates a message too large error.
    pub fn too_large(size: usize, limit: usize) -> Self {
        Self::MessageTooLarge { size, limit }
    }

    /// Returns the status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Io { .. } => StatusCode::BadCommunicationError,
            Self::MessageTypeInvalid { .. } => StatusCode::BadTcpMessageTypeInvalid,
            Self::MessageTooLarge { .. } => StatusCode::BadTcpMessageTooLarge,
            Self::TooManyChunks { .. } => StatusCode::BadEncodingLimitsExceeded,
            Self::Malformed { .. } => StatusCode::BadDecodingError,
            Self::Encoding { .. } => StatusCode::BadEncodingError,
            Self::ConnectionClosed => StatusCode::BadConnectionClosed,
        }
    }

    /// Returns `true` if reconnecting may help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::ConnectionClosed)
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ConnectionClosed => ErrorSeverity::Info,
            Self::Io { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Io { .. } => 1,
            Self::MessageTypeInvalid { .. } => 2,
            Self::MessageTooLarge { .. } => 3,
            Self::TooManyChunks { .. } => 4,
            Self::Malformed { .. } => 5,
            Self::Encoding { .. } => 6,
            Self::ConnectionClosed => 7,
        };
        ErrorCode::new(1, code)
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io {
                message: error.to_string(),
                source: error,
            },
        }
    }
}

// =============================================================================
// ChannelError
// =============================================================================

/// Secure channel negotiation and chunk security errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The requested protocol version cannot be served.
    #[error("Protocol version {requested} is not supported")]
    ProtocolVersionUnsupported {
        /// Version requested by the client.
        requested: u32,
    },

    /// The security policy is not offered by the endpoint.
    #[error("Security policy '{policy}' rejected")]
    PolicyRejected {
        /// Policy URI.
        policy: String,
    },

    /// The security mode is not offered by the endpoint.
    #[error("Security mode '{mode}' rejected")]
    ModeRejected {
        /// Mode name.
        mode: String,
    },

    /// The peer rejected the connection with an ERR message.
    #[error("Connection rejected by peer: {status} {reason}")]
    Rejected {
        /// Status reported by the peer.
        status: StatusCode,
        /// Reason text reported by the peer.
        reason: String,
    },

    /// The chunk names a different secure channel.
    #[error("Secure channel id {actual} does not match {expected}")]
    ChannelIdInvalid {
        /// Id of this channel.
        expected: u32,
        /// Id found in the chunk.
        actual: u32,
    },

    /// The token id is unknown or its lifetime has elapsed.
    #[error("Security token {token_id} is unknown or expired")]
    TokenUnknown {
        /// Token id found in the chunk.
        token_id: u32,
    },

    /// Signature verification or decryption failed.
    #[error("Security checks failed: {reason}")]
    SecurityChecksFailed {
        /// What failed.
        reason: String,
    },

    /// Sequence numbers are not strictly increasing.
    #[error("Sequence number {actual} is invalid, expected {expected}")]
    SequenceNumberInvalid {
        /// Next expected sequence number.
        expected: u32,
        /// Received sequence number.
        actual: u32,
    },

    /// The security token request type is not valid in the current state.
    #[error("Invalid security token request: {reason}")]
    RequestTypeInvalid {
        /// What was wrong.
        reason: String,
    },

    /// The channel is not open.
    #[error("Secure channel is not open")]
    NotOpen,

    /// The channel has been closed.
    #[error("Secure channel closed")]
    Closed,
}

impl ChannelError {
    /// Creates a security checks failure.
    pub fn security_checks_failed(reason: impl Into<String>) -> Self {
        Self::SecurityChecksFailed {
            reason: reason.into(),
        }
    }

    /// Creates a request type error.
    pub fn request_type_invalid(reason: impl Into<String>) -> Self {
        Self::RequestTypeInvalid {
            reason: reason.into(),
        }
    }

    /// Returns the status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProtocolVersionUnsupported { .. } => StatusCode::BadProtocolVersionUnsupported,
            Self::PolicyRejected { .. } => StatusCode::BadSecurityPolicyRejected,
            Self::ModeRejected { .. } => StatusCode::BadSecurityModeRejected,
            Self::Rejected { status, .. } => *status,
            Self::ChannelIdInvalid { .. } => StatusCode::BadTcpSecureChannelUnknown,
            Self::TokenUnknown { .. } => StatusCode::BadSecureChannelTokenUnknown,
            Self::SecurityChecksFailed { .. } => StatusCode::BadSecurityChecksFailed,
            Self::SequenceNumberInvalid { .. } => StatusCode::BadSequenceNumberInvalid,
            Self::RequestTypeInvalid { .. } => StatusCode::BadRequestTypeInvalid,
            Self::NotOpen => StatusCode::BadInvalidState,
            Self::Closed => StatusCode::BadSecureChannelClosed,
        }
    }

    /// Returns `true` for inbound security failures that close the channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChannelIdInvalid { .. }
                | Self::TokenUnknown { .. }
                | Self::SecurityChecksFailed { .. }
                | Self::SequenceNumberInvalid { .. }
        )
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Closed => ErrorSeverity::Info,
            Self::ProtocolVersionUnsupported { .. }
            | Self::PolicyRejected { .. }
            | Self::ModeRejected { .. }
            | Self::Rejected { .. }
            | Self::RequestTypeInvalid { .. }
            | Self::NotOpen => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::ProtocolVersionUnsupported { .. } => 1,
            Self::PolicyRejected { .. } => 2,
            Self::ModeRejected { .. } => 3,
            Self::Rejected { .. } => 4,
            Self::ChannelIdInvalid { .. } => 5,
            Self::TokenUnknown { .. } => 6,
            Self::SecurityChecksFailed { .. } => 7,
            Self::SequenceNumberInvalid { .. } => 8,
            Self::RequestTypeInvalid { .. } => 9,
            Self::NotOpen => 10,
            Self::Closed => 11,
        };
        ErrorCode::new(2, code)
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The identity token is structurally invalid.
    #[error("Identity token invalid: {reason}")]
    IdentityTokenInvalid {
        /// What was wrong.
        reason: String,
    },

    /// The authenticator rejected the credentials.
    #[error("Access denied for user '{user}'")]
    AccessDenied {
        /// User name presented.
        user: String,
    },

    /// No session exists for the authentication token.
    #[error("Session id is not valid")]
    SessionIdInvalid,

    /// The session has not been activated.
    #[error("Session '{name}' is not activated")]
    NotActivated {
        /// Session name.
        name: String,
    },

    /// The session is bound to another channel.
    #[error("Session is bound to channel {expected}, request arrived on channel {actual}")]
    ChannelMismatch {
        /// Channel the session is bound to.
        expected: u32,
        /// Channel the request arrived on.
        actual: u32,
    },

    /// The server has reached its session limit.
    #[error("Too many sessions (max {max})")]
    TooManySessions {
        /// Configured limit.
        max: usize,
    },

    /// The session was closed.
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// Creates an identity token error.
    pub fn identity_token_invalid(reason: impl Into<String>) -> Self {
        Self::IdentityTokenInvalid {
            reason: reason.into(),
        }
    }

    /// Creates an access denied error.
    pub fn access_denied(user: impl Into<String>) -> Self {
        Self::AccessDenied { user: user.into() }
    }

    /// Returns the status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::IdentityTokenInvalid { .. } => StatusCode::BadIdentityTokenInvalid,
            Self::AccessDenied { .. } => StatusCode::BadUserAccessDenied,
            Self::SessionIdInvalid => StatusCode::BadSessionIdInvalid,
            Self::NotActivated { .. } => StatusCode::BadSessionNotActivated,
            Self::ChannelMismatch { .. } => StatusCode::BadSecureChannelIdInvalid,
            Self::TooManySessions { .. } => StatusCode::BadTooManySessions,
            Self::Closed => StatusCode::BadSessionClosed,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::IdentityTokenInvalid { .. } => 1,
            Self::AccessDenied { .. } => 2,
            Self::SessionIdInvalid => 3,
            Self::NotActivated { .. } => 4,
            Self::ChannelMismatch { .. } => 5,
            Self::TooManySessions { .. } => 6,
            Self::Closed => 7,
        };
        ErrorCode::new(3, code)
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Unknown subscription id.
    #[error("Subscription {id} does not exist")]
    SubscriptionIdInvalid {
        /// Subscription id.
        id: u32,
    },

    /// Unknown monitored item id.
    #[error("Monitored item {id} does not exist")]
    MonitoredItemIdInvalid {
        /// Monitored item id.
        id: u32,
    },

    /// Subscription limit reached.
    #[error("Too many subscriptions (max {max})")]
    TooManySubscriptions {
        /// Configured limit.
        max: usize,
    },

    /// Monitored item limit reached.
    #[error("Too many monitored items (max {max})")]
    TooManyMonitoredItems {
        /// Configured limit.
        max: usize,
    },

    /// The requested notification is no longer in the retransmission queue.
    #[error("Notification {sequence_number} is no longer available")]
    MessageNotAvailable {
        /// Requested sequence number.
        sequence_number: u32,
    },

    /// A gap in notification sequence numbers could not be repaired.
    #[error("Sequence number mismatch: expected {expected}, received {received}")]
    SequenceMismatch {
        /// Next expected sequence number.
        expected: u32,
        /// Sequence number received.
        received: u32,
    },

    /// Invalid subscription or monitored item parameters.
    #[error("Invalid settings: {reason}")]
    InvalidSettings {
        /// What was wrong.
        reason: String,
    },
}

impl SubscriptionError {
    /// Creates an invalid settings error.
    pub fn invalid_settings(reason: impl Into<String>) -> Self {
        Self::InvalidSettings {
            reason: reason.into(),
        }
    }

    /// Returns the status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SubscriptionIdInvalid { .. } => StatusCode::BadSubscriptionIdInvalid,
            Self::MonitoredItemIdInvalid { .. } => StatusCode::BadMonitoredItemIdInvalid,
            Self::TooManySubscriptions { .. } => StatusCode::BadTooManySubscriptions,
            Self::TooManyMonitoredItems { .. } => StatusCode::BadTooManyMonitoredItems,
            Self::MessageNotAvailable { .. } => StatusCode::BadMessageNotAvailable,
            Self::SequenceMismatch { .. } => StatusCode::BadSequenceNumberUnknown,
            Self::InvalidSettings { .. } => StatusCode::BadInvalidArgument,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::SubscriptionIdInvalid { .. } => 1,
            Self::MonitoredItemIdInvalid { .. } => 2,
            Self::TooManySubscriptions { .. } => 3,
            Self::TooManyMonitoredItems { .. } => 4,
            Self::MessageNotAvailable { .. } => 5,
            Self::SequenceMismatch { .. } => 6,
            Self::InvalidSettings { .. } => 7,
        };
        ErrorCode::new(4, code)
    }
}

// =============================================================================
// ServiceError
// =============================================================================

/// Request-level errors reported through a status code.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The peer answered with a bad service result.
    #[error("{service} failed: {status}")]
    Fault {
        /// Service name.
        service: String,
        /// Status from the response header.
        status: StatusCode,
    },

    /// The request type is not routed by this server.
    #[error("Service with type id {type_id} is not supported")]
    Unsupported {
        /// Binary encoding id of the request.
        type_id: u32,
    },

    /// The request was empty.
    #[error("Nothing to do")]
    NothingToDo,

    /// Too many operations in one request.
    #[error("Request carries {count} operations, limit is {max}")]
    TooManyOperations {
        /// Operations in the request.
        count: usize,
        /// Configured limit.
        max: usize,
    },

    /// A request argument is invalid.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong.
        reason: String,
    },

    /// The peer answered with an unexpected response type.
    #[error("Unexpected response: expected {expected}, received {actual}")]
    UnexpectedResponse {
        /// Expected response name.
        expected: &'static str,
        /// Received response name.
        actual: &'static str,
    },
}

impl ServiceError {
    /// Creates a fault error.
    pub fn fault(service: impl Into<String>, status: StatusCode) -> Self {
        Self::Fault {
            service: service.into(),
            status,
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns the status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Fault { status, .. } => *status,
            Self::Unsupported { .. } => StatusCode::BadServiceUnsupported,
            Self::NothingToDo => StatusCode::BadNothingToDo,
            Self::TooManyOperations { .. } => StatusCode::BadTooManyOperations,
            Self::InvalidArgument { .. } => StatusCode::BadInvalidArgument,
            Self::UnexpectedResponse { .. } => StatusCode::BadUnexpectedError,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Fault { .. } => 1,
            Self::Unsupported { .. } => 2,
            Self::NothingToDo => 3,
            Self::TooManyOperations { .. } => 4,
            Self::InvalidArgument { .. } => 5,
            Self::UnexpectedResponse { .. } => 6,
        };
        ErrorCode::new(5, code)
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A field holds an invalid value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// What was wrong.
        reason: String,
    },

    /// The endpoint URL cannot be used.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint {
        /// The URL.
        url: String,
        /// What was wrong.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("Failed to load '{path}': {reason}")]
    Load {
        /// File path.
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse {format} configuration: {reason}")]
    Parse {
        /// File format.
        format: &'static str,
        /// Parser message.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::InvalidValue { .. } => 1,
            Self::InvalidEndpoint { .. } => 2,
            Self::Load { .. } => 3,
            Self::Parse { .. } => 4,
        };
        ErrorCode::new(8, code)
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Timeout errors.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// Connecting to an endpoint timed out.
    #[error("Connecting to '{endpoint}' timed out after {duration:?}")]
    Connect {
        /// Endpoint URL.
        endpoint: String,
        /// Elapsed time.
        duration: Duration,
    },

    /// The HEL/ACK handshake timed out.
    #[error("Handshake timed out after {duration:?}")]
    Handshake {
        /// Elapsed time.
        duration: Duration,
    },

    /// A request did not complete in time.
    #[error("{service} timed out after {duration:?}")]
    Request {
        /// Service name.
        service: String,
        /// Elapsed time.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Creates a request timeout.
    pub fn request(service: impl Into<String>, duration: Duration) -> Self {
        Self::Request {
            service: service.into(),
            duration,
        }
    }

    /// Returns the elapsed duration.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Connect { duration, .. }
            | Self::Handshake { duration }
            | Self::Request { duration, .. } => *duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Connect { .. } => 1,
            Self::Handshake { .. } => 2,
            Self::Request { .. } => 3,
        };
        ErrorCode::new(9, code)
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code.
///
/// Format: `UA-XXYY` where XX is the category and YY the specific error.
/// Categories: 1 transport, 2 channel, 3 session, 4 subscription, 5 service,
/// 8 configuration, 9 timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with UaError.
pub type UaResult<T> = Result<T, UaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let error = UaError::channel(ChannelError::ProtocolVersionUnsupported {
            requested: 0xDEAD_BEEF,
        });
        assert_eq!(error.status_code(), StatusCode::BadProtocolVersionUnsupported);
        assert!(!error.is_fatal());

        let error = UaError::session(SessionError::SessionIdInvalid);
        assert_eq!(error.status_code(), StatusCode::BadSessionIdInvalid);

        let error = UaError::fault("Read", StatusCode::BadNodeIdUnknown);
        assert_eq!(error.status_code(), StatusCode::BadNodeIdUnknown);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(UaError::decoding("short buffer").is_fatal());
        assert!(UaError::channel(ChannelError::TokenUnknown { token_id: 3 }).is_fatal());
        assert!(!UaError::channel(ChannelError::Closed).is_fatal());
        assert!(!UaError::session(SessionError::identity_token_invalid("x")).is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let error: UaError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(
            error,
            UaError::Transport(TransportError::ConnectionClosed)
        ));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_code_display() {
        let code = UaError::timeout(TimeoutError::request("Read", Duration::from_secs(1)))
            .error_code();
        assert_eq!(code.to_string(), "UA-0903");
        assert_eq!(code.as_u16(), 0x0903);
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(ErrorSeverity::Warning.to_tracing_level(), Level::WARN);
        assert_eq!(
            UaError::configuration(ConfigurationError::invalid_value("port", "zero")).severity(),
            ErrorSeverity::Critical
        );
        assert!(ErrorSeverity::Info < ErrorSeverity::Critical);
    }
}
