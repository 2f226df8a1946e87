// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core OPC UA value types shared by every layer of the stack.
//!
//! - **NodeId**: the four identifier forms with parsing and display
//! - **Variant / DataValue**: values carried by Read, Write and notifications
//! - **SecurityMode / SecurityPolicy**: channel security selection
//! - **AttributeId, NodeClass, BrowseDirection**: address-space vocabulary
//! - **QualifiedName, ReferenceDescription**: Browse results
//!
//! # Examples
//!
//! ```
//! use trap_ua::types::{NodeId, Variant};
//!
//! let node: NodeId = "ns=2;s=Boiler.Temperature".parse().unwrap();
//! assert_eq!(node, NodeId::string(2, "Boiler.Temperature"));
//!
//! let value = Variant::from(21.5_f64);
//! assert_eq!(value.as_f64(), Some(21.5));
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigurationError, UaError};
use crate::status::StatusCode;

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier.
///
/// ```
/// use trap_ua::types::NodeId;
///
/// let numeric = NodeId::numeric(0, 2253);
/// assert_eq!(numeric.to_string(), "i=2253");
///
/// let parsed: NodeId = "ns=2;i=1001".parse().unwrap();
/// assert_eq!(parsed.as_numeric(), Some(1001));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node id.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node id.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque (byte string) node id.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// Root folder (ns=0, i=84).
    pub const ROOT_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(84),
    };

    /// Objects folder (ns=0, i=85).
    pub const OBJECTS_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(85),
    };

    /// Server object (ns=0, i=2253).
    pub const SERVER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2253),
    };

    /// HierarchicalReferences reference type (ns=0, i=33).
    pub const HIERARCHICAL_REFERENCES: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(33),
    };

    /// Organizes reference type (ns=0, i=35).
    pub const ORGANIZES: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(35),
    };

    /// HasComponent reference type (ns=0, i=47).
    pub const HAS_COMPONENT: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(47),
    };

    /// Returns the null node id (ns=0, i=0).
    #[inline]
    pub const fn null() -> Self {
        Self {
            namespace_index: 0,
            identifier: NodeIdentifier::Numeric(0),
        }
    }

    /// Returns `true` for the null node id.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the numeric value if this is a numeric identifier.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match self.identifier {
            NodeIdentifier::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string value if this is a string identifier.
    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match &self.identifier {
            NodeIdentifier::String(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parses `ns=<n>;<t>=<value>` or `<t>=<value>` where `<t>` is one of
    /// `i`, `s`, `g` or `b` (base64).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| {
            UaError::configuration(ConfigurationError::invalid_value("node_id", reason))
        };

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid(format!("'{s}' is missing an identifier")))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| invalid(format!("'{s}' has an invalid namespace index")))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(
                id.parse()
                    .map_err(|_| invalid(format!("'{s}' has an invalid numeric identifier")))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            NodeIdentifier::Guid(
                Uuid::parse_str(id).map_err(|e| invalid(format!("'{s}': {e}")))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(BASE64.decode(id).map_err(|e| invalid(format!("'{s}': {e}")))?)
        } else {
            return Err(invalid(format!(
                "'{s}' has an unknown identifier type, expected i=, s=, g= or b="
            )));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

/// OPC UA node identifier forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
    /// GUID identifier.
    Guid(Uuid),
    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={v}"),
            Self::String(v) => write!(f, "s={v}"),
            Self::Guid(v) => write!(f, "g={v}"),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A scalar or array value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Variant {
    /// No value.
    #[default]
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed byte.
    SByte(i8),
    /// Unsigned byte.
    Byte(u8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit double.
    Double(f64),
    /// String value.
    String(String),
    /// Date/time value.
    DateTime(DateTime<Utc>),
    /// GUID value.
    Guid(Uuid),
    /// Byte string.
    ByteString(Vec<u8>),
    /// Status code value.
    StatusCode(StatusCode),
    /// One-dimensional array of a single scalar type.
    Array(Vec<Variant>),
}

impl Variant {
    /// Returns the built-in type id used on the wire.
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::SByte(_) => 2,
            Self::Byte(_) => 3,
            Self::Int16(_) => 4,
            Self::UInt16(_) => 5,
            Self::Int32(_) => 6,
            Self::UInt32(_) => 7,
            Self::Int64(_) => 8,
            Self::UInt64(_) => 9,
            Self::Float(_) => 10,
            Self::Double(_) => 11,
            Self::String(_) => 12,
            Self::DateTime(_) => 13,
            Self::Guid(_) => 14,
            Self::ByteString(_) => 15,
            Self::StatusCode(_) => 19,
            Self::Array(items) => match items.first() {
                Some(first) => first.type_id(),
                None => 0,
            },
        }
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as `f64` for numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::SByte(v) => Some(f64::from(*v)),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int16(v) => Some(f64::from(*v)),
            Self::UInt16(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::UInt32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `i64` for integer variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SByte(v) => Some(i64::from(*v)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::UInt16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::SByte(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::DateTime(v) => f.write_str(&v.to_rfc3339()),
            Self::Guid(v) => write!(f, "{v}"),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::StatusCode(v) => write!(f, "{v}"),
            Self::Array(v) => write!(f, "[{} items]", v.len()),
        }
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<u32> for Variant {
    fn from(value: u32) -> Self {
        Self::UInt32(value)
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value with status and timestamps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    /// The value, if any.
    pub value: Option<Variant>,
    /// Quality of the value.
    pub status: StatusCode,
    /// Timestamp assigned by the data source.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Timestamp assigned by the server.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good value stamped with the current time.
    pub fn new(value: impl Into<Variant>) -> Self {
        let now = Utc::now();
        Self {
            value: Some(value.into()),
            status: StatusCode::Good,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// Creates a value-less result carrying a status.
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            value: None,
            status,
            source_timestamp: None,
            server_timestamp: Some(Utc::now()),
        }
    }

    /// Returns `true` if the status is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.status.is_good()
    }

    /// Returns `true` if the status is bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.status.is_bad()
    }
}

// =============================================================================
// Security
// =============================================================================

/// Message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,
    /// Messages are signed but not encrypted.
    Sign,
    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the OPC UA security mode value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }

    /// Creates from the OPC UA security mode value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            2 => Some(Self::Sign),
            3 => Some(Self::SignAndEncrypt),
            _ => Option::None,
        }
    }

    /// Returns `true` if this mode signs messages.
    #[inline]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Sign | Self::SignAndEncrypt)
    }

    /// Returns `true` if this mode encrypts messages.
    #[inline]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::SignAndEncrypt)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Security policy selecting the channel's algorithms.
///
/// All non-`None` policies sign with HMAC-SHA256 and encrypt with
/// AES-256-GCM using keys derived per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,
    /// Basic256Sha256.
    Basic256Sha256,
    /// Aes128Sha256RsaOaep.
    Aes128Sha256RsaOaep,
    /// Aes256Sha256RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the OPC UA policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Creates from a policy URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Self::None,
            Self::Basic256Sha256,
            Self::Aes128Sha256RsaOaep,
            Self::Aes256Sha256RsaPss,
        ]
        .into_iter()
        .find(|policy| policy.uri() == uri)
    }

    /// Returns the short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128Sha256RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256Sha256RsaPss",
        }
    }

    /// Returns the nonce length exchanged when opening a channel.
    pub const fn nonce_length(&self) -> usize {
        match self {
            Self::None => 0,
            _ => 32,
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Address space vocabulary
// =============================================================================

/// OPC UA attribute ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    /// NodeId attribute.
    NodeId,
    /// NodeClass attribute.
    NodeClass,
    /// BrowseName attribute.
    BrowseName,
    /// DisplayName attribute.
    DisplayName,
    /// Description attribute.
    Description,
    /// Value attribute.
    #[default]
    Value,
    /// DataType attribute.
    DataType,
    /// AccessLevel attribute.
    AccessLevel,
    /// MinimumSamplingInterval attribute.
    MinimumSamplingInterval,
}

impl AttributeId {
    /// Returns the OPC UA numeric value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::NodeId => 1,
            Self::NodeClass => 2,
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::Description => 5,
            Self::Value => 13,
            Self::DataType => 14,
            Self::AccessLevel => 17,
            Self::MinimumSamplingInterval => 19,
        }
    }

    /// Creates from the OPC UA numeric value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::NodeId),
            2 => Some(Self::NodeClass),
            3 => Some(Self::BrowseName),
            4 => Some(Self::DisplayName),
            5 => Some(Self::Description),
            13 => Some(Self::Value),
            14 => Some(Self::DataType),
            17 => Some(Self::AccessLevel),
            19 => Some(Self::MinimumSamplingInterval),
            _ => None,
        }
    }
}

/// OPC UA node class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Object node.
    Object,
    /// Variable node.
    Variable,
    /// Method node.
    Method,
    /// Object type node.
    ObjectType,
    /// Variable type node.
    VariableType,
    /// Reference type node.
    ReferenceType,
    /// Data type node.
    DataType,
    /// View node.
    View,
}

impl NodeClass {
    /// Returns the OPC UA bit mask value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Object => 1,
            Self::Variable => 2,
            Self::Method => 4,
            Self::ObjectType => 8,
            Self::VariableType => 16,
            Self::ReferenceType => 32,
            Self::DataType => 64,
            Self::View => 128,
        }
    }

    /// Creates from the OPC UA value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Object),
            2 => Some(Self::Variable),
            4 => Some(Self::Method),
            8 => Some(Self::ObjectType),
            16 => Some(Self::VariableType),
            32 => Some(Self::ReferenceType),
            64 => Some(Self::DataType),
            128 => Some(Self::View),
            _ => None,
        }
    }
}

/// Browse direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrowseDirection {
    /// Forward references.
    #[default]
    Forward,
    /// Inverse references.
    Inverse,
    /// Both directions.
    Both,
}

impl BrowseDirection {
    /// Returns the OPC UA value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Forward => 0,
            Self::Inverse => 1,
            Self::Both => 2,
        }
    }

    /// Creates from the OPC UA value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Forward),
            1 => Some(Self::Inverse),
            2 => Some(Self::Both),
            _ => None,
        }
    }

    /// Returns `true` if a reference with the given direction is included.
    pub fn includes(&self, is_forward: bool) -> bool {
        match self {
            Self::Forward => is_forward,
            Self::Inverse => !is_forward,
            Self::Both => true,
        }
    }
}

/// A name qualified by a namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,
    /// Name.
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace_index, self.name)
    }
}

/// One reference returned by Browse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescription {
    /// Reference type.
    pub reference_type_id: NodeId,
    /// `true` for forward references.
    pub is_forward: bool,
    /// Target node.
    pub node_id: NodeId,
    /// Target browse name.
    pub browse_name: QualifiedName,
    /// Target display name.
    pub display_name: String,
    /// Target node class.
    pub node_class: NodeClass,
    /// Target type definition, null if none.
    pub type_definition: NodeId,
}

// =============================================================================
// Monitoring vocabulary
// =============================================================================

/// Monitoring mode of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Neither sampling nor reporting.
    Disabled,
    /// Sampling without reporting.
    Sampling,
    /// Sampling and reporting.
    #[default]
    Reporting,
}

impl MonitoringMode {
    /// Returns the OPC UA value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Sampling => 1,
            Self::Reporting => 2,
        }
    }

    /// Creates from the OPC UA value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Sampling),
            2 => Some(Self::Reporting),
            _ => None,
        }
    }
}

/// Which changes of a sampled value produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataChangeTrigger {
    /// Status changes only.
    Status,
    /// Status or value changes.
    #[default]
    StatusValue,
    /// Status, value or source timestamp changes.
    StatusValueTimestamp,
}

impl DataChangeTrigger {
    /// Returns the OPC UA value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Status => 0,
            Self::StatusValue => 1,
            Self::StatusValueTimestamp => 2,
        }
    }

    /// Creates from the OPC UA value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Status),
            1 => Some(Self::StatusValue),
            2 => Some(Self::StatusValueTimestamp),
            _ => None,
        }
    }
}

// =============================================================================
// humantime_serde helper
// =============================================================================

pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse_forms() {
        assert_eq!("i=85".parse::<NodeId>().unwrap(), NodeId::OBJECTS_FOLDER);
        assert_eq!(
            "ns=3;s=Line1.Pump".parse::<NodeId>().unwrap(),
            NodeId::string(3, "Line1.Pump")
        );

        let guid = Uuid::new_v4();
        let parsed: NodeId = format!("ns=1;g={guid}").parse().unwrap();
        assert_eq!(parsed, NodeId::guid(1, guid));

        let parsed: NodeId = "ns=4;b=AQID".parse().unwrap();
        assert_eq!(parsed, NodeId::opaque(4, vec![1, 2, 3]));
    }

    #[test]
    fn test_node_id_parse_errors() {
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
        assert!("i=abc".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_display_round_trip() {
        let node = NodeId::string(2, "Tank.Level");
        assert_eq!(node.to_string(), "ns=2;s=Tank.Level");
        assert_eq!(node.to_string().parse::<NodeId>().unwrap(), node);
        assert!(NodeId::null().is_null());
    }

    #[test]
    fn test_variant_conversions() {
        assert_eq!(Variant::Int16(-4).as_f64(), Some(-4.0));
        assert_eq!(Variant::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Variant::from("x").as_str(), Some("x"));
        assert_eq!(Variant::Array(vec![Variant::Int32(1)]).type_id(), 6);
        assert_eq!(Variant::Array(Vec::new()).type_id(), 0);
    }

    #[test]
    fn test_security_policy_uri() {
        for policy in [
            SecurityPolicy::None,
            SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes256Sha256RsaPss,
        ] {
            assert_eq!(SecurityPolicy::from_uri(policy.uri()), Some(policy));
        }
        assert_eq!(SecurityPolicy::from_uri("urn:unknown"), None);
        assert_eq!(SecurityMode::from_value(3), Some(SecurityMode::SignAndEncrypt));
    }

    #[test]
    fn test_browse_direction_includes() {
        assert!(BrowseDirection::Forward.includes(true));
        assert!(!BrowseDirection::Forward.includes(false));
        assert!(BrowseDirection::Both.includes(false));
    }
}
