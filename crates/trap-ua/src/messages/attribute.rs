// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read and Write.

use bytes::{Bytes, BytesMut};

use super::{encode_no_diagnostics, skip_diagnostics};
use crate::encoding::{BinaryDecode, BinaryEncode};
use crate::error::{UaError, UaResult};
use crate::status::StatusCode;
use crate::types::{AttributeId, DataValue, NodeId, QualifiedName};

/// Which timestamps a server returns with values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampsToReturn {
    /// Source timestamp only.
    Source,
    /// Server timestamp only.
    Server,
    /// Both timestamps.
    #[default]
    Both,
    /// No timestamps.
    Neither,
}

impl TimestampsToReturn {
    /// Removes the timestamps not requested.
    pub fn apply(&self, value: &mut DataValue) {
        match self {
            Self::Source => value.server_timestamp = None,
            Self::Server => value.source_timestamp = None,
            Self::Both => {}
            Self::Neither => {
                value.source_timestamp = None;
                value.server_timestamp = None;
            }
        }
    }
}

impl BinaryEncode for TimestampsToReturn {
    fn encode(&self, buf: &mut BytesMut) {
        let value: u32 = match self {
            Self::Source => 0,
            Self::Server => 1,
            Self::Both => 2,
            Self::Neither => 3,
        };
        value.encode(buf);
    }
}

impl BinaryDecode for TimestampsToReturn {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        match u32::decode(buf)? {
            0 => Ok(Self::Source),
            1 => Ok(Self::Server),
            2 => Ok(Self::Both),
            3 => Ok(Self::Neither),
            other => Err(UaError::decoding(format!("invalid timestamps to return {other}"))),
        }
    }
}

/// One attribute to read or monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadValueId {
    /// Node to read.
    pub node_id: NodeId,
    /// Raw attribute id; unknown ids fail per operation.
    pub attribute_id: u32,
    /// Index range; unsupported when set.
    pub index_range: Option<String>,
}

impl ReadValueId {
    /// Reads the Value attribute of `node_id`.
    pub fn value(node_id: NodeId) -> Self {
        Self::new(node_id, AttributeId::Value)
    }

    /// Reads `attribute` of `node_id`.
    pub fn new(node_id: NodeId, attribute: AttributeId) -> Self {
        Self {
            node_id,
            attribute_id: attribute.value(),
            index_range: None,
        }
    }

    /// Returns the attribute if the id is known.
    pub fn attribute(&self) -> Option<AttributeId> {
        AttributeId::from_value(self.attribute_id)
    }
}

impl BinaryEncode for ReadValueId {
    fn encode(&self, buf: &mut BytesMut) {
        self.node_id.encode(buf);
        self.attribute_id.encode(buf);
        self.index_range.encode(buf);
        // data encoding: default
        QualifiedName::new(0, "").encode(buf);
    }
}

impl BinaryDecode for ReadValueId {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let value = Self {
            node_id: NodeId::decode(buf)?,
            attribute_id: u32::decode(buf)?,
            index_range: Option::<String>::decode(buf)?,
        };
        QualifiedName::decode(buf)?;
        Ok(value)
    }
}

/// Read request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadRequest {
    /// Maximum acceptable age of cached values in milliseconds.
    pub max_age: f64,
    /// Timestamps to return.
    pub timestamps_to_return: TimestampsToReturn,
    /// Attributes to read.
    pub nodes_to_read: Vec<ReadValueId>,
}

impl BinaryEncode for ReadRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.max_age.encode(buf);
        self.timestamps_to_return.encode(buf);
        self.nodes_to_read.encode(buf);
    }
}

impl BinaryDecode for ReadRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            max_age: f64::decode(buf)?,
            timestamps_to_return: TimestampsToReturn::decode(buf)?,
            nodes_to_read: Vec::<ReadValueId>::decode(buf)?,
        })
    }
}

/// Read results in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResponse {
    /// One value per requested attribute.
    pub results: Vec<DataValue>,
}

impl BinaryEncode for ReadResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.results.encode(buf);
        encode_no_diagnostics(buf);
    }
}

impl BinaryDecode for ReadResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let results = Vec::<DataValue>::decode(buf)?;
        skip_diagnostics(buf)?;
        Ok(Self { results })
    }
}

/// One attribute to write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteValue {
    /// Node to write.
    pub node_id: NodeId,
    /// Raw attribute id.
    pub attribute_id: u32,
    /// Index range; unsupported when set.
    pub index_range: Option<String>,
    /// Value to write.
    pub value: DataValue,
}

impl WriteValue {
    /// Writes the Value attribute of `node_id`.
    pub fn value(node_id: NodeId, value: DataValue) -> Self {
        Self {
            node_id,
            attribute_id: AttributeId::Value.value(),
            index_range: None,
            value,
        }
    }
}

impl BinaryEncode for WriteValue {
    fn encode(&self, buf: &mut BytesMut) {
        self.node_id.encode(buf);
        self.attribute_id.encode(buf);
        self.index_range.encode(buf);
        self.value.encode(buf);
    }
}

impl BinaryDecode for WriteValue {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            node_id: NodeId::decode(buf)?,
            attribute_id: u32::decode(buf)?,
            index_range: Option::<String>::decode(buf)?,
            value: DataValue::decode(buf)?,
        })
    }
}

/// Write request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteRequest {
    /// Attributes to write.
    pub nodes_to_write: Vec<WriteValue>,
}

impl BinaryEncode for WriteRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.nodes_to_write.encode(buf);
    }
}

impl BinaryDecode for WriteRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            nodes_to_write: Vec::<WriteValue>::decode(buf)?,
        })
    }
}

/// Write results in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResponse {
    /// One status per write.
    pub results: Vec<StatusCode>,
}

impl BinaryEncode for WriteResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.results.encode(buf);
        encode_no_diagnostics(buf);
    }
}

impl BinaryDecode for WriteResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let results = Vec::<StatusCode>::decode(buf)?;
        skip_diagnostics(buf)?;
        Ok(Self { results })
    }
}
