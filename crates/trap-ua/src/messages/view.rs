// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Browse, BrowseNext and TranslateBrowsePathsToNodeIds.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::{encode_byte_string, encode_no_diagnostics, skip_diagnostics};
use crate::encoding::{BinaryDecode, BinaryEncode};
use crate::error::UaResult;
use crate::status::StatusCode;
use crate::types::{BrowseDirection, NodeId, QualifiedName, ReferenceDescription};

/// One node to browse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseDescription {
    /// Node to browse.
    pub node_id: NodeId,
    /// Raw browse direction; unknown values fail per operation.
    pub browse_direction: u32,
    /// Reference type filter; null for all.
    pub reference_type_id: NodeId,
    /// Include subtypes of the reference type.
    pub include_subtypes: bool,
    /// Node class filter; 0 for all.
    pub node_class_mask: u32,
    /// Fields to return.
    pub result_mask: u32,
}

impl BrowseDescription {
    /// Browses all references of `node_id` in `direction`.
    pub fn new(node_id: NodeId, direction: BrowseDirection) -> Self {
        Self {
            node_id,
            browse_direction: direction.value(),
            reference_type_id: NodeId::null(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: 0x3F,
        }
    }

    /// Returns the direction if the value is known.
    pub fn direction(&self) -> Option<BrowseDirection> {
        BrowseDirection::from_value(self.browse_direction)
    }
}

impl BinaryEncode for BrowseDescription {
    fn encode(&self, buf: &mut BytesMut) {
        self.node_id.encode(buf);
        self.browse_direction.encode(buf);
        self.reference_type_id.encode(buf);
        self.include_subtypes.encode(buf);
        self.node_class_mask.encode(buf);
        self.result_mask.encode(buf);
    }
}

impl BinaryDecode for BrowseDescription {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            node_id: NodeId::decode(buf)?,
            browse_direction: u32::decode(buf)?,
            reference_type_id: NodeId::decode(buf)?,
            include_subtypes: bool::decode(buf)?,
            node_class_mask: u32::decode(buf)?,
            result_mask: u32::decode(buf)?,
        })
    }
}

/// Browse request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowseRequest {
    /// View to browse; null for the whole address space.
    pub view_id: NodeId,
    /// Most references per node (0 = server limit).
    pub requested_max_references_per_node: u32,
    /// Nodes to browse.
    pub nodes_to_browse: Vec<BrowseDescription>,
}

impl BinaryEncode for BrowseRequest {
    fn encode(&self, buf: &mut BytesMut) {
        // ViewDescription
        self.view_id.encode(buf);
        DateTime::<Utc>::default().encode(buf);
        0u32.encode(buf);
        self.requested_max_references_per_node.encode(buf);
        self.nodes_to_browse.encode(buf);
    }
}

impl BinaryDecode for BrowseRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let view_id = NodeId::decode(buf)?;
        DateTime::<Utc>::decode(buf)?;
        u32::decode(buf)?;
        Ok(Self {
            view_id,
            requested_max_references_per_node: u32::decode(buf)?,
            nodes_to_browse: Vec::<BrowseDescription>::decode(buf)?,
        })
    }
}

/// References found for one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseResult {
    /// Operation status.
    pub status_code: StatusCode,
    /// Opaque continuation point; empty when the result is complete.
    pub continuation_point: Vec<u8>,
    /// References.
    pub references: Vec<ReferenceDescription>,
}

impl BrowseResult {
    /// A result carrying only a bad status.
    pub fn from_status(status_code: StatusCode) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }
}

impl BinaryEncode for BrowseResult {
    fn encode(&self, buf: &mut BytesMut) {
        self.status_code.encode(buf);
        encode_byte_string(&self.continuation_point, buf);
        self.references.encode(buf);
    }
}

impl BinaryDecode for BrowseResult {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            status_code: StatusCode::decode(buf)?,
            continuation_point: Vec::<u8>::decode(buf)?,
            references: Vec::<ReferenceDescription>::decode(buf)?,
        })
    }
}

/// Browse results in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseResponse {
    /// One result per node.
    pub results: Vec<BrowseResult>,
}

impl BinaryEncode for BrowseResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.results.encode(buf);
        encode_no_diagnostics(buf);
    }
}

impl BinaryDecode for BrowseResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let results = Vec::<BrowseResult>::decode(buf)?;
        skip_diagnostics(buf)?;
        Ok(Self { results })
    }
}

/// Continues or releases browse continuation points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowseNextRequest {
    /// Release the points instead of continuing.
    pub release_continuation_points: bool,
    /// Points returned by Browse or BrowseNext.
    pub continuation_points: Vec<Vec<u8>>,
}

impl BinaryEncode for BrowseNextRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.release_continuation_points.encode(buf);
        (self.continuation_points.len() as i32).encode(buf);
        for point in &self.continuation_points {
            encode_byte_string(point, buf);
        }
    }
}

impl BinaryDecode for BrowseNextRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            release_continuation_points: bool::decode(buf)?,
            continuation_points: Vec::<Vec<u8>>::decode(buf)?,
        })
    }
}

/// BrowseNext results in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseNextResponse {
    /// One result per continuation point.
    pub results: Vec<BrowseResult>,
}

impl BinaryEncode for BrowseNextResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.results.encode(buf);
        encode_no_diagnostics(buf);
    }
}

impl BinaryDecode for BrowseNextResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let results = Vec::<BrowseResult>::decode(buf)?;
        skip_diagnostics(buf)?;
        Ok(Self { results })
    }
}

/// One hop of a relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativePathElement {
    /// Reference type to follow; null for any hierarchical reference.
    pub reference_type_id: NodeId,
    /// Follow inverse references.
    pub is_inverse: bool,
    /// Include subtypes of the reference type.
    pub include_subtypes: bool,
    /// Browse name of the target.
    pub target_name: QualifiedName,
}

impl RelativePathElement {
    /// A forward hierarchical hop to `target_name`.
    pub fn child(target_name: QualifiedName) -> Self {
        Self {
            reference_type_id: NodeId::HIERARCHICAL_REFERENCES,
            is_inverse: false,
            include_subtypes: true,
            target_name,
        }
    }
}

impl BinaryEncode for RelativePathElement {
    fn encode(&self, buf: &mut BytesMut) {
        self.reference_type_id.encode(buf);
        self.is_inverse.encode(buf);
        self.include_subtypes.encode(buf);
        self.target_name.encode(buf);
    }
}

impl BinaryDecode for RelativePathElement {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            reference_type_id: NodeId::decode(buf)?,
            is_inverse: bool::decode(buf)?,
            include_subtypes: bool::decode(buf)?,
            target_name: QualifiedName::decode(buf)?,
        })
    }
}

/// Starting node plus relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsePath {
    /// Node to start from.
    pub starting_node: NodeId,
    /// Hops to follow.
    pub relative_path: Vec<RelativePathElement>,
}

impl BinaryEncode for BrowsePath {
    fn encode(&self, buf: &mut BytesMut) {
        self.starting_node.encode(buf);
        self.relative_path.encode(buf);
    }
}

impl BinaryDecode for BrowsePath {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            starting_node: NodeId::decode(buf)?,
            relative_path: Vec::<RelativePathElement>::decode(buf)?,
        })
    }
}

/// A node a browse path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsePathTarget {
    /// Resolved node.
    pub target_id: NodeId,
    /// Index of the first unprocessed element; `u32::MAX` when fully resolved.
    pub remaining_path_index: u32,
}

impl BinaryEncode for BrowsePathTarget {
    fn encode(&self, buf: &mut BytesMut) {
        self.target_id.encode(buf);
        self.remaining_path_index.encode(buf);
    }
}

impl BinaryDecode for BrowsePathTarget {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            target_id: NodeId::decode(buf)?,
            remaining_path_index: u32::decode(buf)?,
        })
    }
}

/// Result of resolving one browse path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowsePathResult {
    /// Operation status.
    pub status_code: StatusCode,
    /// Resolved targets.
    pub targets: Vec<BrowsePathTarget>,
}

impl BinaryEncode for BrowsePathResult {
    fn encode(&self, buf: &mut BytesMut) {
        self.status_code.encode(buf);
        self.targets.encode(buf);
    }
}

impl BinaryDecode for BrowsePathResult {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            status_code: StatusCode::decode(buf)?,
            targets: Vec::<BrowsePathTarget>::decode(buf)?,
        })
    }
}

/// TranslateBrowsePathsToNodeIds request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslateBrowsePathsRequest {
    /// Paths to resolve.
    pub browse_paths: Vec<BrowsePath>,
}

impl BinaryEncode for TranslateBrowsePathsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.browse_paths.encode(buf);
    }
}

impl BinaryDecode for TranslateBrowsePathsRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            browse_paths: Vec::<BrowsePath>::decode(buf)?,
        })
    }
}

/// TranslateBrowsePathsToNodeIds results in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslateBrowsePathsResponse {
    /// One result per path.
    pub results: Vec<BrowsePathResult>,
}

impl BinaryEncode for TranslateBrowsePathsResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.results.encode(buf);
        encode_no_diagnostics(buf);
    }
}

impl BinaryDecode for TranslateBrowsePathsResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let results = Vec::<BrowsePathResult>::decode(buf)?;
        skip_diagnostics(buf)?;
        Ok(Self { results })
    }
}
