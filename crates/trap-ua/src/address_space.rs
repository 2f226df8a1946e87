// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The address space the server serves.
//!
//! The stack does not own a node model. Applications implement
//! [`AddressSpace`] over whatever holds their nodes; services and monitored
//! items reach nodes only through this trait.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Plant { tags: DashMap<NodeId, DataValue> }
//!
//! #[async_trait]
//! impl AddressSpace for Plant {
//!     async fn find_node(&self, node_id: &NodeId) -> Option<NodeHandle> {
//!         self.tags.contains_key(node_id).then(|| NodeHandle::new(node_id.clone(), 0))
//!     }
//!     // ...
//! }
//! ```

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::status::StatusCode;
use crate::types::{AttributeId, BrowseDirection, DataValue, NodeId, ReferenceDescription};

/// HasChild, Aggregates, HasComponent, HasProperty, HasSubtype, Organizes,
/// HasEventSource, HasNotifier, HasOrderedComponent.
const HIERARCHICAL_SUBTYPES: [u32; 9] = [34, 44, 47, 46, 45, 35, 36, 48, 49];

/// A resolved node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeHandle {
    /// Node id.
    pub node_id: NodeId,
    /// Implementation-defined slot, e.g. an index into a node table.
    pub slot: u64,
}

impl NodeHandle {
    /// Creates a handle.
    pub fn new(node_id: NodeId, slot: u64) -> Self {
        Self { node_id, slot }
    }
}

/// A value pushed by the address space.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    /// Node whose value changed.
    pub node_id: NodeId,
    /// New value.
    pub value: DataValue,
}

/// Node storage consumed by the services and the subscription engine.
#[async_trait]
pub trait AddressSpace: Send + Sync {
    /// Resolves a node id.
    async fn find_node(&self, node_id: &NodeId) -> Option<NodeHandle>;

    /// Reads one attribute; failures are reported in the value's status.
    async fn read_attribute(&self, node: &NodeHandle, attribute: AttributeId) -> DataValue;

    /// Stores a new value for a variable node.
    async fn set_value_from_source(&self, node: &NodeHandle, value: DataValue) -> StatusCode;

    /// References of `node` in `direction`.
    async fn browse(&self, _node: &NodeHandle, _direction: BrowseDirection) -> Vec<ReferenceDescription> {
        Vec::new()
    }

    /// Subscribes to value changes, if the address space publishes them.
    ///
    /// Monitored items with a sampling interval of 0 follow these instead of
    /// polling.
    fn value_changes(&self) -> Option<broadcast::Receiver<ValueChange>> {
        None
    }
}

/// Returns `true` if `reference_type` passes a browse filter.
///
/// A null filter matches every reference. `HierarchicalReferences` with
/// `include_subtypes` matches the standard hierarchical types.
pub fn reference_type_matches(filter: &NodeId, include_subtypes: bool, reference_type: &NodeId) -> bool {
    if filter.is_null() || filter == reference_type {
        return true;
    }
    if include_subtypes && *filter == NodeId::HIERARCHICAL_REFERENCES {
        return reference_type.namespace_index == 0
            && reference_type
                .as_numeric()
                .is_some_and(|id| HIERARCHICAL_SUBTYPES.contains(&id));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_filter() {
        let hierarchical = NodeId::HIERARCHICAL_REFERENCES;
        assert!(reference_type_matches(&NodeId::null(), false, &NodeId::numeric(0, 40)));
        assert!(reference_type_matches(&hierarchical, true, &NodeId::ORGANIZES));
        assert!(reference_type_matches(&hierarchical, true, &NodeId::HAS_COMPONENT));
        assert!(!reference_type_matches(&hierarchical, false, &NodeId::ORGANIZES));
        // HasTypeDefinition is not hierarchical
        assert!(!reference_type_matches(&hierarchical, true, &NodeId::numeric(0, 40)));
        assert!(reference_type_matches(&NodeId::ORGANIZES, false, &NodeId::ORGANIZES));
    }
}
