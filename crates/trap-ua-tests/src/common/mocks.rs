// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! In-memory collaborators for driving a real server in tests.
//!
//! - [`MemoryAddressSpace`]: node table with values, references and a
//!   change feed
//! - [`RecordingObserver`]: records channel lifecycle events
//! - [`RecordingSink`]: records published notification messages

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use trap_ua::address_space::{AddressSpace, NodeHandle, ValueChange};
use trap_ua::channel::{ChannelEvent, ChannelObserver};
use trap_ua::messages::PublishResponse;
use trap_ua::session::Session;
use trap_ua::subscription::NotificationSink;
use trap_ua::types::{
    AttributeId, BrowseDirection, DataValue, NodeClass, NodeId, QualifiedName,
    ReferenceDescription, Variant,
};
use trap_ua::{StatusCode, UaResult};

// =============================================================================
// Memory Address Space
// =============================================================================

#[derive(Debug, Clone)]
struct MemoryNode {
    browse_name: QualifiedName,
    node_class: NodeClass,
    value: Option<DataValue>,
    writable: bool,
}

/// A node table kept in memory.
///
/// Every value change, whether from a client write or from
/// [`MemoryAddressSpace::set_value`], is published on the change feed.
pub struct MemoryAddressSpace {
    nodes: DashMap<NodeId, MemoryNode>,
    references: Mutex<HashMap<NodeId, Vec<(NodeId, NodeId)>>>,
    changes: Option<broadcast::Sender<ValueChange>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl std::fmt::Debug for MemoryAddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAddressSpace")
            .field("nodes", &self.nodes.len())
            .field("publishes_changes", &self.changes.is_some())
            .finish()
    }
}

impl Default for MemoryAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAddressSpace {
    /// Creates an address space holding the Objects folder and publishing
    /// value changes.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self::build(Some(sender))
    }

    /// Creates an address space without a change feed; monitored items
    /// fall back to polling.
    pub fn polling() -> Self {
        Self::build(None)
    }

    fn build(changes: Option<broadcast::Sender<ValueChange>>) -> Self {
        let space = Self {
            nodes: DashMap::new(),
            references: Mutex::new(HashMap::new()),
            changes,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        };
        space.nodes.insert(
            NodeId::OBJECTS_FOLDER,
            MemoryNode {
                browse_name: QualifiedName::new(0, "Objects"),
                node_class: NodeClass::Object,
                value: None,
                writable: false,
            },
        );
        space
    }

    /// Adds an object node organized under `parent`.
    pub fn add_object(&self, parent: &NodeId, node_id: NodeId, name: &str) -> NodeId {
        self.nodes.insert(
            node_id.clone(),
            MemoryNode {
                browse_name: QualifiedName::new(node_id.namespace_index, name),
                node_class: NodeClass::Object,
                value: None,
                writable: false,
            },
        );
        self.add_reference(parent, NodeId::ORGANIZES, &node_id);
        node_id
    }

    /// Adds a writable variable node as a component of `parent`.
    pub fn add_variable(
        &self,
        parent: &NodeId,
        node_id: NodeId,
        name: &str,
        value: impl Into<Variant>,
    ) -> NodeId {
        self.nodes.insert(
            node_id.clone(),
            MemoryNode {
                browse_name: QualifiedName::new(node_id.namespace_index, name),
                node_class: NodeClass::Variable,
                value: Some(DataValue::new(value)),
                writable: true,
            },
        );
        self.add_reference(parent, NodeId::HAS_COMPONENT, &node_id);
        node_id
    }

    /// Adds a forward reference.
    pub fn add_reference(&self, source: &NodeId, reference_type: NodeId, target: &NodeId) {
        self.references
            .lock()
            .entry(source.clone())
            .or_default()
            .push((reference_type, target.clone()));
    }

    /// Marks a variable read-only.
    pub fn set_read_only(&self, node_id: &NodeId) {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.writable = false;
        }
    }

    /// Changes a value from the data source side.
    pub fn set_value(&self, node_id: &NodeId, value: impl Into<Variant>) {
        self.store(node_id, DataValue::new(value));
    }

    /// Current value of a node.
    pub fn value(&self, node_id: &NodeId) -> Option<DataValue> {
        self.nodes.get(node_id).and_then(|node| node.value.clone())
    }

    /// Attribute reads served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Writes accepted so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn store(&self, node_id: &NodeId, value: DataValue) {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.value = Some(value.clone());
        }
        if let Some(changes) = &self.changes {
            let _ = changes.send(ValueChange {
                node_id: node_id.clone(),
                value,
            });
        }
    }

    fn describe(&self, reference_type: &NodeId, is_forward: bool, target: &NodeId) -> Option<ReferenceDescription> {
        let node = self.nodes.get(target)?;
        Some(ReferenceDescription {
            reference_type_id: reference_type.clone(),
            is_forward,
            node_id: target.clone(),
            browse_name: node.browse_name.clone(),
            display_name: node.browse_name.name.clone(),
            node_class: node.node_class,
            type_definition: NodeId::null(),
        })
    }
}

#[async_trait]
impl AddressSpace for MemoryAddressSpace {
    async fn find_node(&self, node_id: &NodeId) -> Option<NodeHandle> {
        self.nodes
            .contains_key(node_id)
            .then(|| NodeHandle::new(node_id.clone(), 0))
    }

    async fn read_attribute(&self, node: &NodeHandle, attribute: AttributeId) -> DataValue {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let Some(entry) = self.nodes.get(&node.node_id) else {
            return DataValue::from_status(StatusCode::BadNodeIdUnknown);
        };
        match attribute {
            AttributeId::Value => entry
                .value
                .clone()
                .unwrap_or_else(|| DataValue::from_status(StatusCode::BadAttributeIdInvalid)),
            AttributeId::BrowseName | AttributeId::DisplayName => {
                DataValue::new(entry.browse_name.name.clone())
            }
            AttributeId::NodeClass => DataValue::new(entry.node_class.value() as i32),
            _ => DataValue::from_status(StatusCode::BadAttributeIdInvalid),
        }
    }

    async fn set_value_from_source(&self, node: &NodeHandle, value: DataValue) -> StatusCode {
        let writable = match self.nodes.get(&node.node_id) {
            Some(entry) => entry.writable,
            None => return StatusCode::BadNodeIdUnknown,
        };
        if !writable {
            return StatusCode::BadNotWritable;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.store(&node.node_id, value);
        StatusCode::Good
    }

    async fn browse(&self, node: &NodeHandle, direction: BrowseDirection) -> Vec<ReferenceDescription> {
        let references = self.references.lock().clone();
        let mut results = Vec::new();
        if direction.includes(true) {
            if let Some(targets) = references.get(&node.node_id) {
                results.extend(
                    targets
                        .iter()
                        .filter_map(|(kind, target)| self.describe(kind, true, target)),
                );
            }
        }
        if direction.includes(false) {
            for (source, targets) in &references {
                for (kind, target) in targets {
                    if *target == node.node_id {
                        results.extend(self.describe(kind, false, source));
                    }
                }
            }
        }
        results
    }

    fn value_changes(&self) -> Option<broadcast::Receiver<ValueChange>> {
        self.changes.as_ref().map(broadcast::Sender::subscribe)
    }
}

// =============================================================================
// Recording Observer
// =============================================================================

/// Records every channel event it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ChannelEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Events recorded so far.
    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().clone()
    }

    /// Number of NewChannel events.
    pub fn opened(&self) -> usize {
        self.count(|e| matches!(e, ChannelEvent::NewChannel { .. }))
    }

    /// Number of CloseChannel events.
    pub fn closed(&self) -> usize {
        self.count(|e| matches!(e, ChannelEvent::CloseChannel { .. }))
    }

    /// Number of TransactionDone events for `service`.
    pub fn transactions(&self, service: &str) -> usize {
        self.count(|e| matches!(e, ChannelEvent::TransactionDone { service: s, .. } if *s == service))
    }

    /// Number of TokenRenewed events.
    pub fn renewals(&self) -> usize {
        self.count(|e| matches!(e, ChannelEvent::TokenRenewed { .. }))
    }

    fn count(&self, predicate: impl Fn(&ChannelEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl ChannelObserver for RecordingObserver {
    fn on_event(&self, event: &ChannelEvent) {
        self.events.lock().push(event.clone());
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Records published notification messages; optionally fails on each.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<PublishResponse>>,
    fail: bool,
}

impl RecordingSink {
    /// A sink that accepts every message.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink that records and then fails every message.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    /// Messages seen so far.
    pub fn messages(&self) -> Vec<PublishResponse> {
        self.messages.lock().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn on_notification(&self, _session: &Session, message: &PublishResponse) -> UaResult<()> {
        self.messages.lock().push(message.clone());
        if self.fail {
            return Err(trap_ua::UaError::fault("sink", StatusCode::BadInternalError));
        }
        Ok(())
    }
}
