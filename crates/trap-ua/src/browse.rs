// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Browse, BrowseNext and TranslateBrowsePathsToNodeIds handlers.
//!
//! These run on the request path of the dispatcher. Results larger than the
//! requested maximum are paged through continuation points held by the
//! session.

use tracing::{debug, trace};

use crate::address_space::{reference_type_matches, AddressSpace};
use crate::config::BrowseLimits;
use crate::error::ServiceError;
use crate::messages::{
    BrowseDescription, BrowseNextRequest, BrowsePath, BrowsePathResult, BrowsePathTarget,
    BrowseRequest, BrowseResult, TranslateBrowsePathsRequest,
};
use crate::session::Session;
use crate::status::StatusCode;
use crate::types::{BrowseDirection, NodeId, ReferenceDescription};

/// Remaining references of a paged browse.
#[derive(Debug, Clone)]
pub struct ContinuationPoint {
    node_id: NodeId,
    remaining: Vec<ReferenceDescription>,
    page_size: usize,
}

impl ContinuationPoint {
    /// Node the references belong to.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// References not yet returned.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

fn page_size(limits: &BrowseLimits, requested: u32) -> usize {
    let max = limits.max_references_per_node;
    let size = match (requested, max) {
        (0, max) => max,
        (requested, 0) => requested,
        (requested, max) => requested.min(max),
    };
    if size == 0 {
        usize::MAX
    } else {
        size as usize
    }
}

/// Splits `references` into the first page and, if needed, a stored
/// continuation point.
fn page(
    session: &Session,
    limits: &BrowseLimits,
    node_id: NodeId,
    mut references: Vec<ReferenceDescription>,
    page_size: usize,
) -> BrowseResult {
    if references.len() <= page_size {
        return BrowseResult {
            status_code: StatusCode::Good,
            continuation_point: Vec::new(),
            references,
        };
    }

    let remaining = references.split_off(page_size);
    let point = ContinuationPoint {
        node_id,
        remaining,
        page_size,
    };
    match session.store_continuation_point(point, limits.max_continuation_points_per_session) {
        Some(continuation_point) => BrowseResult {
            status_code: StatusCode::Good,
            continuation_point,
            references,
        },
        None => BrowseResult::from_status(StatusCode::BadNoContinuationPoints),
    }
}

async fn browse_node(
    space: &dyn AddressSpace,
    description: &BrowseDescription,
) -> Result<Vec<ReferenceDescription>, StatusCode> {
    let direction = description
        .direction()
        .ok_or(StatusCode::BadBrowseDirectionInvalid)?;
    let node = space
        .find_node(&description.node_id)
        .await
        .ok_or(StatusCode::BadNodeIdUnknown)?;

    Ok(space
        .browse(&node, direction)
        .await
        .into_iter()
        .filter(|r| direction.includes(r.is_forward))
        .filter(|r| {
            reference_type_matches(
                &description.reference_type_id,
                description.include_subtypes,
                &r.reference_type_id,
            )
        })
        .filter(|r| {
            description.node_class_mask == 0
                || description.node_class_mask & r.node_class.value() != 0
        })
        .collect())
}

fn check_operations(count: usize, max: usize) -> Result<(), ServiceError> {
    if count == 0 {
        return Err(ServiceError::NothingToDo);
    }
    if max > 0 && count > max {
        return Err(ServiceError::TooManyOperations { count, max });
    }
    Ok(())
}

/// Handles a Browse request.
pub async fn browse(
    space: &dyn AddressSpace,
    session: &Session,
    limits: &BrowseLimits,
    request: &BrowseRequest,
) -> Result<Vec<BrowseResult>, ServiceError> {
    check_operations(request.nodes_to_browse.len(), limits.max_nodes_per_request)?;
    let page_size = page_size(limits, request.requested_max_references_per_node);

    let mut results = Vec::with_capacity(request.nodes_to_browse.len());
    for description in &request.nodes_to_browse {
        let result = match browse_node(space, description).await {
            Ok(references) => {
                trace!(node_id = %description.node_id, count = references.len(), "Browsed node");
                page(session, limits, description.node_id.clone(), references, page_size)
            }
            Err(status) => BrowseResult::from_status(status),
        };
        results.push(result);
    }
    Ok(results)
}

/// Handles a BrowseNext request.
///
/// An empty or unknown continuation point yields
/// `BadContinuationPointInvalid` with no references.
pub fn browse_next(
    session: &Session,
    limits: &BrowseLimits,
    request: &BrowseNextRequest,
) -> Result<Vec<BrowseResult>, ServiceError> {
    check_operations(request.continuation_points.len(), limits.max_nodes_per_request)?;

    Ok(request
        .continuation_points
        .iter()
        .map(|id| {
            let point = match session.take_continuation_point(id) {
                Some(point) if !id.is_empty() => point,
                _ => return BrowseResult::from_status(StatusCode::BadContinuationPointInvalid),
            };
            if request.release_continuation_points {
                debug!(node_id = %point.node_id, "Continuation point released");
                return BrowseResult::from_status(StatusCode::Good);
            }
            page(session, limits, point.node_id, point.remaining, point.page_size)
        })
        .collect())
}

async fn follow(space: &dyn AddressSpace, path: &BrowsePath) -> Result<Vec<NodeId>, StatusCode> {
    if space.find_node(&path.starting_node).await.is_none() {
        return Err(StatusCode::BadNodeIdUnknown);
    }
    if path.relative_path.is_empty() {
        return Err(StatusCode::BadNothingToDo);
    }

    let mut current = vec![path.starting_node.clone()];
    for element in &path.relative_path {
        let direction = if element.is_inverse {
            BrowseDirection::Inverse
        } else {
            BrowseDirection::Forward
        };
        let mut next = Vec::new();
        for node_id in &current {
            let Some(node) = space.find_node(node_id).await else {
                continue;
            };
            for reference in space.browse(&node, direction).await {
                if direction.includes(reference.is_forward)
                    && reference.browse_name == element.target_name
                    && reference_type_matches(
                        &element.reference_type_id,
                        element.include_subtypes,
                        &reference.reference_type_id,
                    )
                    && !next.contains(&reference.node_id)
                {
                    next.push(reference.node_id);
                }
            }
        }
        if next.is_empty() {
            return Err(StatusCode::BadNoMatch);
        }
        current = next;
    }
    Ok(current)
}

/// Handles a TranslateBrowsePathsToNodeIds request.
pub async fn translate_browse_paths(
    space: &dyn AddressSpace,
    limits: &BrowseLimits,
    request: &TranslateBrowsePathsRequest,
) -> Result<Vec<BrowsePathResult>, ServiceError> {
    check_operations(request.browse_paths.len(), limits.max_nodes_per_request)?;

    let mut results = Vec::with_capacity(request.browse_paths.len());
    for path in &request.browse_paths {
        let result = match follow(space, path).await {
            Ok(targets) => BrowsePathResult {
                status_code: StatusCode::Good,
                targets: targets
                    .into_iter()
                    .map(|target_id| BrowsePathTarget {
                        target_id,
                        remaining_path_index: u32::MAX,
                    })
                    .collect(),
            },
            Err(status_code) => BrowsePathResult {
                status_code,
                targets: Vec::new(),
            },
        };
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::address_space::NodeHandle;
    use crate::messages::RelativePathElement;
    use crate::types::{AttributeId, DataValue, NodeClass, QualifiedName};

    /// Objects folder with `count` children named `Child{i}`.
    struct Folder {
        count: u32,
    }

    fn child(i: u32) -> ReferenceDescription {
        ReferenceDescription {
            reference_type_id: NodeId::ORGANIZES,
            is_forward: true,
            node_id: NodeId::numeric(2, i),
            browse_name: QualifiedName::new(2, format!("Child{i}")),
            display_name: format!("Child{i}"),
            node_class: NodeClass::Variable,
            type_definition: NodeId::null(),
        }
    }

    #[async_trait]
    impl AddressSpace for Folder {
        async fn find_node(&self, node_id: &NodeId) -> Option<NodeHandle> {
            let known = *node_id == NodeId::OBJECTS_FOLDER
                || (node_id.namespace_index == 2 && node_id.as_numeric().is_some_and(|n| n < self.count));
            known.then(|| NodeHandle::new(node_id.clone(), 0))
        }

        async fn read_attribute(&self, _node: &NodeHandle, _attribute: AttributeId) -> DataValue {
            DataValue::new(0.0)
        }

        async fn set_value_from_source(&self, _node: &NodeHandle, _value: DataValue) -> StatusCode {
            StatusCode::BadNotWritable
        }

        async fn browse(&self, node: &NodeHandle, _direction: BrowseDirection) -> Vec<ReferenceDescription> {
            if node.node_id == NodeId::OBJECTS_FOLDER {
                (0..self.count).map(child).collect()
            } else {
                Vec::new()
            }
        }
    }

    fn session() -> Session {
        Session::new("Session1".into(), "test".into(), Duration::from_secs(60), 4, 1)
    }

    fn request(max: u32) -> BrowseRequest {
        BrowseRequest {
            view_id: NodeId::null(),
            requested_max_references_per_node: max,
            nodes_to_browse: vec![BrowseDescription::new(NodeId::OBJECTS_FOLDER, BrowseDirection::Forward)],
        }
    }

    #[tokio::test]
    async fn test_paging_through_continuation_points() {
        let space = Folder { count: 5 };
        let session = session();
        let limits = BrowseLimits::default();

        let first = browse(&space, &session, &limits, &request(2)).await.unwrap();
        assert_eq!(first[0].references.len(), 2);
        assert!(!first[0].continuation_point.is_empty());

        let mut next = BrowseNextRequest {
            release_continuation_points: false,
            continuation_points: vec![first[0].continuation_point.clone()],
        };
        let second = browse_next(&session, &limits, &next).unwrap();
        assert_eq!(second[0].references.len(), 2);

        next.continuation_points = vec![second[0].continuation_point.clone()];
        let third = browse_next(&session, &limits, &next).unwrap();
        assert_eq!(third[0].references.len(), 1);
        assert!(third[0].continuation_point.is_empty());
        assert_eq!(session.continuation_points(), 0);
    }

    #[tokio::test]
    async fn test_browse_next_without_continuation_point_is_stable() {
        let session = session();
        let limits = BrowseLimits::default();
        let next = BrowseNextRequest {
            release_continuation_points: false,
            continuation_points: vec![Vec::new()],
        };
        for _ in 0..3 {
            let results = browse_next(&session, &limits, &next).unwrap();
            assert_eq!(results[0].status_code, StatusCode::BadContinuationPointInvalid);
            assert!(results[0].continuation_point.is_empty());
            assert!(results[0].references.is_empty());
        }
    }

    #[tokio::test]
    async fn test_release_and_invalid_direction() {
        let space = Folder { count: 3 };
        let session = session();
        let limits = BrowseLimits::default();

        let first = browse(&space, &session, &limits, &request(1)).await.unwrap();
        let release = BrowseNextRequest {
            release_continuation_points: true,
            continuation_points: vec![first[0].continuation_point.clone()],
        };
        let released = browse_next(&session, &limits, &release).unwrap();
        assert_eq!(released[0].status_code, StatusCode::Good);
        assert_eq!(session.continuation_points(), 0);

        let mut bad = request(0);
        bad.nodes_to_browse[0].browse_direction = 7;
        let results = browse(&space, &session, &limits, &bad).await.unwrap();
        assert_eq!(results[0].status_code, StatusCode::BadBrowseDirectionInvalid);

        let empty = BrowseRequest {
            nodes_to_browse: Vec::new(),
            ..request(0)
        };
        let error = browse(&space, &session, &limits, &empty).await.unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadNothingToDo);
    }

    #[tokio::test]
    async fn test_translate_paths() {
        let space = Folder { count: 3 };
        let limits = BrowseLimits::default();
        let path = |name: &str| BrowsePath {
            starting_node: NodeId::OBJECTS_FOLDER,
            relative_path: vec![RelativePathElement::child(QualifiedName::new(2, name))],
        };
        let request = TranslateBrowsePathsRequest {
            browse_paths: vec![path("Child1"), path("Missing")],
        };
        let results = translate_browse_paths(&space, &limits, &request).await.unwrap();
        assert_eq!(results[0].status_code, StatusCode::Good);
        assert_eq!(results[0].targets[0].target_id, NodeId::numeric(2, 1));
        assert_eq!(results[1].status_code, StatusCode::BadNoMatch);
    }
}
