// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Browse Integration Tests
//!
//! - `test_browse_*`: Browse, paging and BrowseNext
//! - `test_translate_*`: TranslateBrowsePathsToNodeIds

use trap_ua::messages::{BrowseDescription, BrowsePath, RelativePathElement};
use trap_ua::types::{BrowseDirection, QualifiedName};
use trap_ua::{NodeId, StatusCode};

use trap_ua_tests::prelude::*;

fn browse_tags() -> Vec<BrowseDescription> {
    vec![BrowseDescription::new(PlantFixtures::tags(), BrowseDirection::Forward)]
}

// =============================================================================
// Browse
// =============================================================================

#[tokio::test]
async fn test_browse_pages_through_continuation_points() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    let mut results = session.browse(browse_tags(), 10).await.unwrap();
    assert_eq!(results.len(), 1);
    let mut result = results.remove(0);
    assert_eq!(result.status_code, StatusCode::Good);
    assert_eq!(result.references.len(), 10);
    assert!(!result.continuation_point.is_empty());

    let mut seen: Vec<NodeId> = result.references.iter().map(|r| r.node_id.clone()).collect();
    let mut pages = 1;
    while !result.continuation_point.is_empty() {
        let point = std::mem::take(&mut result.continuation_point);
        result = session.browse_next(false, vec![point]).await.unwrap().remove(0);
        assert_eq!(result.status_code, StatusCode::Good);
        seen.extend(result.references.iter().map(|r| r.node_id.clone()));
        pages += 1;
    }
    assert_eq!(pages, 3);
    assert_eq!(seen.len(), TAG_COUNT);
    for index in 0..TAG_COUNT {
        assert!(seen.contains(&PlantFixtures::tag(index)), "Tag{index:02} missing");
    }

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_browse_next_after_last_page_is_stable() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    let mut result = session.browse(browse_tags(), 10).await.unwrap().remove(0);
    let mut last_point = Vec::new();
    while !result.continuation_point.is_empty() {
        last_point = std::mem::take(&mut result.continuation_point);
        result = session
            .browse_next(false, vec![last_point.clone()])
            .await
            .unwrap()
            .remove(0);
    }
    assert_eq!(result.references.len(), TAG_COUNT - 20);
    assert!(result.continuation_point.is_empty());

    // Neither the exhausted point nor a null point yields more references.
    for point in [Vec::new(), last_point] {
        let mut counts = Vec::new();
        for _ in 0..3 {
            let repeat = session.browse_next(false, vec![point.clone()]).await.unwrap().remove(0);
            assert_eq!(repeat.status_code, StatusCode::BadContinuationPointInvalid);
            assert!(repeat.continuation_point.is_empty());
            counts.push(repeat.references.len());
        }
        assert_eq!(counts, vec![0, 0, 0]);
    }

    // A fresh browse still starts from the first page.
    let again = session.browse(browse_tags(), 10).await.unwrap().remove(0);
    assert_eq!(again.references.len(), 10);
    assert!(!again.continuation_point.is_empty());

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_browse_without_limit_is_stable() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    for _ in 0..3 {
        let result = session.browse(browse_tags(), 0).await.unwrap().remove(0);
        assert_eq!(result.status_code, StatusCode::Good);
        assert!(result.continuation_point.is_empty());
        assert_eq!(result.references.len(), TAG_COUNT);
    }

    let line = session
        .browse(
            vec![BrowseDescription::new(PlantFixtures::line(), BrowseDirection::Both)],
            0,
        )
        .await
        .unwrap()
        .remove(0);
    // Three components forward, the organizing folder inverse.
    assert_eq!(line.references.iter().filter(|r| r.is_forward).count(), 3);
    assert_eq!(line.references.iter().filter(|r| !r.is_forward).count(), 1);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_browse_unknown_node() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    let result = session
        .browse(
            vec![BrowseDescription::new(
                NodeId::string(PLANT_NS, "Nowhere"),
                BrowseDirection::Forward,
            )],
            0,
        )
        .await
        .unwrap()
        .remove(0);
    assert_eq!(result.status_code, StatusCode::BadNodeIdUnknown);
    assert!(result.references.is_empty());

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_browse_next_rejects_invalid_points() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    let results = session
        .browse_next(false, vec![Vec::new(), b"bogus".to_vec()])
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        assert_eq!(result.status_code, StatusCode::BadContinuationPointInvalid);
        assert!(result.references.is_empty());
    }

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_browse_next_release_invalidates_point() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    let result = session.browse(browse_tags(), 10).await.unwrap().remove(0);
    let point = result.continuation_point;
    assert!(!point.is_empty());

    let released = session.browse_next(true, vec![point.clone()]).await.unwrap().remove(0);
    assert_eq!(released.status_code, StatusCode::Good);
    assert!(released.references.is_empty());

    let reused = session.browse_next(false, vec![point]).await.unwrap().remove(0);
    assert_eq!(reused.status_code, StatusCode::BadContinuationPointInvalid);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

// =============================================================================
// Translate
// =============================================================================

#[tokio::test]
async fn test_translate_follows_child_names() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    let paths = vec![
        BrowsePath {
            starting_node: NodeId::OBJECTS_FOLDER,
            relative_path: vec![
                RelativePathElement::child(QualifiedName::new(PLANT_NS, "Line1")),
                RelativePathElement::child(QualifiedName::new(PLANT_NS, "Speed")),
            ],
        },
        BrowsePath {
            starting_node: NodeId::OBJECTS_FOLDER,
            relative_path: vec![RelativePathElement::child(QualifiedName::new(PLANT_NS, "Missing"))],
        },
    ];
    let results = session.translate_browse_paths(paths).await.unwrap();
    assert_eq!(results.len(), 2);

    assert_eq!(results[0].status_code, StatusCode::Good);
    assert_eq!(results[0].targets.len(), 1);
    assert_eq!(results[0].targets[0].target_id, PlantFixtures::speed());
    assert_eq!(results[0].targets[0].remaining_path_index, u32::MAX);

    assert_eq!(results[1].status_code, StatusCode::BadNoMatch);
    assert!(results[1].targets.is_empty());

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}
