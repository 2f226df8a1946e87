// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Session Integration Tests
//!
//! - `test_naming_*`: generated session names
//! - `test_identity_*`: identity validation and authentication
//! - `test_attribute_*`: Read and Write
//! - `test_lifecycle_*`: close, transfer and expiry

use std::sync::Arc;
use std::time::Duration;

use trap_ua::config::SessionOptions;
use trap_ua::session::UserTable;
use trap_ua::types::Variant;
use trap_ua::{DataValue, NodeId, StatusCode};

use trap_ua_tests::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Naming
// =============================================================================

#[tokio::test]
async fn test_naming_unnamed_sessions_are_numbered() {
    let server = TestServer::start().await;
    let client = server.connect().await;

    let mut names = Vec::new();
    for _ in 0..4 {
        let session = client
            .create_session(&SessionOptions::anonymous())
            .await
            .unwrap();
        names.push(session.name().to_string());
    }
    assert_eq!(names, ["Session1", "Session2", "Session3", "Session4"]);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_naming_client_prefix() {
    let server = TestServer::start().await;
    let client = server.connect().await;

    let options = SessionOptions::anonymous().with_client_name("Press");
    let mut names = Vec::new();
    for _ in 0..3 {
        names.push(client.create_session(&options).await.unwrap().name().to_string());
    }
    assert_eq!(names, ["Press1", "Press2", "Press3"]);

    client.close().await;
    server.shutdown().await;
}

// =============================================================================
// Identity
// =============================================================================

#[tokio::test]
async fn test_identity_blank_user_name_is_rejected() {
    let server = TestServer::start().await;
    let client = server.connect().await;

    assert_status(
        client.create_session(&SessionOptions::user("", "secret")).await,
        StatusCode::BadIdentityTokenInvalid,
    );

    // The channel stays usable.
    assert!(client.is_open());
    let session = client
        .create_session(&SessionOptions::anonymous())
        .await
        .unwrap();
    let value = session.read_value(PlantFixtures::temperature()).await.unwrap();
    assert_eq!(f64_value(&value), 21.5);

    // The rejected attempt did not take a name.
    assert_eq!(session.name(), "Session1");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.observer.opened(), 1);
    assert_eq!(server.observer.closed(), 0);
    assert_eq!(server.observer.transactions("CreateSession"), 1);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_identity_user_table() {
    let users = UserTable::new()
        .with_user("operator", "s3cret")
        .allow_anonymous(false);
    let server = TestServer::start_with(ConfigFixtures::server(), PlantFixtures::plant(), |builder| {
        builder.authenticator(Arc::new(users))
    })
    .await;
    let client = server.connect().await;

    assert_status(
        client.create_session(&SessionOptions::user("operator", "wrong")).await,
        StatusCode::BadUserAccessDenied,
    );
    assert_status(
        client.create_session(&SessionOptions::anonymous()).await,
        StatusCode::BadUserAccessDenied,
    );
    let session = client
        .create_session(&SessionOptions::user("operator", "s3cret"))
        .await
        .unwrap();
    assert!(!session.is_closed());

    client.close().await;
    server.shutdown().await;
}

// =============================================================================
// Attribute services
// =============================================================================

#[tokio::test]
async fn test_attribute_read_and_write() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    let status = session
        .write_value(PlantFixtures::speed(), DataValue::new(1500i32))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::Good);
    let value = session.read_value(PlantFixtures::speed()).await.unwrap();
    assert_eq!(value.value, Some(Variant::Int32(1500)));
    assert_eq!(server.space.write_count(), 1);

    let status = session
        .write_value(PlantFixtures::serial(), DataValue::new("SN-9999"))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BadNotWritable);

    let missing = session
        .read_value(NodeId::string(PLANT_NS, "Nowhere"))
        .await
        .unwrap();
    assert_eq!(missing.status, StatusCode::BadNodeIdUnknown);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_lifecycle_closed_session_rejects_calls() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    session.close().await.unwrap();
    assert!(session.is_closed());
    assert_status(
        session.read_value(PlantFixtures::temperature()).await,
        StatusCode::BadSessionClosed,
    );
    let sessions = server.handle.sessions().clone();
    assert!(eventually(WAIT, || sessions.is_empty()).await);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_transfer_to_new_channel() {
    let server = TestServer::start().await;
    let (first, session) = server.connect_session().await;
    let second = server.connect().await;

    session.transfer_to(&second).await.unwrap();
    assert_eq!(session.client().channel_id(), second.channel_id());

    first.close().await;
    let value = session.read_value(PlantFixtures::temperature()).await.unwrap();
    assert_eq!(f64_value(&value), 21.5);

    session.close().await.unwrap();
    second.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_detached_session_expires() {
    let mut config = ConfigFixtures::server();
    config.sessions.channel_loss_grace = Duration::from_millis(200);
    let server = TestServer::start_with_config(config).await;
    let (first, session) = server.connect_session().await;

    first.close().await;
    let sessions = server.handle.sessions().clone();
    assert!(eventually(WAIT, || sessions.is_empty()).await);

    let second = server.connect().await;
    assert_status(
        session.transfer_to(&second).await,
        StatusCode::BadSessionIdInvalid,
    );
    let snapshot = server.handle.diagnostics();
    assert_eq!(snapshot.totals.sessions_expired, 1);

    second.close().await;
    server.shutdown().await;
}
