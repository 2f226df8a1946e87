// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Channel Integration Tests
//!
//! - `test_handshake_*`: HEL/ACK and protocol version negotiation
//! - `test_lifecycle_*`: NewChannel / CloseChannel events
//! - `test_renewal_*`: security token renewal
//! - `test_limits_*`: channel limits

use std::time::Duration;

use trap_ua::config::{ChannelLimits, ClientConfig};
use trap_ua::transport::hello::INCOMPATIBLE_PROTOCOL_VERSION;
use trap_ua::StatusCode;

use trap_ua_tests::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_handshake_sentinel_version_is_rejected() {
    let server = TestServer::start().await;

    let config = ClientConfig {
        protocol_version: INCOMPATIBLE_PROTOCOL_VERSION,
        ..ConfigFixtures::client()
    };
    assert_status(
        server.try_connect(config).await,
        StatusCode::BadProtocolVersionUnsupported,
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.observer.opened(), 0);
    assert_eq!(server.observer.closed(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_in_range_versions_connect() {
    let mut config = ConfigFixtures::server();
    config.protocol_versions.min = 0;
    config.protocol_versions.max = 3;
    let server = TestServer::start_with_config(config).await;

    for version in [0, 1, 3, 7] {
        let client = server
            .try_connect(ClientConfig {
                protocol_version: version,
                ..ConfigFixtures::client()
            })
            .await
            .unwrap_or_else(|e| panic!("version {version} should connect: {e}"));
        assert!(client.is_open());
        client.close().await;
    }
    server.shutdown().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_lifecycle_one_event_pair_per_cycle() {
    let server = TestServer::start().await;

    for cycle in 1..=3 {
        let client = server.connect().await;
        assert!(client.channel_id() > 0);
        client.close().await;

        let observer = server.observer.clone();
        assert!(
            eventually(WAIT, || observer.closed() == cycle).await,
            "cycle {cycle}: closeChannel not observed"
        );
        assert_eq!(server.observer.opened(), cycle);
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.observer.opened(), 3);
    assert_eq!(server.observer.closed(), 3);
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_transactions_are_reported() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;

    session.read_value(PlantFixtures::temperature()).await.unwrap();
    session.read_value(PlantFixtures::speed()).await.unwrap();

    // Events are emitted after the response is queued.
    let observer = server.observer.clone();
    assert!(eventually(WAIT, || observer.transactions("Read") == 2).await);
    assert_eq!(server.observer.transactions("CreateSession"), 1);
    assert_eq!(server.observer.transactions("ActivateSession"), 1);

    let snapshot = server.handle.diagnostics();
    let channel = snapshot
        .channel(client.channel_id())
        .expect("channel diagnostics");
    assert!(channel.transactions >= 4);
    assert!(channel.bytes_received > 0);
    assert!(channel.bytes_sent > 0);
    assert_eq!(snapshot.service("Read").map(|s| s.calls), Some(2));

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_server_shutdown_closes_client() {
    let server = TestServer::start().await;
    let client = server.connect().await;

    server.shutdown().await;
    within(WAIT, "client to notice shutdown", client.closed()).await;
    assert!(!client.is_open());
}

// =============================================================================
// Renewal
// =============================================================================

#[tokio::test]
async fn test_renewal_token_is_replaced_before_expiry() {
    let server = TestServer::start().await;
    let config = ClientConfig {
        requested_token_lifetime: Duration::from_millis(400),
        ..ConfigFixtures::client()
    };
    let client = server.try_connect(config).await.unwrap();
    let session = client
        .create_session(&trap_ua::SessionOptions::anonymous())
        .await
        .unwrap();
    let first = client.token_id();

    let observer = server.observer.clone();
    assert!(eventually(WAIT, || observer.renewals() >= 2).await);
    assert_ne!(client.token_id(), first);

    // Requests keep flowing across renewals.
    let value = session.read_value(PlantFixtures::temperature()).await.unwrap();
    assert_eq!(f64_value(&value), 21.5);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_renewal_explicit_renew() {
    let server = TestServer::start().await;
    let client = server.connect().await;
    let first = client.token_id();

    client.renew_token().await.unwrap();
    assert_ne!(client.token_id(), first);
    let observer = server.observer.clone();
    assert!(eventually(WAIT, || observer.renewals() == 1).await);

    client.close().await;
    server.shutdown().await;
}

// =============================================================================
// Limits
// =============================================================================

#[tokio::test]
async fn test_limits_server_too_busy() {
    let mut config = ConfigFixtures::server();
    config.channel = ChannelLimits {
        max_channels: 1,
        ..config.channel
    };
    let server = TestServer::start_with_config(config).await;

    let first = server.connect().await;
    assert_status(
        server.try_connect(ConfigFixtures::client()).await,
        StatusCode::BadTcpServerTooBusy,
    );

    first.close().await;
    let observer = server.observer.clone();
    assert!(eventually(WAIT, || observer.closed() == 1).await);

    // The slot frees up once the first channel is gone.
    let mut second = None;
    for _ in 0..50 {
        if let Ok(client) = server.try_connect(ConfigFixtures::client()).await {
            second = Some(client);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let second = second.expect("second client should connect after the first closed");
    second.close().await;
    server.shutdown().await;
}
