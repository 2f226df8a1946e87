// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Subscription Integration Tests
//!
//! - `test_publish_*`: data changes and keep-alives reach the client
//! - `test_queue_*`: monitored item queue overflow
//! - `test_handler_*`: change handler isolation
//! - `test_lifecycle_*`: delete, close cascade and lifetime expiry

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use trap_ua::config::{MonitoredItemOptions, SubscriptionSettings};
use trap_ua::types::Variant;
use trap_ua::{StatusCode, SubscriptionEvent, UaError};

use trap_ua_tests::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

fn int_value(value: &trap_ua::DataValue) -> Option<i32> {
    match value.value {
        Some(Variant::Int32(v)) => Some(v),
        _ => None,
    }
}

// =============================================================================
// Publishing
// =============================================================================

#[tokio::test]
async fn test_publish_data_change_reaches_handler() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;
    let subscription = session
        .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(50)))
        .await
        .unwrap();
    assert_eq!(subscription.revised_publishing_interval(), Duration::from_millis(50));

    let item = subscription
        .monitor(PlantFixtures::temperature(), &MonitoredItemOptions::default())
        .await
        .unwrap();
    assert!(item.id() > 0);
    assert_eq!(item.revised_queue_size(), 1);

    let (tx, mut rx) = mpsc::unbounded_channel();
    item.on_change(move |value| {
        let _ = tx.send(value.clone());
        Ok(())
    });

    let item_ref = item.clone();
    assert!(eventually(WAIT, || item_ref.last_value().is_some()).await);

    server.space.set_value(&PlantFixtures::temperature(), 23.25);
    let received = within(WAIT, "changed value", async {
        loop {
            let value = rx.recv().await.expect("handler channel open");
            if f64_value(&value) == 23.25 {
                break value;
            }
        }
    })
    .await;
    assert!(received.source_timestamp.is_some());

    let sink = server.sink.clone();
    assert!(eventually(WAIT, || !sink.messages().is_empty()).await);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_publish_polling_address_space() {
    let server = TestServer::start_with(
        ConfigFixtures::server(),
        PlantFixtures::polling_plant(),
        |builder| builder,
    )
    .await;
    let (client, session) = server.connect_session().await;
    let subscription = session
        .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(30)))
        .await
        .unwrap();
    let item = subscription
        .monitor(
            PlantFixtures::speed(),
            &MonitoredItemOptions::default().sampling_interval(Duration::from_millis(10)),
        )
        .await
        .unwrap();
    assert_eq!(item.revised_sampling_interval(), Duration::from_millis(10));

    server.space.set_value(&PlantFixtures::speed(), 1800i32);
    let item_ref = item.clone();
    assert!(
        eventually(WAIT, || {
            item_ref.last_value().as_ref().and_then(int_value) == Some(1800)
        })
        .await
    );

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_publish_keep_alives_when_idle() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;
    let settings = SubscriptionSettings {
        keep_alive_count: 2,
        lifetime_count: 20,
        ..ConfigFixtures::subscription(Duration::from_millis(30))
    };
    let subscription = session.create_subscription(&settings).await.unwrap();
    let mut events = subscription.events();

    let event = within(WAIT, "keep-alive", async {
        loop {
            match events.recv().await {
                Ok(event @ SubscriptionEvent::KeepAlive { .. }) => break event,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {e}"),
            }
        }
    })
    .await;
    // Nothing was published yet, so the next sequence number is the first.
    assert_eq!(event, SubscriptionEvent::KeepAlive { sequence_number: 1 });

    let snapshot = server.handle.diagnostics();
    let keep_alives = snapshot
        .subscription(subscription.id())
        .map(|s| s.keep_alives)
        .unwrap_or(0);
    assert!(keep_alives >= 1);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

// =============================================================================
// Queue
// =============================================================================

#[tokio::test]
async fn test_queue_discard_oldest_keeps_latest_values() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;
    let subscription = session
        .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(500)))
        .await
        .unwrap();
    let item = subscription
        .monitor(PlantFixtures::speed(), &ConfigFixtures::queued_item(10, true))
        .await
        .unwrap();
    assert_eq!(item.revised_queue_size(), 10);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    item.on_change(move |value| {
        if let Some(v) = int_value(value) {
            sink.lock().push(v);
        }
        Ok(())
    });

    // Wait for the initial value so the burst lands in one publish cycle.
    let item_ref = item.clone();
    assert!(eventually(WAIT, || item_ref.notification_count() >= 1).await);

    for value in 1..=15 {
        server.space.set_value(&PlantFixtures::speed(), value);
    }

    let seen = received.clone();
    assert!(eventually(WAIT, || seen.lock().contains(&15)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let burst: Vec<i32> = received
        .lock()
        .iter()
        .copied()
        .filter(|v| (1..=15).contains(v))
        .collect();
    assert_eq!(burst, (6..=15).collect::<Vec<_>>());

    let snapshot = server.handle.diagnostics();
    let overflows = snapshot
        .subscription(subscription.id())
        .map(|s| s.queue_overflows)
        .unwrap_or(0);
    assert!(overflows >= 5);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

// =============================================================================
// Handler isolation
// =============================================================================

#[tokio::test]
async fn test_handler_failing_handler_is_invoked_every_cycle() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;
    let subscription = session
        .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(40)))
        .await
        .unwrap();
    let item = subscription
        .monitor(PlantFixtures::speed(), &MonitoredItemOptions::default())
        .await
        .unwrap();

    let invocations = Arc::new(AtomicU64::new(0));
    let counter = invocations.clone();
    item.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(UaError::fault("handler", StatusCode::BadInternalError))
    });

    for value in 0..5 {
        server.space.set_value(&PlantFixtures::speed(), 2000 + value);
        let target = value as u64 + 1;
        let seen = invocations.clone();
        assert!(
            eventually(WAIT, || seen.load(Ordering::SeqCst) >= target).await,
            "handler not invoked for cycle {value}"
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    let calls = invocations.load(Ordering::SeqCst);
    assert!(calls >= 5);
    assert_eq!(subscription.handler_faults(), calls);
    assert!(!subscription.is_closed());

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_panic_does_not_stop_other_items() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;
    let subscription = session
        .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(40)))
        .await
        .unwrap();
    let panicking = subscription
        .monitor(PlantFixtures::speed(), &MonitoredItemOptions::default())
        .await
        .unwrap();
    let healthy = subscription
        .monitor(PlantFixtures::temperature(), &MonitoredItemOptions::default())
        .await
        .unwrap();
    panicking.on_change(|_| panic!("handler bug"));

    server.space.set_value(&PlantFixtures::speed(), 99i32);
    server.space.set_value(&PlantFixtures::temperature(), 30.5);

    let healthy_ref = healthy.clone();
    assert!(
        eventually(WAIT, || {
            healthy_ref
                .last_value()
                .and_then(|v| v.value)
                .and_then(|v| v.as_f64())
                == Some(30.5)
        })
        .await
    );
    let faults = subscription.clone();
    assert!(eventually(WAIT, || faults.handler_faults() >= 1).await);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_failing_sink_is_counted_on_server() {
    let failing = RecordingSink::failing();
    let sink = failing.clone();
    let server = TestServer::start_with(ConfigFixtures::server(), PlantFixtures::plant(), move |builder| {
        builder.notification_sink(sink)
    })
    .await;
    let (client, session) = server.connect_session().await;
    let subscription = session
        .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(30)))
        .await
        .unwrap();
    let item = subscription
        .monitor(PlantFixtures::temperature(), &MonitoredItemOptions::default())
        .await
        .unwrap();

    // Delivery to the client is unaffected.
    let item_ref = item.clone();
    assert!(eventually(WAIT, || item_ref.last_value().is_some()).await);
    assert!(eventually(WAIT, || !failing.messages().is_empty()).await);
    assert!(server.handle.diagnostics().totals.handler_faults >= 1);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_lifecycle_delete_subscription() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;
    let subscription = session
        .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(50)))
        .await
        .unwrap();
    let id = subscription.id();
    assert_eq!(server.handle.subscriptions().len(), 1);

    subscription.delete().await.unwrap();
    assert!(subscription.is_closed());
    assert!(server.handle.subscriptions().is_empty());
    let snapshot = server.handle.diagnostics();
    assert_eq!(snapshot.subscription(id).map(|s| s.deleted), Some(true));

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_close_session_deletes_subscriptions() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;
    for _ in 0..3 {
        session
            .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(50)))
            .await
            .unwrap();
    }
    assert_eq!(server.handle.subscriptions().len(), 3);

    session.close().await.unwrap();
    assert!(server.handle.subscriptions().is_empty());
    assert_eq!(server.handle.diagnostics().totals.subscriptions_deleted, 3);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_modify_and_publishing_mode() {
    let server = TestServer::start().await;
    let (client, session) = server.connect_session().await;
    let subscription = session
        .create_subscription(&ConfigFixtures::subscription(Duration::from_millis(50)))
        .await
        .unwrap();

    subscription
        .modify(&ConfigFixtures::subscription(Duration::from_millis(200)))
        .await
        .unwrap();
    assert_eq!(subscription.revised_publishing_interval(), Duration::from_millis(200));

    let status = subscription.set_publishing_mode(false).await.unwrap();
    assert_eq!(status, StatusCode::Good);

    let item = subscription
        .monitor(PlantFixtures::temperature(), &MonitoredItemOptions::default())
        .await
        .unwrap();
    let results = subscription.delete_monitored_items(&[item]).await.unwrap();
    assert_eq!(results, vec![StatusCode::Good]);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_expired_subscription_reports_timeout_after_transfer() {
    let server = TestServer::start().await;
    let (first, session) = server.connect_session().await;
    let settings = SubscriptionSettings {
        keep_alive_count: 1,
        lifetime_count: 3,
        ..ConfigFixtures::subscription(Duration::from_millis(30))
    };
    let subscription = session.create_subscription(&settings).await.unwrap();
    let id = subscription.id();
    let mut events = subscription.events();

    // Lose the channel; the subscription cannot deliver and expires.
    first.close().await;
    let engine_empty = || server.handle.subscriptions().is_empty();
    assert!(eventually(WAIT, engine_empty).await);
    let snapshot = server.handle.diagnostics();
    assert_eq!(snapshot.subscription(id).map(|s| s.deleted), Some(true));

    // The held status change arrives once the session is reattached.
    let second = server.connect().await;
    session.transfer_to(&second).await.unwrap();
    let status = within(WAIT, "status change", async {
        loop {
            match events.recv().await {
                Ok(SubscriptionEvent::StatusChange(status)) => break status,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {e}"),
            }
        }
    })
    .await;
    assert_eq!(status, StatusCode::BadTimeout);
    let closed = subscription.clone();
    assert!(eventually(WAIT, || closed.is_closed()).await);

    session.close().await.unwrap();
    second.close().await;
    server.shutdown().await;
}
