// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Starts a real server on a loopback port with the plant address space and
//! recording collaborators attached.
//!
//! ```rust,ignore
//! let server = TestServer::start().await;
//! let (client, session) = server.connect_session().await;
//! let value = session.read_value(PlantFixtures::temperature()).await.unwrap();
//! server.shutdown().await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use trap_ua::config::{ClientConfig, ServerConfig, SessionOptions};
use trap_ua::server::{ServerHandle, UaServer, UaServerBuilder};
use trap_ua::{ClientSession, UaClient, UaResult};

use super::fixtures::{ConfigFixtures, PlantFixtures};
use super::init_test_logging;
use super::mocks::{MemoryAddressSpace, RecordingObserver, RecordingSink};

/// A running server plus the collaborators tests inspect.
pub struct TestServer {
    /// The running server.
    pub handle: ServerHandle,
    /// Address space the server serves.
    pub space: Arc<MemoryAddressSpace>,
    /// Channel events seen by the server.
    pub observer: Arc<RecordingObserver>,
    /// Notification messages published by the server.
    pub sink: Arc<RecordingSink>,
}

impl TestServer {
    /// Starts a server with the default test configuration.
    pub async fn start() -> Self {
        Self::start_with(ConfigFixtures::server(), PlantFixtures::plant(), |builder| builder).await
    }

    /// Starts a server with a custom configuration.
    pub async fn start_with_config(config: ServerConfig) -> Self {
        Self::start_with(config, PlantFixtures::plant(), |builder| builder).await
    }

    /// Starts a server, letting the caller adjust the builder.
    pub async fn start_with<F>(config: ServerConfig, space: Arc<MemoryAddressSpace>, customize: F) -> Self
    where
        F: FnOnce(UaServerBuilder) -> UaServerBuilder,
    {
        init_test_logging();
        let observer = RecordingObserver::new();
        let sink = RecordingSink::new();
        let builder = UaServer::builder(config, space.clone())
            .observer(observer.clone())
            .notification_sink(sink.clone());
        let handle = customize(builder)
            .build()
            .start()
            .await
            .expect("server should start");
        debug!(addr = %handle.local_addr(), "Test server started");
        Self {
            handle,
            space,
            observer,
            sink,
        }
    }

    /// URL clients connect to.
    pub fn url(&self) -> String {
        format!("opc.tcp://{}", self.handle.local_addr())
    }

    /// Connects a client with the test client configuration.
    pub async fn connect(&self) -> UaClient {
        self.try_connect(ConfigFixtures::client())
            .await
            .expect("client should connect")
    }

    /// Connects with a custom client configuration.
    pub async fn try_connect(&self, config: ClientConfig) -> UaResult<UaClient> {
        UaClient::connect(&self.url(), config).await
    }

    /// Connects and creates an anonymous session.
    pub async fn connect_session(&self) -> (UaClient, ClientSession) {
        let client = self.connect().await;
        let session = client
            .create_session(&SessionOptions::anonymous())
            .await
            .expect("session should activate");
        (client, session)
    }

    /// Stops the server.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Runs `future` with a deadline, panicking with `what` on timeout.
pub async fn within<T>(timeout: Duration, what: &str, future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(timeout, future).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}
