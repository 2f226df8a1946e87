// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! Loads configuration files from disk and serves with them.

use std::time::Duration;

use trap_ua::config::{ClientConfig, ServerConfig};
use trap_ua::StatusCode;

use trap_ua_tests::common::temp_test_dir;
use trap_ua_tests::prelude::*;

const SERVER_TOML: &str = r#"
application_name = "Press Line"
endpoint_url = "opc.tcp://127.0.0.1:0"

[protocol_versions]
min = 0
max = 2

[sessions]
sweep_interval = "50ms"
channel_loss_grace = "2s"

[subscriptions]
min_publishing_interval = "20ms"
min_sampling_interval = "5ms"
"#;

#[tokio::test]
async fn test_server_serves_with_loaded_toml() {
    let dir = temp_test_dir("trap-ua-config");
    let path = dir.path().join("server.toml");
    std::fs::write(&path, SERVER_TOML).unwrap();

    let config = ServerConfig::load(&path).unwrap();
    assert_eq!(config.application_name, "Press Line");
    assert_eq!(config.protocol_versions.max, 2);
    assert_eq!(config.sessions.sweep_interval, Duration::from_millis(50));

    let server = TestServer::start_with_config(config).await;
    let (client, session) = server.connect_session().await;
    let value = session.read_value(PlantFixtures::temperature()).await.unwrap();
    assert_eq!(f64_value(&value), 21.5);

    session.close().await.unwrap();
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_client_config_from_json_file() {
    let dir = temp_test_dir("trap-ua-config");
    let path = dir.path().join("client.json");
    std::fs::write(
        &path,
        r#"{ "application_name": "Probe", "request_timeout": "3s", "connect_timeout": "1s" }"#,
    )
    .unwrap();

    let config = ClientConfig::load(&path).unwrap();
    assert_eq!(config.application_name, "Probe");
    assert_eq!(config.request_timeout, Duration::from_secs(3));
    assert_eq!(config.connect_timeout, Duration::from_secs(1));
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = temp_test_dir("trap-ua-config");
    let path = dir.path().join("server.toml");
    std::fs::write(&path, "[subscriptions]\nmax_queue_size = 0\n").unwrap();

    assert_status(ServerConfig::load(&path), StatusCode::BadInvalidArgument);
}
