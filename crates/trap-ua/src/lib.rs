// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # trap-ua
//!
//! OPC UA binary protocol stack for the TRAP industrial gateway.
//!
//! The crate provides both roles over `opc.tcp`:
//!
//! - **Transport**: chunk framing, HEL/ACK/ERR negotiation and the per
//!   connection writer task
//! - **Secure channel**: OPN/CLO, security tokens, renewal and overlap
//! - **Sessions**: create, activate, close, channel transfer and expiry
//! - **Services**: attribute, view and subscription services dispatched
//!   against an application-provided [`AddressSpace`]
//! - **Subscriptions**: monitored items, publish cycles, keep-alives,
//!   lifetime expiry and retransmission
//! - **Diagnostics**: passive per-channel, per-service and per-subscription
//!   counters
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trap_ua::{ServerConfig, UaServer, UaClient, ClientConfig, SessionOptions};
//!
//! let config = ServerConfig::builder().endpoint_url("opc.tcp://127.0.0.1:0").build()?;
//! let server = UaServer::builder(config, Arc::new(plant)).build().start().await?;
//!
//! let client = UaClient::connect(server.endpoint_url(), ClientConfig::default()).await?;
//! let session = client.create_session(&SessionOptions::anonymous()).await?;
//! let value = session.read_value(NodeId::string(2, "Line1.Temperature")).await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Foundation
// =============================================================================

pub mod encoding;
pub mod error;
pub mod status;
pub mod types;

// =============================================================================
// Configuration & Logging
// =============================================================================

pub mod config;
pub mod logging;

// =============================================================================
// Protocol Layers
// =============================================================================

pub mod channel;
pub mod messages;
pub mod transport;

// =============================================================================
// Server Internals
// =============================================================================

pub mod address_space;
pub mod browse;
pub mod diagnostics;
pub mod dispatcher;
pub mod session;
pub mod subscription;

// =============================================================================
// Roles
// =============================================================================

pub mod client;
pub mod server;

// =============================================================================
// Re-exports
// =============================================================================

pub use address_space::{AddressSpace, NodeHandle, ValueChange};
pub use channel::{ChannelEvent, ChannelObserver};
pub use client::{ClientMonitoredItem, ClientSession, ClientSubscription, SubscriptionEvent, UaClient};
pub use config::{
    ClientConfig, MonitoredItemOptions, ServerConfig, SessionOptions, SubscriptionSettings,
};
pub use diagnostics::DiagnosticsSnapshot;
pub use error::{UaError, UaResult};
pub use logging::{init_logging, LoggingConfig};
pub use server::{ServerHandle, UaServer};
pub use status::StatusCode;
pub use types::{AttributeId, DataValue, NodeId, Variant};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
