// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # TRAP UA Integration Tests
//!
//! End-to-end tests that run a real server and client over loopback TCP.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p trap-ua-tests
//! cargo test -p trap-ua-tests --test integration_channel
//! cargo test -p trap-ua-tests --test integration_session
//! cargo test -p trap-ua-tests --test integration_subscription
//! cargo test -p trap-ua-tests --test integration_browse
//! cargo test -p trap-ua-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! - `integration_channel`: handshake, version negotiation, lifecycle
//!   events, token renewal, channel limits
//! - `integration_session`: naming, activation, identity checks, transfer,
//!   read and write
//! - `integration_subscription`: publishing, keep-alives, queues, handler
//!   isolation, diagnostics
//! - `integration_browse`: browse paging, BrowseNext, path translation
//! - `integration_config`: loading and validating configuration files

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
}
