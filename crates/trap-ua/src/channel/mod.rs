// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channels: token negotiation, chunk security and lifecycle events.

pub mod events;
pub mod secure_channel;
pub mod security;

pub use events::{ChannelEvent, ChannelObserver, ChannelObservers};
pub use secure_channel::{ChannelStats, Inbound, OpenPolicy, ReceivedMessage, SecureChannel};
pub use security::{KeySet, Role, SecurityToken, SymmetricKeys, TokenSet};
