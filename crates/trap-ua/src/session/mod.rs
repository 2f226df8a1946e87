// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Sessions: identity validation, naming, channel binding and expiry.

pub mod identity;
pub mod manager;
#[allow(clippy::module_inception)]
pub mod session;

pub use identity::{AllowAll, Authenticator, IdentityToken, UserTable};
pub use manager::{SessionManager, SessionNameCounter, DEFAULT_SESSION_PREFIX};
pub use session::{Delivery, Session};
