// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions, monitored items and the publish cycle.

pub mod engine;
pub mod monitored_item;
#[allow(clippy::module_inception)]
pub mod subscription;

pub use engine::{NotificationSink, SubscriptionEngine};
pub use monitored_item::{is_change, ItemParameters, ItemQueue, MonitoredItem, Offer};
pub use subscription::{Subscription, SubscriptionParameters, Tick};
