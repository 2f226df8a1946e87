// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Channel lifecycle events and their observers.
//!
//! Observers are called synchronously, in registration order, on the task
//! that produced the event. A panicking observer is logged and skipped; the
//! remaining observers still run.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::status::StatusCode;

/// Something that happened on a secure channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A channel was established.
    NewChannel {
        /// Channel id.
        channel_id: u32,
        /// Peer address and port.
        peer: SocketAddr,
    },
    /// An established channel was closed.
    CloseChannel {
        /// Channel id.
        channel_id: u32,
        /// Peer address and port.
        peer: SocketAddr,
    },
    /// A request and its response completed.
    TransactionDone {
        /// Channel id.
        channel_id: u32,
        /// Service name.
        service: &'static str,
        /// Result of the service.
        status: StatusCode,
        /// Request bytes including chunk overhead.
        bytes_received: usize,
        /// Response bytes including chunk overhead.
        bytes_sent: usize,
        /// Time from request to response.
        #[serde(with = "crate::types::humantime_serde")]
        duration: Duration,
    },
    /// A new security token replaced the previous one.
    TokenRenewed {
        /// Channel id.
        channel_id: u32,
        /// New token id.
        token_id: u32,
    },
}

impl ChannelEvent {
    /// Channel the event belongs to.
    pub fn channel_id(&self) -> u32 {
        match self {
            Self::NewChannel { channel_id, .. }
            | Self::CloseChannel { channel_id, .. }
            | Self::TransactionDone { channel_id, .. }
            | Self::TokenRenewed { channel_id, .. } => *channel_id,
        }
    }
}

/// Receives channel events.
pub trait ChannelObserver: Send + Sync {
    /// Called for every event; must not block.
    fn on_event(&self, event: &ChannelEvent);
}

impl<F> ChannelObserver for F
where
    F: Fn(&ChannelEvent) + Send + Sync,
{
    fn on_event(&self, event: &ChannelEvent) {
        self(event)
    }
}

/// Ordered set of observers.
#[derive(Default, Clone)]
pub struct ChannelObservers {
    observers: Arc<RwLock<Vec<Arc<dyn ChannelObserver>>>>,
}

impl std::fmt::Debug for ChannelObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelObservers")
            .field("count", &self.observers.read().len())
            .finish()
    }
}

impl ChannelObservers {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer.
    pub fn add(&self, observer: Arc<dyn ChannelObserver>) {
        self.observers.write().push(observer);
    }

    /// Number of observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns `true` if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every observer.
    pub fn notify(&self, event: &ChannelEvent) {
        let observers = self.observers.read().clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
                warn!(channel_id = event.channel_id(), "Channel observer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_observers_run_in_order_and_survive_panics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observers = ChannelObservers::new();

        let first = seen.clone();
        observers.add(Arc::new(move |_: &ChannelEvent| first.lock().push(1)));
        observers.add(Arc::new(|_: &ChannelEvent| panic!("observer failure")));
        let third = seen.clone();
        observers.add(Arc::new(move |_: &ChannelEvent| third.lock().push(3)));

        let event = ChannelEvent::TokenRenewed {
            channel_id: 4,
            token_id: 2,
        };
        observers.notify(&event);
        observers.notify(&event);

        assert_eq!(*seen.lock(), vec![1, 3, 1, 3]);
        assert_eq!(event.channel_id(), 4);
    }
}
