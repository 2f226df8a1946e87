// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Outstanding requests of a client channel.
//!
//! Each request registers a oneshot continuation keyed by its request id.
//! The reader task completes it with the decoded response; closing the
//! channel completes every remaining one with `BadSecureChannelClosed`.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{ChannelError, UaError, UaResult};
use crate::messages::Response;

type Continuation = oneshot::Sender<UaResult<Response>>;

#[derive(Debug, Default)]
struct Inner {
    waiting: HashMap<u32, Continuation>,
    closed: bool,
}

/// Request id to continuation map.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<Inner>,
}

impl PendingRequests {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request_id`; fails once the channel is closed.
    pub fn register(&self, request_id: u32) -> UaResult<oneshot::Receiver<UaResult<Response>>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(UaError::channel_closed());
        }
        let (tx, rx) = oneshot::channel();
        inner.waiting.insert(request_id, tx);
        Ok(rx)
    }

    /// Completes `request_id`; returns `false` if nobody was waiting.
    pub fn complete(&self, request_id: u32, result: UaResult<Response>) -> bool {
        let sender = self.inner.lock().waiting.remove(&request_id);
        match sender {
            Some(sender) => {
                // receiver gone means the caller timed out
                let _ = sender.send(result);
                true
            }
            None => {
                trace!(request_id, "Response without a waiting request");
                false
            }
        }
    }

    /// Forgets `request_id` without completing it.
    pub fn cancel(&self, request_id: u32) {
        self.inner.lock().waiting.remove(&request_id);
    }

    /// Completes every request with `BadSecureChannelClosed` and refuses new ones.
    pub fn cancel_all(&self) -> usize {
        self.fail_all(|| ChannelError::Closed.into())
    }

    /// Completes every request with the error built by `error` and refuses new ones.
    pub fn fail_all(&self, error: impl Fn() -> UaError) -> usize {
        let waiting = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.waiting)
        };
        let count = waiting.len();
        for (_, sender) in waiting {
            let _ = sender.send(Err(error()));
        }
        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Returns `true` if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` after [`cancel_all`](Self::cancel_all).
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    #[tokio::test]
    async fn test_complete_delivers_response() {
        let pending = PendingRequests::new();
        let rx = pending.register(7).unwrap();
        assert!(pending.complete(7, Ok(Response::fault(1, StatusCode::BadNothingToDo))));
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.header.service_result, StatusCode::BadNothingToDo);
        assert!(!pending.complete(7, Err(UaError::channel_closed())));
    }

    #[tokio::test]
    async fn test_cancel_all_fails_outstanding_requests() {
        let pending = PendingRequests::new();
        let first = pending.register(1).unwrap();
        let second = pending.register(2).unwrap();

        assert_eq!(pending.cancel_all(), 2);
        for rx in [first, second] {
            let error = rx.await.unwrap().unwrap_err();
            assert_eq!(error.status_code(), StatusCode::BadSecureChannelClosed);
        }
        assert!(pending.register(3).is_err());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_reports_the_peer_error() {
        let pending = PendingRequests::new();
        let rx = pending.register(4).unwrap();
        pending.fail_all(|| ChannelError::PolicyRejected {
            policy: "http://example.org/policy".into(),
        }
        .into());
        let error = rx.await.unwrap().unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSecurityPolicyRejected);
        assert!(pending.is_closed());
    }
}
