// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session registry: create, activate, close, bind and expire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::identity::{AllowAll, Authenticator, IdentityToken};
use super::session::Session;
use crate::config::SessionLimits;
use crate::error::SessionError;
use crate::messages::{from_millis, CreateSessionRequest};
use crate::transport::OutboundSender;
use crate::types::NodeId;

/// Default session name prefix.
pub const DEFAULT_SESSION_PREFIX: &str = "Session";

/// Counter behind generated session names.
///
/// Each manager owns one; tests and embedders can inject their own to
/// control numbering.
#[derive(Debug)]
pub struct SessionNameCounter {
    next: AtomicU64,
}

impl Default for SessionNameCounter {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl SessionNameCounter {
    /// Creates a counter whose first value is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Value the next successful creation will use.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    fn take(&self) -> u64 {
        self.next.fetch_add(1, Ordering::AcqRel)
    }
}

/// Owns every session of a server.
pub struct SessionManager {
    limits: SessionLimits,
    names: Arc<SessionNameCounter>,
    authenticator: Arc<dyn Authenticator>,
    sessions: DashMap<NodeId, Arc<Session>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("next_name", &self.names.peek())
            .finish()
    }
}

impl SessionManager {
    /// Creates a manager that accepts every identity.
    pub fn new(limits: SessionLimits) -> Self {
        Self::with_parts(limits, Arc::new(SessionNameCounter::default()), Arc::new(AllowAll))
    }

    /// Creates a manager with an injected name counter and authenticator.
    pub fn with_parts(
        limits: SessionLimits,
        names: Arc<SessionNameCounter>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            limits,
            names,
            authenticator,
            sessions: DashMap::new(),
        }
    }

    /// Session limits.
    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Every open session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Creates a session bound to `channel_id`.
    ///
    /// The name is the requested prefix (or `Session`) followed by the
    /// counter value; the counter advances only when creation succeeds.
    pub fn create(
        &self,
        request: &CreateSessionRequest,
        channel_id: u32,
    ) -> Result<Arc<Session>, SessionError> {
        let max = self.limits.max_sessions;
        if max > 0 && self.sessions.len() >= max {
            warn!(max, "Session limit reached");
            return Err(SessionError::TooManySessions { max });
        }

        let prefix = request
            .session_name
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_SESSION_PREFIX);
        let name = format!("{prefix}{}", self.names.take());
        let timeout = self
            .limits
            .revise_timeout(from_millis(request.requested_session_timeout));

        let session = Arc::new(Session::new(
            name,
            request.client_application_name.clone(),
            timeout,
            self.limits.max_pending_notifications,
            channel_id,
        ));
        self.sessions
            .insert(session.authentication_token().clone(), session.clone());
        info!(
            session = session.name(),
            channel_id,
            timeout_ms = timeout.as_millis() as u64,
            "Session created"
        );
        Ok(session)
    }

    /// Activates a session on `channel_id`, moving it there if needed.
    pub fn activate(
        &self,
        authentication_token: &NodeId,
        channel_id: u32,
        identity: IdentityToken,
        outbound: OutboundSender,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self.get(authentication_token)?;
        identity.validate()?;
        self.authenticator.authenticate(&identity)?;

        match session.channel_id() {
            Some(bound) if bound != channel_id && !session.is_activated() => {
                return Err(SessionError::ChannelMismatch {
                    expected: bound,
                    actual: channel_id,
                });
            }
            Some(bound) if bound != channel_id => {
                info!(session = session.name(), from = bound, to = channel_id, "Session transferred");
            }
            None => {
                info!(session = session.name(), channel_id, "Session reattached");
            }
            _ => {}
        }

        let user = identity.user_name().unwrap_or("anonymous").to_string();
        session.activate(identity, channel_id, outbound);
        debug!(session = session.name(), user = %user, channel_id, "Session activated");
        Ok(session)
    }

    /// Resolves the session for a request arriving on `channel_id`.
    pub fn lookup(
        &self,
        authentication_token: &NodeId,
        channel_id: u32,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self.get(authentication_token)?;
        match session.channel_id() {
            Some(bound) if bound == channel_id => {}
            Some(bound) => {
                return Err(SessionError::ChannelMismatch {
                    expected: bound,
                    actual: channel_id,
                })
            }
            None => {
                return Err(SessionError::ChannelMismatch {
                    expected: 0,
                    actual: channel_id,
                })
            }
        }
        if !session.is_activated() {
            return Err(SessionError::NotActivated {
                name: session.name().to_string(),
            });
        }
        session.touch();
        Ok(session)
    }

    fn get(&self, authentication_token: &NodeId) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(authentication_token)
            .map(|e| e.value().clone())
            .filter(|s| !s.is_closed())
            .ok_or(SessionError::SessionIdInvalid)
    }

    /// Closes a session on behalf of its client.
    pub fn close(
        &self,
        authentication_token: &NodeId,
        channel_id: u32,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self.get(authentication_token)?;
        if let Some(bound) = session.channel_id() {
            if bound != channel_id {
                return Err(SessionError::ChannelMismatch {
                    expected: bound,
                    actual: channel_id,
                });
            }
        }
        self.sessions.remove(authentication_token);
        session.mark_closed();
        info!(session = session.name(), "Session closed");
        Ok(session)
    }

    /// Unbinds every session of a closed channel; they wait for reactivation.
    pub fn detach_channel(&self, channel_id: u32) -> usize {
        let mut detached = 0;
        for entry in self.sessions.iter() {
            if entry.value().channel_id() == Some(channel_id) {
                entry.value().detach();
                detached += 1;
            }
        }
        if detached > 0 {
            debug!(channel_id, detached, "Sessions detached from closed channel");
        }
        detached
    }

    /// Removes expired sessions and returns them.
    pub fn sweep(&self, now: Instant) -> Vec<Arc<Session>> {
        let grace = self.limits.channel_loss_grace;
        let expired: Vec<NodeId> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_expired(now, grace))
            .map(|e| e.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|token| self.sessions.remove(&token))
            .map(|(_, session)| {
                session.mark_closed();
                info!(session = session.name(), "Session expired");
                session
            })
            .collect()
    }

    /// Closes every session, e.g. on shutdown.
    pub fn close_all(&self) -> Vec<Arc<Session>> {
        let tokens: Vec<NodeId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        tokens
            .into_iter()
            .filter_map(|token| self.sessions.remove(&token))
            .map(|(_, session)| {
                session.mark_closed();
                session
            })
            .collect()
    }

    /// Sweep period.
    pub fn sweep_interval(&self) -> Duration {
        self.limits.sweep_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserTable;
    use crate::status::StatusCode;
    use crate::transport::outbound_queue;

    fn request(prefix: Option<&str>) -> CreateSessionRequest {
        CreateSessionRequest {
            client_application_name: "test".into(),
            session_name: prefix.map(str::to_string),
            requested_session_timeout: 60_000.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_names_count_from_one() {
        let manager = SessionManager::new(SessionLimits::default());
        let names: Vec<_> = (0..3)
            .map(|_| manager.create(&request(None), 1).unwrap().name().to_string())
            .collect();
        assert_eq!(names, ["Session1", "Session2", "Session3"]);
    }

    #[test]
    fn test_prefix_and_blank_names() {
        let manager = SessionManager::new(SessionLimits::default());
        assert_eq!(manager.create(&request(Some("Line")), 1).unwrap().name(), "Line1");
        assert_eq!(manager.create(&request(Some("  ")), 1).unwrap().name(), "Session2");
    }

    #[test]
    fn test_failed_creation_does_not_advance_counter() {
        let limits = SessionLimits {
            max_sessions: 1,
            ..Default::default()
        };
        let names = Arc::new(SessionNameCounter::starting_at(5));
        let manager = SessionManager::with_parts(limits, names.clone(), Arc::new(AllowAll));
        manager.create(&request(None), 1).unwrap();
        let error = manager.create(&request(None), 1).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadTooManySessions);
        assert_eq!(names.peek(), 6);
    }

    #[test]
    fn test_activation_and_binding() {
        let manager = SessionManager::with_parts(
            SessionLimits::default(),
            Arc::new(SessionNameCounter::default()),
            Arc::new(UserTable::new().with_user("operator", "pw")),
        );
        let session = manager.create(&request(None), 1).unwrap();
        let token = session.authentication_token().clone();
        let (tx, _rx) = outbound_queue();

        let error = manager.lookup(&token, 1).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSessionNotActivated);

        let blank = IdentityToken::UserName {
            user_name: String::new(),
            password: "pw".into(),
        };
        let error = manager.activate(&token, 1, blank, tx.clone()).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadIdentityTokenInvalid);

        let wrong = IdentityToken::UserName {
            user_name: "operator".into(),
            password: "nope".into(),
        };
        let error = manager.activate(&token, 1, wrong, tx.clone()).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadUserAccessDenied);

        let good = IdentityToken::UserName {
            user_name: "operator".into(),
            password: "pw".into(),
        };
        manager.activate(&token, 1, good.clone(), tx.clone()).unwrap();
        assert!(manager.lookup(&token, 1).is_ok());

        let error = manager.lookup(&token, 2).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSecureChannelIdInvalid);

        manager.detach_channel(1);
        manager.activate(&token, 2, good, tx).unwrap();
        assert!(manager.lookup(&token, 2).is_ok());

        let error = manager.lookup(&NodeId::numeric(1, 99), 2).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSessionIdInvalid);
    }

    #[test]
    fn test_sweep_expires_detached_sessions() {
        let limits = SessionLimits {
            channel_loss_grace: Duration::from_millis(10),
            ..Default::default()
        };
        let manager = SessionManager::new(limits);
        let session = manager.create(&request(None), 1).unwrap();
        let (tx, _rx) = outbound_queue();
        manager
            .activate(session.authentication_token(), 1, IdentityToken::Anonymous, tx)
            .unwrap();

        assert!(manager.sweep(Instant::now()).is_empty());
        manager.detach_channel(1);
        let expired = manager.sweep(Instant::now() + Duration::from_millis(20));
        assert_eq!(expired.len(), 1);
        assert!(session.is_closed());
        assert!(manager.is_empty());
    }
}
