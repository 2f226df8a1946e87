// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client side of a session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::subscription::ClientSubscription;
use super::UaClient;
use crate::channel::security::generate_nonce;
use crate::config::{SessionOptions, SubscriptionSettings};
use crate::error::{SessionError, UaResult};
use crate::messages::*;
use crate::session::IdentityToken;
use crate::status::StatusCode;
use crate::types::{DataValue, NodeId};

const CLIENT_NONCE_LENGTH: usize = 32;

struct Inner {
    client: RwLock<UaClient>,
    session_id: NodeId,
    authentication_token: NodeId,
    name: String,
    revised_timeout: Duration,
    identity: IdentityToken,
    routes: Mutex<HashMap<u32, mpsc::Sender<PublishResponse>>>,
    closed: AtomicBool,
}

/// An activated session.
///
/// Cloning is cheap; subscriptions keep a clone to send acknowledgements
/// and republish requests.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("name", &self.inner.name)
            .field("session_id", &self.inner.session_id)
            .finish()
    }
}

impl ClientSession {
    /// Creates a session and activates it with the identity in `options`.
    ///
    /// A malformed identity fails before anything is sent, so no session
    /// name is taken. A rejected activation closes the half-created session;
    /// the channel stays usable.
    pub(crate) async fn create(client: UaClient, options: &SessionOptions) -> UaResult<Self> {
        let identity = options.identity_token();
        identity.validate()?;

        let config = client.config();
        let request = CreateSessionRequest {
            client_application_name: config.application_name.clone(),
            endpoint_url: client.endpoint_url().to_string(),
            session_name: options.client_name.clone(),
            client_nonce: generate_nonce(CLIENT_NONCE_LENGTH),
            requested_session_timeout: millis(config.session_timeout),
            max_response_message_size: config.transport.max_message_size,
        };
        let response = client
            .call(&NodeId::null(), request)
            .await?
            .into_result("CreateSession")?;
        let created = expect_response!(response, CreateSession)?;

        let session = Self {
            inner: Arc::new(Inner {
                client: RwLock::new(client.clone()),
                session_id: created.session_id,
                authentication_token: created.authentication_token,
                name: created.session_name,
                revised_timeout: from_millis(created.revised_session_timeout),
                identity,
                routes: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        };

        if let Err(error) = session.activate(&client).await {
            debug!(session = %session.inner.name, error = %error, "Activation failed, closing session");
            if let Err(close_error) = session.close_session(&client, true).await {
                close_error.log("close after failed activation");
            }
            session.inner.closed.store(true, Ordering::Release);
            return Err(error);
        }

        info!(
            session = %session.inner.name,
            session_id = %session.inner.session_id,
            timeout_ms = session.inner.revised_timeout.as_millis() as u64,
            "Session activated"
        );
        Ok(session)
    }

    async fn activate(&self, client: &UaClient) -> UaResult<()> {
        let request = ActivateSessionRequest {
            locale_ids: Vec::new(),
            user_identity_token: self.inner.identity.clone(),
        };
        let response = client
            .call(&self.inner.authentication_token, request)
            .await?
            .into_result("ActivateSession")?;
        expect_response!(response, ActivateSession)?;
        Ok(())
    }

    async fn close_session(&self, client: &UaClient, delete_subscriptions: bool) -> UaResult<()> {
        let response = client
            .call(
                &self.inner.authentication_token,
                CloseSessionRequest {
                    delete_subscriptions,
                },
            )
            .await?
            .into_result("CloseSession")?;
        expect_response!(response, CloseSession)?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Server-assigned session id.
    pub fn session_id(&self) -> &NodeId {
        &self.inner.session_id
    }

    /// Server-assigned session name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Session timeout granted by the server.
    pub fn revised_timeout(&self) -> Duration {
        self.inner.revised_timeout
    }

    /// Channel the session currently uses.
    pub fn client(&self) -> UaClient {
        self.inner.client.read().clone()
    }

    /// Returns `true` once closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Sends a request on the current channel.
    pub(crate) async fn call(&self, body: impl Into<RequestBody>) -> UaResult<Response> {
        if self.is_closed() {
            return Err(SessionError::Closed.into());
        }
        let client = self.client();
        client.call(&self.inner.authentication_token, body).await
    }

    // =========================================================================
    // Attribute services
    // =========================================================================

    /// Reads attributes.
    pub async fn read(&self, nodes_to_read: Vec<ReadValueId>) -> UaResult<Vec<DataValue>> {
        let response = self
            .call(ReadRequest {
                max_age: 0.0,
                timestamps_to_return: TimestampsToReturn::Both,
                nodes_to_read,
            })
            .await?
            .into_result("Read")?;
        Ok(expect_response!(response, Read)?.results)
    }

    /// Reads the value of one node.
    pub async fn read_value(&self, node_id: NodeId) -> UaResult<DataValue> {
        let mut results = self.read(vec![ReadValueId::value(node_id)]).await?;
        Ok(results
            .pop()
            .unwrap_or_else(|| DataValue::from_status(StatusCode::BadUnexpectedError)))
    }

    /// Writes attributes.
    pub async fn write(&self, nodes_to_write: Vec<WriteValue>) -> UaResult<Vec<StatusCode>> {
        let response = self
            .call(WriteRequest { nodes_to_write })
            .await?
            .into_result("Write")?;
        Ok(expect_response!(response, Write)?.results)
    }

    /// Writes the value of one node.
    pub async fn write_value(&self, node_id: NodeId, value: DataValue) -> UaResult<StatusCode> {
        let mut results = self.write(vec![WriteValue::value(node_id, value)]).await?;
        Ok(results.pop().unwrap_or(StatusCode::BadUnexpectedError))
    }

    // =========================================================================
    // View services
    // =========================================================================

    /// Browses references; `max_references` 0 lets the server decide.
    pub async fn browse(
        &self,
        nodes_to_browse: Vec<BrowseDescription>,
        max_references: u32,
    ) -> UaResult<Vec<BrowseResult>> {
        let response = self
            .call(BrowseRequest {
                view_id: NodeId::null(),
                requested_max_references_per_node: max_references,
                nodes_to_browse,
            })
            .await?
            .into_result("Browse")?;
        Ok(expect_response!(response, Browse)?.results)
    }

    /// Continues or releases browses.
    pub async fn browse_next(
        &self,
        release_continuation_points: bool,
        continuation_points: Vec<Vec<u8>>,
    ) -> UaResult<Vec<BrowseResult>> {
        let response = self
            .call(BrowseNextRequest {
                release_continuation_points,
                continuation_points,
            })
            .await?
            .into_result("BrowseNext")?;
        Ok(expect_response!(response, BrowseNext)?.results)
    }

    /// Resolves browse paths to node ids.
    pub async fn translate_browse_paths(&self, browse_paths: Vec<BrowsePath>) -> UaResult<Vec<BrowsePathResult>> {
        let response = self
            .call(TranslateBrowsePathsRequest { browse_paths })
            .await?
            .into_result("TranslateBrowsePaths")?;
        Ok(expect_response!(response, TranslateBrowsePaths)?.results)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates a subscription.
    pub async fn create_subscription(&self, settings: &SubscriptionSettings) -> UaResult<ClientSubscription> {
        settings.validate()?;
        let response = self
            .call(CreateSubscriptionRequest {
                requested_publishing_interval: millis(settings.publishing_interval),
                requested_lifetime_count: settings.lifetime_count,
                requested_max_keep_alive_count: settings.keep_alive_count,
                max_notifications_per_publish: settings.max_notifications_per_publish,
                publishing_enabled: settings.publishing_enabled,
                priority: settings.priority,
            })
            .await?
            .into_result("CreateSubscription")?;
        let created = expect_response!(response, CreateSubscription)?;
        Ok(ClientSubscription::start(self.clone(), &created))
    }

    pub(crate) fn add_route(&self, subscription_id: u32, sender: mpsc::Sender<PublishResponse>) {
        self.client().register_route(subscription_id, sender.clone());
        self.inner.routes.lock().insert(subscription_id, sender);
    }

    pub(crate) fn drop_route(&self, subscription_id: u32) {
        self.inner.routes.lock().remove(&subscription_id);
        self.client().remove_route(subscription_id);
    }

    /// Acknowledges notification messages.
    pub(crate) async fn acknowledge(&self, acknowledgements: Vec<SubscriptionAcknowledgement>) -> UaResult<Vec<StatusCode>> {
        let response = self
            .call(PublishRequest {
                subscription_acknowledgements: acknowledgements,
            })
            .await?
            .into_result("Publish")?;
        Ok(expect_response!(response, Publish)?.results)
    }

    /// Asks the server to resend one notification message.
    pub(crate) async fn republish(&self, subscription_id: u32, sequence_number: u32) -> UaResult<NotificationMessage> {
        let response = self
            .call(RepublishRequest {
                subscription_id,
                retransmit_sequence_number: sequence_number,
            })
            .await?
            .into_result("Republish")?;
        Ok(expect_response!(response, Republish)?.notification_message)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Moves the session onto another channel.
    ///
    /// Notifications the server held while the session was detached arrive
    /// on the new channel once activation succeeds.
    pub async fn transfer_to(&self, client: &UaClient) -> UaResult<()> {
        if self.is_closed() {
            return Err(SessionError::Closed.into());
        }
        let routes: Vec<_> = self
            .inner
            .routes
            .lock()
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();
        for (id, sender) in &routes {
            client.register_route(*id, sender.clone());
        }

        if let Err(error) = self.activate(client).await {
            for (id, _) in &routes {
                client.remove_route(*id);
            }
            return Err(error);
        }

        let previous = std::mem::replace(&mut *self.inner.client.write(), client.clone());
        for (id, _) in &routes {
            previous.remove_route(*id);
        }
        info!(
            session = %self.inner.name,
            channel_id = client.channel_id(),
            "Session transferred"
        );
        Ok(())
    }

    /// Closes the session and deletes its subscriptions on the server.
    pub async fn close(&self) -> UaResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let client = self.client();
        let ids: Vec<u32> = self.inner.routes.lock().drain().map(|(id, _)| id).collect();
        for id in ids {
            client.remove_route(id);
        }
        match self.close_session(&client, true).await {
            Ok(()) => {
                info!(session = %self.inner.name, "Session closed");
                Ok(())
            }
            Err(error) => {
                warn!(session = %self.inner.name, error = %error, "CloseSession failed");
                Err(error)
            }
        }
    }
}
