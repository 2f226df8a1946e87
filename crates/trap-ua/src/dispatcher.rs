// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service dispatcher.
//!
//! Decodes one request body, resolves the session it belongs to, runs the
//! service and produces exactly one response. Every failure, including a
//! panicking handler, becomes a `ServiceFault`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use tracing::{debug, error, info, trace};

use crate::address_space::AddressSpace;
use crate::browse;
use crate::channel::security::generate_nonce;
use crate::config::{ServerConfig, SubscriptionSettings};
use crate::diagnostics::Diagnostics;
use crate::error::{ServiceError, UaError, UaResult};
use crate::messages::*;
use crate::session::{Session, SessionManager};
use crate::status::StatusCode;
use crate::subscription::SubscriptionEngine;
use crate::transport::OutboundSender;
use crate::types::{AttributeId, DataValue};

const SERVER_NONCE_LENGTH: usize = 32;

/// Channel a request arrived on.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Channel id.
    pub channel_id: u32,
    /// Outbound queue of the channel, used to bind activated sessions.
    pub outbound: OutboundSender,
}

/// A response together with the service that produced it.
#[derive(Debug)]
pub struct Dispatched {
    /// Service name, `"Unknown"` when the request could not be decoded.
    pub service: &'static str,
    /// The response to send.
    pub response: Response,
}

impl Dispatched {
    /// Overall result of the call.
    pub fn status(&self) -> StatusCode {
        self.response.header.service_result
    }
}

/// Routes requests to sessions, subscriptions and the address space.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<ServerConfig>,
    sessions: Arc<SessionManager>,
    engine: SubscriptionEngine,
    address_space: Arc<dyn AddressSpace>,
    diagnostics: Arc<Diagnostics>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sessions", &self.sessions.len())
            .field("engine", &self.engine)
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        config: Arc<ServerConfig>,
        sessions: Arc<SessionManager>,
        address_space: Arc<dyn AddressSpace>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let engine = SubscriptionEngine::new(
            config.subscriptions,
            address_space.clone(),
            diagnostics.clone(),
        );
        Self {
            config,
            sessions,
            engine,
            address_space,
            diagnostics,
        }
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Subscription engine.
    pub fn engine(&self) -> &SubscriptionEngine {
        &self.engine
    }

    /// Diagnostics aggregator.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Decodes and handles one request body.
    pub async fn dispatch(&self, context: &RequestContext, body: Bytes) -> Dispatched {
        match Request::decode(body) {
            Ok(request) => {
                let service = request.name();
                let response = self.handle(context, request).await;
                Dispatched { service, response }
            }
            Err(RequestDecodeError {
                request_handle,
                error,
            }) => {
                let status = match &error {
                    UaError::Service(ServiceError::Unsupported { .. }) => {
                        StatusCode::BadServiceUnsupported
                    }
                    _ => StatusCode::BadDecodingError,
                };
                error.log("dispatch");
                Dispatched {
                    service: "Unknown",
                    response: Response::fault(request_handle, status),
                }
            }
        }
    }

    /// Handles a decoded request, honouring its timeout hint.
    pub async fn handle(&self, context: &RequestContext, request: Request) -> Response {
        let handle = request.header.request_handle;
        let service = request.name();
        let hint = request.header.timeout_hint;

        let call = AssertUnwindSafe(self.route(context, request)).catch_unwind();
        let outcome = if hint > 0 {
            match tokio::time::timeout(Duration::from_millis(u64::from(hint)), call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(service, timeout_hint = hint, "Request exceeded its timeout hint");
                    return Response::fault(handle, StatusCode::BadTimeout);
                }
            }
        } else {
            call.await
        };

        match outcome {
            Ok(Ok(body)) => Response::new(handle, body),
            Ok(Err(e)) => {
                e.log(service);
                Response::fault(handle, e.status_code())
            }
            Err(_) => {
                error!(service, "Service handler panicked");
                self.diagnostics.record_handler_fault(service);
                Response::fault(handle, StatusCode::BadInternalError)
            }
        }
    }

    async fn route(&self, context: &RequestContext, request: Request) -> UaResult<ResponseBody> {
        let Request { header, body } = request;
        trace!(channel_id = context.channel_id, service = body.name(), "Routing request");

        match body {
            RequestBody::CreateSession(request) => self.create_session(context, &request),
            RequestBody::ActivateSession(request) => {
                self.activate_session(context, &header, request)
            }
            RequestBody::CloseSession(request) => self.close_session(context, &header, &request),
            channel @ (RequestBody::OpenSecureChannel(_) | RequestBody::CloseSecureChannel(_)) => {
                Err(ServiceError::Unsupported {
                    type_id: channel.type_id(),
                }
                .into())
            }
            body => {
                let session = self
                    .sessions
                    .lookup(&header.authentication_token, context.channel_id)?;
                self.session_service(&session, body).await
            }
        }
    }

    async fn session_service(&self, session: &Arc<Session>, body: RequestBody) -> UaResult<ResponseBody> {
        let limits = &self.config.browse;
        let space = self.address_space.as_ref();

        let body = match body {
            RequestBody::Read(request) => ReadResponse {
                results: self.read(&request).await?,
            }
            .into(),
            RequestBody::Write(request) => WriteResponse {
                results: self.write(&request).await?,
            }
            .into(),
            RequestBody::Browse(request) => BrowseResponse {
                results: browse::browse(space, session, limits, &request).await?,
            }
            .into(),
            RequestBody::BrowseNext(request) => BrowseNextResponse {
                results: browse::browse_next(session, limits, &request)?,
            }
            .into(),
            RequestBody::TranslateBrowsePaths(request) => TranslateBrowsePathsResponse {
                results: browse::translate_browse_paths(space, limits, &request).await?,
            }
            .into(),
            RequestBody::CreateSubscription(request) => {
                let settings = SubscriptionSettings {
                    publishing_interval: from_millis(request.requested_publishing_interval),
                    lifetime_count: request.requested_lifetime_count,
                    keep_alive_count: request.requested_max_keep_alive_count,
                    max_notifications_per_publish: request.max_notifications_per_publish,
                    priority: request.priority,
                    publishing_enabled: request.publishing_enabled,
                };
                let subscription = self.engine.create_subscription(session, &settings)?;
                let revised = subscription.parameters();
                CreateSubscriptionResponse {
                    subscription_id: subscription.id(),
                    revised_publishing_interval: millis(revised.publishing_interval),
                    revised_lifetime_count: revised.lifetime_count,
                    revised_max_keep_alive_count: revised.keep_alive_count,
                }
                .into()
            }
            RequestBody::ModifySubscription(request) => {
                let settings = SubscriptionSettings {
                    publishing_interval: from_millis(request.requested_publishing_interval),
                    lifetime_count: request.requested_lifetime_count,
                    keep_alive_count: request.requested_max_keep_alive_count,
                    max_notifications_per_publish: request.max_notifications_per_publish,
                    priority: request.priority,
                    publishing_enabled: true,
                };
                let revised =
                    self.engine
                        .modify_subscription(session, request.subscription_id, &settings)?;
                ModifySubscriptionResponse {
                    revised_publishing_interval: millis(revised.publishing_interval),
                    revised_lifetime_count: revised.lifetime_count,
                    revised_max_keep_alive_count: revised.keep_alive_count,
                }
                .into()
            }
            RequestBody::SetPublishingMode(request) => {
                non_empty(request.subscription_ids.len())?;
                SetPublishingModeResponse {
                    results: self.engine.set_publishing_mode(
                        session,
                        request.publishing_enabled,
                        &request.subscription_ids,
                    ),
                }
                .into()
            }
            RequestBody::DeleteSubscriptions(request) => {
                non_empty(request.subscription_ids.len())?;
                DeleteSubscriptionsResponse {
                    results: self
                        .engine
                        .delete_subscriptions(session, &request.subscription_ids),
                }
                .into()
            }
            RequestBody::CreateMonitoredItems(request) => {
                non_empty(request.items_to_create.len())?;
                CreateMonitoredItemsResponse {
                    results: self
                        .engine
                        .create_monitored_items(
                            session,
                            request.subscription_id,
                            request.timestamps_to_return,
                            &request.items_to_create,
                        )
                        .await?,
                }
                .into()
            }
            RequestBody::DeleteMonitoredItems(request) => {
                non_empty(request.monitored_item_ids.len())?;
                DeleteMonitoredItemsResponse {
                    results: self.engine.delete_monitored_items(
                        session,
                        request.subscription_id,
                        &request.monitored_item_ids,
                    )?,
                }
                .into()
            }
            RequestBody::Publish(request) => PublishResponse {
                results: self
                    .engine
                    .acknowledge(session, &request.subscription_acknowledgements),
                ..Default::default()
            }
            .into(),
            RequestBody::Republish(request) => {
                let notification_message = self.engine.republish(
                    session,
                    request.subscription_id,
                    request.retransmit_sequence_number,
                )?;
                RepublishResponse {
                    notification_message,
                }
                .into()
            }
            other => {
                return Err(ServiceError::Unsupported {
                    type_id: other.type_id(),
                }
                .into())
            }
        };
        Ok(body)
    }

    // =========================================================================
    // Session services
    // =========================================================================

    fn create_session(
        &self,
        context: &RequestContext,
        request: &CreateSessionRequest,
    ) -> UaResult<ResponseBody> {
        let session = self.sessions.create(request, context.channel_id)?;
        self.diagnostics
            .record_session_created(&session.session_id().to_string(), session.name());
        Ok(CreateSessionResponse {
            session_id: session.session_id().clone(),
            authentication_token: session.authentication_token().clone(),
            revised_session_timeout: millis(session.timeout()),
            server_nonce: generate_nonce(SERVER_NONCE_LENGTH),
            session_name: session.name().to_string(),
            max_request_message_size: self.config.transport.max_message_size,
        }
        .into())
    }

    fn activate_session(
        &self,
        context: &RequestContext,
        header: &RequestHeader,
        request: ActivateSessionRequest,
    ) -> UaResult<ResponseBody> {
        let activated = self.sessions.activate(
            &header.authentication_token,
            context.channel_id,
            request.user_identity_token,
            context.outbound.clone(),
        );
        match activated {
            Ok(session) => {
                self.diagnostics
                    .record_session_activated(&session.session_id().to_string());
                Ok(ActivateSessionResponse {
                    server_nonce: generate_nonce(SERVER_NONCE_LENGTH),
                    results: Vec::new(),
                }
                .into())
            }
            Err(e) => {
                self.diagnostics.record_activation_failure();
                Err(e.into())
            }
        }
    }

    fn close_session(
        &self,
        context: &RequestContext,
        header: &RequestHeader,
        request: &CloseSessionRequest,
    ) -> UaResult<ResponseBody> {
        let session = self
            .sessions
            .close(&header.authentication_token, context.channel_id)?;
        let deleted = self.engine.delete_for_session(session.session_id());
        self.diagnostics
            .record_session_closed(&session.session_id().to_string(), false);
        debug!(
            session = session.name(),
            deleted,
            delete_subscriptions = request.delete_subscriptions,
            "CloseSession handled"
        );
        Ok(CloseSessionResponse.into())
    }

    // =========================================================================
    // Attribute services
    // =========================================================================

    async fn read(&self, request: &ReadRequest) -> UaResult<Vec<DataValue>> {
        non_empty(request.nodes_to_read.len())?;
        if request.max_age < 0.0 {
            return Err(ServiceError::invalid_argument("max_age must not be negative").into());
        }

        let mut results = Vec::with_capacity(request.nodes_to_read.len());
        for item in &request.nodes_to_read {
            let mut value = match self.read_one(item).await {
                Ok(value) => value,
                Err(status) => DataValue::from_status(status),
            };
            request.timestamps_to_return.apply(&mut value);
            results.push(value);
        }
        Ok(results)
    }

    async fn read_one(&self, item: &ReadValueId) -> Result<DataValue, StatusCode> {
        let attribute = item.attribute().ok_or(StatusCode::BadAttributeIdInvalid)?;
        if item.index_range.is_some() {
            return Err(StatusCode::BadIndexRangeInvalid);
        }
        let node = self
            .address_space
            .find_node(&item.node_id)
            .await
            .ok_or(StatusCode::BadNodeIdUnknown)?;
        Ok(self.address_space.read_attribute(&node, attribute).await)
    }

    async fn write(&self, request: &WriteRequest) -> UaResult<Vec<StatusCode>> {
        non_empty(request.nodes_to_write.len())?;

        let mut results = Vec::with_capacity(request.nodes_to_write.len());
        for item in &request.nodes_to_write {
            let status = match AttributeId::from_value(item.attribute_id) {
                None => StatusCode::BadAttributeIdInvalid,
                Some(AttributeId::Value) if item.index_range.is_some() => {
                    StatusCode::BadIndexRangeInvalid
                }
                Some(AttributeId::Value) => match self.address_space.find_node(&item.node_id).await {
                    Some(node) => {
                        self.address_space
                            .set_value_from_source(&node, item.value.clone())
                            .await
                    }
                    None => StatusCode::BadNodeIdUnknown,
                },
                Some(_) => StatusCode::BadNotWritable,
            };
            results.push(status);
        }
        Ok(results)
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// Expires idle and orphaned sessions, deleting their subscriptions.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired = self.sessions.sweep(now);
        for session in &expired {
            self.engine.delete_for_session(session.session_id());
            self.diagnostics
                .record_session_closed(&session.session_id().to_string(), true);
        }
        expired.len()
    }

    /// Detaches the sessions of a closed channel.
    pub fn channel_closed(&self, channel_id: u32) {
        self.sessions.detach_channel(channel_id);
    }

    /// Closes every session and stops every subscription.
    pub fn shutdown(&self) {
        self.engine.shutdown();
        let closed = self.sessions.close_all();
        for session in &closed {
            self.diagnostics
                .record_session_closed(&session.session_id().to_string(), false);
        }
        if !closed.is_empty() {
            info!(sessions = closed.len(), "Closed sessions on shutdown");
        }
    }
}

fn non_empty(count: usize) -> Result<(), ServiceError> {
    if count == 0 {
        Err(ServiceError::NothingToDo)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::NodeHandle;
    use crate::session::IdentityToken;
    use crate::transport::outbound_queue;
    use crate::types::NodeId;
    use async_trait::async_trait;

    struct Single;

    #[async_trait]
    impl AddressSpace for Single {
        async fn find_node(&self, node_id: &NodeId) -> Option<NodeHandle> {
            (*node_id == NodeId::numeric(2, 1)).then(|| NodeHandle::new(node_id.clone(), 0))
        }

        async fn read_attribute(&self, _node: &NodeHandle, _attribute: AttributeId) -> DataValue {
            DataValue::new(1.5)
        }

        async fn set_value_from_source(&self, _node: &NodeHandle, _value: DataValue) -> StatusCode {
            StatusCode::Good
        }
    }

    fn dispatcher() -> Dispatcher {
        let config = Arc::new(ServerConfig::default());
        Dispatcher::new(
            config.clone(),
            Arc::new(SessionManager::new(config.sessions)),
            Arc::new(Single),
            Arc::new(Diagnostics::new()),
        )
    }

    fn channel(channel_id: u32) -> RequestContext {
        let (outbound, _) = outbound_queue();
        RequestContext {
            channel_id,
            outbound,
        }
    }

    async fn call(dispatcher: &Dispatcher, context: &RequestContext, token: &NodeId, body: impl Into<RequestBody>) -> Response {
        let request = Request::new(RequestHeader::new(token.clone(), 9), body);
        dispatcher.dispatch(context, request.encode()).await.response
    }

    async fn open_session(dispatcher: &Dispatcher, context: &RequestContext) -> NodeId {
        let response = call(dispatcher, context, &NodeId::null(), CreateSessionRequest::default()).await;
        let created = expect_response!(response, CreateSession).unwrap();
        let response = call(
            dispatcher,
            context,
            &created.authentication_token,
            ActivateSessionRequest {
                locale_ids: Vec::new(),
                user_identity_token: IdentityToken::Anonymous,
            },
        )
        .await;
        assert_eq!(response.header.service_result, StatusCode::Good);
        created.authentication_token
    }

    #[tokio::test]
    async fn test_garbage_yields_decoding_fault() {
        let dispatcher = dispatcher();
        let dispatched = dispatcher
            .dispatch(&channel(1), Bytes::from_static(&[0xFF, 0x00]))
            .await;
        assert_eq!(dispatched.status(), StatusCode::BadDecodingError);
        assert_eq!(dispatched.service, "Unknown");
    }

    #[tokio::test]
    async fn test_requests_require_an_activated_session() {
        let dispatcher = dispatcher();
        let context = channel(1);
        let read = ReadRequest {
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: vec![ReadValueId::value(NodeId::numeric(2, 1))],
        };

        let response = call(&dispatcher, &context, &NodeId::null(), read.clone()).await;
        assert_eq!(response.header.service_result, StatusCode::BadSessionIdInvalid);

        let token = open_session(&dispatcher, &context).await;
        let response = call(&dispatcher, &context, &token, read.clone()).await;
        let results = expect_response!(response, Read).unwrap().results;
        assert!(results[0].is_good());

        let response = call(&dispatcher, &channel(2), &token, read).await;
        assert_eq!(response.header.service_result, StatusCode::BadSecureChannelIdInvalid);
    }

    #[tokio::test]
    async fn test_per_operation_statuses() {
        let dispatcher = dispatcher();
        let context = channel(1);
        let token = open_session(&dispatcher, &context).await;

        let read = ReadRequest {
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Neither,
            nodes_to_read: vec![
                ReadValueId::value(NodeId::numeric(2, 9)),
                ReadValueId {
                    node_id: NodeId::numeric(2, 1),
                    attribute_id: 99,
                    index_range: None,
                },
            ],
        };
        let response = call(&dispatcher, &context, &token, read).await;
        let results = expect_response!(response, Read).unwrap().results;
        assert_eq!(results[0].status, StatusCode::BadNodeIdUnknown);
        assert_eq!(results[1].status, StatusCode::BadAttributeIdInvalid);

        let empty = ReadRequest {
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Vec::new(),
        };
        let response = call(&dispatcher, &context, &token, empty).await;
        assert_eq!(response.header.service_result, StatusCode::BadNothingToDo);
    }

    #[tokio::test]
    async fn test_close_session_deletes_subscriptions() {
        let dispatcher = dispatcher();
        let context = channel(1);
        let token = open_session(&dispatcher, &context).await;

        let response = call(
            &dispatcher,
            &context,
            &token,
            CreateSubscriptionRequest {
                requested_publishing_interval: 100.0,
                requested_lifetime_count: 30,
                requested_max_keep_alive_count: 10,
                max_notifications_per_publish: 0,
                publishing_enabled: true,
                priority: 0,
            },
        )
        .await;
        expect_response!(response, CreateSubscription).unwrap();
        assert_eq!(dispatcher.engine().len(), 1);

        let response = call(
            &dispatcher,
            &context,
            &token,
            CloseSessionRequest {
                delete_subscriptions: true,
            },
        )
        .await;
        assert_eq!(response.header.service_result, StatusCode::Good);
        assert!(dispatcher.engine().is_empty());
        assert!(dispatcher.sessions().is_empty());
    }
}
