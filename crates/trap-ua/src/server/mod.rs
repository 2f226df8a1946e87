// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server role: listener, per-connection tasks and housekeeping.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trap_ua::config::ServerConfig;
//! use trap_ua::server::UaServer;
//!
//! let config = ServerConfig::builder()
//!     .endpoint_url("opc.tcp://0.0.0.0:4840")
//!     .build()?;
//! let handle = UaServer::builder(config, Arc::new(my_address_space))
//!     .build()
//!     .start()
//!     .await?;
//! println!("listening on {}", handle.endpoint_url());
//! handle.shutdown().await;
//! ```

mod connection;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::address_space::AddressSpace;
use crate::channel::{ChannelObserver, ChannelObservers};
use crate::config::ServerConfig;
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::dispatcher::Dispatcher;
use crate::error::{UaError, UaResult};
use crate::session::{AllowAll, Authenticator, SessionManager, SessionNameCounter};
use crate::subscription::{NotificationSink, SubscriptionEngine};

use connection::{reject_busy, Connection};

// =============================================================================
// Builder
// =============================================================================

/// Assembles a server from its configuration and collaborators.
pub struct UaServerBuilder {
    config: ServerConfig,
    address_space: Arc<dyn AddressSpace>,
    authenticator: Arc<dyn Authenticator>,
    names: Arc<SessionNameCounter>,
    observers: ChannelObservers,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl UaServerBuilder {
    /// Validates identities on ActivateSession. Defaults to [`AllowAll`].
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Injects the counter behind generated session names.
    pub fn session_names(mut self, names: Arc<SessionNameCounter>) -> Self {
        self.names = names;
        self
    }

    /// Adds a channel lifecycle observer.
    pub fn observer(self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observers.add(observer);
        self
    }

    /// Adds a sink that sees every published notification message.
    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Builds the server.
    pub fn build(self) -> UaServer {
        UaServer {
            config: Arc::new(self.config),
            address_space: self.address_space,
            authenticator: self.authenticator,
            names: self.names,
            observers: self.observers,
            sinks: self.sinks,
        }
    }
}

// =============================================================================
// UaServer
// =============================================================================

/// A server that has not started listening yet.
pub struct UaServer {
    config: Arc<ServerConfig>,
    address_space: Arc<dyn AddressSpace>,
    authenticator: Arc<dyn Authenticator>,
    names: Arc<SessionNameCounter>,
    observers: ChannelObservers,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl UaServer {
    /// Starts a builder.
    pub fn builder(config: ServerConfig, address_space: Arc<dyn AddressSpace>) -> UaServerBuilder {
        UaServerBuilder {
            config,
            address_space,
            authenticator: Arc::new(AllowAll),
            names: Arc::new(SessionNameCounter::default()),
            observers: ChannelObservers::new(),
            sinks: Vec::new(),
        }
    }

    /// Binds the endpoint and starts accepting connections.
    pub async fn start(self) -> UaResult<ServerHandle> {
        self.config.validate()?;
        let endpoint = self.config.endpoint()?;
        let listener = TcpListener::bind(endpoint.socket_address()).await?;
        let local_addr = listener.local_addr()?;

        let diagnostics = Arc::new(Diagnostics::new());
        self.observers.add(diagnostics.clone());

        let sessions = Arc::new(SessionManager::with_parts(
            self.config.sessions,
            self.names,
            self.authenticator,
        ));
        let dispatcher = Dispatcher::new(
            self.config.clone(),
            sessions,
            self.address_space,
            diagnostics.clone(),
        );
        for sink in self.sinks {
            dispatcher.engine().add_sink(sink);
        }

        let advertised = self.config.advertised_endpoint_url()?;
        let endpoint_url = match crate::config::Endpoint::parse(&advertised) {
            Ok(mut advertised) if advertised.port == 0 => {
                advertised.port = local_addr.port();
                advertised.url_with_host(&advertised.host)
            }
            _ => advertised,
        };

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let listener_state = Listener {
            config: self.config.clone(),
            dispatcher: dispatcher.clone(),
            observers: self.observers.clone(),
            next_channel_id: AtomicU32::new(1),
            active: Arc::new(AtomicUsize::new(0)),
        };
        tasks.spawn(listener_state.accept_loop(listener, tasks.clone(), shutdown.clone()));
        tasks.spawn(sweep_loop(dispatcher.clone(), shutdown.clone()));

        info!(
            application = %self.config.application_name,
            endpoint = %endpoint_url,
            local_addr = %local_addr,
            "Server listening"
        );

        Ok(ServerHandle {
            local_addr,
            endpoint_url,
            dispatcher,
            observers: self.observers,
            diagnostics,
            shutdown,
            tasks,
        })
    }
}

// =============================================================================
// ServerHandle
// =============================================================================

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    endpoint_url: String,
    dispatcher: Dispatcher,
    observers: ChannelObservers,
    diagnostics: Arc<Diagnostics>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL clients should connect to.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.dispatcher.sessions()
    }

    /// Subscription engine.
    pub fn subscriptions(&self) -> &SubscriptionEngine {
        self.dispatcher.engine()
    }

    /// Adds a channel lifecycle observer to the running server.
    pub fn add_observer(&self, observer: Arc<dyn ChannelObserver>) {
        self.observers.add(observer);
    }

    /// Copies every diagnostics counter.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Stops accepting, closes every channel and session, and waits for
    /// the server tasks to finish.
    pub async fn shutdown(self) {
        info!(endpoint = %self.endpoint_url, "Server shutting down");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.dispatcher.shutdown();
        info!("Server stopped");
    }
}

// =============================================================================
// Background tasks
// =============================================================================

struct Listener {
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    observers: ChannelObservers,
    next_channel_id: AtomicU32,
    active: Arc<AtomicUsize>,
}

impl Listener {
    async fn accept_loop(self, listener: TcpListener, tasks: TaskTracker, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.cancelled() => break,
            };
            match accepted {
                Ok((stream, peer)) => self.spawn_connection(stream, peer, &tasks, &shutdown),
                Err(error) => UaError::from(error).log("accept"),
            }
        }
        debug!("Listener stopped");
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        tasks: &TaskTracker,
        shutdown: &CancellationToken,
    ) {
        let max = self.config.channel.max_channels;
        if max > 0 && self.active.load(Ordering::Acquire) >= max {
            warn!(peer = %peer, max, "Channel limit reached, rejecting connection");
            tasks.spawn(reject_busy(
                stream,
                max,
                self.config.transport.receive_buffer_size as usize,
                self.config.channel.hello_timeout,
            ));
            return;
        }
        if let Err(error) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %error, "Could not disable Nagle");
        }

        let channel_id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::new(
            channel_id,
            peer,
            self.config.clone(),
            self.dispatcher.clone(),
            self.observers.clone(),
        );
        let active = self.active.clone();
        let shutdown = shutdown.child_token();
        active.fetch_add(1, Ordering::AcqRel);
        debug!(channel_id, peer = %peer, "Connection accepted");

        tasks.spawn(async move {
            let (reader, writer) = stream.into_split();
            connection.run(reader, writer, shutdown).await;
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

async fn sweep_loop(dispatcher: Dispatcher, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(dispatcher.sessions().sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = dispatcher.sweep(Instant::now());
                if expired > 0 {
                    debug!(expired, "Expired idle sessions");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
