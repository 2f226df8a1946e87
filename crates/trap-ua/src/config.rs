// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration for servers, clients, subscriptions and monitored items.
//!
//! Every struct deserializes with documented defaults, so a configuration
//! file only has to name the values it changes. Durations use humantime
//! strings (`"250ms"`, `"1h"`).
//!
//! # Examples
//!
//! ```
//! use trap_ua::config::ServerConfig;
//!
//! let config = ServerConfig::from_toml_str(r#"
//!     endpoint_url = "opc.tcp://127.0.0.1:4855/trap"
//!
//!     [sessions]
//!     max_sessions = 8
//! "#).unwrap();
//!
//! assert_eq!(config.sessions.max_sessions, 8);
//! assert_eq!(config.endpoint().unwrap().port, 4855);
//! ```

use std::path::Path;
use std::time::Duration;

use dns_lookup::{getaddrinfo, AddrInfoHints};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ConfigurationError, UaError, UaResult};
use crate::logging::LoggingConfig;
use crate::session::IdentityToken;
use crate::transport::hello::INCOMPATIBLE_PROTOCOL_VERSION;
use crate::types::{
    humantime_serde, AttributeId, DataChangeTrigger, MonitoringMode, SecurityMode, SecurityPolicy,
};

/// Default OPC UA TCP port.
pub const DEFAULT_PORT: u16 = 4840;

/// Smallest buffer size a peer may announce.
pub const MIN_BUFFER_SIZE: u32 = 8192;

// =============================================================================
// Endpoint
// =============================================================================

/// A parsed `opc.tcp://host:port/path` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Path, empty or starting with `/`.
    pub path: String,
}

impl Endpoint {
    /// Parses an endpoint URL.
    pub fn parse(endpoint_url: &str) -> UaResult<Self> {
        let invalid = |reason: &str| {
            UaError::configuration(ConfigurationError::invalid_endpoint(endpoint_url, reason))
        };

        let url = Url::parse(endpoint_url).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "opc.tcp" {
            return Err(invalid("scheme must be opc.tcp"));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let path = match url.path() {
            "/" => String::new(),
            other => other.to_string(),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            path,
        })
    }

    /// Returns `true` for wildcard bind addresses.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.host.as_str(), "0.0.0.0" | "::")
    }

    /// Returns `host:port` suitable for binding or connecting.
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Formats the endpoint URL with the given host.
    pub fn url_with_host(&self, host: &str) -> String {
        format!("opc.tcp://{}:{}{}", host, self.port, self.path)
    }
}

/// `AI_CANONNAME`; the same value on Linux, the BSDs and Windows.
const AI_CANONNAME: i32 = 0x0002;

/// Returns the fully qualified name of this host.
///
/// Resolves the canonical name of the system host name; falls back to the
/// short name when resolution fails and to `localhost` when the host name
/// cannot be read.
pub fn fully_qualified_host_name() -> String {
    let short = match hostname::get() {
        Ok(name) => name.to_string_lossy().trim().to_string(),
        Err(error) => {
            warn!(error = %error, "Cannot read host name, advertising localhost");
            return "localhost".to_string();
        }
    };
    if short.is_empty() {
        return "localhost".to_string();
    }
    match canonical_name(&short) {
        Some(fqdn) => fqdn,
        None => {
            debug!(host = %short, "Canonical name lookup failed, advertising short name");
            short
        }
    }
}

/// Canonical DNS name of `host`, if the resolver reports one.
fn canonical_name(host: &str) -> Option<String> {
    let hints = AddrInfoHints {
        flags: AI_CANONNAME,
        ..AddrInfoHints::default()
    };
    getaddrinfo(Some(host), None, Some(hints))
        .ok()?
        .filter_map(Result::ok)
        .find_map(|info| info.canonname)
        .map(|name| name.trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty())
}

// =============================================================================
// Transport and channel limits
// =============================================================================

/// Buffer and message limits announced in HEL/ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportLimits {
    /// Largest chunk this side accepts.
    #[serde(default = "default_buffer_size")]
    pub receive_buffer_size: u32,

    /// Largest chunk this side sends.
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: u32,

    /// Largest reassembled message this side accepts (0 = unlimited).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u32,

    /// Most chunks per message this side accepts (0 = unlimited).
    #[serde(default = "default_max_chunk_count")]
    pub max_chunk_count: u32,
}

fn default_buffer_size() -> u32 {
    65_535
}

fn default_max_message_size() -> u32 {
    16 * 1024 * 1024
}

fn default_max_chunk_count() -> u32 {
    4096
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            receive_buffer_size: default_buffer_size(),
            send_buffer_size: default_buffer_size(),
            max_message_size: default_max_message_size(),
            max_chunk_count: default_max_chunk_count(),
        }
    }
}

impl TransportLimits {
    /// Validates the limits.
    pub fn validate(&self) -> UaResult<()> {
        for (field, value) in [
            ("transport.receive_buffer_size", self.receive_buffer_size),
            ("transport.send_buffer_size", self.send_buffer_size),
        ] {
            if value < MIN_BUFFER_SIZE {
                return Err(UaError::configuration(ConfigurationError::invalid_value(
                    field,
                    format!("must be at least {MIN_BUFFER_SIZE}"),
                )));
            }
        }
        Ok(())
    }
}

/// Inclusive range of protocol versions a server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersionRange {
    /// Oldest accepted version.
    #[serde(default)]
    pub min: u32,
    /// Version this server speaks.
    #[serde(default)]
    pub max: u32,
}

impl Default for ProtocolVersionRange {
    fn default() -> Self {
        Self { min: 0, max: 0 }
    }
}

/// One security policy and mode pair offered by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointSecurity {
    /// Security policy.
    #[serde(default)]
    pub policy: SecurityPolicy,
    /// Security mode.
    #[serde(default)]
    pub mode: SecurityMode,
}

impl EndpointSecurity {
    /// Creates a pair.
    pub const fn new(policy: SecurityPolicy, mode: SecurityMode) -> Self {
        Self { policy, mode }
    }

    /// Returns `true` if policy and mode are consistent.
    pub fn is_consistent(&self) -> bool {
        (self.policy == SecurityPolicy::None) == (self.mode == SecurityMode::None)
    }
}

/// Secure channel timing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLimits {
    /// Shortest token lifetime granted.
    #[serde(default = "default_min_token_lifetime", with = "humantime_serde")]
    pub min_token_lifetime: Duration,

    /// Longest token lifetime granted.
    #[serde(default = "default_max_token_lifetime", with = "humantime_serde")]
    pub max_token_lifetime: Duration,

    /// Time allowed between accept and HEL, and between ACK and OPN.
    #[serde(default = "default_hello_timeout", with = "humantime_serde")]
    pub hello_timeout: Duration,

    /// Most concurrently open channels (0 = unlimited).
    #[serde(default)]
    pub max_channels: usize,
}

fn default_min_token_lifetime() -> Duration {
    Duration::from_millis(100)
}

fn default_max_token_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_hello_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            min_token_lifetime: default_min_token_lifetime(),
            max_token_lifetime: default_max_token_lifetime(),
            hello_timeout: default_hello_timeout(),
            max_channels: 0,
        }
    }
}

impl ChannelLimits {
    /// Clamps a requested lifetime.
    pub fn revise_token_lifetime(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            return self.max_token_lifetime;
        }
        requested.clamp(self.min_token_lifetime, self.max_token_lifetime)
    }
}

// =============================================================================
// Session, subscription and browse limits
// =============================================================================

/// Server-side session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    /// Most concurrent sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Shortest session timeout granted.
    #[serde(default = "default_min_session_timeout", with = "humantime_serde")]
    pub min_session_timeout: Duration,

    /// Longest session timeout granted.
    #[serde(default = "default_max_session_timeout", with = "humantime_serde")]
    pub max_session_timeout: Duration,

    /// How long a session outlives the loss of its channel.
    #[serde(default = "default_channel_loss_grace", with = "humantime_serde")]
    pub channel_loss_grace: Duration,

    /// Interval of the expiry sweep.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Notifications buffered per session while it has no channel.
    #[serde(default = "default_max_pending_notifications")]
    pub max_pending_notifications: usize,
}

fn default_max_sessions() -> usize {
    100
}

fn default_min_session_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_max_session_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_channel_loss_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_pending_notifications() -> usize {
    64
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            min_session_timeout: default_min_session_timeout(),
            max_session_timeout: default_max_session_timeout(),
            channel_loss_grace: default_channel_loss_grace(),
            sweep_interval: default_sweep_interval(),
            max_pending_notifications: default_max_pending_notifications(),
        }
    }
}

impl SessionLimits {
    /// Clamps a requested session timeout.
    pub fn revise_timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            return self.max_session_timeout;
        }
        requested.clamp(self.min_session_timeout, self.max_session_timeout)
    }
}

/// Server-side subscription limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionLimits {
    /// Most subscriptions per session.
    #[serde(default = "default_max_subscriptions_per_session")]
    pub max_subscriptions_per_session: usize,

    /// Most monitored items per subscription.
    #[serde(default = "default_max_monitored_items")]
    pub max_monitored_items_per_subscription: usize,

    /// Fastest publishing interval.
    #[serde(default = "default_min_publishing_interval", with = "humantime_serde")]
    pub min_publishing_interval: Duration,

    /// Slowest publishing interval.
    #[serde(default = "default_max_publishing_interval", with = "humantime_serde")]
    pub max_publishing_interval: Duration,

    /// Fastest sampling interval; a requested interval of zero uses it.
    #[serde(default = "default_min_sampling_interval", with = "humantime_serde")]
    pub min_sampling_interval: Duration,

    /// Largest monitored item queue.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u32,

    /// Largest keep-alive count.
    #[serde(default = "default_max_keep_alive_count")]
    pub max_keep_alive_count: u32,

    /// Largest lifetime count.
    #[serde(default = "default_max_lifetime_count")]
    pub max_lifetime_count: u32,

    /// Notification messages kept for Republish per subscription.
    #[serde(default = "default_max_retransmission_queue")]
    pub max_retransmission_queue: usize,
}

fn default_max_subscriptions_per_session() -> usize {
    64
}

fn default_max_monitored_items() -> usize {
    1000
}

fn default_min_publishing_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_max_publishing_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_min_sampling_interval() -> Duration {
    Duration::from_millis(5)
}

fn default_max_queue_size() -> u32 {
    10_000
}

fn default_max_keep_alive_count() -> u32 {
    10_000
}

fn default_max_lifetime_count() -> u32 {
    30_000
}

fn default_max_retransmission_queue() -> usize {
    32
}

impl Default for SubscriptionLimits {
    fn default() -> Self {
        Self {
            max_subscriptions_per_session: default_max_subscriptions_per_session(),
            max_monitored_items_per_subscription: default_max_monitored_items(),
            min_publishing_interval: default_min_publishing_interval(),
            max_publishing_interval: default_max_publishing_interval(),
            min_sampling_interval: default_min_sampling_interval(),
            max_queue_size: default_max_queue_size(),
            max_keep_alive_count: default_max_keep_alive_count(),
            max_lifetime_count: default_max_lifetime_count(),
            max_retransmission_queue: default_max_retransmission_queue(),
        }
    }
}

/// Server-side browse limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseLimits {
    /// References returned per node when the client asks for 0 (unlimited).
    #[serde(default = "default_max_references_per_node")]
    pub max_references_per_node: u32,

    /// Continuation points held per session.
    #[serde(default = "default_max_continuation_points")]
    pub max_continuation_points_per_session: usize,

    /// Most operations in one Read, Write, Browse or Translate request.
    #[serde(default = "default_max_nodes_per_request")]
    pub max_nodes_per_request: usize,
}

fn default_max_references_per_node() -> u32 {
    1000
}

fn default_max_continuation_points() -> usize {
    16
}

fn default_max_nodes_per_request() -> usize {
    1000
}

impl Default for BrowseLimits {
    fn default() -> Self {
        Self {
            max_references_per_node: default_max_references_per_node(),
            max_continuation_points_per_session: default_max_continuation_points(),
            max_nodes_per_request: default_max_nodes_per_request(),
        }
    }
}

// =============================================================================
// ServerConfig
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Application name reported in logs.
    #[serde(default = "default_server_application_name")]
    pub application_name: String,

    /// Endpoint URL to bind, e.g. `opc.tcp://0.0.0.0:4840/trap`.
    #[serde(default = "default_server_endpoint")]
    pub endpoint_url: String,

    /// Host name advertised when binding a wildcard address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertised_host: Option<String>,

    /// Accepted protocol versions.
    #[serde(default)]
    pub protocol_versions: ProtocolVersionRange,

    /// Offered security configurations.
    #[serde(default = "default_endpoint_security")]
    pub security: Vec<EndpointSecurity>,

    /// Buffer and message limits.
    #[serde(default)]
    pub transport: TransportLimits,

    /// Secure channel limits.
    #[serde(default)]
    pub channel: ChannelLimits,

    /// Session limits.
    #[serde(default)]
    pub sessions: SessionLimits,

    /// Subscription limits.
    #[serde(default)]
    pub subscriptions: SubscriptionLimits,

    /// Browse limits.
    #[serde(default)]
    pub browse: BrowseLimits,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_server_application_name() -> String {
    "TRAP UA Server".to_string()
}

fn default_server_endpoint() -> String {
    format!("opc.tcp://0.0.0.0:{DEFAULT_PORT}")
}

fn default_endpoint_security() -> Vec<EndpointSecurity> {
    vec![EndpointSecurity::default()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            application_name: default_server_application_name(),
            endpoint_url: default_server_endpoint(),
            advertised_host: None,
            protocol_versions: ProtocolVersionRange::default(),
            security: default_endpoint_security(),
            transport: TransportLimits::default(),
            channel: ChannelLimits::default(),
            sessions: SessionLimits::default(),
            subscriptions: SubscriptionLimits::default(),
            browse: BrowseLimits::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Parses the endpoint URL.
    pub fn endpoint(&self) -> UaResult<Endpoint> {
        Endpoint::parse(&self.endpoint_url)
    }

    /// Returns the URL clients should use; wildcard hosts are replaced by
    /// the advertised or fully qualified host name.
    pub fn advertised_endpoint_url(&self) -> UaResult<String> {
        let endpoint = self.endpoint()?;
        if !endpoint.is_wildcard() {
            return Ok(self.endpoint_url.clone());
        }
        let host = self
            .advertised_host
            .clone()
            .unwrap_or_else(fully_qualified_host_name);
        Ok(endpoint.url_with_host(&host))
    }

    /// Returns `true` if the policy and mode pair is offered.
    pub fn offers(&self, policy: SecurityPolicy, mode: SecurityMode) -> bool {
        self.security
            .iter()
            .any(|s| s.policy == policy && s.mode == mode)
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        self.endpoint()?;
        self.transport.validate()?;

        if self.security.is_empty() {
            return Err(invalid("security", "at least one security configuration is required"));
        }
        if let Some(bad) = self.security.iter().find(|s| !s.is_consistent()) {
            return Err(invalid(
                "security",
                format!(
                    "policy {} cannot be combined with mode {}",
                    bad.policy, bad.mode
                ),
            ));
        }
        if self.protocol_versions.min > self.protocol_versions.max {
            return Err(invalid("protocol_versions", "min must not exceed max"));
        }
        if self.protocol_versions.max == INCOMPATIBLE_PROTOCOL_VERSION {
            return Err(invalid("protocol_versions.max", "reserved value"));
        }
        if self.channel.min_token_lifetime > self.channel.max_token_lifetime {
            return Err(invalid("channel", "min_token_lifetime exceeds max_token_lifetime"));
        }
        if self.sessions.max_sessions == 0 {
            return Err(invalid("sessions.max_sessions", "must be greater than 0"));
        }
        if self.sessions.min_session_timeout > self.sessions.max_session_timeout {
            return Err(invalid("sessions", "min_session_timeout exceeds max_session_timeout"));
        }
        if self.sessions.sweep_interval.is_zero() {
            return Err(invalid("sessions.sweep_interval", "must be greater than 0"));
        }
        if self.subscriptions.min_publishing_interval.is_zero() {
            return Err(invalid(
                "subscriptions.min_publishing_interval",
                "must be greater than 0",
            ));
        }
        if self.subscriptions.min_sampling_interval.is_zero() {
            return Err(invalid(
                "subscriptions.min_sampling_interval",
                "must be greater than 0",
            ));
        }
        if self.subscriptions.max_queue_size == 0 {
            return Err(invalid("subscriptions.max_queue_size", "must be greater than 0"));
        }
        Ok(())
    }

    /// Parses TOML.
    pub fn from_toml_str(content: &str) -> UaResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            UaError::configuration(ConfigurationError::Parse {
                format: "TOML",
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parses JSON.
    pub fn from_json_str(content: &str) -> UaResult<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| {
            UaError::configuration(ConfigurationError::Parse {
                format: "JSON",
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> UaResult<Self> {
        let (content, is_json) = read_config_file(path.as_ref())?;
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> UaError {
    UaError::configuration(ConfigurationError::invalid_value(field, reason))
}

fn read_config_file(path: &Path) -> UaResult<(String, bool)> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        UaError::configuration(ConfigurationError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    })?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    Ok((content, is_json))
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Sets the endpoint URL.
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint_url = url.into();
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Sets the advertised host name.
    pub fn advertised_host(mut self, host: impl Into<String>) -> Self {
        self.config.advertised_host = Some(host.into());
        self
    }

    /// Sets the accepted protocol versions.
    pub fn protocol_versions(mut self, min: u32, max: u32) -> Self {
        self.config.protocol_versions = ProtocolVersionRange { min, max };
        self
    }

    /// Adds an offered security configuration.
    pub fn security(mut self, policy: SecurityPolicy, mode: SecurityMode) -> Self {
        let entry = EndpointSecurity::new(policy, mode);
        if !self.config.security.contains(&entry) {
            self.config.security.push(entry);
        }
        self
    }

    /// Sets the transport limits.
    pub fn transport(mut self, limits: TransportLimits) -> Self {
        self.config.transport = limits;
        self
    }

    /// Sets the channel limits.
    pub fn channel(mut self, limits: ChannelLimits) -> Self {
        self.config.channel = limits;
        self
    }

    /// Sets the session limits.
    pub fn sessions(mut self, limits: SessionLimits) -> Self {
        self.config.sessions = limits;
        self
    }

    /// Sets the subscription limits.
    pub fn subscriptions(mut self, limits: SubscriptionLimits) -> Self {
        self.config.subscriptions = limits;
        self
    }

    /// Sets the browse limits.
    pub fn browse(mut self, limits: BrowseLimits) -> Self {
        self.config.browse = limits;
        self
    }

    /// Sets the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> UaResult<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application name sent in CreateSession.
    #[serde(default = "default_client_application_name")]
    pub application_name: String,

    /// Protocol version sent in HEL.
    #[serde(default)]
    pub protocol_version: u32,

    /// Security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// Requested token lifetime.
    #[serde(default = "default_requested_token_lifetime", with = "humantime_serde")]
    pub requested_token_lifetime: Duration,

    /// Fraction of the revised token lifetime after which the token is renewed.
    #[serde(default = "default_renewal_fraction")]
    pub renewal_fraction: f64,

    /// TCP connect and handshake timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for each request.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Buffer and message limits.
    #[serde(default)]
    pub transport: TransportLimits,
}

fn default_client_application_name() -> String {
    "TRAP UA Client".to_string()
}

fn default_requested_token_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_renewal_fraction() -> f64 {
    0.75
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_name: default_client_application_name(),
            protocol_version: 0,
            security_policy: SecurityPolicy::default(),
            security_mode: SecurityMode::default(),
            requested_token_lifetime: default_requested_token_lifetime(),
            renewal_fraction: default_renewal_fraction(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            session_timeout: default_session_timeout(),
            transport: TransportLimits::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        self.transport.validate()?;
        if !EndpointSecurity::new(self.security_policy, self.security_mode).is_consistent() {
            return Err(invalid(
                "security_mode",
                format!(
                    "policy {} cannot be combined with mode {}",
                    self.security_policy, self.security_mode
                ),
            ));
        }
        if !(self.renewal_fraction > 0.0 && self.renewal_fraction < 1.0) {
            return Err(invalid("renewal_fraction", "must be between 0 and 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "must be greater than 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", "must be greater than 0"));
        }
        Ok(())
    }

    /// Loads a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> UaResult<Self> {
        let (content, is_json) = read_config_file(path.as_ref())?;
        let config: Self = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                UaError::configuration(ConfigurationError::Parse {
                    format: "JSON",
                    reason: e.to_string(),
                })
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                UaError::configuration(ConfigurationError::Parse {
                    format: "TOML",
                    reason: e.to_string(),
                })
            })?
        };
        config.validate()?;
        Ok(config)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Sets the protocol version sent in HEL.
    pub fn protocol_version(mut self, version: u32) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Sets the security policy and mode.
    pub fn security(mut self, policy: SecurityPolicy, mode: SecurityMode) -> Self {
        self.config.security_policy = policy;
        self.config.security_mode = mode;
        self
    }

    /// Sets the requested token lifetime.
    pub fn requested_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.requested_token_lifetime = lifetime;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Sets the transport limits.
    pub fn transport(mut self, limits: TransportLimits) -> Self {
        self.config.transport = limits;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> UaResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// SessionOptions
// =============================================================================

/// Options for creating a client session.
///
/// An empty user name and password selects anonymous identity. Any other
/// combination is sent as a user name token and validated by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// User name.
    #[serde(default)]
    pub user_name: String,

    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Prefix for the server-assigned session name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

impl SessionOptions {
    /// Anonymous session options.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// User name and password options.
    pub fn user(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
            client_name: None,
        }
    }

    /// Sets the session name prefix.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Returns the identity token these options describe.
    pub fn identity_token(&self) -> IdentityToken {
        if self.user_name.is_empty() && self.password.is_empty() {
            IdentityToken::Anonymous
        } else {
            IdentityToken::UserName {
                user_name: self.user_name.clone(),
                password: self.password.clone(),
            }
        }
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Requested subscription parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(default = "default_publishing_interval", with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Publishing intervals without delivery before the subscription expires.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Empty publishing intervals before a keep-alive is sent.
    #[serde(default = "default_keep_alive_count")]
    pub keep_alive_count: u32,

    /// Most notifications per message (0 = unlimited).
    #[serde(default)]
    pub max_notifications_per_publish: u32,

    /// Relative priority.
    #[serde(default)]
    pub priority: u8,

    /// Whether notifications are published.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lifetime_count() -> u32 {
    60
}

fn default_keep_alive_count() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            keep_alive_count: default_keep_alive_count(),
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }
}

impl SubscriptionSettings {
    /// Settings with a custom publishing interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            publishing_interval: interval,
            ..Default::default()
        }
    }

    /// Validates the settings.
    pub fn validate(&self) -> UaResult<()> {
        if self.publishing_interval.is_zero() {
            return Err(invalid("publishing_interval", "must be greater than 0"));
        }
        if self.keep_alive_count == 0 {
            return Err(invalid("keep_alive_count", "must be greater than 0"));
        }
        if self.lifetime_count < self.keep_alive_count.saturating_mul(3) {
            return Err(invalid(
                "lifetime_count",
                "must be at least three times keep_alive_count",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// MonitoredItemOptions
// =============================================================================

/// Options for one monitored item.
///
/// Defaults: `sampling_interval` 0 (report every change, using the fastest
/// sampling rate the server allows), `queue_size` 1, `discard_oldest` false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemOptions {
    /// Attribute to monitor.
    #[serde(default)]
    pub attribute: AttributeId,

    /// Sampling interval.
    #[serde(default, with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Queue capacity; must be greater than 0.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Evict the oldest value instead of dropping the newest when full.
    #[serde(default)]
    pub discard_oldest: bool,

    /// Monitoring mode.
    #[serde(default)]
    pub monitoring_mode: MonitoringMode,

    /// Change trigger.
    #[serde(default)]
    pub trigger: DataChangeTrigger,

    /// Absolute deadband for numeric values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadband: Option<f64>,
}

fn default_queue_size() -> u32 {
    1
}

impl Default for MonitoredItemOptions {
    fn default() -> Self {
        Self {
            attribute: AttributeId::Value,
            sampling_interval: Duration::ZERO,
            queue_size: default_queue_size(),
            discard_oldest: false,
            monitoring_mode: MonitoringMode::Reporting,
            trigger: DataChangeTrigger::StatusValue,
            deadband: None,
        }
    }
}

impl MonitoredItemOptions {
    /// Sets the sampling interval.
    pub fn sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Sets queue size and discard policy.
    pub fn queue(mut self, queue_size: u32, discard_oldest: bool) -> Self {
        self.queue_size = queue_size;
        self.discard_oldest = discard_oldest;
        self
    }

    /// Sets an absolute deadband.
    pub fn deadband(mut self, deadband: f64) -> Self {
        self.deadband = Some(deadband);
        self
    }

    /// Validates the options.
    pub fn validate(&self) -> UaResult<()> {
        if self.queue_size == 0 {
            return Err(invalid("queue_size", "must be greater than 0"));
        }
        if let Some(deadband) = self.deadband {
            if !(deadband.is_finite() && deadband >= 0.0) {
                return Err(invalid("deadband", "must be a non-negative number"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_endpoint_parse() {
        let endpoint = Endpoint::parse("opc.tcp://plc-01:4850/UA/Server").unwrap();
        assert_eq!(endpoint.host, "plc-01");
        assert_eq!(endpoint.port, 4850);
        assert_eq!(endpoint.path, "/UA/Server");
        assert_eq!(endpoint.socket_address(), "plc-01:4850");

        let endpoint = Endpoint::parse("opc.tcp://localhost").unwrap();
        assert_eq!(endpoint.port, DEFAULT_PORT);
        assert_eq!(endpoint.path, "");

        assert!(Endpoint::parse("http://localhost:4840").is_err());
        assert!(Endpoint::parse("not a url").is_err());
    }

    #[test]
    fn test_wildcard_endpoint_uses_advertised_host() {
        let config = ServerConfig::builder()
            .endpoint_url("opc.tcp://0.0.0.0:4841/trap")
            .advertised_host("gateway.plant.local")
            .build()
            .unwrap();
        assert_eq!(
            config.advertised_endpoint_url().unwrap(),
            "opc.tcp://gateway.plant.local:4841/trap"
        );

        let config = ServerConfig::builder()
            .endpoint_url("opc.tcp://127.0.0.1:4841")
            .build()
            .unwrap();
        assert_eq!(config.advertised_endpoint_url().unwrap(), "opc.tcp://127.0.0.1:4841");
    }

    #[test]
    fn test_wildcard_endpoint_without_advertised_host() {
        let config = ServerConfig::builder()
            .endpoint_url("opc.tcp://0.0.0.0:4842/trap")
            .build()
            .unwrap();
        let host = fully_qualified_host_name();
        assert!(!host.is_empty());
        assert!(!host.contains(char::is_whitespace));
        assert!(!host.ends_with('.'));

        let url = config.advertised_endpoint_url().unwrap();
        assert_eq!(url, format!("opc.tcp://{host}:4842/trap"));
        assert!(!url.contains("0.0.0.0"));
    }

    #[test]
    fn test_canonical_name_resolves_localhost() {
        let name = canonical_name("localhost").unwrap();
        assert!(!name.is_empty());
        assert!(!name.ends_with('.'));
    }

    #[test]
    fn test_server_config_defaults_from_empty_toml() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config.sessions.max_sessions, 100);
        assert_eq!(config.security, vec![EndpointSecurity::default()]);
        assert_eq!(config.channel.max_token_lifetime, Duration::from_secs(3600));
    }

    #[test]
    fn test_server_config_humantime_fields() {
        let config = ServerConfig::from_toml_str(
            r#"
            [sessions]
            channel_loss_grace = "2s"

            [subscriptions]
            min_publishing_interval = "20ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.sessions.channel_loss_grace, Duration::from_secs(2));
        assert_eq!(
            config.subscriptions.min_publishing_interval,
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_server_config_rejects_inconsistent_security() {
        let result = ServerConfig::builder()
            .security(SecurityPolicy::None, SecurityMode::Sign)
            .build();
        assert!(result.is_err());

        let config = ServerConfig::builder()
            .security(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt)
            .build()
            .unwrap();
        assert!(config.offers(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt));
        assert!(config.offers(SecurityPolicy::None, SecurityMode::None));
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"endpoint_url": "opc.tcp://127.0.0.1:4999"}}"#).unwrap();
        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.endpoint().unwrap().port, 4999);

        assert!(ServerConfig::load("/nonexistent/trap-ua.toml").is_err());
    }

    #[test]
    fn test_client_config_validation() {
        assert!(ClientConfig::default().validate().is_ok());
        let config = ClientConfig {
            renewal_fraction: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ClientConfig::builder()
            .security(SecurityPolicy::Basic256Sha256, SecurityMode::None)
            .build()
            .is_err());
    }

    #[test]
    fn test_session_options_identity() {
        assert_eq!(SessionOptions::anonymous().identity_token(), IdentityToken::Anonymous);
        assert!(matches!(
            SessionOptions::user("", "secret").identity_token(),
            IdentityToken::UserName { ref user_name, .. } if user_name.is_empty()
        ));
    }

    #[test]
    fn test_subscription_settings_validation() {
        assert!(SubscriptionSettings::default().validate().is_ok());
        let settings = SubscriptionSettings {
            lifetime_count: 10,
            keep_alive_count: 10,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_monitored_item_defaults() {
        let options = MonitoredItemOptions::default();
        assert_eq!(options.queue_size, 1);
        assert!(!options.discard_oldest);
        assert!(options.validate().is_ok());
        assert!(MonitoredItemOptions::default().queue(0, true).validate().is_err());
        assert!(MonitoredItemOptions::default().deadband(-1.0).validate().is_err());
    }
}
