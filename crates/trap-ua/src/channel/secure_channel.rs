// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel state: tokens, sequence numbers and chunk security.
//!
//! [`SecureChannel`] performs no I/O. The connection tasks feed it whole
//! chunks from the framer and write the chunks it produces.
//!
//! ```text
//! MSG/CLO chunk
//! +-----------+----------+-----------------+---------------------+-----------+
//! | header 12 | token 4  | seq + request 8 | body (+ GCM tag 16) | sig 32    |
//! +-----------+----------+-----------------+---------------------+-----------+
//!   plaintext, authenticated as AAD         encrypted in           signed
//!                                           SignAndEncrypt         modes
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use super::security::{
    check_nonce, generate_nonce, KeySet, Role, SecurityToken, TokenSet, SIGNATURE_LEN, TAG_LEN,
};
use crate::config::{ChannelLimits, EndpointSecurity, ProtocolVersionRange};
use crate::encoding::{BinaryDecode, BinaryEncode};
use crate::error::{ChannelError, ServiceError, TransportError, UaError, UaResult};
use crate::messages::{
    OpenSecureChannelRequest, OpenSecureChannelResponse, SecurityTokenRequestType,
};
use crate::status::StatusCode;
use crate::transport::assembler::{split_body, Assembled, ChunkAssembler};
use crate::transport::chunk::{
    ChunkHeader, ChunkType, MessageType, SECURE_HEADER_LEN, SEQUENCE_HEADER_LEN,
};
use crate::transport::hello::{negotiate_protocol_version, ConnectionLimits};
use crate::types::{SecurityMode, SecurityPolicy};

/// Senders wrap to 1 after passing this value.
const SEQUENCE_WRAP_AT: u32 = u32::MAX - 1024;
/// After a wrap, receivers accept sequence numbers below this value.
const SEQUENCE_WRAP_LIMIT: u32 = 1024;

const TOKEN_HEADER_LEN: usize = 4;
const SYMMETRIC_PREFIX_LEN: usize = SECURE_HEADER_LEN + TOKEN_HEADER_LEN + SEQUENCE_HEADER_LEN;

/// A message reassembled from verified chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// OPN, CLO or MSG.
    pub message_type: MessageType,
    /// Request id from the sequence header.
    pub request_id: u32,
    /// Reassembled body.
    pub body: Bytes,
    /// Security policy URI of an OPN message.
    pub policy_uri: Option<String>,
    /// Bytes on the wire over all chunks.
    pub wire_size: usize,
}

/// Outcome of decoding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete message.
    Message(ReceivedMessage),
    /// The peer aborted a message.
    Aborted {
        /// Request id of the aborted message.
        request_id: u32,
        /// Status from the abort chunk.
        status: StatusCode,
        /// Reason from the abort chunk.
        reason: String,
    },
}

/// Counters of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Bytes written including chunk overhead.
    pub bytes_sent: u64,
    /// Bytes read including chunk overhead.
    pub bytes_received: u64,
    /// Chunks written.
    pub chunks_sent: u64,
    /// Chunks read.
    pub chunks_received: u64,
    /// Completed request/response round trips.
    pub transactions: u64,
    /// Tokens issued after the first one.
    pub token_renewals: u64,
}

/// Settings the server applies to OpenSecureChannel.
#[derive(Debug, Clone)]
pub struct OpenPolicy {
    /// Offered policy and mode pairs.
    pub offered: Vec<EndpointSecurity>,
    /// Accepted protocol versions.
    pub versions: ProtocolVersionRange,
    /// Token lifetime bounds.
    pub limits: ChannelLimits,
}

impl OpenPolicy {
    fn check(&self, policy: SecurityPolicy, mode: SecurityMode) -> Result<(), ChannelError> {
        if !self.offered.iter().any(|s| s.policy == policy) {
            return Err(ChannelError::PolicyRejected {
                policy: policy.uri().to_string(),
            });
        }
        if !self.offered.iter().any(|s| s.policy == policy && s.mode == mode) {
            return Err(ChannelError::ModeRejected {
                mode: mode.name().to_string(),
            });
        }
        Ok(())
    }
}

/// State of one secure channel.
#[derive(Debug)]
pub struct SecureChannel {
    role: Role,
    channel_id: u32,
    policy: SecurityPolicy,
    mode: SecurityMode,
    tokens: Option<TokenSet>,
    next_token_id: u32,
    limits: ConnectionLimits,
    assembler: ChunkAssembler,
    inbound_sizes: HashMap<u32, usize>,
    send_sequence: u32,
    receive_sequence: Option<u32>,
    local_nonce: Vec<u8>,
    stats: ChannelStats,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl SecureChannel {
    /// Creates a client channel that will request `policy` and `mode`.
    pub fn client(policy: SecurityPolicy, mode: SecurityMode, limits: ConnectionLimits) -> Self {
        Self::new(Role::Client, 0, policy, mode, limits)
    }

    /// Creates a server channel with a pre-assigned id.
    pub fn server(channel_id: u32, limits: ConnectionLimits) -> Self {
        Self::new(
            Role::Server,
            channel_id,
            SecurityPolicy::None,
            SecurityMode::None,
            limits,
        )
    }

    fn new(
        role: Role,
        channel_id: u32,
        policy: SecurityPolicy,
        mode: SecurityMode,
        limits: ConnectionLimits,
    ) -> Self {
        Self {
            role,
            channel_id,
            policy,
            mode,
            tokens: None,
            next_token_id: 1,
            limits,
            assembler: ChunkAssembler::new(
                limits.receive_max_message_size,
                limits.receive_max_chunk_count,
            ),
            inbound_sizes: HashMap::new(),
            send_sequence: 0,
            receive_sequence: None,
            local_nonce: Vec::new(),
            stats: ChannelStats::default(),
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Channel id; 0 until the first token is issued on a client.
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Security policy.
    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    /// Security mode.
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Returns `true` once a token has been issued.
    pub fn is_open(&self) -> bool {
        self.tokens.is_some() && self.closed_at.is_none()
    }

    /// Current and previous tokens.
    pub fn tokens(&self) -> Option<&TokenSet> {
        self.tokens.as_ref()
    }

    /// Negotiated limits.
    pub fn limits(&self) -> &ConnectionLimits {
        &self.limits
    }

    /// Counters.
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Close time, if closed.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Applies limits negotiated in HEL/ACK.
    pub fn set_limits(&mut self, limits: ConnectionLimits) {
        self.limits = limits;
        self.assembler
            .set_limits(limits.receive_max_message_size, limits.receive_max_chunk_count);
    }

    /// Counts a completed round trip.
    pub fn record_transaction(&mut self) {
        self.stats.transactions += 1;
    }

    /// Marks the channel closed.
    pub fn close(&mut self) {
        if self.closed_at.is_none() {
            self.closed_at = Some(Utc::now());
        }
    }

    // =========================================================================
    // Token negotiation
    // =========================================================================

    /// Builds an OpenSecureChannel request (client).
    pub fn begin_open(
        &mut self,
        request_type: SecurityTokenRequestType,
        protocol_version: u32,
        requested_lifetime: Duration,
    ) -> OpenSecureChannelRequest {
        self.local_nonce = generate_nonce(self.policy.nonce_length());
        OpenSecureChannelRequest {
            client_protocol_version: protocol_version,
            request_type,
            security_mode: self.mode,
            client_nonce: self.local_nonce.clone(),
            requested_lifetime: u32::try_from(requested_lifetime.as_millis()).unwrap_or(u32::MAX),
        }
    }

    /// Installs the token from an OpenSecureChannel response (client).
    pub fn complete_open(&mut self, response: &OpenSecureChannelResponse) -> UaResult<()> {
        let token = &response.security_token;
        if self.channel_id != 0 && token.channel_id != self.channel_id {
            return Err(ChannelError::ChannelIdInvalid {
                expected: self.channel_id,
                actual: token.channel_id,
            }
            .into());
        }
        check_nonce(self.policy, &response.server_nonce)?;

        let keys = self.derive_keys(&self.local_nonce, &response.server_nonce)?;
        self.channel_id = token.channel_id;
        self.install(SecurityToken::from_wire(token, keys));
        debug!(
            channel_id = self.channel_id,
            token_id = token.token_id,
            lifetime_ms = token.revised_lifetime,
            "Security token installed"
        );
        Ok(())
    }

    /// Answers an OpenSecureChannel request (server).
    pub fn accept_open(
        &mut self,
        policy_uri: &str,
        request: &OpenSecureChannelRequest,
        open_policy: &OpenPolicy,
    ) -> UaResult<OpenSecureChannelResponse> {
        let policy = SecurityPolicy::from_uri(policy_uri).ok_or_else(|| ChannelError::PolicyRejected {
            policy: policy_uri.to_string(),
        })?;
        let mode = request.security_mode;
        let server_version =
            negotiate_protocol_version(&open_policy.versions, request.client_protocol_version)?;

        match request.request_type {
            SecurityTokenRequestType::Issue => {
                if self.tokens.is_some() {
                    return Err(ChannelError::request_type_invalid("channel already open").into());
                }
                if !EndpointSecurity::new(policy, mode).is_consistent() {
                    return Err(ChannelError::ModeRejected {
                        mode: mode.name().to_string(),
                    }
                    .into());
                }
                open_policy.check(policy, mode)?;
                self.policy = policy;
                self.mode = mode;
            }
            SecurityTokenRequestType::Renew => {
                if self.tokens.is_none() {
                    return Err(ChannelError::request_type_invalid("renew before issue").into());
                }
                if policy != self.policy || mode != self.mode {
                    return Err(ChannelError::security_checks_failed(
                        "renewal changes the security configuration",
                    )
                    .into());
                }
            }
        }
        check_nonce(self.policy, &request.client_nonce)?;

        let server_nonce = generate_nonce(self.policy.nonce_length());
        let keys = self.derive_keys(&request.client_nonce, &server_nonce)?;
        let lifetime = open_policy
            .limits
            .revise_token_lifetime(Duration::from_millis(u64::from(request.requested_lifetime)));
        let token_id = self.next_token_id;
        self.next_token_id = self.next_token_id.wrapping_add(1).max(1);

        let token = SecurityToken::new(self.channel_id, token_id, lifetime, keys);
        let wire = token.to_wire();
        self.install(token);

        Ok(OpenSecureChannelResponse {
            server_protocol_version: server_version,
            security_token: wire,
            server_nonce,
        })
    }

    fn derive_keys(&self, client_nonce: &[u8], server_nonce: &[u8]) -> UaResult<Option<KeySet>> {
        if self.policy == SecurityPolicy::None {
            return Ok(None);
        }
        KeySet::derive(self.role, client_nonce, server_nonce).map(Some)
    }

    fn install(&mut self, token: SecurityToken) {
        match &mut self.tokens {
            Some(tokens) => {
                tokens.renew(token);
                self.stats.token_renewals += 1;
            }
            None => self.tokens = Some(TokenSet::new(token)),
        }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    fn next_send_sequence(&mut self) -> u32 {
        self.send_sequence = if self.send_sequence > SEQUENCE_WRAP_AT {
            1
        } else {
            self.send_sequence + 1
        };
        self.send_sequence
    }

    fn overhead(&self, message_type: MessageType) -> usize {
        match message_type {
            MessageType::OpenChannel => {
                SECURE_HEADER_LEN
                    + 4
                    + self.policy.uri().len()
                    + 8
                    + SEQUENCE_HEADER_LEN
            }
            _ => {
                let mut overhead = SYMMETRIC_PREFIX_LEN;
                if self.mode.is_signed() {
                    overhead += SIGNATURE_LEN;
                }
                if self.mode.is_encrypted() {
                    overhead += TAG_LEN;
                }
                overhead
            }
        }
    }

    /// Bytes a body of `body_len` occupies on the wire once chunked and secured.
    pub fn encoded_len(&self, message_type: MessageType, body_len: usize) -> usize {
        let overhead = self.overhead(message_type);
        let max_body = self.limits.send_buffer_size.saturating_sub(overhead).max(1);
        let chunks = body_len.div_ceil(max_body).max(1);
        body_len + chunks * overhead
    }

    /// Secures `body` and splits it into chunks ready for the wire.
    pub fn encode(
        &mut self,
        message_type: MessageType,
        request_id: u32,
        body: Bytes,
    ) -> UaResult<Vec<Bytes>> {
        if !message_type.is_secure() {
            return Err(TransportError::encoding(format!("{message_type} is not a secure message")).into());
        }
        if message_type != MessageType::OpenChannel && self.tokens.is_none() {
            return Err(ChannelError::NotOpen.into());
        }

        let max_message = self.limits.send_max_message_size;
        if max_message > 0 && body.len() > max_message {
            return Err(self.too_large());
        }
        let max_body = self
            .limits
            .send_buffer_size
            .saturating_sub(self.overhead(message_type));
        if max_body == 0 {
            return Err(TransportError::encoding("send buffer too small").into());
        }
        let pieces = split_body(body, max_body);
        let max_chunks = self.limits.send_max_chunk_count;
        if max_chunks > 0 && pieces.len() > max_chunks {
            return Err(self.too_large());
        }

        let last = pieces.len() - 1;
        let mut chunks = Vec::with_capacity(pieces.len());
        for (index, piece) in pieces.into_iter().enumerate() {
            let chunk_type = if index == last {
                ChunkType::Final
            } else {
                ChunkType::Intermediate
            };
            let chunk = if message_type == MessageType::OpenChannel {
                self.encode_open_chunk(chunk_type, request_id, &piece)
            } else {
                self.encode_symmetric_chunk(message_type, chunk_type, request_id, &piece)?
            };
            self.stats.bytes_sent += chunk.len() as u64;
            self.stats.chunks_sent += 1;
            chunks.push(chunk);
        }
        trace!(
            channel_id = self.channel_id,
            %message_type,
            request_id,
            chunks = chunks.len(),
            "Encoded message"
        );
        Ok(chunks)
    }

    fn too_large(&self) -> UaError {
        let status = match self.role {
            Role::Client => StatusCode::BadRequestTooLarge,
            Role::Server => StatusCode::BadResponseTooLarge,
        };
        ServiceError::fault("encode", status).into()
    }

    fn encode_open_chunk(&mut self, chunk_type: ChunkType, request_id: u32, piece: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.overhead(MessageType::OpenChannel) + piece.len());
        ChunkHeader {
            message_type: MessageType::OpenChannel,
            chunk_type,
            message_size: 0,
            secure_channel_id: Some(self.channel_id),
        }
        .encode(&mut buf);
        self.policy.uri().encode(&mut buf);
        // sender certificate and receiver thumbprint: null
        buf.put_i32_le(-1);
        buf.put_i32_le(-1);
        let sequence_number = self.next_send_sequence();
        buf.put_u32_le(sequence_number);
        buf.put_u32_le(request_id);
        buf.put_slice(piece);
        patch_size(&mut buf);
        buf.freeze()
    }

    fn encode_symmetric_chunk(
        &mut self,
        message_type: MessageType,
        chunk_type: ChunkType,
        request_id: u32,
        piece: &[u8],
    ) -> UaResult<Bytes> {
        let (token_id, keys) = match &self.tokens {
            Some(tokens) => (tokens.current().token_id, tokens.current().keys().cloned()),
            None => return Err(ChannelError::NotOpen.into()),
        };
        let sequence_number = self.next_send_sequence();
        let signed = self.mode.is_signed();
        let encrypted = self.mode.is_encrypted();

        let mut payload = piece.to_vec();
        let size = SYMMETRIC_PREFIX_LEN
            + payload.len()
            + if encrypted { TAG_LEN } else { 0 }
            + if signed { SIGNATURE_LEN } else { 0 };

        let mut buf = BytesMut::with_capacity(size);
        ChunkHeader {
            message_type,
            chunk_type,
            message_size: size as u32,
            secure_channel_id: Some(self.channel_id),
        }
        .encode(&mut buf);
        buf.put_u32_le(token_id);
        buf.put_u32_le(sequence_number);
        buf.put_u32_le(request_id);

        match (&keys, signed) {
            (Some(keys), true) => {
                if encrypted {
                    keys.local.encrypt(sequence_number, &buf, &mut payload)?;
                }
                buf.put_slice(&payload);
                let signature = keys.local.sign(&buf)?;
                buf.put_slice(&signature);
            }
            (None, true) => {
                return Err(ChannelError::security_checks_failed("token has no keys").into())
            }
            (_, false) => buf.put_slice(&payload),
        }
        Ok(buf.freeze())
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    fn check_sequence(&mut self, sequence_number: u32) -> UaResult<()> {
        if let Some(last) = self.receive_sequence {
            let expected = if last > SEQUENCE_WRAP_AT { 1 } else { last + 1 };
            let wrapped = last > SEQUENCE_WRAP_AT && sequence_number < SEQUENCE_WRAP_LIMIT;
            if sequence_number != expected && !wrapped {
                return Err(ChannelError::SequenceNumberInvalid {
                    expected,
                    actual: sequence_number,
                }
                .into());
            }
        }
        self.receive_sequence = Some(sequence_number);
        Ok(())
    }

    fn check_channel_id(&self, actual: u32, message_type: MessageType) -> UaResult<()> {
        let unassigned = match self.role {
            Role::Client => self.channel_id == 0,
            Role::Server => actual == 0 && self.tokens.is_none(),
        };
        if unassigned && message_type == MessageType::OpenChannel {
            return Ok(());
        }
        if actual != self.channel_id {
            return Err(ChannelError::ChannelIdInvalid {
                expected: self.channel_id,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Verifies one chunk and feeds it to reassembly.
    pub fn decode(&mut self, chunk: Bytes) -> UaResult<Option<Inbound>> {
        let wire_len = chunk.len();
        self.stats.bytes_received += wire_len as u64;
        self.stats.chunks_received += 1;

        let mut buf = chunk.clone();
        let header = ChunkHeader::decode(&mut buf)?;
        if header.message_size as usize != wire_len {
            return Err(TransportError::malformed("chunk size does not match header").into());
        }
        let channel_id = header
            .secure_channel_id
            .ok_or_else(|| TransportError::malformed("chunk without secure channel id"))?;
        self.check_channel_id(channel_id, header.message_type)?;

        let (request_id, body, policy_uri) = if header.message_type == MessageType::OpenChannel {
            let policy_uri = String::decode(&mut buf)?;
            let _certificate = Vec::<u8>::decode(&mut buf)?;
            let _thumbprint = Vec::<u8>::decode(&mut buf)?;
            let sequence_number = u32::decode(&mut buf)?;
            let request_id = u32::decode(&mut buf)?;
            self.check_sequence(sequence_number)?;
            (request_id, buf, Some(policy_uri))
        } else {
            let (request_id, body) = self.open_symmetric_chunk(&chunk)?;
            (request_id, body, None)
        };

        let size = self.inbound_sizes.entry(request_id).or_insert(0);
        *size += wire_len;

        match self.assembler.push(request_id, header.chunk_type, body)? {
            Assembled::Incomplete => Ok(None),
            Assembled::Aborted { status, reason } => {
                self.inbound_sizes.remove(&request_id);
                Ok(Some(Inbound::Aborted {
                    request_id,
                    status,
                    reason,
                }))
            }
            Assembled::Complete(body) => {
                let wire_size = self.inbound_sizes.remove(&request_id).unwrap_or(wire_len);
                Ok(Some(Inbound::Message(ReceivedMessage {
                    message_type: header.message_type,
                    request_id,
                    body,
                    policy_uri,
                    wire_size,
                })))
            }
        }
    }

    fn open_symmetric_chunk(&mut self, chunk: &Bytes) -> UaResult<(u32, Bytes)> {
        if chunk.len() < SYMMETRIC_PREFIX_LEN {
            return Err(TransportError::malformed("chunk shorter than its headers").into());
        }
        let mut cursor = chunk.slice(SECURE_HEADER_LEN..);
        let token_id = cursor.get_u32_le();

        let tokens = self
            .tokens
            .as_mut()
            .ok_or(ChannelError::TokenUnknown { token_id })?;
        let keys = tokens.find(token_id)?.keys().cloned();
        let signed = self.mode.is_signed();
        let encrypted = self.mode.is_encrypted();

        let mut signed_end = chunk.len();
        if signed {
            let keys = keys
                .as_ref()
                .ok_or_else(|| ChannelError::security_checks_failed("token has no keys"))?;
            if chunk.len() < SYMMETRIC_PREFIX_LEN + SIGNATURE_LEN {
                return Err(ChannelError::security_checks_failed("chunk too short for signature").into());
            }
            signed_end = chunk.len() - SIGNATURE_LEN;
            keys.remote
                .verify(&chunk[..signed_end], &chunk[signed_end..])?;
        }

        let sequence_number = cursor.get_u32_le();
        let request_id = cursor.get_u32_le();
        self.check_sequence(sequence_number)?;

        let payload = &chunk[SYMMETRIC_PREFIX_LEN..signed_end];
        let body = match (&keys, encrypted) {
            (Some(keys), true) => {
                let mut plain = payload.to_vec();
                keys.remote.decrypt(
                    sequence_number,
                    &chunk[..SYMMETRIC_PREFIX_LEN],
                    &mut plain,
                )?;
                Bytes::from(plain)
            }
            _ => chunk.slice(SYMMETRIC_PREFIX_LEN..signed_end),
        };
        Ok((request_id, body))
    }
}

fn patch_size(buf: &mut BytesMut) {
    let size = (buf.len() as u32).to_le_bytes();
    buf[4..8].copy_from_slice(&size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportLimits;
    use crate::messages::{
        Request, RequestHeader, Response, ReadRequest, ReadValueId,
    };
    use crate::transport::hello::{HelloMessage, PROTOCOL_VERSION};
    use crate::types::NodeId;

    fn limits() -> ConnectionLimits {
        let local = TransportLimits::default();
        let hello = HelloMessage::new(PROTOCOL_VERSION, &local, "opc.tcp://localhost:4840");
        ConnectionLimits::negotiate_server(&local, 0, &hello).unwrap().0
    }

    fn open_policy(policy: SecurityPolicy, mode: SecurityMode) -> OpenPolicy {
        OpenPolicy {
            offered: vec![EndpointSecurity::default(), EndpointSecurity::new(policy, mode)],
            versions: ProtocolVersionRange::default(),
            limits: ChannelLimits::default(),
        }
    }

    fn expect_message(inbound: Option<Inbound>) -> ReceivedMessage {
        match inbound {
            Some(Inbound::Message(message)) => message,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    /// Runs the OPN exchange between a fresh client and server channel.
    fn open_pair(policy: SecurityPolicy, mode: SecurityMode) -> (SecureChannel, SecureChannel) {
        let mut client = SecureChannel::client(policy, mode, limits());
        let mut server = SecureChannel::server(42, limits());
        let open = client.begin_open(SecurityTokenRequestType::Issue, 0, Duration::from_secs(60));
        let request = Request::new(RequestHeader::default(), open);
        let chunks = client
            .encode(MessageType::OpenChannel, 1, request.encode())
            .unwrap();
        let received = expect_message(server.decode(chunks[0].clone()).unwrap());

        let crate::messages::RequestBody::OpenSecureChannel(open) = Request::decode(received.body).unwrap().body else {
            panic!("expected an open request");
        };
        let response = server
            .accept_open(
                received.policy_uri.as_deref().unwrap_or_default(),
                &open,
                &open_policy(policy, mode),
            )
            .unwrap();
        client.complete_open(&response).unwrap();
        (client, server)
    }

    fn read_request() -> Bytes {
        Request::new(
            RequestHeader::new(NodeId::numeric(1, 9), 5),
            ReadRequest {
                nodes_to_read: vec![ReadValueId::value(NodeId::string(2, "Line1.Temperature"))],
                ..Default::default()
            },
        )
        .encode()
    }

    #[test]
    fn test_message_exchange_in_every_mode() {
        for (policy, mode) in [
            (SecurityPolicy::None, SecurityMode::None),
            (SecurityPolicy::Basic256Sha256, SecurityMode::Sign),
            (SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt),
        ] {
            let (mut client, mut server) = open_pair(policy, mode);
            assert_eq!(client.channel_id(), 42);

            let body = read_request();
            let chunks = client.encode(MessageType::Message, 2, body.clone()).unwrap();
            let received = expect_message(server.decode(chunks[0].clone()).unwrap());
            assert_eq!(received.body, body);
            assert_eq!(received.request_id, 2);

            let response = Response::fault(5, StatusCode::BadNothingToDo).encode();
            let chunks = server.encode(MessageType::Message, 2, response.clone()).unwrap();
            let received = expect_message(client.decode(chunks[0].clone()).unwrap());
            assert_eq!(received.body, response);
        }
    }

    #[test]
    fn test_encrypted_payload_is_not_plaintext() {
        let (mut client, _) = open_pair(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt);
        let chunks = client.encode(MessageType::Message, 2, read_request()).unwrap();
        let needle = b"Line1.Temperature";
        assert!(!chunks[0].windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_tampered_chunk_is_fatal() {
        let (mut client, mut server) = open_pair(SecurityPolicy::Basic256Sha256, SecurityMode::Sign);
        let chunk = client.encode(MessageType::Message, 2, read_request()).unwrap()[0].clone();
        let mut tampered = chunk.to_vec();
        tampered[30] ^= 0xFF;
        let error = server.decode(Bytes::from(tampered)).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSecurityChecksFailed);
        assert!(error.is_fatal());
    }

    #[test]
    fn test_replayed_sequence_is_fatal() {
        let (mut client, mut server) = open_pair(SecurityPolicy::None, SecurityMode::None);
        let chunk = client.encode(MessageType::Message, 2, read_request()).unwrap()[0].clone();
        server.decode(chunk.clone()).unwrap();
        let error = server.decode(chunk).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSequenceNumberInvalid);
    }

    #[test]
    fn test_wrong_channel_id_is_fatal() {
        let (mut client, _) = open_pair(SecurityPolicy::None, SecurityMode::None);
        let mut other = SecureChannel::server(7, limits());
        let chunk = client.encode(MessageType::Message, 2, read_request()).unwrap()[0].clone();
        let error = other.decode(chunk).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadTcpSecureChannelUnknown);
    }

    #[test]
    fn test_large_message_is_chunked() {
        let (mut client, mut server) = open_pair(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt);
        let body = Bytes::from(vec![0xA5u8; 200_000]);
        let chunks = client.encode(MessageType::Message, 3, body.clone()).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= client.limits().send_buffer_size));

        let mut result = None;
        for chunk in chunks {
            result = server.decode(chunk).unwrap();
        }
        assert_eq!(expect_message(result).body, body);
    }

    #[test]
    fn test_old_token_decodes_after_renewal() {
        let (mut client, mut server) = open_pair(SecurityPolicy::Basic256Sha256, SecurityMode::Sign);
        let in_flight = client.encode(MessageType::Message, 2, read_request()).unwrap()[0].clone();

        let renew = client.begin_open(SecurityTokenRequestType::Renew, 0, Duration::from_secs(60));
        let response = server
            .accept_open(
                SecurityPolicy::Basic256Sha256.uri(),
                &renew,
                &open_policy(SecurityPolicy::Basic256Sha256, SecurityMode::Sign),
            )
            .unwrap();
        assert_eq!(response.security_token.token_id, 2);
        client.complete_open(&response).unwrap();

        assert!(server.decode(in_flight).is_ok());
        let fresh = client.encode(MessageType::Message, 3, read_request()).unwrap()[0].clone();
        assert!(server.decode(fresh).is_ok());
        assert_eq!(server.stats().token_renewals, 1);
    }

    #[test]
    fn test_unoffered_policy_and_mode_rejected() {
        let mut server = SecureChannel::server(1, limits());
        let request = OpenSecureChannelRequest {
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: SecurityMode::SignAndEncrypt,
            client_nonce: generate_nonce(32),
            requested_lifetime: 60_000,
        };
        let only_none = OpenPolicy {
            offered: vec![EndpointSecurity::default()],
            versions: ProtocolVersionRange::default(),
            limits: ChannelLimits::default(),
        };
        let error = server
            .accept_open(SecurityPolicy::Basic256Sha256.uri(), &request, &only_none)
            .unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSecurityPolicyRejected);

        let sign_only = open_policy(SecurityPolicy::Basic256Sha256, SecurityMode::Sign);
        let error = server
            .accept_open(SecurityPolicy::Basic256Sha256.uri(), &request, &sign_only)
            .unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadSecurityModeRejected);
        assert!(!server.is_open());
    }

    #[test]
    fn test_sequence_wraps() {
        let mut channel = SecureChannel::server(1, limits());
        channel.receive_sequence = Some(SEQUENCE_WRAP_AT + 5);
        assert!(channel.check_sequence(3).is_ok());
        assert!(channel.check_sequence(4).is_ok());
        assert!(channel.check_sequence(6).is_err());

        channel.send_sequence = SEQUENCE_WRAP_AT + 1;
        assert_eq!(channel.next_send_sequence(), 1);
    }
}
