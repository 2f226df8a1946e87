// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OpenSecureChannel and CloseSecureChannel.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::encode_byte_string;
use crate::encoding::{BinaryDecode, BinaryEncode};
use crate::error::{UaError, UaResult};
use crate::types::SecurityMode;

/// Whether a token is issued for a new channel or renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityTokenRequestType {
    /// First token of a channel.
    Issue,
    /// Replacement token for an open channel.
    Renew,
}

impl BinaryEncode for SecurityTokenRequestType {
    fn encode(&self, buf: &mut BytesMut) {
        let value: u32 = match self {
            Self::Issue => 0,
            Self::Renew => 1,
        };
        value.encode(buf);
    }
}

impl BinaryDecode for SecurityTokenRequestType {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        match u32::decode(buf)? {
            0 => Ok(Self::Issue),
            1 => Ok(Self::Renew),
            other => Err(UaError::decoding(format!("invalid token request type {other}"))),
        }
    }
}

impl BinaryEncode for SecurityMode {
    fn encode(&self, buf: &mut BytesMut) {
        self.value().encode(buf);
    }
}

impl BinaryDecode for SecurityMode {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let value = u32::decode(buf)?;
        SecurityMode::from_value(value)
            .ok_or_else(|| UaError::decoding(format!("invalid security mode {value}")))
    }
}

/// Request to issue or renew a channel token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSecureChannelRequest {
    /// Client protocol version.
    pub client_protocol_version: u32,
    /// Issue or renew.
    pub request_type: SecurityTokenRequestType,
    /// Requested security mode.
    pub security_mode: SecurityMode,
    /// Client nonce used for key derivation.
    pub client_nonce: Vec<u8>,
    /// Requested token lifetime in milliseconds.
    pub requested_lifetime: u32,
}

impl BinaryEncode for OpenSecureChannelRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.client_protocol_version.encode(buf);
        self.request_type.encode(buf);
        self.security_mode.encode(buf);
        encode_byte_string(&self.client_nonce, buf);
        self.requested_lifetime.encode(buf);
    }
}

impl BinaryDecode for OpenSecureChannelRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            client_protocol_version: u32::decode(buf)?,
            request_type: SecurityTokenRequestType::decode(buf)?,
            security_mode: SecurityMode::decode(buf)?,
            client_nonce: Vec::<u8>::decode(buf)?,
            requested_lifetime: u32::decode(buf)?,
        })
    }
}

/// Token description returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSecurityToken {
    /// Channel the token belongs to.
    pub channel_id: u32,
    /// Token id.
    pub token_id: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Revised lifetime in milliseconds.
    pub revised_lifetime: u32,
}

impl BinaryEncode for ChannelSecurityToken {
    fn encode(&self, buf: &mut BytesMut) {
        self.channel_id.encode(buf);
        self.token_id.encode(buf);
        self.created_at.encode(buf);
        self.revised_lifetime.encode(buf);
    }
}

impl BinaryDecode for ChannelSecurityToken {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            channel_id: u32::decode(buf)?,
            token_id: u32::decode(buf)?,
            created_at: DateTime::<Utc>::decode(buf)?,
            revised_lifetime: u32::decode(buf)?,
        })
    }
}

/// Issued token and server nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSecureChannelResponse {
    /// Version the server speaks.
    pub server_protocol_version: u32,
    /// The issued token.
    pub security_token: ChannelSecurityToken,
    /// Server nonce used for key derivation.
    pub server_nonce: Vec<u8>,
}

impl BinaryEncode for OpenSecureChannelResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.server_protocol_version.encode(buf);
        self.security_token.encode(buf);
        encode_byte_string(&self.server_nonce, buf);
    }
}

impl BinaryDecode for OpenSecureChannelResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            server_protocol_version: u32::decode(buf)?,
            security_token: ChannelSecurityToken::decode(buf)?,
            server_nonce: Vec::<u8>::decode(buf)?,
        })
    }
}

/// Request to close the channel; no response is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseSecureChannelRequest;

impl BinaryEncode for CloseSecureChannelRequest {
    fn encode(&self, _buf: &mut BytesMut) {}
}

impl BinaryDecode for CloseSecureChannelRequest {
    fn decode(_buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self)
    }
}

/// Response to CloseSecureChannel; never sent by this server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseSecureChannelResponse;

impl BinaryEncode for CloseSecureChannelResponse {
    fn encode(&self, _buf: &mut BytesMut) {}
}

impl BinaryDecode for CloseSecureChannelResponse {
    fn decode(_buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self)
    }
}
