// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CreateSession, ActivateSession and CloseSession.

use bytes::{Bytes, BytesMut};

use super::{decode_extension, encode_byte_string, encode_extension, encode_no_diagnostics, skip_diagnostics};
use crate::encoding::{BinaryDecode, BinaryEncode};
use crate::error::UaResult;
use crate::session::IdentityToken;
use crate::status::StatusCode;
use crate::types::NodeId;

const ANONYMOUS_IDENTITY_TOKEN: u32 = 321;
const USER_NAME_IDENTITY_TOKEN: u32 = 324;

/// Request to create a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSessionRequest {
    /// Client application name.
    pub client_application_name: String,
    /// Endpoint the client connected to.
    pub endpoint_url: String,
    /// Prefix for the server-assigned session name.
    pub session_name: Option<String>,
    /// Client nonce.
    pub client_nonce: Vec<u8>,
    /// Requested session timeout in milliseconds.
    pub requested_session_timeout: f64,
    /// Largest response the client accepts (0 = unlimited).
    pub max_response_message_size: u32,
}

impl BinaryEncode for CreateSessionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.client_application_name.encode(buf);
        self.endpoint_url.encode(buf);
        self.session_name.encode(buf);
        encode_byte_string(&self.client_nonce, buf);
        self.requested_session_timeout.encode(buf);
        self.max_response_message_size.encode(buf);
    }
}

impl BinaryDecode for CreateSessionRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            client_application_name: String::decode(buf)?,
            endpoint_url: String::decode(buf)?,
            session_name: Option::<String>::decode(buf)?,
            client_nonce: Vec::<u8>::decode(buf)?,
            requested_session_timeout: f64::decode(buf)?,
            max_response_message_size: u32::decode(buf)?,
        })
    }
}

/// Created session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSessionResponse {
    /// Public session id.
    pub session_id: NodeId,
    /// Secret token the client puts in every request header.
    pub authentication_token: NodeId,
    /// Revised session timeout in milliseconds.
    pub revised_session_timeout: f64,
    /// Server nonce.
    pub server_nonce: Vec<u8>,
    /// Name the server assigned to the session.
    pub session_name: String,
    /// Largest request the server accepts (0 = unlimited).
    pub max_request_message_size: u32,
}

impl BinaryEncode for CreateSessionResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.session_id.encode(buf);
        self.authentication_token.encode(buf);
        self.revised_session_timeout.encode(buf);
        encode_byte_string(&self.server_nonce, buf);
        self.session_name.encode(buf);
        self.max_request_message_size.encode(buf);
    }
}

impl BinaryDecode for CreateSessionResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            session_id: NodeId::decode(buf)?,
            authentication_token: NodeId::decode(buf)?,
            revised_session_timeout: f64::decode(buf)?,
            server_nonce: Vec::<u8>::decode(buf)?,
            session_name: String::decode(buf)?,
            max_request_message_size: u32::decode(buf)?,
        })
    }
}

struct EmptyBody;

impl BinaryEncode for EmptyBody {
    fn encode(&self, _buf: &mut BytesMut) {}
}

struct AnonymousBody<'a> {
    policy_id: &'a str,
}

impl BinaryEncode for AnonymousBody<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        self.policy_id.encode(buf);
    }
}

struct UserNameBody<'a> {
    policy_id: &'a str,
    user_name: &'a str,
    password: &'a str,
}

impl BinaryEncode for UserNameBody<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        self.policy_id.encode(buf);
        self.user_name.encode(buf);
        encode_byte_string(self.password.as_bytes(), buf);
        // encryption algorithm: null
        Option::<String>::None.encode(buf);
    }
}

impl BinaryEncode for IdentityToken {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Anonymous => encode_extension(
                ANONYMOUS_IDENTITY_TOKEN,
                &AnonymousBody {
                    policy_id: "anonymous",
                },
                buf,
            ),
            Self::UserName {
                user_name,
                password,
            } => encode_extension(
                USER_NAME_IDENTITY_TOKEN,
                &UserNameBody {
                    policy_id: "username",
                    user_name,
                    password,
                },
                buf,
            ),
            Self::Unsupported { type_id } => encode_extension(*type_id, &EmptyBody, buf),
        }
    }
}

impl BinaryDecode for IdentityToken {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let Some((type_id, mut body)) = decode_extension(buf)? else {
            return Ok(Self::Anonymous);
        };
        match type_id {
            ANONYMOUS_IDENTITY_TOKEN => Ok(Self::Anonymous),
            USER_NAME_IDENTITY_TOKEN => {
                let _policy_id = String::decode(&mut body)?;
                let user_name = String::decode(&mut body)?;
                let password = Vec::<u8>::decode(&mut body)?;
                Ok(Self::UserName {
                    user_name,
                    password: String::from_utf8_lossy(&password).into_owned(),
                })
            }
            other => Ok(Self::Unsupported { type_id: other }),
        }
    }
}

/// Request to activate a session with an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivateSessionRequest {
    /// Preferred locales.
    pub locale_ids: Vec<String>,
    /// User identity.
    pub user_identity_token: IdentityToken,
}

impl BinaryEncode for ActivateSessionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.locale_ids.encode(buf);
        self.user_identity_token.encode(buf);
    }
}

impl BinaryDecode for ActivateSessionRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            locale_ids: Vec::<String>::decode(buf)?,
            user_identity_token: IdentityToken::decode(buf)?,
        })
    }
}

/// Result of activation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivateSessionResponse {
    /// Fresh server nonce.
    pub server_nonce: Vec<u8>,
    /// Per software certificate results; always empty.
    pub results: Vec<StatusCode>,
}

impl BinaryEncode for ActivateSessionResponse {
    fn encode(&self, buf: &mut BytesMut) {
        encode_byte_string(&self.server_nonce, buf);
        self.results.encode(buf);
        encode_no_diagnostics(buf);
    }
}

impl BinaryDecode for ActivateSessionResponse {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let response = Self {
            server_nonce: Vec::<u8>::decode(buf)?,
            results: Vec::<StatusCode>::decode(buf)?,
        };
        skip_diagnostics(buf)?;
        Ok(response)
    }
}

/// Request to close the session named by the header token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseSessionRequest {
    /// Delete the session's subscriptions.
    pub delete_subscriptions: bool,
}

impl BinaryEncode for CloseSessionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.delete_subscriptions.encode(buf);
    }
}

impl BinaryDecode for CloseSessionRequest {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            delete_subscriptions: bool::decode(buf)?,
        })
    }
}

/// Response to CloseSession.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseSessionResponse;

impl BinaryEncode for CloseSessionResponse {
    fn encode(&self, _buf: &mut BytesMut) {}
}

impl BinaryDecode for CloseSessionResponse {
    fn decode(_buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_to_bytes;

    #[test]
    fn test_user_name_token_keeps_empty_user() {
        let token = IdentityToken::UserName {
            user_name: String::new(),
            password: "secret".into(),
        };
        let mut bytes = encode_to_bytes(&token);
        assert_eq!(IdentityToken::decode(&mut bytes).unwrap(), token);
    }

    #[test]
    fn test_null_identity_is_anonymous() {
        let mut buf = BytesMut::new();
        super::super::encode_null_extension(&mut buf);
        assert_eq!(
            IdentityToken::decode(&mut buf.freeze()).unwrap(),
            IdentityToken::Anonymous
        );
    }

    #[test]
    fn test_unknown_identity_type() {
        let mut bytes = encode_to_bytes(&IdentityToken::Unsupported { type_id: 327 });
        assert_eq!(
            IdentityToken::decode(&mut bytes).unwrap(),
            IdentityToken::Unsupported { type_id: 327 }
        );
    }
}
