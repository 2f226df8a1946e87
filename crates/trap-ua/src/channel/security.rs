// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Symmetric key derivation, chunk signing and payload encryption.
//!
//! Keys are derived per token with P_SHA256 from both nonces. Each
//! direction has its own signing key, encryption key and IV; the GCM nonce
//! is the IV with the chunk sequence number folded into its first four
//! bytes.

use std::time::{Duration, Instant};

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{ChannelError, UaError, UaResult};
use crate::messages::ChannelSecurityToken;
use crate::types::SecurityPolicy;

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 signature.
pub const SIGNATURE_LEN: usize = 32;
/// Length of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;

/// Which end of the channel this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates connections.
    Client,
    /// Accepts connections.
    Server,
}

fn mac(key: &[u8]) -> UaResult<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| ChannelError::security_checks_failed(e.to_string()).into())
}

/// P_SHA256 pseudo-random function.
pub fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> UaResult<Vec<u8>> {
    let mut output = Vec::with_capacity(length + SIGNATURE_LEN);
    let mut a = {
        let mut m = mac(secret)?;
        m.update(seed);
        m.finalize().into_bytes()
    };
    while output.len() < length {
        let mut m = mac(secret)?;
        m.update(&a);
        m.update(seed);
        output.extend_from_slice(&m.finalize().into_bytes());

        let mut m = mac(secret)?;
        m.update(&a);
        a = m.finalize().into_bytes();
    }
    output.truncate(length);
    Ok(output)
}

/// Generates a random nonce of `length` bytes.
pub fn generate_nonce(length: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

// =============================================================================
// SymmetricKeys
// =============================================================================

/// Keys securing one direction of a channel.
#[derive(Clone)]
pub struct SymmetricKeys {
    signing_key: [u8; KEY_LEN],
    encryption_key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl std::fmt::Debug for SymmetricKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKeys").finish_non_exhaustive()
    }
}

impl SymmetricKeys {
    fn derive(secret: &[u8], seed: &[u8]) -> UaResult<Self> {
        let material = p_sha256(secret, seed, KEY_LEN * 2 + IV_LEN)?;
        let mut keys = Self {
            signing_key: [0; KEY_LEN],
            encryption_key: [0; KEY_LEN],
            iv: [0; IV_LEN],
        };
        keys.signing_key.copy_from_slice(&material[..KEY_LEN]);
        keys.encryption_key
            .copy_from_slice(&material[KEY_LEN..KEY_LEN * 2]);
        keys.iv.copy_from_slice(&material[KEY_LEN * 2..]);
        Ok(keys)
    }

    /// Signs `data`.
    pub fn sign(&self, data: &[u8]) -> UaResult<[u8; SIGNATURE_LEN]> {
        let mut m = mac(&self.signing_key)?;
        m.update(data);
        Ok(m.finalize().into_bytes().into())
    }

    /// Verifies a signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> UaResult<()> {
        let mut m = mac(&self.signing_key)?;
        m.update(data);
        m.verify_slice(signature)
            .map_err(|_| ChannelError::security_checks_failed("signature mismatch").into())
    }

    fn nonce(&self, sequence_number: u32) -> [u8; IV_LEN] {
        let mut nonce = self.iv;
        for (byte, seq) in nonce.iter_mut().zip(sequence_number.to_le_bytes()) {
            *byte ^= seq;
        }
        nonce
    }

    fn cipher(&self) -> UaResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| ChannelError::security_checks_failed(e.to_string()).into())
    }

    /// Encrypts `payload` in place and appends the tag.
    pub fn encrypt(&self, sequence_number: u32, aad: &[u8], payload: &mut Vec<u8>) -> UaResult<()> {
        let nonce = self.nonce(sequence_number);
        self.cipher()?
            .encrypt_in_place(Nonce::from_slice(&nonce), aad, payload)
            .map_err(|_| ChannelError::security_checks_failed("encryption failed").into())
    }

    /// Decrypts `payload` in place and strips the tag.
    pub fn decrypt(&self, sequence_number: u32, aad: &[u8], payload: &mut Vec<u8>) -> UaResult<()> {
        let nonce = self.nonce(sequence_number);
        self.cipher()?
            .decrypt_in_place(Nonce::from_slice(&nonce), aad, payload)
            .map_err(|_| ChannelError::security_checks_failed("decryption failed").into())
    }
}

/// Keys for both directions of a channel.
#[derive(Debug, Clone)]
pub struct KeySet {
    /// Keys securing what this side sends.
    pub local: SymmetricKeys,
    /// Keys verifying what this side receives.
    pub remote: SymmetricKeys,
}

impl KeySet {
    /// Derives the key set for `role` from both nonces.
    pub fn derive(role: Role, client_nonce: &[u8], server_nonce: &[u8]) -> UaResult<Self> {
        let client_keys = SymmetricKeys::derive(server_nonce, client_nonce)?;
        let server_keys = SymmetricKeys::derive(client_nonce, server_nonce)?;
        Ok(match role {
            Role::Client => Self {
                local: client_keys,
                remote: server_keys,
            },
            Role::Server => Self {
                local: server_keys,
                remote: client_keys,
            },
        })
    }
}

/// Checks a nonce received from the peer.
pub fn check_nonce(policy: SecurityPolicy, nonce: &[u8]) -> UaResult<()> {
    let expected = policy.nonce_length();
    if expected > 0 && nonce.len() != expected {
        return Err(ChannelError::security_checks_failed(format!(
            "nonce of {} bytes, expected {expected}",
            nonce.len()
        ))
        .into());
    }
    Ok(())
}

// =============================================================================
// Tokens
// =============================================================================

/// A symmetric token and the keys derived for it.
#[derive(Debug, Clone)]
pub struct SecurityToken {
    /// Channel id.
    pub channel_id: u32,
    /// Token id.
    pub token_id: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Revised lifetime.
    pub lifetime: Duration,
    issued: Instant,
    keys: Option<KeySet>,
}

impl SecurityToken {
    /// Creates a token; `keys` is `None` for unsecured channels.
    pub fn new(channel_id: u32, token_id: u32, lifetime: Duration, keys: Option<KeySet>) -> Self {
        Self {
            channel_id,
            token_id,
            created_at: Utc::now(),
            lifetime,
            issued: Instant::now(),
            keys,
        }
    }

    /// Creates a token from the description received in an open response.
    pub fn from_wire(token: &ChannelSecurityToken, keys: Option<KeySet>) -> Self {
        Self {
            channel_id: token.channel_id,
            token_id: token.token_id,
            created_at: token.created_at,
            lifetime: Duration::from_millis(u64::from(token.revised_lifetime)),
            issued: Instant::now(),
            keys,
        }
    }

    /// Describes the token for an open response.
    pub fn to_wire(&self) -> ChannelSecurityToken {
        ChannelSecurityToken {
            channel_id: self.channel_id,
            token_id: self.token_id,
            created_at: self.created_at,
            revised_lifetime: u32::try_from(self.lifetime.as_millis()).unwrap_or(u32::MAX),
        }
    }

    /// Keys of this token.
    pub fn keys(&self) -> Option<&KeySet> {
        self.keys.as_ref()
    }

    /// Time after which the token is replaced by its successor.
    pub fn lifetime_end(&self) -> Instant {
        self.issued + self.lifetime
    }

    /// Time after which the token is rejected even without a successor.
    pub fn hard_expiry(&self) -> Instant {
        self.issued + self.lifetime + self.lifetime / 4
    }

    /// When a client should request a new token.
    pub fn renew_at(&self, fraction: f64) -> Instant {
        self.issued + self.lifetime.mul_f64(fraction.clamp(0.0, 1.0))
    }
}

/// The current token plus its predecessor during renewal.
#[derive(Debug, Clone)]
pub struct TokenSet {
    current: SecurityToken,
    previous: Option<SecurityToken>,
}

impl TokenSet {
    /// Starts with the first issued token.
    pub fn new(token: SecurityToken) -> Self {
        Self {
            current: token,
            previous: None,
        }
    }

    /// Token used for sending.
    pub fn current(&self) -> &SecurityToken {
        &self.current
    }

    /// Token being phased out, if any.
    pub fn previous(&self) -> Option<&SecurityToken> {
        self.previous.as_ref()
    }

    /// Makes `token` current; the old token stays valid until its lifetime ends.
    pub fn renew(&mut self, token: SecurityToken) {
        let old = std::mem::replace(&mut self.current, token);
        self.previous = Some(old);
    }

    /// Finds the token for an inbound chunk.
    pub fn find(&mut self, token_id: u32) -> UaResult<&SecurityToken> {
        let now = Instant::now();
        if self
            .previous
            .as_ref()
            .is_some_and(|previous| now >= previous.lifetime_end())
        {
            self.previous = None;
        }

        if self.current.token_id == token_id {
            if now >= self.current.hard_expiry() {
                return Err(ChannelError::TokenUnknown { token_id }.into());
            }
            return Ok(&self.current);
        }
        match &self.previous {
            Some(previous) if previous.token_id == token_id => Ok(previous),
            _ => Err(UaError::from(ChannelError::TokenUnknown { token_id })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_sha256_length_and_determinism() {
        let a = p_sha256(b"secret", b"seed", 76).unwrap();
        let b = p_sha256(b"secret", b"seed", 76).unwrap();
        assert_eq!(a.len(), 76);
        assert_eq!(a, b);
        assert_ne!(a, p_sha256(b"secret", b"other", 76).unwrap());
    }

    #[test]
    fn test_client_and_server_keys_mirror() {
        let client_nonce = generate_nonce(32);
        let server_nonce = generate_nonce(32);
        let client = KeySet::derive(Role::Client, &client_nonce, &server_nonce).unwrap();
        let server = KeySet::derive(Role::Server, &client_nonce, &server_nonce).unwrap();

        let signature = client.local.sign(b"payload").unwrap();
        assert!(server.remote.verify(b"payload", &signature).is_ok());
        assert!(server.remote.verify(b"tampered", &signature).is_err());
        assert!(client.remote.verify(b"payload", &signature).is_err());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let client_nonce = generate_nonce(32);
        let server_nonce = generate_nonce(32);
        let server = KeySet::derive(Role::Server, &client_nonce, &server_nonce).unwrap();
        let client = KeySet::derive(Role::Client, &client_nonce, &server_nonce).unwrap();

        let mut payload = b"process value".to_vec();
        server.local.encrypt(7, b"header", &mut payload).unwrap();
        assert_eq!(payload.len(), 13 + TAG_LEN);

        let mut wrong_seq = payload.clone();
        assert!(client.remote.decrypt(8, b"header", &mut wrong_seq).is_err());

        client.remote.decrypt(7, b"header", &mut payload).unwrap();
        assert_eq!(payload, b"process value");
    }

    #[test]
    fn test_token_set_renewal() {
        let lifetime = Duration::from_secs(60);
        let mut tokens = TokenSet::new(SecurityToken::new(1, 1, lifetime, None));
        tokens.renew(SecurityToken::new(1, 2, lifetime, None));

        assert_eq!(tokens.find(2).unwrap().token_id, 2);
        assert_eq!(tokens.find(1).unwrap().token_id, 1);
        assert!(tokens.find(3).is_err());
    }

    #[test]
    fn test_previous_token_expires() {
        let mut tokens = TokenSet::new(SecurityToken::new(1, 1, Duration::ZERO, None));
        tokens.renew(SecurityToken::new(1, 2, Duration::from_secs(60), None));
        assert!(tokens.find(1).is_err());
        assert!(tokens.previous().is_none());
    }
}
