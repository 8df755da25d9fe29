// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pairing flow and signed invites.
//!
//! An invite is an Ed25519-signed envelope carrying connection details
//! plus a short-lived pairing token. `POST /pair` exchanges that token
//! for a long-lived `dt_` device token; replays and expired tokens fail,
//! and rapid failures trip a rate limit.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::storage::{DeviceToken, Storage};
use crate::transport::auth::generate_token;

pub const INVITE_VERSION: &str = "v2-signed";

/// Rapid-failure threshold before `/pair` starts returning 429.
const PAIR_FAILURE_LIMIT: usize = 6;
/// Window for counting rapid failures.
const PAIR_FAILURE_WINDOW_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Invites
// ---------------------------------------------------------------------------

/// What an invite tells the client about the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePayload {
    pub host: String,
    pub port: u16,
    /// The pairing token to redeem at `POST /pair`.
    pub token: String,
    pub name: String,
    /// TLS certificate fingerprint for pinning.
    pub fingerprint: String,
    pub security_profile: String,
}

/// The signed envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedInvite {
    pub version: String,
    pub payload: InvitePayload,
    /// Ed25519 signature over `{exp, kid, payload}`, base64.
    pub sig: String,
    pub kid: String,
    /// Expiry, epoch millis.
    pub exp: u64,
}

/// Signature validity and freshness, checked orthogonally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteVerification {
    pub signature_valid: bool,
    pub expired: bool,
}

impl InviteVerification {
    pub fn acceptable(&self) -> bool {
        self.signature_valid && !self.expired
    }
}

/// The server's invite signing key.
pub struct InviteKeyring {
    keypair: Ed25519KeyPair,
    kid: String,
}

impl InviteKeyring {
    /// Generate a fresh key; returns the keyring and the PKCS#8 document
    /// (base64) for persistence.
    pub fn generate() -> Option<(Self, String)> {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).ok()?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(pkcs8.as_ref());
        let keyring = Self::from_pkcs8_b64(&encoded)?;
        Some((keyring, encoded))
    }

    /// Restore from a persisted PKCS#8 document.
    pub fn from_pkcs8_b64(encoded: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
        let keypair = Ed25519KeyPair::from_pkcs8(&bytes).ok()?;
        let kid = key_id(keypair.public_key().as_ref());
        Some(Self { keypair, kid })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.keypair.public_key().as_ref().to_vec()
    }

    /// Sign an invite payload with the given validity window.
    pub fn create_signed_invite(
        &self,
        payload: InvitePayload,
        ttl_ms: u64,
        now_ms: u64,
    ) -> SignedInvite {
        let exp = now_ms + ttl_ms;
        let message = signing_bytes(&payload, &self.kid, exp);
        let sig = base64::engine::general_purpose::STANDARD.encode(self.keypair.sign(&message));
        SignedInvite { version: INVITE_VERSION.to_owned(), payload, sig, kid: self.kid.clone(), exp }
    }
}

/// Derive a key id from the public key bytes.
pub fn key_id(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Verify an invite against the known keys (`kid` → public key bytes).
///
/// Signature validity and expiry are independent facts: an expired invite
/// can still have a valid signature, and callers must check both.
pub fn verify_invite(
    invite: &SignedInvite,
    keys: &HashMap<String, Vec<u8>>,
    now_ms: u64,
) -> InviteVerification {
    let expired = invite.exp < now_ms;

    if invite.version != INVITE_VERSION {
        return InviteVerification { signature_valid: false, expired };
    }
    let Some(public_key) = keys.get(&invite.kid) else {
        return InviteVerification { signature_valid: false, expired };
    };
    let Ok(sig) = base64::engine::general_purpose::STANDARD.decode(&invite.sig) else {
        return InviteVerification { signature_valid: false, expired };
    };

    let message = signing_bytes(&invite.payload, &invite.kid, invite.exp);
    let signature_valid =
        UnparsedPublicKey::new(&ED25519, public_key).verify(&message, &sig).is_ok();
    InviteVerification { signature_valid, expired }
}

/// Parse an invite document, rejecting anything but `v2-signed`.
pub fn parse_invite(contents: &str) -> Option<SignedInvite> {
    let invite: SignedInvite = serde_json::from_str(contents).ok()?;
    if invite.version != INVITE_VERSION {
        return None;
    }
    Some(invite)
}

/// Canonical signed bytes: sorted-key JSON of `{exp, kid, payload}` so a
/// tampered kid or exp breaks the signature, not just the lookup.
fn signing_bytes(payload: &InvitePayload, kid: &str, exp: u64) -> Vec<u8> {
    let value = serde_json::json!({
        "exp": exp,
        "kid": kid,
        "payload": payload,
    });
    serde_json::to_vec(&value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Pairing token exchange
// ---------------------------------------------------------------------------

/// Why a pairing attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairError {
    /// Unknown, already-used, or expired pairing token.
    Invalid,
    /// Too many rapid failures.
    RateLimited,
}

#[derive(Default)]
struct PairingInner {
    /// pairing token → expiry (epoch ms). Tokens are single-use.
    pending: HashMap<String, u64>,
    /// Recent failure timestamps for rate limiting.
    failures: VecDeque<u64>,
}

/// Pairing state: outstanding single-use tokens plus the failure window.
#[derive(Default)]
pub struct PairingState {
    inner: Mutex<PairingInner>,
}

impl PairingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a short-lived pairing token (embedded into an invite).
    pub fn issue(&self, ttl_ms: u64, now_ms: u64) -> String {
        let token = generate_token("pt_");
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending.insert(token.clone(), now_ms + ttl_ms);
        }
        token
    }

    /// Exchange a pairing token for a device token. The pairing token is
    /// consumed on success; replay fails like any unknown token.
    pub fn redeem(
        &self,
        pairing_token: &str,
        device_name: &str,
        now_ms: u64,
        storage: &Storage,
    ) -> Result<DeviceToken, PairError> {
        let Ok(mut inner) = self.inner.lock() else {
            return Err(PairError::Invalid);
        };

        inner.failures.retain(|&t| now_ms.saturating_sub(t) <= PAIR_FAILURE_WINDOW_MS);
        if inner.failures.len() >= PAIR_FAILURE_LIMIT {
            return Err(PairError::RateLimited);
        }

        let valid = match inner.pending.get(pairing_token) {
            Some(&expires_at) if expires_at >= now_ms => true,
            Some(_) => {
                // Expired: drop it so the map doesn't accumulate.
                inner.pending.remove(pairing_token);
                false
            }
            None => false,
        };
        if !valid {
            inner.failures.push_back(now_ms);
            return Err(PairError::Invalid);
        }
        inner.pending.remove(pairing_token);
        drop(inner);

        let device = DeviceToken {
            token: generate_token("dt_"),
            device_name: device_name.to_owned(),
            created_at: now_ms,
        };
        storage.add_device_token(device.clone());
        Ok(device)
    }
}

/// Load the invite keyring from settings, generating and persisting one
/// on first use.
pub fn load_or_create_keyring(storage: &Storage) -> Option<InviteKeyring> {
    if let Some(encoded) = storage.settings().identity.signing_key {
        if let Some(keyring) = InviteKeyring::from_pkcs8_b64(&encoded) {
            return Some(keyring);
        }
    }
    let (keyring, encoded) = InviteKeyring::generate()?;
    storage.update_settings(move |settings| {
        settings.identity.signing_key = Some(encoded);
    });
    Some(keyring)
}

#[cfg(test)]
#[path = "pairing_tests.rs"]
mod tests;
