//! Session-key wrapping under a recipient's X25519 public key.
//!
//! Each wrap uses a fresh ephemeral key pair, so wrapping the same session
//! key for the same recipient twice yields unrelated ciphertexts.
//!
//! ```text
//! wrap(session_key, recipient_pub, context):
//!     eph            = fresh X25519 key pair
//!     shared         = X25519(eph.private, recipient_pub)     (must be contributory)
//!     wrapping_key   = HKDF-SHA256(shared, salt = eph.public || recipient_pub)
//!     (ct, n, tag)   = AES-256-GCM(wrapping_key, session_key, aad = label | context)
//!
//! wire form (125 bytes):
//!     version(1) || recipient_pub(32) || eph.public(32) || n(12) || tag(16) || ct(32)
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use super::cipher::CipherEngine;
use super::kdf::derive_wrapping_key;
use super::keys::{IdentityKeyPair, PrivateKey, PublicKey, SessionKey};
use super::random::SecureRandom;
use super::{KEY_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};
use crate::error::{Diagnostic, Error, Result};

/// Current wrapped-key format version
const WRAP_VERSION: u8 = 1;

/// Encoded size of a [`WrappedKey`]
pub const WRAPPED_KEY_SIZE: usize = 1 + PUBLIC_KEY_SIZE * 2 + NONCE_SIZE + TAG_SIZE + KEY_SIZE;

/// A session key sealed for one recipient
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// Public key the session key was wrapped under
    pub recipient: PublicKey,
    /// Sender's ephemeral public key
    pub ephemeral: PublicKey,
    /// AEAD nonce
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD tag
    pub tag: [u8; TAG_SIZE],
    /// Encrypted session key
    pub ciphertext: [u8; KEY_SIZE],
}

impl WrappedKey {
    /// Encode to the versioned wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WRAPPED_KEY_SIZE);
        out.push(WRAP_VERSION);
        out.extend_from_slice(self.recipient.as_bytes());
        out.extend_from_slice(self.ephemeral.as_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Decode from the wire form
    ///
    /// ## Errors
    ///
    /// `KeyExchangeFailed` on a wrong length or unknown version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != WRAPPED_KEY_SIZE {
            return Err(Error::KeyExchangeFailed(Diagnostic::new(format!(
                "wrapped key must be {} bytes, got {}",
                WRAPPED_KEY_SIZE,
                bytes.len()
            ))));
        }
        if bytes[0] != WRAP_VERSION {
            return Err(Error::KeyExchangeFailed(Diagnostic::new(format!(
                "unsupported wrapped key version {}",
                bytes[0]
            ))));
        }

        let (recipient, rest) = bytes[1..].split_at(PUBLIC_KEY_SIZE);
        let (ephemeral, rest) = rest.split_at(PUBLIC_KEY_SIZE);
        let (nonce_bytes, rest) = rest.split_at(NONCE_SIZE);
        let (tag_bytes, ciphertext_bytes) = rest.split_at(TAG_SIZE);

        let recipient = PublicKey::from_slice(recipient)?;
        let ephemeral = PublicKey::from_slice(ephemeral)?;
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);
        let mut ciphertext = [0u8; KEY_SIZE];
        ciphertext.copy_from_slice(ciphertext_bytes);

        Ok(Self {
            recipient,
            ephemeral,
            nonce,
            tag,
            ciphertext,
        })
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedKey")
            .field("recipient", &self.recipient)
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

impl Serialize for WrappedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        crate::encoding::b64::serialize(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for WrappedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes: Vec<u8> = crate::encoding::b64::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Wrap a session key for one recipient
///
/// `context` (typically the conversation id) is bound into the AEAD, so a
/// wrapped copy cannot be replayed into another conversation's record.
pub fn wrap_key(
    engine: &CipherEngine,
    rng: &SecureRandom,
    session_key: &SessionKey,
    recipient: &PublicKey,
    context: &[u8],
) -> Result<WrappedKey> {
    let ephemeral = IdentityKeyPair::generate(rng)?;

    let shared = ephemeral.private.diffie_hellman(recipient);
    if !shared.was_contributory() {
        return Err(Error::KeyExchangeFailed(Diagnostic::new(
            "recipient public key is a low-order point",
        )));
    }

    let salt = exchange_salt(&ephemeral.public, recipient);
    let wrapping_key = derive_wrapping_key(shared.as_bytes(), &salt)?;

    let payload = engine.encrypt_with_context(session_key.as_bytes(), &wrapping_key[..], context)?;

    let mut ciphertext = [0u8; KEY_SIZE];
    ciphertext.copy_from_slice(&payload.ciphertext);

    Ok(WrappedKey {
        recipient: *recipient,
        ephemeral: ephemeral.public,
        nonce: payload.nonce,
        tag: payload.tag,
        ciphertext,
    })
}

/// Recover a session key with the recipient's private key
///
/// ## Errors
///
/// `KeyExchangeFailed` if the copy was wrapped for a different key, the
/// ephemeral key is degenerate, or the ciphertext does not authenticate.
pub fn unwrap_key(
    engine: &CipherEngine,
    wrapped: &WrappedKey,
    private_key: &PrivateKey,
    context: &[u8],
) -> Result<SessionKey> {
    let own_public = private_key.public_key();
    if own_public != wrapped.recipient {
        return Err(Error::KeyExchangeFailed(Diagnostic::new(
            "wrapped for a different identity key",
        )));
    }

    let shared = private_key.diffie_hellman(&wrapped.ephemeral);
    if !shared.was_contributory() {
        return Err(Error::KeyExchangeFailed(Diagnostic::new(
            "ephemeral public key is a low-order point",
        )));
    }

    let salt = exchange_salt(&wrapped.ephemeral, &own_public);
    let wrapping_key = derive_wrapping_key(shared.as_bytes(), &salt)?;

    let plaintext = engine
        .decrypt_with_context(&wrapped.ciphertext, &wrapping_key[..], &wrapped.nonce, &wrapped.tag, context)
        .map(Zeroizing::new)
        .map_err(|e| Error::KeyExchangeFailed(Diagnostic::new(format!("unwrap failed: {:?}", e))))?;

    SessionKey::from_slice(&plaintext)
}

fn exchange_salt(ephemeral: &PublicKey, recipient: &PublicKey) -> [u8; PUBLIC_KEY_SIZE * 2] {
    let mut salt = [0u8; PUBLIC_KEY_SIZE * 2];
    salt[..PUBLIC_KEY_SIZE].copy_from_slice(ephemeral.as_bytes());
    salt[PUBLIC_KEY_SIZE..].copy_from_slice(recipient.as_bytes());
    salt
}
