//! # Cipher Engine
//!
//! AES-256-GCM encryption for message confidentiality and integrity.
//!
//! ## Encryption Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PAYLOAD ENCRYPTION FLOW                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Step 1: Check key length (exactly 32 bytes)                           │
//! │                                                                         │
//! │  Step 2: Generate Nonce (unique per call)                              │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  Random 12 bytes from OsRng                                  │       │
//! │  │  passed explicitly into the AEAD call                        │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Step 3: Encrypt                                                       │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  AES-256-GCM(                                                │       │
//! │  │    key   = session_key,                                     │       │
//! │  │    nonce = random_nonce,                                    │       │
//! │  │    aad   = "veil-e2ee-v1" [ || "|" || context ],            │       │
//! │  │  )                                                          │       │
//! │  │           ↓                                                  │       │
//! │  │  ciphertext + detached 16-byte tag                          │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Output: EncryptedPayload { ciphertext, nonce, tag }                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Decryption fails closed: if the tag does not verify, the working buffer is
//! zeroized and only [`Error::AuthTagMismatch`] is returned.

use std::sync::Arc;

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::random::SecureRandom;
use super::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::config::CryptoConfig;
use crate::encoding::b64;
use crate::error::{Diagnostic, Error, Result};

/// Output of a single AEAD encryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Ciphertext (same length as the plaintext)
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Nonce used for this encryption
    #[serde(with = "b64")]
    pub nonce: [u8; NONCE_SIZE],
    /// Detached authentication tag
    #[serde(with = "b64")]
    pub tag: [u8; TAG_SIZE],
}

/// Authenticated symmetric encryption engine
///
/// Binds the configured protocol label as associated data to every
/// operation. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CipherEngine {
    label: Arc<str>,
    rng: SecureRandom,
}

impl CipherEngine {
    /// Create an engine from the shared configuration
    pub fn new(config: &CryptoConfig) -> Self {
        Self {
            label: Arc::from(config.associated_data.as_str()),
            rng: SecureRandom::new(),
        }
    }

    /// The associated-data label bound to every operation
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Encrypt a payload under a 256-bit key
    ///
    /// ## Errors
    ///
    /// Returns `EncryptionFailed` if the key is not exactly 32 bytes.
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<EncryptedPayload> {
        self.encrypt_with_context(plaintext, key, &[])
    }

    /// Decrypt a payload produced by [`CipherEngine::encrypt`]
    ///
    /// ## Errors
    ///
    /// - `DecryptionFailed` if the key, nonce or tag has the wrong length
    /// - `AuthTagMismatch` if the ciphertext, nonce, tag, key or label differ
    ///   from what was used at encryption time
    pub fn decrypt(&self, ciphertext: &[u8], key: &[u8], nonce: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with_context(ciphertext, key, nonce, tag, &[])
    }

    /// Encrypt with an extra context appended to the associated data
    ///
    /// A ciphertext produced under one context does not decrypt under any
    /// other.
    pub fn encrypt_with_context(
        &self,
        plaintext: &[u8],
        key: &[u8],
        context: &[u8],
    ) -> Result<EncryptedPayload> {
        if key.len() != KEY_SIZE {
            return Err(Error::EncryptionFailed(Diagnostic::new(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            ))));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::EncryptionFailed(Diagnostic::new(format!("Invalid key: {}", e))))?;

        let nonce = self.rng.nonce()?;
        let aad = self.associated_data(context);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), &aad, &mut buffer)
            .map_err(|e| {
                buffer.zeroize();
                Error::EncryptionFailed(Diagnostic::new(format!("AEAD encryption failed: {}", e)))
            })?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(EncryptedPayload {
            ciphertext: buffer,
            nonce,
            tag: tag_bytes,
        })
    }

    /// Decrypt with an extra context appended to the associated data
    pub fn decrypt_with_context(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        nonce: &[u8],
        tag: &[u8],
        context: &[u8],
    ) -> Result<Vec<u8>> {
        if key.len() != KEY_SIZE {
            return Err(Error::DecryptionFailed(Diagnostic::new(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            ))));
        }
        if nonce.len() != NONCE_SIZE {
            return Err(Error::DecryptionFailed(Diagnostic::new(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                nonce.len()
            ))));
        }
        if tag.len() != TAG_SIZE {
            return Err(Error::DecryptionFailed(Diagnostic::new(format!(
                "tag must be {} bytes, got {}",
                TAG_SIZE,
                tag.len()
            ))));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::DecryptionFailed(Diagnostic::new(format!("Invalid key: {}", e))))?;

        let aad = self.associated_data(context);
        let mut buffer = ciphertext.to_vec();

        match cipher.decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            &aad,
            &mut buffer,
            Tag::from_slice(tag),
        ) {
            Ok(()) => Ok(buffer),
            Err(_) => {
                buffer.zeroize();
                tracing::warn!(len = ciphertext.len(), "AEAD authentication tag mismatch");
                Err(Error::AuthTagMismatch)
            }
        }
    }

    /// Build the associated data: label, then `|` and the context if any
    fn associated_data(&self, context: &[u8]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(self.label.len() + 1 + context.len());
        aad.extend_from_slice(self.label.as_bytes());
        if !context.is_empty() {
            aad.push(b'|');
            aad.extend_from_slice(context);
        }
        aad
    }
}

// ============================================================================
// TESTS
// ============================================================================
