//! Content hashing and constant-time digest comparison.
//!
//! Used for tamper detection outside the AEAD path, e.g. attachment digests
//! sent alongside a message, and for fingerprint verification.

use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// Size of a SHA-256 digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// A SHA-256 digest
pub type Digest = [u8; DIGEST_SIZE];

/// SHA-256 hashing with constant-time verification
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Create a verifier
    pub fn new() -> Self {
        Self
    }

    /// SHA-256 digest of `data`
    pub fn hash(&self, data: &[u8]) -> Digest {
        Sha256::digest(data).into()
    }

    /// SHA-256 digest of `data` as lowercase hex
    pub fn hash_hex(&self, data: &[u8]) -> String {
        hex::encode(self.hash(data))
    }

    /// Check `data` against an expected digest
    ///
    /// The comparison inspects every byte regardless of where the first
    /// mismatch is. A digest of the wrong length never matches.
    pub fn verify(&self, data: &[u8], expected_digest: &[u8]) -> bool {
        let actual = self.hash(data);
        // Slices of different length compare unequal.
        actual.as_slice().ct_eq(expected_digest).into()
    }

    /// Like [`IntegrityVerifier::verify`], but returns `IntegrityCheckFailed`
    /// on mismatch
    pub fn ensure(&self, data: &[u8], expected_digest: &[u8]) -> Result<()> {
        if self.verify(data, expected_digest) {
            Ok(())
        } else {
            tracing::warn!(len = data.len(), "integrity check failed");
            Err(Error::IntegrityCheckFailed)
        }
    }
}
