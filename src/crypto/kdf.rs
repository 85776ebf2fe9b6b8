//! # Key Derivation Functions
//!
//! Two derivations live here:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  PASSWORD → KEY-ENCRYPTION-KEY                                  │   │
//! │  │                                                                 │   │
//! │  │  PBKDF2-HMAC-SHA256(                                           │   │
//! │  │    password   = user password,                                 │   │
//! │  │    salt       = 16 random bytes,                               │   │
//! │  │    iterations = 100000 (configurable),                         │   │
//! │  │  )                                                             │   │
//! │  │  → 32-byte key that seals a private identity key for the host  │   │
//! │  │    (never used as a session key)                               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  ECDH OUTPUT → WRAPPING KEY                                     │   │
//! │  │                                                                 │   │
//! │  │  HKDF-SHA256(                                                  │   │
//! │  │    ikm  = X25519(ephemeral, recipient),                        │   │
//! │  │    salt = ephemeral_public || recipient_public,                │   │
//! │  │    info = "veil-session-key-wrap-v1",                          │   │
//! │  │  )                                                             │   │
//! │  │  → 32-byte AES-256-GCM key for one wrapped session key         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::random::SecureRandom;
use super::KEY_SIZE;
use crate::config::CryptoConfig;
use crate::error::{Diagnostic, Error, Result};

/// Domain separation strings for HKDF
pub mod domain {
    /// Domain for session-key wrapping keys
    pub const SESSION_KEY_WRAP: &[u8] = b"veil-session-key-wrap-v1";
}

/// A key derived from a password, used only to seal private key material
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey([u8; KEY_SIZE]);

impl KeyEncryptionKey {
    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for KeyEncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for KeyEncryptionKey {}

impl fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyEncryptionKey(<redacted>)")
    }
}

/// Password-based key derivation
#[derive(Debug, Clone)]
pub struct KeyDerivationService {
    iterations: u32,
    salt_size: usize,
    rng: SecureRandom,
}

impl KeyDerivationService {
    /// Create a service from the shared configuration
    pub fn new(config: &CryptoConfig) -> Self {
        Self {
            iterations: config.kdf_iterations,
            salt_size: config.salt_size,
            rng: SecureRandom::new(),
        }
    }

    /// The configured default iteration count
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Derive a 256-bit key with PBKDF2-HMAC-SHA256
    ///
    /// Deterministic for identical inputs.
    ///
    /// ## Errors
    ///
    /// `KeyDerivationFailed` if `iterations` is zero or `salt` is empty.
    pub fn derive_key(&self, password: &str, salt: &[u8], iterations: u32) -> Result<KeyEncryptionKey> {
        if iterations == 0 {
            return Err(Error::KeyDerivationFailed("iteration count must be positive".into()));
        }
        if salt.is_empty() {
            return Err(Error::KeyDerivationFailed("salt must not be empty".into()));
        }

        let mut key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
        let kek = KeyEncryptionKey(key);
        key.zeroize();

        tracing::debug!(iterations, "derived key-encryption-key");
        Ok(kek)
    }

    /// Derive with the configured iteration count
    pub fn derive_key_default(&self, password: &str, salt: &[u8]) -> Result<KeyEncryptionKey> {
        self.derive_key(password, salt, self.iterations)
    }

    /// Fresh random salt of the configured size (16 bytes by default)
    pub fn generate_salt(&self) -> Result<Vec<u8>> {
        self.rng.random_bytes(self.salt_size)
    }
}

/// Derive a wrapping key from an X25519 shared secret
///
/// The salt binds the key to both public keys involved in the exchange.
pub(crate) fn derive_wrapping_key(
    dh_output: &[u8; 32],
    salt: &[u8],
) -> Result<zeroize::Zeroizing<[u8; KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), dh_output);

    let mut key = zeroize::Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(domain::SESSION_KEY_WRAP, key.as_mut_slice())
        .map_err(|_| Error::KeyDerivationFailed(Diagnostic::new("HKDF expansion failed")))?;

    Ok(key)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic_default_iterations() {
        let kdf = KeyDerivationService::new(&CryptoConfig::default());
        let salt = [7u8; 16];

        let k1 = kdf.derive_key("correct horse", &salt, 100_000).unwrap();
        let k2 = kdf.derive_key("correct horse", &salt, 100_000).unwrap();

        assert_eq!(k1, k2);
    }

    #[test]
    fn test_password_and_salt_change_output() {
        let kdf = KeyDerivationService::new(&CryptoConfig::for_tests());
        let salt = [7u8; 16];

        let base = kdf.derive_key("password", &salt, 1000).unwrap();
        let other_pw = kdf.derive_key("passw0rd", &salt, 1000).unwrap();
        let other_salt = kdf.derive_key("password", &[8u8; 16], 1000).unwrap();
        let other_iters = kdf.derive_key("password", &salt, 1001).unwrap();

        assert_ne!(base, other_pw);
        assert_ne!(base, other_salt);
        assert_ne!(base, other_iters);
    }

    #[test]
    fn test_known_vector() {
        // RFC 7914 section 11, PBKDF2-HMAC-SHA256 with c = 1, first 32 bytes
        let kdf = KeyDerivationService::new(&CryptoConfig::for_tests());
        let key = kdf.derive_key("passwd", b"salt", 1).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let kdf = KeyDerivationService::new(&CryptoConfig::for_tests());
        assert!(matches!(
            kdf.derive_key("pw", &[1u8; 16], 0),
            Err(Error::KeyDerivationFailed(_))
        ));
        assert!(kdf.derive_key("pw", &[], 10).is_err());
    }

    #[test]
    fn test_generate_salt() {
        let kdf = KeyDerivationService::new(&CryptoConfig::for_tests());
        let s1 = kdf.generate_salt().unwrap();
        let s2 = kdf.generate_salt().unwrap();

        assert_eq!(s1.len(), 16);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_wrapping_key_depends_on_salt() {
        let dh = [42u8; 32];
        let k1 = derive_wrapping_key(&dh, b"eph-a|recipient").unwrap();
        let k2 = derive_wrapping_key(&dh, b"eph-a|recipient").unwrap();
        let k3 = derive_wrapping_key(&dh, b"eph-b|recipient").unwrap();

        assert_eq!(*k1, *k2);
        assert_ne!(*k1, *k3);
    }
}
