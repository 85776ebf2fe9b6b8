//! Password-sealed private keys.
//!
//! The key stores keep private identity keys as plain key material; they
//! do not encrypt them. Protecting a private key at rest, or exporting it,
//! is the host's job and goes through [`seal_private_key`]: a
//! key-encryption-key is derived from the user's password with PBKDF2 and
//! the private key is encrypted under it with AES-256-GCM.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{CipherEngine, KeyDerivationService, PrivateKey, NONCE_SIZE, TAG_SIZE};
use crate::encoding::b64;
use crate::error::Result;

/// AEAD context bound into every sealed private key
pub const SEALED_KEY_CONTEXT: &[u8] = b"identity-private-key";

/// A private key encrypted under a password-derived key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedPrivateKey {
    /// PBKDF2 salt
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    /// PBKDF2 iteration count used at sealing time
    pub iterations: u32,
    /// AEAD nonce
    #[serde(with = "b64")]
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD tag
    #[serde(with = "b64")]
    pub tag: [u8; TAG_SIZE],
    /// Encrypted private key
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// Seal a private key under a password
///
/// Uses a fresh salt and the configured iteration count.
pub fn seal_private_key(
    engine: &CipherEngine,
    kdf: &KeyDerivationService,
    private_key: &PrivateKey,
    password: &str,
) -> Result<SealedPrivateKey> {
    let salt = kdf.generate_salt()?;
    let iterations = kdf.iterations();
    let kek = kdf.derive_key(password, &salt, iterations)?;

    let payload = engine.encrypt_with_context(private_key.as_bytes(), kek.as_bytes(), SEALED_KEY_CONTEXT)?;

    Ok(SealedPrivateKey {
        salt,
        iterations,
        nonce: payload.nonce,
        tag: payload.tag,
        ciphertext: payload.ciphertext,
    })
}

/// Open a sealed private key
///
/// ## Errors
///
/// `AuthTagMismatch` if the password is wrong or the sealed key was altered.
pub fn open_private_key(
    engine: &CipherEngine,
    kdf: &KeyDerivationService,
    sealed: &SealedPrivateKey,
    password: &str,
) -> Result<PrivateKey> {
    let kek = kdf.derive_key(password, &sealed.salt, sealed.iterations)?;

    let plaintext = Zeroizing::new(engine.decrypt_with_context(
        &sealed.ciphertext,
        kek.as_bytes(),
        &sealed.nonce,
        &sealed.tag,
        SEALED_KEY_CONTEXT,
    )?);

    PrivateKey::from_slice(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoConfig;
    use crate::crypto::{IdentityKeyPair, SecureRandom};
    use crate::error::Error;

    fn services() -> (CipherEngine, KeyDerivationService) {
        let config = CryptoConfig::for_tests();
        (CipherEngine::new(&config), KeyDerivationService::new(&config))
    }

    #[test]
    fn test_seal_and_open() {
        let (engine, kdf) = services();
        let pair = IdentityKeyPair::generate(&SecureRandom::new()).unwrap();

        let sealed = seal_private_key(&engine, &kdf, &pair.private, "hunter2").unwrap();
        assert_eq!(sealed.iterations, 1_000);
        assert_eq!(sealed.salt.len(), 16);
        assert_ne!(sealed.ciphertext, pair.private.as_bytes().to_vec());

        let opened = open_private_key(&engine, &kdf, &sealed, "hunter2").unwrap();
        assert_eq!(opened, pair.private);
    }

    #[test]
    fn test_wrong_password() {
        let (engine, kdf) = services();
        let pair = IdentityKeyPair::generate(&SecureRandom::new()).unwrap();
        let sealed = seal_private_key(&engine, &kdf, &pair.private, "hunter2").unwrap();

        let err = open_private_key(&engine, &kdf, &sealed, "hunter3").unwrap_err();
        assert!(matches!(err, Error::AuthTagMismatch));
        assert!(err.is_decryption_error());
    }

    #[test]
    fn test_sealed_context_is_not_plain_encryption() {
        let (engine, kdf) = services();
        let pair = IdentityKeyPair::generate(&SecureRandom::new()).unwrap();
        let sealed = seal_private_key(&engine, &kdf, &pair.private, "pw").unwrap();

        let kek = kdf.derive_key("pw", &sealed.salt, sealed.iterations).unwrap();
        let result = engine.decrypt(&sealed.ciphertext, kek.as_bytes(), &sealed.nonce, &sealed.tag);
        assert!(result.is_err());
    }

    #[test]
    fn test_sealed_form_hides_key_material() {
        let (engine, kdf) = services();
        let pair = IdentityKeyPair::generate(&SecureRandom::new()).unwrap();
        let sealed = seal_private_key(&engine, &kdf, &pair.private, "pw").unwrap();

        let json = serde_json::to_string(&sealed).unwrap();
        assert!(!json.contains(&hex::encode(pair.private.as_bytes())));
        assert!(!json.contains("privateKey"));
    }

    #[test]
    fn test_sealed_serde() {
        let (engine, kdf) = services();
        let pair = IdentityKeyPair::generate(&SecureRandom::new()).unwrap();
        let sealed = seal_private_key(&engine, &kdf, &pair.private, "pw").unwrap();

        let json = serde_json::to_value(&sealed).unwrap();
        assert_eq!(json["iterations"], 1_000);

        let restored: SealedPrivateKey = serde_json::from_value(json).unwrap();
        assert_eq!(open_private_key(&engine, &kdf, &restored, "pw").unwrap(), pair.private);
    }
}
