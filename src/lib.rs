//! # Veil Core
//!
//! End-to-end encryption key management: per-user identity keys,
//! per-conversation session keys and authenticated message encryption.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         VEIL CORE MODULES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────┐        ┌──────────────────────────────┐      │
//! │  │  IdentityKeyManager  │ public │      SessionKeyBroker        │      │
//! │  │                      │  keys  │                              │      │
//! │  │ - X25519 key pairs   │───────►│ - 32-byte session keys       │      │
//! │  │ - Rotation/history   │        │ - One wrapped copy per user  │      │
//! │  │ - Fingerprints       │        │ - Expiry / revocation        │      │
//! │  └──────────┬───────────┘        └──────────────┬───────────────┘      │
//! │             │                                   │                       │
//! │             └─────────────┬─────────────────────┘                       │
//! │                           │                                             │
//! │  ┌─────────────┐  ┌───────┴─────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │   Cipher    │  │   Storage   │  │  Integrity  │  │     KDF      │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - AES-GCM   │  │ - SQLite    │  │ - SHA-256   │  │ - PBKDF2     │   │
//! │  │ - Wrapping  │  │ - Memory    │  │ - ct_eq     │  │ - HKDF       │   │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └──────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Cipher suite and key-management configuration
//! - [`crypto`] - Cryptographic primitives (keys, AEAD, hashing, KDF, wrapping)
//! - [`identity`] - Identity key lifecycle and sealed private keys
//! - [`session`] - Session key lifecycle and message envelopes
//! - [`storage`] - Key record persistence (SQLite, in-memory)
//! - [`time`] - Injectable clocks
//!
//! ## Message Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MESSAGE FLOW                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Send                                                                   │
//! │  ────                                                                   │
//! │  1. Resolve each participant's active identity key                     │
//! │  2. Get the conversation's active session key (create if absent,       │
//! │     expired, or the participants changed)                             │
//! │  3. AES-256-GCM encrypt under the session key                          │
//! │  4. Ship EncryptedMessage { session_id, nonce, tag, ciphertext }       │
//! │                                                                         │
//! │  Receive                                                                │
//! │  ───────                                                                │
//! │  1. Look up the epoch named by session_id (expired epochs included)    │
//! │  2. Unwrap the receiver's copy with the matching identity generation   │
//! │  3. AES-256-GCM decrypt; any tampering fails closed                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod session;
pub mod storage;
pub mod time;

mod locks;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::CryptoConfig;
pub use crypto::{
    CipherEngine, Digest, EncryptedPayload, IdentityKeyPair, IntegrityVerifier, KeyDerivationService,
    KeyEncryptionKey, PrivateKey, PublicKey, SecureRandom, SessionKey, WrappedKey,
};
pub use error::{Error, PublicError, Result};
pub use identity::{IdentityKeyManager, SealedPrivateKey};
pub use session::{EncryptedMessage, ParticipantKeys, SessionKeyBroker, SessionState};
pub use storage::{
    IdentityKeyRecord, KeyStore, MemoryKeyStore, PublicIdentityKey, SessionKeyRecord, SqliteKeyStore,
};
pub use time::{Clock, ManualClock, SystemClock};

// ============================================================================
// CORE INSTANCE
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use error::Diagnostic;

/// Every component wired to one configuration, store and clock
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        VEIL CORE LIFECYCLE                              │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. Construct                                                           │
/// │     ┌─────────────┐                                                    │
/// │     │ VeilCore::  │──► Validate config                                 │
/// │     │ new()       │──► Share store + clock between managers            │
/// │     └─────────────┘                                                    │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  2. Identity keys                                                      │
/// │     ┌─────────────┐                                                    │
/// │     │ get_or_     │──► First generation on first use                   │
/// │     │ create_...  │──► rotate_key() for new generations                │
/// │     └─────────────┘                                                    │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  3. Conversations                                                      │
/// │     ┌─────────────┐                                                    │
/// │     │ encrypt_    │──► Session epoch per conversation                  │
/// │     │ message()   │──► One wrapped copy per participant                │
/// │     └─────────────┘                                                    │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
///
/// Cheap to clone; clones share all state.
#[derive(Debug, Clone)]
pub struct VeilCore {
    config: Arc<CryptoConfig>,
    cipher: CipherEngine,
    integrity: IntegrityVerifier,
    random: SecureRandom,
    kdf: KeyDerivationService,
    identities: IdentityKeyManager,
    sessions: SessionKeyBroker,
}

impl VeilCore {
    /// Wire up all components over a store, using the system clock
    pub fn new(config: CryptoConfig, store: Arc<dyn KeyStore>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Wire up all components with an explicit clock
    pub fn with_clock(config: CryptoConfig, store: Arc<dyn KeyStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            "Initializing Veil Core v{} (label {:?})",
            env!("CARGO_PKG_VERSION"),
            config.associated_data
        );

        Ok(Self {
            cipher: CipherEngine::new(&config),
            integrity: IntegrityVerifier::new(),
            random: SecureRandom::new(),
            kdf: KeyDerivationService::new(&config),
            identities: IdentityKeyManager::new(store.clone(), clock.clone()),
            sessions: SessionKeyBroker::new(&config, store, clock),
            config: Arc::new(config),
        })
    }

    /// Core over a fresh in-memory store
    pub fn in_memory(config: CryptoConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryKeyStore::new()))
    }

    /// Core over a SQLite database file
    pub fn open_sqlite(config: CryptoConfig, path: &str) -> Result<Self> {
        Self::new(config, Arc::new(SqliteKeyStore::open(Some(path))?))
    }

    /// The validated configuration
    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    /// The AEAD engine
    pub fn cipher(&self) -> &CipherEngine {
        &self.cipher
    }

    /// The random source
    pub fn random(&self) -> &SecureRandom {
        &self.random
    }

    /// The identity key manager
    pub fn identities(&self) -> &IdentityKeyManager {
        &self.identities
    }

    /// The session key broker
    pub fn sessions(&self) -> &SessionKeyBroker {
        &self.sessions
    }

    // ========================================================================
    // PRIMITIVES
    // ========================================================================

    /// AES-256-GCM encrypt under a 32-byte key
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<EncryptedPayload> {
        self.cipher.encrypt(plaintext, key)
    }

    /// AES-256-GCM decrypt; fails closed
    pub fn decrypt(&self, ciphertext: &[u8], key: &[u8], nonce: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        self.cipher.decrypt(ciphertext, key, nonce, tag)
    }

    /// SHA-256 digest
    pub fn hash(&self, data: &[u8]) -> Digest {
        self.integrity.hash(data)
    }

    /// Constant-time digest check
    pub fn verify(&self, data: &[u8], expected_digest: &[u8]) -> bool {
        self.integrity.verify(data, expected_digest)
    }

    /// PBKDF2-HMAC-SHA256 key-encryption-key
    pub fn derive_key(&self, password: &str, salt: &[u8], iterations: u32) -> Result<KeyEncryptionKey> {
        self.kdf.derive_key(password, salt, iterations)
    }

    /// Fresh random salt
    pub fn generate_salt(&self) -> Result<Vec<u8>> {
        self.kdf.generate_salt()
    }

    // ========================================================================
    // IDENTITY KEYS
    // ========================================================================

    /// Generate an X25519 key pair (not persisted)
    pub fn generate_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.identities.generate_identity_key_pair()
    }

    /// Generate an X25519 key pair on the blocking worker pool
    pub async fn generate_identity_key_pair_async(&self) -> Result<IdentityKeyPair> {
        self.identities.generate_identity_key_pair_async().await
    }

    /// Fingerprint of a public key
    pub fn compute_fingerprint(&self, public_key: &PublicKey) -> String {
        self.identities.compute_fingerprint(public_key)
    }

    /// Start a new identity key generation for a user
    pub fn rotate_key(&self, user_id: &str) -> Result<IdentityKeyRecord> {
        self.identities.rotate_key(user_id)
    }

    /// [`VeilCore::rotate_key`] on the blocking worker pool
    pub async fn rotate_key_async(&self, user_id: &str) -> Result<IdentityKeyRecord> {
        self.identities.rotate_key_async(user_id).await
    }

    /// Seal the user's active private key under a password
    pub fn seal_private_key(&self, user_id: &str, password: &str) -> Result<SealedPrivateKey> {
        let record = self
            .identities
            .active_key(user_id)?
            .ok_or_else(|| Error::NoIdentityKey(user_id.to_string()))?;
        identity::seal_private_key(&self.cipher, &self.kdf, &record.private_key, password)
    }

    /// Open a sealed private key
    pub fn open_private_key(&self, sealed: &SealedPrivateKey, password: &str) -> Result<PrivateKey> {
        identity::open_private_key(&self.cipher, &self.kdf, sealed, password)
    }

    /// Active public keys of these users, creating first generations as needed
    pub fn participant_keys(&self, user_ids: &[&str]) -> Result<ParticipantKeys> {
        Ok(self
            .resolve_participants(user_ids)?
            .into_iter()
            .map(|r| (r.user_id, r.public_key))
            .collect())
    }

    fn resolve_participants(&self, user_ids: &[&str]) -> Result<Vec<IdentityKeyRecord>> {
        user_ids
            .iter()
            .map(|user_id| self.identities.get_or_create_active_key(user_id))
            .collect()
    }

    // ========================================================================
    // SESSION KEYS
    // ========================================================================

    /// The conversation's session key for these participants
    ///
    /// Reuses the active epoch when it still fits, so concurrent first
    /// messages share one record. `ttl` defaults to the configured session
    /// lifetime.
    pub fn create_session_key(
        &self,
        conversation_id: &str,
        participants: &ParticipantKeys,
        ttl: Option<Duration>,
    ) -> Result<SessionKeyRecord> {
        let ttl = ttl.unwrap_or_else(|| self.sessions.default_ttl());
        self.sessions.create_session_key(conversation_id, participants, ttl)
    }

    /// Replace the active epoch with a fresh one
    pub fn rotate_session_key(
        &self,
        conversation_id: &str,
        participants: &ParticipantKeys,
        ttl: Option<Duration>,
    ) -> Result<SessionKeyRecord> {
        let ttl = ttl.unwrap_or_else(|| self.sessions.default_ttl());
        self.sessions.rotate_session_key(conversation_id, participants, ttl)
    }

    /// Recover a participant's copy of a session key
    pub fn unwrap_session_key(
        &self,
        record: &SessionKeyRecord,
        user_id: &str,
        private_key: &PrivateKey,
    ) -> Result<SessionKey> {
        self.sessions.unwrap_session_key(record, user_id, private_key)
    }

    /// The conversation's usable session epoch
    pub fn get_active_session_key(&self, conversation_id: &str) -> Result<SessionKeyRecord> {
        self.sessions.get_active_session_key(conversation_id)
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Encrypt a message for a conversation's participants
    ///
    /// Reuses the active epoch when it covers exactly these participants'
    /// current keys, otherwise starts a new one. A reused epoch is unwrapped
    /// with the first participant's key.
    pub fn encrypt_message(
        &self,
        conversation_id: &str,
        participants: &[&str],
        plaintext: &[u8],
    ) -> Result<EncryptedMessage> {
        let records = self.resolve_participants(participants)?;
        let keys: ParticipantKeys = records
            .iter()
            .map(|r| (r.user_id.clone(), r.public_key))
            .collect();

        let epoch = self
            .sessions
            .create_session_key(conversation_id, &keys, self.sessions.default_ttl())?;

        let session_key = match &epoch.session_key {
            Some(key) => {
                for record in &records {
                    self.identities.touch(&record.key_id)?;
                }
                key.clone()
            }
            None => {
                let sender = records.first().ok_or_else(|| {
                    Error::InvalidInput("a message needs at least one participant".into())
                })?;
                let key = self
                    .sessions
                    .unwrap_session_key(&epoch, &sender.user_id, &sender.private_key)?;
                self.identities.touch(&sender.key_id)?;
                key
            }
        };

        EncryptedMessage::seal(&self.cipher, &session_key, conversation_id, &epoch.session_id, plaintext)
    }

    /// Decrypt a message as `user_id`
    ///
    /// Works for any epoch the user was a participant of, expired or
    /// revoked ones included, using whichever identity generation the copy
    /// was wrapped under.
    pub fn decrypt_message(&self, envelope: &EncryptedMessage, user_id: &str) -> Result<Vec<u8>> {
        let epoch = self
            .sessions
            .session_by_id(&envelope.session_id)?
            .ok_or_else(|| Error::NoActiveSession(envelope.conversation_id.clone()))?;

        if epoch.conversation_id != envelope.conversation_id {
            return Err(Error::KeyExchangeFailed(Diagnostic::new(
                "envelope names a session of another conversation",
            )));
        }

        let wrapped = epoch
            .encrypted_session_key_by_participant
            .get(user_id)
            .ok_or_else(|| {
                Error::KeyExchangeFailed(Diagnostic::new(format!(
                    "{} is not a participant of session {}",
                    user_id, epoch.session_id
                )))
            })?;

        let identity = self.identities.key_record_for(user_id, &wrapped.recipient)?;
        let session_key = self
            .sessions
            .unwrap_session_key(&epoch, user_id, &identity.private_key)?;
        self.identities.touch(&identity.key_id)?;

        envelope.open(&self.cipher, &session_key)
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Veil Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
        protocol: config::DEFAULT_ASSOCIATED_DATA,
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
    /// Default associated-data label
    pub protocol: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> VeilCore {
        VeilCore::in_memory(CryptoConfig::for_tests()).unwrap()
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
        assert_eq!(info.protocol, "veil-e2ee-v1");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CryptoConfig {
            kdf_iterations: 0,
            ..CryptoConfig::for_tests()
        };
        assert!(matches!(VeilCore::in_memory(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_message_round_trip() {
        let core = core();

        let envelope = core
            .encrypt_message("conv", &["alice", "bob"], b"hello bob")
            .unwrap();

        assert_eq!(core.decrypt_message(&envelope, "bob").unwrap(), b"hello bob");
        assert_eq!(core.decrypt_message(&envelope, "alice").unwrap(), b"hello bob");
        assert!(matches!(
            core.decrypt_message(&envelope, "mallory"),
            Err(Error::KeyExchangeFailed(_))
        ));
    }

    #[test]
    fn test_messages_share_epoch() {
        let core = core();

        let m1 = core.encrypt_message("conv", &["alice", "bob"], b"one").unwrap();
        let m2 = core.encrypt_message("conv", &["bob", "alice"], b"two").unwrap();

        assert_eq!(m1.session_id, m2.session_id);
        assert_eq!(core.decrypt_message(&m2, "alice").unwrap(), b"two");
    }

    #[test]
    fn test_rotation_starts_new_epoch_and_keeps_backlog() {
        let core = core();

        let old = core.encrypt_message("conv", &["alice", "bob"], b"before").unwrap();
        core.rotate_key("bob").unwrap();
        let new = core.encrypt_message("conv", &["alice", "bob"], b"after").unwrap();

        assert_ne!(old.session_id, new.session_id);
        assert_eq!(core.decrypt_message(&old, "bob").unwrap(), b"before");
        assert_eq!(core.decrypt_message(&new, "bob").unwrap(), b"after");
    }

    #[test]
    fn test_messages_touch_identity_keys() {
        let core = core();
        core.encrypt_message("conv", &["alice", "bob"], b"hi").unwrap();

        let bob = core.identities().active_key("bob").unwrap().unwrap();
        assert!(bob.last_used.is_some());
    }

    #[test]
    fn test_seal_active_key() {
        let core = core();
        let record = core.identities().get_or_create_active_key("alice").unwrap();

        let sealed = core.seal_private_key("alice", "pw").unwrap();
        assert_eq!(core.open_private_key(&sealed, "pw").unwrap(), record.private_key);
        assert!(core.open_private_key(&sealed, "nope").unwrap_err().is_decryption_error());

        assert!(matches!(
            core.seal_private_key("ghost", "pw"),
            Err(Error::NoIdentityKey(_))
        ));
    }

    #[test]
    fn test_primitives_on_facade() {
        let core = core();
        let salt = core.generate_salt().unwrap();
        let kek = core.derive_key("pw", &salt, 10).unwrap();

        let payload = core.encrypt(b"data", kek.as_bytes()).unwrap();
        let plain = core
            .decrypt(&payload.ciphertext, kek.as_bytes(), &payload.nonce, &payload.tag)
            .unwrap();
        assert_eq!(plain, b"data");

        let digest = core.hash(b"data");
        assert!(core.verify(b"data", &digest));
    }
}
