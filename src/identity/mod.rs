//! # Identity Module
//!
//! Per-user X25519 identity keys: generation, rotation, fingerprints and the
//! [`IdentityKeyRecord`] lifecycle.
//!
//! ## Key Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      IDENTITY KEY LIFECYCLE                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   get_or_create_active_key(user)        rotate_key(user)               │
//! │              │                                 │                        │
//! │              ▼                                 ▼                        │
//! │   ┌─────────────────────┐   rotate   ┌─────────────────────┐           │
//! │   │ generation 1        │──────────► │ generation 2        │ ──► ...   │
//! │   │ is_active = true    │            │ is_active = true    │           │
//! │   └─────────────────────┘            └─────────────────────┘           │
//! │              │                                                          │
//! │              ▼                                                          │
//! │   ┌─────────────────────┐                                               │
//! │   │ generation 1        │  kept for unwrapping historical session keys │
//! │   │ is_active = false   │                                               │
//! │   └─────────────────────┘                                               │
//! │                                                                         │
//! │  Both entry points hold the per-user lock, so concurrent rotations     │
//! │  leave exactly one active generation.                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fingerprints
//!
//! SHA-256 of the 32-byte public key, uppercase hex, grouped in blocks of
//! four characters separated by colons:
//!
//! ```text
//! 3F2A:91C0:...:7B4E   (16 blocks)
//! ```

mod sealed;

pub use sealed::{open_private_key, seal_private_key, SealedPrivateKey, SEALED_KEY_CONTEXT};

use std::sync::Arc;

use subtle::ConstantTimeEq;

use crate::crypto::{IdentityKeyPair, IntegrityVerifier, PrivateKey, PublicKey, SecureRandom};
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::storage::{IdentityKeyRecord, KeyStore};
use crate::time::Clock;

/// Characters per fingerprint block
const FINGERPRINT_BLOCK: usize = 4;

/// Compute the fingerprint of a public key
///
/// Deterministic and derived only from the key bytes.
pub fn compute_fingerprint(public_key: &PublicKey) -> String {
    let digest = IntegrityVerifier::new().hash(public_key.as_bytes());
    let hex = hex::encode_upper(digest);

    hex.as_bytes()
        .chunks(FINGERPRINT_BLOCK)
        .map(|block| String::from_utf8_lossy(block).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Manages identity key generations for every user
///
/// Cheap to clone; clones share the store and the per-user locks.
#[derive(Clone)]
pub struct IdentityKeyManager {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    rng: SecureRandom,
}

impl IdentityKeyManager {
    /// Create a manager over a store
    pub fn new(store: Arc<dyn KeyStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            locks: Arc::new(KeyedLocks::new()),
            rng: SecureRandom::new(),
        }
    }

    // ========================================================================
    // KEY GENERATION
    // ========================================================================

    /// Generate a fresh X25519 key pair (not persisted)
    pub fn generate_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        IdentityKeyPair::generate(&self.rng)
    }

    /// Generate a key pair on the blocking worker pool
    pub async fn generate_identity_key_pair_async(&self) -> Result<IdentityKeyPair> {
        let rng = self.rng;
        tokio::task::spawn_blocking(move || IdentityKeyPair::generate(&rng)).await?
    }

    /// Fingerprint of a public key
    pub fn compute_fingerprint(&self, public_key: &PublicKey) -> String {
        compute_fingerprint(public_key)
    }

    /// Check a fingerprint a user read out against a public key
    ///
    /// Comparison is constant time over the rendered fingerprint.
    pub fn verify_fingerprint(&self, public_key: &PublicKey, fingerprint: &str) -> bool {
        let expected = compute_fingerprint(public_key);
        expected.as_bytes().ct_eq(fingerprint.trim().as_bytes()).into()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Replace the user's active key with a new generation
    ///
    /// The previous generation is deactivated and kept.
    pub fn rotate_key(&self, user_id: &str) -> Result<IdentityKeyRecord> {
        check_user_id(user_id)?;
        self.locks.with_lock(user_id, || {
            let record = self.new_generation(user_id)?;
            tracing::info!(
                user_id,
                key_id = %record.key_id,
                fingerprint = %record.fingerprint,
                "rotated identity key"
            );
            Ok(record)
        })
    }

    /// [`IdentityKeyManager::rotate_key`] on the blocking worker pool
    pub async fn rotate_key_async(&self, user_id: &str) -> Result<IdentityKeyRecord> {
        let manager = self.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || manager.rotate_key(&user_id)).await?
    }

    /// The user's active key, creating the first generation if none exists
    pub fn get_or_create_active_key(&self, user_id: &str) -> Result<IdentityKeyRecord> {
        check_user_id(user_id)?;
        self.locks.with_lock(user_id, || {
            if let Some(record) = self.store.active_identity_key(user_id)? {
                return Ok(record);
            }

            let record = self.new_generation(user_id)?;
            tracing::info!(
                user_id,
                key_id = %record.key_id,
                fingerprint = %record.fingerprint,
                "created identity key"
            );
            Ok(record)
        })
    }

    /// [`IdentityKeyManager::get_or_create_active_key`] on the blocking worker pool
    pub async fn get_or_create_active_key_async(&self, user_id: &str) -> Result<IdentityKeyRecord> {
        let manager = self.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || manager.get_or_create_active_key(&user_id)).await?
    }

    /// The user's active key, if any
    pub fn active_key(&self, user_id: &str) -> Result<Option<IdentityKeyRecord>> {
        self.store.active_identity_key(user_id)
    }

    /// Every generation of the user's key, oldest first
    pub fn key_history(&self, user_id: &str) -> Result<Vec<IdentityKeyRecord>> {
        self.store.identity_keys(user_id)
    }

    /// Public key of the user's active generation
    pub fn public_key_for(&self, user_id: &str) -> Result<PublicKey> {
        self.store
            .active_identity_key(user_id)?
            .map(|r| r.public_key)
            .ok_or_else(|| Error::NoIdentityKey(user_id.to_string()))
    }

    /// The generation of the user's key matching `public_key`, active or not
    pub fn key_record_for(&self, user_id: &str, public_key: &PublicKey) -> Result<IdentityKeyRecord> {
        self.store
            .identity_keys(user_id)?
            .into_iter()
            .rev()
            .find(|r| r.public_key == *public_key)
            .ok_or_else(|| Error::NoIdentityKey(user_id.to_string()))
    }

    /// Private key of the generation matching `public_key`
    pub fn private_key_for(&self, user_id: &str, public_key: &PublicKey) -> Result<PrivateKey> {
        Ok(self.key_record_for(user_id, public_key)?.private_key)
    }

    /// Record that a key took part in a key exchange
    pub fn touch(&self, key_id: &str) -> Result<()> {
        if self.store.touch_identity_key(key_id, self.clock.now())? {
            tracing::debug!(key_id, "identity key used");
            Ok(())
        } else {
            Err(Error::NoIdentityKey(key_id.to_string()))
        }
    }

    /// Generate, persist and activate a new generation. Caller holds the user lock.
    fn new_generation(&self, user_id: &str) -> Result<IdentityKeyRecord> {
        let pair = IdentityKeyPair::generate(&self.rng)?;
        let now = self.clock.now();

        let record = IdentityKeyRecord {
            key_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            fingerprint: compute_fingerprint(&pair.public),
            public_key: pair.public,
            private_key: pair.private.clone(),
            is_active: true,
            last_used: None,
            created_at: now,
            updated_at: now,
        };

        self.store.activate_identity_key(&record)?;
        Ok(record)
    }
}

impl std::fmt::Debug for IdentityKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyManager").finish_non_exhaustive()
    }
}

fn check_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(Error::InvalidInput("user id must not be empty".into()));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyStore;
    use crate::time::ManualClock;
    use std::collections::HashSet;

    fn manager() -> (IdentityKeyManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = IdentityKeyManager::new(Arc::new(MemoryKeyStore::new()), clock.clone());
        (manager, clock)
    }

    #[test]
    fn test_fingerprint_format() {
        let (manager, _) = manager();
        let pair = manager.generate_identity_key_pair().unwrap();
        let fp = manager.compute_fingerprint(&pair.public);

        let blocks: Vec<&str> = fp.split(':').collect();
        assert_eq!(blocks.len(), 16);
        assert!(blocks.iter().all(|b| b.len() == 4));
        assert!(fp.chars().all(|c| c == ':' || c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let pair = IdentityKeyPair::generate(&SecureRandom::new()).unwrap();
        assert_eq!(compute_fingerprint(&pair.public), compute_fingerprint(&pair.public));

        let zero = PublicKey::from_bytes([0u8; 32]);
        // SHA-256 of 32 zero bytes
        assert!(compute_fingerprint(&zero).starts_with("6668:7AAD:F862:BD77"));
    }

    #[test]
    fn test_fingerprints_distinct() {
        let (manager, _) = manager();
        let fingerprints: HashSet<String> = (0..1000)
            .map(|_| {
                let pair = manager.generate_identity_key_pair().unwrap();
                manager.compute_fingerprint(&pair.public)
            })
            .collect();
        assert_eq!(fingerprints.len(), 1000);
    }

    #[test]
    fn test_verify_fingerprint() {
        let (manager, _) = manager();
        let a = manager.generate_identity_key_pair().unwrap();
        let b = manager.generate_identity_key_pair().unwrap();
        let fp = manager.compute_fingerprint(&a.public);

        assert!(manager.verify_fingerprint(&a.public, &fp));
        assert!(!manager.verify_fingerprint(&b.public, &fp));
        assert!(!manager.verify_fingerprint(&a.public, &fp[..10]));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (manager, _) = manager();

        let first = manager.get_or_create_active_key("alice").unwrap();
        let second = manager.get_or_create_active_key("alice").unwrap();

        assert_eq!(first.key_id, second.key_id);
        assert_eq!(manager.key_history("alice").unwrap().len(), 1);
        assert_eq!(manager.public_key_for("alice").unwrap(), first.public_key);
    }

    #[test]
    fn test_rotation_keeps_history() {
        let (manager, clock) = manager();

        let first = manager.get_or_create_active_key("alice").unwrap();
        clock.advance(60);
        let second = manager.rotate_key("alice").unwrap();

        assert_ne!(first.public_key, second.public_key);

        let history = manager.key_history("alice").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_active);
        assert_eq!(history[0].updated_at, 1_060);
        assert!(history[1].is_active);

        let old_private = manager.private_key_for("alice", &first.public_key).unwrap();
        assert_eq!(old_private, first.private_key);
        assert_eq!(manager.active_key("alice").unwrap().unwrap().key_id, second.key_id);
    }

    #[test]
    fn test_unknown_user() {
        let (manager, _) = manager();
        assert!(matches!(manager.public_key_for("ghost"), Err(Error::NoIdentityKey(_))));
        assert!(manager.active_key("ghost").unwrap().is_none());
        assert!(matches!(manager.touch("missing"), Err(Error::NoIdentityKey(_))));
        assert!(matches!(manager.rotate_key(""), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_touch_updates_last_used() {
        let (manager, clock) = manager();
        let record = manager.get_or_create_active_key("alice").unwrap();
        assert_eq!(record.last_used, None);

        clock.advance(5);
        manager.touch(&record.key_id).unwrap();

        assert_eq!(manager.active_key("alice").unwrap().unwrap().last_used, Some(1_005));
    }

    #[test]
    fn test_concurrent_rotation_leaves_one_active() {
        let (manager, _) = manager();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || manager.rotate_key("alice").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = manager.key_history("alice").unwrap();
        assert_eq!(history.len(), 16);
        assert_eq!(history.iter().filter(|r| r.is_active).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_generation_and_rotation() {
        let (manager, _) = manager();

        let pair = manager.generate_identity_key_pair_async().await.unwrap();
        assert_eq!(pair.private.public_key(), pair.public);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.rotate_key_async("bob").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let history = manager.key_history("bob").unwrap();
        assert_eq!(history.len(), 8);
        assert_eq!(history.iter().filter(|r| r.is_active).count(), 1);
    }
}
