//! # Storage Module
//!
//! Persistence for identity-key and session-key records.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  IdentityKeyManager ──┐                                                 │
//! │                       ├──► Arc<dyn KeyStore>                            │
//! │  SessionKeyBroker ────┘          │                                      │
//! │                                  ├──► MemoryKeyStore  (tests, ephemeral)│
//! │                                  └──► SqliteKeyStore  (file or memory)  │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Activation is atomic                                           │   │
//! │  │                                                                 │   │
//! │  │  activate_identity_key(r):                                     │   │
//! │  │    deactivate every active record of r.user_id                 │   │
//! │  │    insert r                                                    │   │
//! │  │                                                                 │   │
//! │  │  activate_session_key(r):                                      │   │
//! │  │    deactivate every active record of r.conversation_id         │   │
//! │  │    insert r (plaintext session key stripped)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Records are never deleted; deactivated generations stay readable      │
//! │  for decrypting backlog.                                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod database;
mod memory;
mod records;
mod schema;

pub use database::SqliteKeyStore;
pub use memory::MemoryKeyStore;
pub use records::{IdentityKeyRecord, PublicIdentityKey, SessionKeyRecord};

use crate::error::Result;

/// Document store for key records
///
/// Implementations must make each `activate_*` call atomic with respect to
/// every other call on the same store.
pub trait KeyStore: Send + Sync {
    // ========================================================================
    // IDENTITY KEYS
    // ========================================================================

    /// Deactivate the user's current generation (if any) and insert `record`
    fn activate_identity_key(&self, record: &IdentityKeyRecord) -> Result<()>;

    /// The user's active generation
    fn active_identity_key(&self, user_id: &str) -> Result<Option<IdentityKeyRecord>>;

    /// Every generation of the user's key, oldest first
    fn identity_keys(&self, user_id: &str) -> Result<Vec<IdentityKeyRecord>>;

    /// Look up a generation by record id
    fn identity_key(&self, key_id: &str) -> Result<Option<IdentityKeyRecord>>;

    /// Set `last_used`; returns false if the key does not exist
    fn touch_identity_key(&self, key_id: &str, at: i64) -> Result<bool>;

    // ========================================================================
    // SESSION KEYS
    // ========================================================================

    /// Deactivate the conversation's current epoch (if any) and insert `record`
    fn activate_session_key(&self, record: &SessionKeyRecord) -> Result<()>;

    /// The conversation's active epoch, expired or not
    fn active_session_key(&self, conversation_id: &str) -> Result<Option<SessionKeyRecord>>;

    /// Every epoch of the conversation, oldest first
    fn session_keys(&self, conversation_id: &str) -> Result<Vec<SessionKeyRecord>>;

    /// Look up an epoch by session id
    fn session_key(&self, session_id: &str) -> Result<Option<SessionKeyRecord>>;

    /// Deactivate one epoch, optionally marking it revoked
    ///
    /// Returns false if the epoch does not exist or was already inactive.
    fn deactivate_session_key(&self, session_id: &str, at: i64, revoked: bool) -> Result<bool>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{BTreeMap, BTreeSet};

    use super::{IdentityKeyRecord, SessionKeyRecord};
    use crate::config::CryptoConfig;
    use crate::crypto::{wrap_key, CipherEngine, IdentityKeyPair, SecureRandom};

    pub fn identity_record(key_id: &str, user_id: &str, at: i64) -> IdentityKeyRecord {
        let kp = IdentityKeyPair::generate(&SecureRandom::new()).unwrap();
        IdentityKeyRecord {
            key_id: key_id.into(),
            user_id: user_id.into(),
            public_key: kp.public,
            private_key: kp.private.clone(),
            fingerprint: format!("FP-{}", key_id),
            is_active: true,
            last_used: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn session_record(session_id: &str, conversation_id: &str, at: i64) -> SessionKeyRecord {
        let rng = SecureRandom::new();
        let engine = CipherEngine::new(&CryptoConfig::for_tests());
        let alice = IdentityKeyPair::generate(&rng).unwrap();
        let session_key = rng.session_key().unwrap();
        let wrapped = wrap_key(&engine, &rng, &session_key, &alice.public, conversation_id.as_bytes()).unwrap();

        SessionKeyRecord {
            session_id: session_id.into(),
            conversation_id: conversation_id.into(),
            participants: BTreeSet::from(["alice".to_string()]),
            encrypted_session_key_by_participant: BTreeMap::from([("alice".to_string(), wrapped)]),
            expires_at: at + 3600,
            is_active: true,
            revoked_at: None,
            created_at: at,
            updated_at: at,
            session_key: Some(session_key),
        }
    }
}
