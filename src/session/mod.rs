//! # Session Module
//!
//! Per-conversation session keys: generation, per-participant wrapping,
//! expiry and membership changes.
//!
//! ## Session State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SESSION KEY STATES                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │            create_session_key                                           │
//! │   NONE ─────────────────────────► ACTIVE                                │
//! │                                    │  │                                 │
//! │                  now >= expires_at │  │ change_participants /           │
//! │                                    │  │ revoke_session                  │
//! │                                    ▼  ▼                                 │
//! │                              EXPIRED  REVOKED                           │
//! │                                    │  │                                 │
//! │                                    └──┴──► ACTIVE (new record)          │
//! │                                                                         │
//! │  Every transition out of ACTIVE deactivates the record; nothing is     │
//! │  deleted, so backlog stays decryptable.                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Creating a Session Key
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  [per-conversation lock]                                                │
//! │                                                                         │
//! │  if active, unexpired and same participants/keys: return it            │
//! │                                                                         │
//! │  session_key = 32 random bytes                                          │
//! │  for (user, public_key) in participants:                               │
//! │      wrapped[user] = wrap_key(session_key, public_key, conversation_id)│
//! │  store.activate_session_key(record)   (prior epoch deactivated)        │
//! │                                                                         │
//! │  The plaintext key is returned on the new record only; the store       │
//! │  never sees it.                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod envelope;

pub use envelope::EncryptedMessage;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CryptoConfig;
use crate::crypto::{unwrap_key, wrap_key, CipherEngine, PrivateKey, PublicKey, SecureRandom, SessionKey};
use crate::error::{Diagnostic, Error, Result};
use crate::locks::KeyedLocks;
use crate::storage::{KeyStore, SessionKeyRecord};
use crate::time::Clock;

/// Participant user id → that user's current identity public key
pub type ParticipantKeys = BTreeMap<String, PublicKey>;

/// Where a conversation stands in the session-key lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session key was ever created
    None,
    /// An unexpired active record exists
    Active,
    /// The latest record ran past its expiry
    Expired,
    /// The latest record was revoked by a membership change
    Revoked,
}

/// Generates, wraps and tracks per-conversation session keys
///
/// Cheap to clone; clones share the store and the per-conversation locks.
#[derive(Clone)]
pub struct SessionKeyBroker {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    engine: CipherEngine,
    rng: SecureRandom,
    default_ttl: Duration,
}

impl SessionKeyBroker {
    /// Create a broker over a store
    pub fn new(config: &CryptoConfig, store: Arc<dyn KeyStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            locks: Arc::new(KeyedLocks::new()),
            engine: CipherEngine::new(config),
            rng: SecureRandom::new(),
            default_ttl: Duration::from_secs(config.default_session_ttl_secs.max(1) as u64),
        }
    }

    /// Session lifetime from the configuration
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // ========================================================================
    // CREATION
    // ========================================================================

    /// The conversation's session key for these participants
    ///
    /// Reuses the active epoch when it is unexpired and holds one copy per
    /// participant under that participant's current public key. Otherwise
    /// the active epoch is deactivated (revoked if membership changed) and a
    /// new one is created. When several callers race on a brand-new
    /// conversation, the first creates the epoch and the rest reuse it.
    ///
    /// Only a newly created record carries the plaintext key; a reused one
    /// must be unwrapped by a participant.
    pub fn create_session_key(
        &self,
        conversation_id: &str,
        participants: &ParticipantKeys,
        ttl: Duration,
    ) -> Result<SessionKeyRecord> {
        let ttl_secs = check_request(conversation_id, participants, ttl)?;
        self.locks.with_lock(conversation_id, || {
            let now = self.clock.now();

            if let Some(active) = self.store.active_session_key(conversation_id)? {
                if active.is_usable_at(now) {
                    if covers_exactly(&active, participants) {
                        tracing::debug!(
                            conversation_id,
                            session_id = %active.session_id,
                            "reusing active session key"
                        );
                        return Ok(active);
                    }
                    // Membership or a participant's identity key changed.
                    self.store.deactivate_session_key(&active.session_id, now, true)?;
                    tracing::info!(
                        conversation_id,
                        session_id = %active.session_id,
                        "revoked session key after participant change"
                    );
                } else {
                    self.store.deactivate_session_key(&active.session_id, now, false)?;
                }
            }

            self.create_locked(conversation_id, participants, ttl_secs)
        })
    }

    /// Start a new epoch even if the active one is still usable
    ///
    /// The prior epoch is deactivated without being revoked.
    pub fn rotate_session_key(
        &self,
        conversation_id: &str,
        participants: &ParticipantKeys,
        ttl: Duration,
    ) -> Result<SessionKeyRecord> {
        let ttl_secs = check_request(conversation_id, participants, ttl)?;
        self.locks
            .with_lock(conversation_id, || self.create_locked(conversation_id, participants, ttl_secs))
    }

    /// Revoke the active epoch and start a new one for the new membership
    pub fn change_participants(
        &self,
        conversation_id: &str,
        participants: &ParticipantKeys,
        ttl: Duration,
    ) -> Result<SessionKeyRecord> {
        let ttl_secs = check_request(conversation_id, participants, ttl)?;
        self.locks.with_lock(conversation_id, || {
            if let Some(active) = self.store.active_session_key(conversation_id)? {
                self.store
                    .deactivate_session_key(&active.session_id, self.clock.now(), true)?;
                tracing::info!(
                    conversation_id,
                    session_id = %active.session_id,
                    "revoked session key after participant change"
                );
            }
            self.create_locked(conversation_id, participants, ttl_secs)
        })
    }

    /// Revoke the active epoch without replacing it
    ///
    /// Returns false if the conversation had no active epoch.
    pub fn revoke_session(&self, conversation_id: &str) -> Result<bool> {
        self.locks.with_lock(conversation_id, || {
            let Some(active) = self.store.active_session_key(conversation_id)? else {
                return Ok(false);
            };
            let revoked = self
                .store
                .deactivate_session_key(&active.session_id, self.clock.now(), true)?;
            if revoked {
                tracing::info!(conversation_id, session_id = %active.session_id, "revoked session key");
            }
            Ok(revoked)
        })
    }

    fn create_locked(
        &self,
        conversation_id: &str,
        participants: &ParticipantKeys,
        ttl_secs: i64,
    ) -> Result<SessionKeyRecord> {
        let session_key = self.rng.session_key()?;

        let mut wrapped = BTreeMap::new();
        for (user_id, public_key) in participants {
            let copy = wrap_key(
                &self.engine,
                &self.rng,
                &session_key,
                public_key,
                conversation_id.as_bytes(),
            )?;
            wrapped.insert(user_id.clone(), copy);
        }

        let now = self.clock.now();
        let mut record = SessionKeyRecord {
            session_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            participants: participants.keys().cloned().collect::<BTreeSet<_>>(),
            encrypted_session_key_by_participant: wrapped,
            expires_at: now.saturating_add(ttl_secs),
            is_active: true,
            revoked_at: None,
            created_at: now,
            updated_at: now,
            session_key: None,
        };

        self.store.activate_session_key(&record)?;

        tracing::info!(
            conversation_id,
            session_id = %record.session_id,
            participants = record.participants.len(),
            expires_at = record.expires_at,
            "created session key"
        );

        record.session_key = Some(session_key);
        Ok(record)
    }

    // ========================================================================
    // RETRIEVAL
    // ========================================================================

    /// Recover the plaintext session key from a participant's wrapped copy
    ///
    /// ## Errors
    ///
    /// `KeyExchangeFailed` if `user_id` is not a participant, the copy is
    /// malformed, or it was wrapped under a different key than `private_key`.
    pub fn unwrap_session_key(
        &self,
        record: &SessionKeyRecord,
        user_id: &str,
        private_key: &PrivateKey,
    ) -> Result<SessionKey> {
        let wrapped = record
            .encrypted_session_key_by_participant
            .get(user_id)
            .ok_or_else(|| {
                Error::KeyExchangeFailed(Diagnostic::new(format!(
                    "{} is not a participant of session {}",
                    user_id, record.session_id
                )))
            })?;

        let key = unwrap_key(&self.engine, wrapped, private_key, record.conversation_id.as_bytes())?;
        tracing::debug!(user_id, session_id = %record.session_id, "unwrapped session key");
        Ok(key)
    }

    /// The conversation's usable epoch
    ///
    /// ## Errors
    ///
    /// - `SessionExpired` if the active epoch has expired; it is deactivated
    ///   on the way out, so the caller should create a new one
    /// - `NoActiveSession` if there is no epoch to return
    pub fn get_active_session_key(&self, conversation_id: &str) -> Result<SessionKeyRecord> {
        let now = self.clock.now();

        match self.store.active_session_key(conversation_id)? {
            Some(record) if record.is_usable_at(now) => Ok(record),
            Some(record) => {
                self.store.deactivate_session_key(&record.session_id, now, false)?;
                tracing::warn!(
                    conversation_id,
                    session_id = %record.session_id,
                    expires_at = record.expires_at,
                    "session key expired"
                );
                Err(Error::SessionExpired(conversation_id.to_string()))
            }
            None => match self.session_state(conversation_id)? {
                SessionState::Expired => Err(Error::SessionExpired(conversation_id.to_string())),
                _ => Err(Error::NoActiveSession(conversation_id.to_string())),
            },
        }
    }

    /// Where the conversation stands
    pub fn session_state(&self, conversation_id: &str) -> Result<SessionState> {
        let now = self.clock.now();

        if let Some(active) = self.store.active_session_key(conversation_id)? {
            return Ok(if active.is_usable_at(now) {
                SessionState::Active
            } else {
                SessionState::Expired
            });
        }

        let history = self.store.session_keys(conversation_id)?;
        Ok(match history.last() {
            None => SessionState::None,
            Some(latest) if latest.revoked_at.is_some() => SessionState::Revoked,
            Some(_) => SessionState::Expired,
        })
    }

    /// Every epoch of the conversation, oldest first
    pub fn session_history(&self, conversation_id: &str) -> Result<Vec<SessionKeyRecord>> {
        self.store.session_keys(conversation_id)
    }

    /// Look up an epoch by id, active or not
    pub fn session_by_id(&self, session_id: &str) -> Result<Option<SessionKeyRecord>> {
        self.store.session_key(session_id)
    }
}

impl std::fmt::Debug for SessionKeyBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyBroker")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

/// Validate a creation request and return the lifetime in seconds
fn check_request(conversation_id: &str, participants: &ParticipantKeys, ttl: Duration) -> Result<i64> {
    if conversation_id.is_empty() {
        return Err(Error::InvalidInput("conversation id must not be empty".into()));
    }
    if participants.is_empty() {
        return Err(Error::InvalidInput("a session needs at least one participant".into()));
    }
    let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    if secs == 0 {
        return Err(Error::InvalidInput("session ttl must be at least one second".into()));
    }
    Ok(secs)
}

/// Whether `record` has a copy for exactly these participants under these keys
fn covers_exactly(record: &SessionKeyRecord, participants: &ParticipantKeys) -> bool {
    record.encrypted_session_key_by_participant.len() == participants.len()
        && participants.iter().all(|(user_id, public_key)| {
            record
                .encrypted_session_key_by_participant
                .get(user_id)
                .is_some_and(|w| w.recipient == *public_key)
        })
}

// ============================================================================
// TESTS
// ============================================================================
