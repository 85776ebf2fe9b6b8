//! Persisted record shapes.
//!
//! Both records derive serde with camelCase field names so the host can pick
//! its own document format. Keys serialize as hex, wrapped keys as base64.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crypto::{PrivateKey, PublicKey, SessionKey, WrappedKey};

/// One generation of a user's identity key pair
///
/// At most one record per user has `is_active == true`. Deactivated records
/// are kept so historical session keys can still be unwrapped.
///
/// `private_key` is stored unencrypted; hosts that need it sealed at rest
/// use `seal_private_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityKeyRecord {
    /// Unique record id
    pub key_id: String,
    /// Owning user
    pub user_id: String,
    /// X25519 public key
    pub public_key: PublicKey,
    /// X25519 private key (never part of a response payload)
    pub private_key: PrivateKey,
    /// Fingerprint of `public_key`
    pub fingerprint: String,
    /// Whether this is the user's current generation
    pub is_active: bool,
    /// Last time the key took part in a key exchange
    pub last_used: Option<i64>,
    /// Creation time
    pub created_at: i64,
    /// Last modification time
    pub updated_at: i64,
}

impl IdentityKeyRecord {
    /// The response-safe view without the private key
    pub fn public_view(&self) -> PublicIdentityKey {
        PublicIdentityKey {
            key_id: self.key_id.clone(),
            user_id: self.user_id.clone(),
            public_key: self.public_key,
            fingerprint: self.fingerprint.clone(),
            is_active: self.is_active,
            last_used: self.last_used,
            created_at: self.created_at,
        }
    }
}

/// Identity key as exposed to other users and API responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PublicIdentityKey {
    pub key_id: String,
    pub user_id: String,
    pub public_key: PublicKey,
    pub fingerprint: String,
    pub is_active: bool,
    pub last_used: Option<i64>,
    pub created_at: i64,
}

/// One session-key epoch of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyRecord {
    /// Unique epoch id, referenced by message envelopes
    pub session_id: String,
    /// Conversation this epoch belongs to
    pub conversation_id: String,
    /// Participants at creation time; never changes for this record
    pub participants: BTreeSet<String>,
    /// One wrapped copy of the session key per participant
    pub encrypted_session_key_by_participant: BTreeMap<String, WrappedKey>,
    /// Expiry time; an active record is only usable while `now < expires_at`
    pub expires_at: i64,
    /// Whether this is the conversation's current epoch
    pub is_active: bool,
    /// Set when a membership change or explicit revocation ended the epoch
    pub revoked_at: Option<i64>,
    /// Creation time
    pub created_at: i64,
    /// Last modification time
    pub updated_at: i64,
    /// Plaintext key, present only on the record returned by creation
    #[serde(skip)]
    pub session_key: Option<SessionKey>,
}

impl SessionKeyRecord {
    /// Whether the record is active and unexpired at `now`
    pub fn is_usable_at(&self, now: i64) -> bool {
        self.is_active && now < self.expires_at
    }

    /// Whether `user_id` holds a wrapped copy
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.encrypted_session_key_by_participant.contains_key(user_id)
    }

    /// Copy suitable for persistence, with the plaintext key removed
    pub fn without_secret(&self) -> Self {
        Self {
            session_key: None,
            ..self.clone()
        }
    }
}
