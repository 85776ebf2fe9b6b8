//! # Database Schema
//!
//! SQL schema definitions for the key store.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐              ┌──────────────────────┐              │
//! │  │  identity_keys  │              │     session_keys     │              │
//! │  ├─────────────────┤              ├──────────────────────┤              │
//! │  │ key_id          │              │ session_id           │              │
//! │  │ user_id         │              │ conversation_id      │              │
//! │  │ public_key      │◄─ wrapped ───│ participants (JSON)  │              │
//! │  │ private_key     │   under      │ wrapped_keys (JSON)  │              │
//! │  │ fingerprint     │              │ expires_at           │              │
//! │  │ is_active       │              │ is_active            │              │
//! │  │ last_used       │              │ revoked_at           │              │
//! │  │ created_at      │              │ created_at           │              │
//! │  │ updated_at      │              │ updated_at           │              │
//! │  └─────────────────┘              └──────────────────────┘              │
//! │                                                                         │
//! │  Partial unique indexes allow one active row per user_id and one       │
//! │  active row per conversation_id.                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Identity keys table
-- One row per key generation; rows are never deleted
CREATE TABLE IF NOT EXISTS identity_keys (
    key_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    -- X25519 public key (hex encoded, 64 chars)
    public_key TEXT NOT NULL,
    -- X25519 private key (hex encoded, 64 chars, not encrypted)
    private_key TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    last_used INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identity_keys_user ON identity_keys(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_identity_keys_one_active
    ON identity_keys(user_id) WHERE is_active = 1;

-- Session keys table
-- One row per conversation key epoch; plaintext keys are never stored
CREATE TABLE IF NOT EXISTS session_keys (
    session_id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    -- JSON array of user ids
    participants TEXT NOT NULL,
    -- JSON object: user id -> base64 wrapped key
    wrapped_keys TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    revoked_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_session_keys_conversation ON session_keys(conversation_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_session_keys_one_active
    ON session_keys(conversation_id) WHERE is_active = 1;
"#;
