//! # Database
//!
//! SQLite implementation of [`KeyStore`].
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │ Key managers    │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │ SqliteKeyStore  │  KeyStore implementation                          │
//! │  │   (this file)   │  - Activation in one transaction                  │
//! │  │                 │  - JSON columns for participant maps              │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SQLite DB     │  Storage                                          │
//! │  │   (file or      │  - In-memory for tests                            │
//! │  │    memory)      │  - File for production                            │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use zeroize::Zeroizing;

use super::records::{IdentityKeyRecord, SessionKeyRecord};
use super::schema;
use super::KeyStore;
use crate::crypto::{PrivateKey, PublicKey, WrappedKey};
use crate::error::{Error, Result};

const IDENTITY_COLUMNS: &str =
    "key_id, user_id, public_key, private_key, fingerprint, is_active, last_used, created_at, updated_at";

const SESSION_COLUMNS: &str =
    "session_id, conversation_id, participants, wrapped_keys, expires_at, is_active, revoked_at, created_at, updated_at";

/// Key store backed by SQLite
///
/// The connection sits behind a mutex, so every operation (including the
/// two-statement activations) runs without interleaving.
#[derive(Debug)]
pub struct SqliteKeyStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyStore {
    /// Open or create a key store
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e).into()))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e).into())
            })?,
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> =
            match conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0)) {
                Ok(v) => Some(v),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.starts_with("no such table") => None,
                Err(e) => {
                    return Err(Error::DatabaseError(
                        format!("Failed to read schema version: {}", e).into(),
                    ))
                }
            };

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e).into()))?;

                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::DatabaseError(format!("Failed to set schema version: {}", e).into())
                })?;

                tracing::info!("Key store schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(
                    format!(
                        "Key store schema version {} is newer than supported {}",
                        v,
                        schema::SCHEMA_VERSION
                    )
                    .into(),
                ));
            }
            Some(v) => {
                tracing::debug!("Key store schema is at version {}", v);
            }
        }

        Ok(())
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

struct IdentityRow {
    key_id: String,
    user_id: String,
    public_key: String,
    private_key: Zeroizing<String>,
    fingerprint: String,
    is_active: bool,
    last_used: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl IdentityRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key_id: row.get(0)?,
            user_id: row.get(1)?,
            public_key: row.get(2)?,
            private_key: Zeroizing::new(row.get(3)?),
            fingerprint: row.get(4)?,
            is_active: row.get(5)?,
            last_used: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<IdentityKeyRecord> {
        let private_bytes = Zeroizing::new(
            hex::decode(self.private_key.as_str())
                .map_err(|e| Error::SerializationError(format!("Invalid private key hex: {}", e).into()))?,
        );

        Ok(IdentityKeyRecord {
            key_id: self.key_id,
            user_id: self.user_id,
            public_key: PublicKey::from_hex(&self.public_key)?,
            private_key: PrivateKey::from_slice(&private_bytes)?,
            fingerprint: self.fingerprint,
            is_active: self.is_active,
            last_used: self.last_used,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct SessionRow {
    session_id: String,
    conversation_id: String,
    participants: String,
    wrapped_keys: String,
    expires_at: i64,
    is_active: bool,
    revoked_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            conversation_id: row.get(1)?,
            participants: row.get(2)?,
            wrapped_keys: row.get(3)?,
            expires_at: row.get(4)?,
            is_active: row.get(5)?,
            revoked_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<SessionKeyRecord> {
        let participants: BTreeSet<String> = serde_json::from_str(&self.participants)?;
        let wrapped: BTreeMap<String, WrappedKey> = serde_json::from_str(&self.wrapped_keys)?;

        Ok(SessionKeyRecord {
            session_id: self.session_id,
            conversation_id: self.conversation_id,
            participants,
            encrypted_session_key_by_participant: wrapped,
            expires_at: self.expires_at,
            is_active: self.is_active,
            revoked_at: self.revoked_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            session_key: None,
        })
    }
}

fn collect_identities(rows: Vec<IdentityRow>) -> Result<Vec<IdentityKeyRecord>> {
    rows.into_iter().map(IdentityRow::into_record).collect()
}

fn collect_sessions(rows: Vec<SessionRow>) -> Result<Vec<SessionKeyRecord>> {
    rows.into_iter().map(SessionRow::into_record).collect()
}

// ============================================================================
// KEY STORE
// ============================================================================

impl KeyStore for SqliteKeyStore {
    fn activate_identity_key(&self, record: &IdentityKeyRecord) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e).into()))?;

        tx.execute(
            "UPDATE identity_keys SET is_active = 0, updated_at = ? WHERE user_id = ? AND is_active = 1",
            params![record.created_at, record.user_id],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to deactivate identity key: {}", e).into()))?;

        let private_hex = Zeroizing::new(hex::encode(record.private_key.as_bytes()));
        tx.execute(
            &format!(
                "INSERT INTO identity_keys ({}) VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)",
                IDENTITY_COLUMNS
            ),
            params![
                record.key_id,
                record.user_id,
                record.public_key.to_hex(),
                private_hex.as_str(),
                record.fingerprint,
                record.last_used,
                record.created_at,
                record.updated_at,
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to store identity key: {}", e).into()))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit identity key: {}", e).into()))?;

        Ok(())
    }

    fn active_identity_key(&self, user_id: &str) -> Result<Option<IdentityKeyRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            &format!(
                "SELECT {} FROM identity_keys WHERE user_id = ? AND is_active = 1",
                IDENTITY_COLUMNS
            ),
            params![user_id],
            IdentityRow::from_row,
        );

        match result {
            Ok(row) => Ok(Some(row.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get identity key: {}", e).into())),
        }
    }

    fn identity_keys(&self, user_id: &str) -> Result<Vec<IdentityKeyRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM identity_keys WHERE user_id = ? ORDER BY created_at, rowid",
                IDENTITY_COLUMNS
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e).into()))?;

        let rows = stmt
            .query_map(params![user_id], IdentityRow::from_row)
            .map_err(|e| Error::DatabaseError(format!("Failed to query identity keys: {}", e).into()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read identity key: {}", e).into()))?;

        collect_identities(rows)
    }

    fn identity_key(&self, key_id: &str) -> Result<Option<IdentityKeyRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            &format!("SELECT {} FROM identity_keys WHERE key_id = ?", IDENTITY_COLUMNS),
            params![key_id],
            IdentityRow::from_row,
        );

        match result {
            Ok(row) => Ok(Some(row.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get identity key: {}", e).into())),
        }
    }

    fn touch_identity_key(&self, key_id: &str, at: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE identity_keys SET last_used = ?, updated_at = ? WHERE key_id = ?",
                params![at, at, key_id],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to touch identity key: {}", e).into()))?;

        Ok(rows > 0)
    }

    fn activate_session_key(&self, record: &SessionKeyRecord) -> Result<()> {
        let participants = serde_json::to_string(&record.participants)?;
        let wrapped = serde_json::to_string(&record.encrypted_session_key_by_participant)?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e).into()))?;

        tx.execute(
            "UPDATE session_keys SET is_active = 0, updated_at = ? WHERE conversation_id = ? AND is_active = 1",
            params![record.created_at, record.conversation_id],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to deactivate session key: {}", e).into()))?;

        tx.execute(
            &format!(
                "INSERT INTO session_keys ({}) VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)",
                SESSION_COLUMNS
            ),
            params![
                record.session_id,
                record.conversation_id,
                participants,
                wrapped,
                record.expires_at,
                record.revoked_at,
                record.created_at,
                record.updated_at,
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to store session key: {}", e).into()))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit session key: {}", e).into()))?;

        Ok(())
    }

    fn active_session_key(&self, conversation_id: &str) -> Result<Option<SessionKeyRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            &format!(
                "SELECT {} FROM session_keys WHERE conversation_id = ? AND is_active = 1",
                SESSION_COLUMNS
            ),
            params![conversation_id],
            SessionRow::from_row,
        );

        match result {
            Ok(row) => Ok(Some(row.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get session key: {}", e).into())),
        }
    }

    fn session_keys(&self, conversation_id: &str) -> Result<Vec<SessionKeyRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM session_keys WHERE conversation_id = ? ORDER BY created_at, rowid",
                SESSION_COLUMNS
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e).into()))?;

        let rows = stmt
            .query_map(params![conversation_id], SessionRow::from_row)
            .map_err(|e| Error::DatabaseError(format!("Failed to query session keys: {}", e).into()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read session key: {}", e).into()))?;

        collect_sessions(rows)
    }

    fn session_key(&self, session_id: &str) -> Result<Option<SessionKeyRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            &format!("SELECT {} FROM session_keys WHERE session_id = ?", SESSION_COLUMNS),
            params![session_id],
            SessionRow::from_row,
        );

        match result {
            Ok(row) => Ok(Some(row.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get session key: {}", e).into())),
        }
    }

    fn deactivate_session_key(&self, session_id: &str, at: i64, revoked: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let revoked_at = revoked.then_some(at);

        let rows = conn
            .execute(
                "UPDATE session_keys
                 SET is_active = 0, updated_at = ?, revoked_at = COALESCE(?, revoked_at)
                 WHERE session_id = ? AND is_active = 1",
                params![at, revoked_at, session_id],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to deactivate session key: {}", e).into()))?;

        Ok(rows > 0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{identity_record, session_record};

    #[test]
    fn test_open_in_memory() {
        let store = SqliteKeyStore::open(None).unwrap();
        assert!(store.active_identity_key("nobody").unwrap().is_none());
        assert!(store.session_keys("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_identity_round_trip() {
        let store = SqliteKeyStore::open(None).unwrap();
        let record = identity_record("k1", "alice", 10);

        store.activate_identity_key(&record).unwrap();

        let loaded = store.identity_key("k1").unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_activation_keeps_one_active_identity() {
        let store = SqliteKeyStore::open(None).unwrap();

        store.activate_identity_key(&identity_record("k1", "alice", 10)).unwrap();
        store.activate_identity_key(&identity_record("k2", "alice", 20)).unwrap();

        let history = store.identity_keys("alice").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].key_id, "k1");
        assert!(!history[0].is_active);
        assert_eq!(history[0].updated_at, 20);
        assert!(history[1].is_active);

        assert!(store.touch_identity_key("k1", 30).unwrap());
        assert_eq!(store.identity_key("k1").unwrap().unwrap().last_used, Some(30));
    }

    #[test]
    fn test_unique_index_rejects_second_active_row() {
        let store = SqliteKeyStore::open(None).unwrap();
        store.activate_identity_key(&identity_record("k1", "alice", 10)).unwrap();

        let conn = store.conn.lock();
        let result = conn.execute(
            "INSERT INTO identity_keys (key_id, user_id, public_key, private_key, fingerprint, is_active, created_at, updated_at)
             VALUES ('k2', 'alice', '', '', '', 1, 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_session_round_trip_strips_plaintext() {
        let store = SqliteKeyStore::open(None).unwrap();
        let record = session_record("s1", "conv", 10);

        store.activate_session_key(&record).unwrap();

        let loaded = store.session_key("s1").unwrap().unwrap();
        assert!(loaded.session_key.is_none());
        assert!(loaded.is_active);
        assert_eq!(loaded.participants, record.participants);
        assert_eq!(
            loaded.encrypted_session_key_by_participant,
            record.encrypted_session_key_by_participant
        );
    }

    #[test]
    fn test_session_deactivation() {
        let store = SqliteKeyStore::open(None).unwrap();

        store.activate_session_key(&session_record("s1", "conv", 10)).unwrap();
        store.activate_session_key(&session_record("s2", "conv", 20)).unwrap();

        assert_eq!(store.active_session_key("conv").unwrap().unwrap().session_id, "s2");
        assert!(!store.session_key("s1").unwrap().unwrap().is_active);

        assert!(store.deactivate_session_key("s2", 30, false).unwrap());
        let s2 = store.session_key("s2").unwrap().unwrap();
        assert!(!s2.is_active);
        assert_eq!(s2.revoked_at, None);

        assert!(!store.deactivate_session_key("s2", 40, true).unwrap());
        assert!(store.active_session_key("conv").unwrap().is_none());
    }

    #[test]
    fn test_unreadable_schema_version_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let path = path.to_str().unwrap();

        {
            let conn = Connection::open(path).unwrap();
            conn.execute_batch("CREATE TABLE schema_version (revision INTEGER);").unwrap();
        }

        let err = SqliteKeyStore::open(Some(path)).unwrap_err();
        assert!(matches!(err, Error::DatabaseError(_)));
        assert!(err.diagnostic().unwrap().contains("Failed to read schema version"));

        let conn = Connection::open(path).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'identity_keys'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn test_not_a_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0xA5u8; 4096]).unwrap();

        let err = SqliteKeyStore::open(Some(path.to_str().unwrap())).unwrap_err();
        assert!(matches!(err, Error::DatabaseError(_)));
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteKeyStore::open(Some(path)).unwrap();
            store.activate_identity_key(&identity_record("k1", "alice", 10)).unwrap();
        }

        let store = SqliteKeyStore::open(Some(path)).unwrap();
        assert_eq!(store.active_identity_key("alice").unwrap().unwrap().key_id, "k1");
    }
}
