//! In-memory key store.

use parking_lot::RwLock;

use super::{IdentityKeyRecord, KeyStore, SessionKeyRecord};
use crate::error::Result;

#[derive(Default)]
struct Tables {
    identity_keys: Vec<IdentityKeyRecord>,
    session_keys: Vec<SessionKeyRecord>,
}

/// Key store backed by process memory
///
/// Records are kept in insertion order, so history queries come back
/// oldest first without sorting.
#[derive(Default)]
pub struct MemoryKeyStore {
    tables: RwLock<Tables>,
}

impl MemoryKeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn activate_identity_key(&self, record: &IdentityKeyRecord) -> Result<()> {
        let mut tables = self.tables.write();

        for existing in tables
            .identity_keys
            .iter_mut()
            .filter(|r| r.user_id == record.user_id && r.is_active)
        {
            existing.is_active = false;
            existing.updated_at = record.created_at;
        }

        tables.identity_keys.push(IdentityKeyRecord {
            is_active: true,
            ..record.clone()
        });
        Ok(())
    }

    fn active_identity_key(&self, user_id: &str) -> Result<Option<IdentityKeyRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .identity_keys
            .iter()
            .find(|r| r.user_id == user_id && r.is_active)
            .cloned())
    }

    fn identity_keys(&self, user_id: &str) -> Result<Vec<IdentityKeyRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .identity_keys
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    fn identity_key(&self, key_id: &str) -> Result<Option<IdentityKeyRecord>> {
        let tables = self.tables.read();
        Ok(tables.identity_keys.iter().find(|r| r.key_id == key_id).cloned())
    }

    fn touch_identity_key(&self, key_id: &str, at: i64) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.identity_keys.iter_mut().find(|r| r.key_id == key_id) {
            Some(record) => {
                record.last_used = Some(at);
                record.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn activate_session_key(&self, record: &SessionKeyRecord) -> Result<()> {
        let mut tables = self.tables.write();

        for existing in tables
            .session_keys
            .iter_mut()
            .filter(|r| r.conversation_id == record.conversation_id && r.is_active)
        {
            existing.is_active = false;
            existing.updated_at = record.created_at;
        }

        let mut stored = record.without_secret();
        stored.is_active = true;
        tables.session_keys.push(stored);
        Ok(())
    }

    fn active_session_key(&self, conversation_id: &str) -> Result<Option<SessionKeyRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .session_keys
            .iter()
            .find(|r| r.conversation_id == conversation_id && r.is_active)
            .cloned())
    }

    fn session_keys(&self, conversation_id: &str) -> Result<Vec<SessionKeyRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .session_keys
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    fn session_key(&self, session_id: &str) -> Result<Option<SessionKeyRecord>> {
        let tables = self.tables.read();
        Ok(tables.session_keys.iter().find(|r| r.session_id == session_id).cloned())
    }

    fn deactivate_session_key(&self, session_id: &str, at: i64, revoked: bool) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables
            .session_keys
            .iter_mut()
            .find(|r| r.session_id == session_id && r.is_active)
        {
            Some(record) => {
                record.is_active = false;
                record.updated_at = at;
                if revoked {
                    record.revoked_at = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
