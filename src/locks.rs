//! Per-key mutual exclusion.
//!
//! Rotations of one user and session creation for one conversation must not
//! interleave, while unrelated users and conversations proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// A lazily populated map of named locks
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`
    pub(crate) fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = lock.lock();
            f()
        };

        // Drop the entry once nobody else holds or waits on it.
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
