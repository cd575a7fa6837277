//! Per-title mutual exclusion
//!
//! Every write to a title's body, listing or attachment directory, and every
//! copy of that title between stores, runs while holding the title's lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Table of one lock per page title, created on first use.
#[derive(Debug, Default)]
pub struct TitleLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TitleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `title`.
    ///
    /// A panic in an earlier holder does not poison the title. The entry is
    /// dropped again once no caller holds or waits for it.
    pub fn with<T>(&self, title: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.table();
            locks
                .entry(title.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // clones are only taken under the table lock, so a count of two
        // (table + ours) means nobody else is waiting
        let mut locks = self.table();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(title);
        }
        result
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of titles currently held or waited on.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
