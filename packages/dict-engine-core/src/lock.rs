//! Per-dictionary read/write locks.
//!
//! Schema mutations hold the write side of their dictionary's lock; data
//! operations hold the read side. A lock must be registered (at bootstrap or
//! on dictionary creation) before any locked operation names the dictionary.
//!
//! The read side is recursive, so nested reads on one thread are fine. Taking
//! the write side while the same thread holds the read side of the same
//! dictionary deadlocks; callers must not do that.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DictError, Result};

/// Lock table keyed by dictionary id.
#[derive(Default)]
pub struct DictLockTable {
    locks: RwLock<HashMap<String, Arc<RwLock<()>>>>,
}

impl DictLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a lock for the dictionary; existing entries are kept.
    pub fn register(&self, dict_id: &str) {
        let mut locks = self.locks.write();
        if !locks.contains_key(dict_id) {
            tracing::debug!("Registering lock for dict '{}'", dict_id);
            locks.insert(dict_id.to_string(), Arc::new(RwLock::new(())));
        }
    }

    pub fn is_registered(&self, dict_id: &str) -> bool {
        self.locks.read().contains_key(dict_id)
    }

    fn lock_for(&self, dict_id: &str) -> Result<Arc<RwLock<()>>> {
        self.locks
            .read()
            .get(dict_id)
            .cloned()
            .ok_or_else(|| DictError::LockNotRegistered(dict_id.to_string()))
    }

    /// Runs `f` holding the read side of the dictionary's lock.
    pub fn with_read<T>(&self, dict_id: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.lock_for(dict_id)?;
        let _guard = lock.read_recursive();
        f()
    }

    /// Runs `f` holding the write side of the dictionary's lock.
    pub fn with_write<T>(&self, dict_id: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.lock_for(dict_id)?;
        let _guard = lock.write();
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[timeout(1000)]
    #[test]
    fn test_unregistered_dict_is_rejected() {
        let table = DictLockTable::new();
        let result = table.with_read("missing", || Ok(()));
        assert_eq!(
            result,
            Err(DictError::LockNotRegistered("missing".to_string()))
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_nested_reads_do_not_block() {
        let table = DictLockTable::new();
        table.register("d");
        let value = table
            .with_read("d", || table.with_read("d", || Ok(7)))
            .unwrap();
        assert_eq!(value, 7);
    }

    #[timeout(1000)]
    #[test]
    fn test_writer_excludes_readers() {
        let table = Arc::new(DictLockTable::new());
        table.register("d");
        let inside = Arc::new(AtomicUsize::new(0));

        let writer = {
            let table = table.clone();
            let inside = inside.clone();
            thread::spawn(move || {
                table
                    .with_write("d", || {
                        inside.store(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        inside.store(0, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
            })
        };

        thread::sleep(Duration::from_millis(10));
        let seen = table
            .with_read("d", || Ok(inside.load(Ordering::SeqCst)))
            .unwrap();
        writer.join().unwrap();
        assert_eq!(seen, 0);
    }

    #[timeout(1000)]
    #[test]
    fn test_different_dicts_are_independent() {
        let table = DictLockTable::new();
        table.register("a");
        table.register("b");
        let result = table.with_write("a", || table.with_write("b", || Ok("both")));
        assert_eq!(result, Ok("both"));
    }
}
