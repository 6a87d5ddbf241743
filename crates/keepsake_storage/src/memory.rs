//! In-memory key/value store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, KeyValueStore};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// An in-memory key/value store.
///
/// Values are kept in their serialized JSON form so that size accounting
/// matches what a persistent store would hold. Suitable for:
/// - Unit tests
/// - Integration tests
/// - Guest profiles that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use keepsake_storage::{InMemoryStore, KeyValueStore};
/// use serde_json::json;
///
/// let store = InMemoryStore::new();
/// store.set("score", &json!(42)).unwrap();
/// assert_eq!(store.get("score").unwrap(), Some(json!(42)));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    capacity: Option<u64>,
}

impl InMemoryStore {
    /// Creates a new empty, unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that refuses writes beyond `capacity` bytes.
    ///
    /// Useful for exercising quota handling.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Returns the number of bytes currently held.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.entries.read().values().map(|v| v.len() as u64).sum()
    }

    /// Returns the number of keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Overwrites the raw bytes of a key, bypassing serialization.
    ///
    /// Useful for testing recovery from corrupted values.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) {
        self.entries.write().insert(key.to_string(), bytes);
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupted {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        validate_key(key)?;
        let bytes = serde_json::to_vec(value)?;

        let mut entries = self.entries.write();
        if let Some(limit) = self.capacity {
            let used: u64 = entries.values().map(|v| v.len() as u64).sum();
            let previous = entries.get(key).map_or(0, |v| v.len() as u64);
            let required = used - previous + bytes.len() as u64;
            if required > limit {
                return Err(StorageError::QuotaExceeded { required, limit });
            }
        }

        entries.insert(key.to_string(), bytes);
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
