//! Key/value store trait definition.

use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A local key/value store for Keepsake.
///
/// Stores hold JSON values under string keys. The engine keeps snapshots,
/// the mutation queue, sync metadata and backup history in separate keys.
///
/// # Invariants
///
/// - `set` is atomic: a reader sees either the old or the new value
/// - `get` after a successful `set` returns the value just written
/// - A write that does not fit fails with [`StorageError::QuotaExceeded`]
///   and leaves the previous value in place
/// - Stores must be `Send + Sync` for shared access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value exists but cannot be read back.
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid, the write does not fit
    /// or an I/O error occurs.
    fn set(&self, key: &str, value: &Value) -> StorageResult<()>;

    /// Removes `key`. Returns true if a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Lists all keys currently stored, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Typed helpers over [`KeyValueStore`].
///
/// Implemented for every store, including trait objects.
pub trait KeyValueStoreExt: KeyValueStore {
    /// Reads and deserializes the value under `key`.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::Corrupted {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Serializes `value` and stores it under `key`.
    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, &value)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.chars().any(char::is_control) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
