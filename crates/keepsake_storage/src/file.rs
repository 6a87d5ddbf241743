//! File-based key/value store for persistent storage.
//!
//! Layout of a store directory:
//!
//! ```text
//! <root>/
//! ├─ LOCK                 # Advisory lock for single-writer
//! ├─ <encoded key>.json   # One file per key
//! └─ <encoded key>.tmp    # Transient, during an atomic write
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, KeyValueStore};
use fs2::FileExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";
const VALUE_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";

/// A file-based key/value store.
///
/// Each key is stored as its own JSON file. Writes go to a temporary file
/// that is synced and then renamed over the previous value, so a crash
/// leaves either the old or the new value, never a torn one.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on its directory; only one
/// `FileStore` can exist per directory at a time. Within a process it can
/// be shared across threads.
///
/// # Example
///
/// ```no_run
/// use keepsake_storage::{FileStore, KeyValueStore};
/// use serde_json::json;
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("profile-data")).unwrap();
/// store.set("achievements", &json!(["first_win"])).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Byte size of every stored value, for quota accounting.
    sizes: RwLock<BTreeMap<String, u64>>,
    capacity: Option<u64>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store in the given directory.
    ///
    /// Leftover temporary files from an interrupted write are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(root: &Path) -> StorageResult<Self> {
        Self::open_inner(root, None)
    }

    /// Opens a store that refuses writes beyond `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Same as [`FileStore::open`].
    pub fn open_with_capacity(root: &Path, capacity: u64) -> StorageResult<Self> {
        Self::open_inner(root, Some(capacity))
    }

    fn open_inner(root: &Path, capacity: Option<u64>) -> StorageResult<Self> {
        fs::create_dir_all(root)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let mut sizes = BTreeMap::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(VALUE_EXT) => {
                    let Some(key) = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(decode_key)
                    else {
                        warn!(path = %path.display(), "ignoring file with undecodable name");
                        continue;
                    };
                    sizes.insert(key, entry.metadata()?.len());
                }
                Some(TEMP_EXT) => {
                    debug!(path = %path.display(), "removing leftover temporary file");
                    fs::remove_file(&path)?;
                }
                _ => {}
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            sizes: RwLock::new(sizes),
            capacity,
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the number of bytes currently held.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.sizes.read().values().sum()
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{VALUE_EXT}", encode_key(key)))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{TEMP_EXT}", encode_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let bytes = match fs::read(self.value_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corrupted {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        validate_key(key)?;
        let bytes = serde_json::to_vec(value)?;

        // Held for the whole write so concurrent writers see consistent totals.
        let mut sizes = self.sizes.write();
        if let Some(limit) = self.capacity {
            let used: u64 = sizes.values().sum();
            let previous = sizes.get(key).copied().unwrap_or(0);
            let required = used - previous + bytes.len() as u64;
            if required > limit {
                return Err(StorageError::QuotaExceeded { required, limit });
            }
        }

        let temp = self.temp_path(key);
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, self.value_path(key))?;

        sizes.insert(key.to_string(), bytes.len() as u64);
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut sizes = self.sizes.write();
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => {
                sizes.remove(key);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.sizes.read().keys().cloned().collect())
    }
}

/// Encodes a key into a portable file name.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte is
/// written as `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn file_set_and_get() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("snapshot/player-1", &json!({"score": 10})).unwrap();
        assert_eq!(
            store.get("snapshot/player-1").unwrap(),
            Some(json!({"score": 10}))
        );
        assert_eq!(store.get("snapshot/player-2").unwrap(), None);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("sync/queue", &json!([1, 2, 3])).unwrap();
        }

        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(store.get("sync/queue").unwrap(), Some(json!([1, 2, 3])));
            assert_eq!(store.keys().unwrap(), vec!["sync/queue".to_string()]);
        }
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _store = FileStore::open(dir.path()).unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StorageError::Locked)));
    }

    #[test]
    fn file_delete() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("k", &json!(true)).unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn file_quota_exceeded_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let store = FileStore::open_with_capacity(dir.path(), 12).unwrap();

        store.set("k", &json!("small")).unwrap();
        let result = store.set("k", &json!("much larger than twelve bytes"));

        assert!(matches!(result, Err(StorageError::QuotaExceeded { .. })));
        assert_eq!(store.get("k").unwrap(), Some(json!("small")));
    }

    #[test]
    fn file_leftover_temp_removed_on_open() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("half-written.tmp"), b"{").unwrap();

        let _store = FileStore::open(dir.path()).unwrap();
        assert!(!dir.path().join("half-written.tmp").exists());
    }

    #[test]
    fn file_corrupted_value() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("k", &json!(1)).unwrap();

        fs::write(store.value_path("k"), b"{oops").unwrap();
        assert!(matches!(store.get("k"), Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn key_encoding_roundtrip() {
        for key in ["plain", "sync/history", "snapshot:user@example.com", "ü-ß"] {
            let encoded = encode_key(key);
            assert!(encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'%'));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
    }

    proptest! {
        #[test]
        fn any_key_survives_file_name_encoding(key in "\\PC{1,40}") {
            let encoded = encode_key(&key);
            prop_assert!(encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'%'));
            prop_assert_eq!(decode_key(&encoded), Some(key));
        }
    }
}
