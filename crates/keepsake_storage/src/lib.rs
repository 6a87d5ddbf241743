//! # Keepsake Storage
//!
//! Local persistence port and implementations for Keepsake.
//!
//! This crate provides the lowest-level storage abstraction of the engine.
//! Stores are **key/value stores over JSON values** - they do not interpret
//! snapshots, queues or sync metadata.
//!
//! ## Design Principles
//!
//! - Stores are simple get/set/delete over string keys
//! - Each `set` is atomic per key; there are no cross-key transactions
//! - Must be `Send + Sync` so the engine can share one store
//! - A store that runs out of space fails with [`StorageError::QuotaExceeded`]
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral profiles
//! - [`FileStore`] - One JSON file per key inside a locked directory
//!
//! ## Example
//!
//! ```rust
//! use keepsake_storage::{InMemoryStore, KeyValueStore, KeyValueStoreExt};
//!
//! let store = InMemoryStore::new();
//! store.set_json("profile/level", &7u32).unwrap();
//! let level: Option<u32> = store.get_json("profile/level").unwrap();
//! assert_eq!(level, Some(7));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{KeyValueStore, KeyValueStoreExt};
