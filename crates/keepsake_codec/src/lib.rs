//! # Keepsake Codec
//!
//! Turns a [`PlayerSnapshot`] into a compact, protected payload for remote
//! backup, and back.
//!
//! ## Pipeline
//!
//! [`SnapshotCodec::compact`] applies, in order:
//! 1. Drop `null` fields
//! 2. Pull sensitive fields (credentials, session tokens) out of the tree
//! 3. Replace the keys of objects inside arrays with short codes
//! 4. Encode the remaining tree as CBOR and compress it with zstd
//! 5. Seal the sensitive fields with AES-256-GCM under a key derived from
//!    the user's credential material (HKDF-SHA256, random salt)
//! 6. Wrap everything in a versioned envelope
//!
//! [`SnapshotCodec::expand`] reverses every step and refuses to return a
//! partial result: any corruption, unknown version or failed
//! authentication is a [`CodecError`].
//!
//! ## Envelope Format
//!
//! ```text
//! | magic "KSNP" (4) | version (2) | header_len (4) | header (CBOR) | body (zstd) |
//! ```
//!
//! ## Usage
//!
//! ```
//! use keepsake_codec::{KeyMaterial, PlayerSnapshot, SnapshotCodec};
//! use serde_json::json;
//!
//! let mut snapshot = PlayerSnapshot::new("player-1");
//! snapshot.set_section("scores", json!([{"game": "snake", "best": 420}]));
//! snapshot.set_section("profile", json!({"name": "ada", "session_token": "s3cr3t"}));
//!
//! let codec = SnapshotCodec::default();
//! let key = KeyMaterial::new(b"correct horse battery staple".to_vec());
//! let payload = codec.compact(&snapshot, &key).unwrap();
//! let restored = codec.expand(&payload, &key).unwrap();
//! assert_eq!(restored, snapshot);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compact;
mod crypto;
mod envelope;
mod error;
mod secrets;
mod snapshot;

pub use compact::{expand_keys, shorten_keys, strip_nulls};
pub use crypto::{KeyMaterial, SecretBox, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
pub use envelope::{CodecOptions, SnapshotCodec, FORMAT_VERSION, MAGIC};
pub use error::{CodecError, CodecResult};
pub use secrets::{extract_secrets, restore_secrets, DEFAULT_SENSITIVE_KEYS};
pub use snapshot::PlayerSnapshot;
