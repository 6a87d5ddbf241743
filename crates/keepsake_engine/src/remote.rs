//! Remote backup storage abstraction.
//!
//! A backup is a set of chunk files plus a manifest. Publishing the
//! manifest is what makes a backup the current restore point, so a backup
//! whose chunks did not all arrive is never visible to restore.

use crate::error::{SyncError, SyncResult};
use crate::http::AuthToken;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Version of the manifest layout.
pub const MANIFEST_VERSION: u16 = 1;

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// One stored piece of a backup payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Position in the payload.
    pub index: u32,
    /// Remote location, as returned by the backend.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the chunk.
    pub checksum: String,
}

/// The remote record that makes a complete set of chunks restorable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest layout version.
    pub format_version: u16,
    /// Identifier of the backup.
    pub backup_id: String,
    /// Creation time (Unix millis).
    pub created_at: u64,
    /// Size of the whole payload.
    pub total_size: u64,
    /// Hex SHA-256 of the whole payload.
    pub payload_checksum: String,
    /// Chunks in payload order.
    pub chunks: Vec<ChunkInfo>,
}

/// Remote storage for backup chunks and the manifest.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Stores a chunk and returns its remote path.
    async fn upload_chunk(&self, path: &str, bytes: &[u8], checksum: &str) -> SyncResult<String>;

    /// Returns the current manifest, if any backup was published.
    async fn fetch_manifest(&self) -> SyncResult<Option<Manifest>>;

    /// Makes `manifest` the current restore point.
    async fn publish_manifest(&self, manifest: &Manifest) -> SyncResult<()>;

    /// Returns the bytes of a chunk.
    async fn download_chunk(&self, path: &str) -> SyncResult<Vec<u8>>;

    /// Removes a chunk. Missing chunks are not an error.
    async fn delete_chunk(&self, path: &str) -> SyncResult<()>;

    /// Installs or clears the credential used for remote calls.
    fn set_auth_token(&self, _token: Option<AuthToken>) {}
}

/// An in-memory remote for testing.
///
/// Supports failure injection, latency and tampering with stored chunks.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    chunks: Mutex<BTreeMap<String, Vec<u8>>>,
    manifest: Mutex<Option<Manifest>>,
    unreachable: AtomicBool,
    fail_upload_at: Mutex<Option<usize>>,
    fail_publish: AtomicBool,
    uploads: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    publish_stall: Mutex<Option<Duration>>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a retryable network error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fails the `n`th chunk upload from now (0-based), once.
    pub fn fail_upload_at(&self, n: usize) {
        *self.fail_upload_at.lock() = Some(self.uploads.load(Ordering::SeqCst) + n);
    }

    /// Makes manifest publication fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Stores published manifests, then delays the reply to the publisher.
    pub fn set_publish_stall(&self, stall: Option<Duration>) {
        *self.publish_stall.lock() = stall;
    }

    /// Delays every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of chunk uploads attempted so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Paths of the stored chunks.
    pub fn chunk_paths(&self) -> Vec<String> {
        self.chunks.lock().keys().cloned().collect()
    }

    /// Returns a stored chunk.
    pub fn chunk(&self, path: &str) -> Option<Vec<u8>> {
        self.chunks.lock().get(path).cloned()
    }

    /// Returns the published manifest.
    pub fn manifest(&self) -> Option<Manifest> {
        self.manifest.lock().clone()
    }

    /// Flips one byte of a stored chunk. Returns false if there is no such
    /// chunk or it is empty.
    pub fn tamper_chunk(&self, path: &str) -> bool {
        match self.chunks.lock().get_mut(path) {
            Some(bytes) if !bytes.is_empty() => {
                bytes[0] ^= 0xFF;
                true
            }
            _ => false,
        }
    }

    async fn enter(&self) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SyncError::network_retryable("remote unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn upload_chunk(&self, path: &str, bytes: &[u8], checksum: &str) -> SyncResult<String> {
        self.enter().await?;
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        {
            let mut fail_at = self.fail_upload_at.lock();
            if *fail_at == Some(n) {
                *fail_at = None;
                return Err(SyncError::network_retryable("injected upload failure"));
            }
        }
        if sha256_hex(bytes) != checksum {
            return Err(SyncError::integrity(format!("upload of {path} corrupted")));
        }
        self.chunks.lock().insert(path.to_string(), bytes.to_vec());
        Ok(path.to_string())
    }

    async fn fetch_manifest(&self) -> SyncResult<Option<Manifest>> {
        self.enter().await?;
        Ok(self.manifest.lock().clone())
    }

    async fn publish_manifest(&self, manifest: &Manifest) -> SyncResult<()> {
        self.enter().await?;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SyncError::network_retryable("injected publish failure"));
        }
        *self.manifest.lock() = Some(manifest.clone());
        let stall = *self.publish_stall.lock();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(())
    }

    async fn download_chunk(&self, path: &str) -> SyncResult<Vec<u8>> {
        self.enter().await?;
        self.chunks
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(path.to_string()))
    }

    async fn delete_chunk(&self, path: &str) -> SyncResult<()> {
        self.enter().await?;
        self.chunks.lock().remove(path);
        Ok(())
    }
}
