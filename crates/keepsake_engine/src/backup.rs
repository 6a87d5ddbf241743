//! Chunked, verified backup upload and restore with rate limiting.

use crate::clock::Clock;
use crate::config::{RateLimitConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::metadata::keys;
use crate::remote::{sha256_hex, ChunkInfo, Manifest, RemoteBackend, MANIFEST_VERSION};
use keepsake_storage::{KeyValueStore, KeyValueStoreExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// One backup attempt. Records are appended, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Attempt time (Unix millis), never earlier than the previous record.
    pub timestamp: u64,
    /// Payload size.
    pub size_bytes: u64,
    /// Whether a manifest was published.
    pub success: bool,
    /// Chunks stored on the remote during the attempt.
    pub files_uploaded: u32,
    /// Failure description.
    pub error: Option<String>,
}

impl BackupRecord {
    /// Returns true if the attempt used remote quota.
    pub fn consumed_quota(&self) -> bool {
        self.success || self.files_uploaded > 0
    }
}

/// Backup frequency state derived from the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitWindow {
    /// Uploads are refused before this time.
    pub next_allowed_sync_time: Option<u64>,
    /// Quota-consuming attempts in the last 24 hours.
    pub daily_count: u32,
}

impl RateLimitWindow {
    /// Derives the window from the history at time `now`.
    pub fn from_history(history: &[BackupRecord], limits: &RateLimitConfig, now: u64) -> Self {
        Self::from_usage(&quota_consumers(history), limits, now)
    }

    /// Derives the window from the times of quota-consuming attempts.
    pub fn from_usage(counted: &[u64], limits: &RateLimitConfig, now: u64) -> Self {
        let hourly = window_release(counted, limits.max_per_hour, HOUR_MS, now);
        let daily = window_release(counted, limits.max_per_day, DAY_MS, now);
        let daily_count = counted
            .iter()
            .filter(|&&t| now.saturating_sub(t) < DAY_MS)
            .count() as u32;

        Self {
            next_allowed_sync_time: hourly.max(daily),
            daily_count,
        }
    }

    /// Refuses with [`SyncError::RateLimited`] while the window is closed.
    pub fn check(&self, now: u64) -> SyncResult<()> {
        match self.next_allowed_sync_time {
            Some(retry_at) if now < retry_at => Err(SyncError::RateLimited { retry_at }),
            _ => Ok(()),
        }
    }
}

fn quota_consumers(history: &[BackupRecord]) -> Vec<u64> {
    history
        .iter()
        .filter(|r| r.consumed_quota())
        .map(|r| r.timestamp)
        .collect()
}

/// When the oldest of the last `cap` attempts inside `span` leaves it.
///
/// A zero cap never opens.
fn window_release(timestamps: &[u64], cap: u32, span: u64, now: u64) -> Option<u64> {
    if cap == 0 {
        return Some(u64::MAX);
    }
    let recent: Vec<u64> = timestamps
        .iter()
        .copied()
        .filter(|&t| now.saturating_sub(t) < span)
        .collect();
    if recent.len() < cap as usize {
        return None;
    }
    let oldest_blocking = recent[recent.len() - cap as usize];
    Some(oldest_blocking.saturating_add(span))
}

/// Summary of a published backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// Identifier of the backup.
    pub backup_id: String,
    /// Publication time (Unix millis).
    pub timestamp: u64,
    /// Payload size.
    pub size_bytes: u64,
    /// Number of chunks.
    pub chunks: usize,
    /// Hex SHA-256 of the payload.
    pub payload_checksum: String,
}

/// A verified payload fetched from the remote.
#[derive(Debug, Clone)]
pub struct RestoredBackup {
    /// The manifest the payload was assembled from.
    pub manifest: Manifest,
    /// The protected payload.
    pub payload: Vec<u8>,
}

/// Uploads and restores protected payloads.
pub struct BackupManager {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteBackend>,
    clock: Arc<dyn Clock>,
    chunk_size: usize,
    history_limit: usize,
    request_timeout: Duration,
    rate_limit: RateLimitConfig,
    history_lock: Mutex<()>,
}

impl BackupManager {
    /// Creates a manager using the limits from `config`.
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            remote,
            clock,
            chunk_size: config.chunk_size.max(1),
            history_limit: config.history_limit.max(1),
            request_timeout: config.request_timeout,
            rate_limit: config.rate_limit,
            history_lock: Mutex::new(()),
        }
    }

    /// Returns the backup history, oldest first.
    pub fn history(&self) -> SyncResult<Vec<BackupRecord>> {
        Ok(self.store.get_json(keys::HISTORY)?.unwrap_or_default())
    }

    /// Returns the current rate-limit window.
    pub fn rate_limit_window(&self) -> SyncResult<RateLimitWindow> {
        let now = self.clock.now_millis();
        Ok(RateLimitWindow::from_usage(
            &self.quota_usage()?,
            &self.rate_limit,
            now,
        ))
    }

    /// Times of quota-consuming attempts in the last day, oldest first.
    ///
    /// Kept apart from the bounded history so refusals cannot evict them.
    /// Profiles written before the list existed fall back to the history.
    fn quota_usage(&self) -> SyncResult<Vec<u64>> {
        match self.store.get_json(keys::QUOTA_USAGE)? {
            Some(usage) => Ok(usage),
            None => Ok(quota_consumers(&self.history()?)),
        }
    }

    /// Uploads `payload` as a new backup.
    ///
    /// The manifest is published only after every chunk is stored, so a
    /// failed attempt leaves the previous backup as the restore point.
    /// Every call appends exactly one [`BackupRecord`], refusals included.
    ///
    /// A publish that errors is checked against the remote: if the manifest
    /// landed anyway the attempt counts as published. Otherwise its chunks
    /// are kept, since the remote may still commit the manifest, and are
    /// removed after the next published backup.
    ///
    /// # Errors
    ///
    /// [`SyncError::RateLimited`] if the window is closed, otherwise the
    /// first remote failure.
    pub async fn upload(&self, payload: &[u8]) -> SyncResult<BackupReport> {
        let now = self.clock.now_millis();
        let size_bytes = payload.len() as u64;

        let window = RateLimitWindow::from_usage(&self.quota_usage()?, &self.rate_limit, now);
        if let Err(e) = window.check(now) {
            info!(retry_at = ?e.rate_limited_until(), "backup refused by rate limit");
            return self.fail_attempt(now, size_bytes, 0, e);
        }

        let mut uploaded: Vec<ChunkInfo> = Vec::new();
        let (manifest, previous) = match self.stage_chunks(payload, &mut uploaded).await {
            Ok(staged) => staged,
            Err(e) => {
                warn!(error = %e, files_uploaded = uploaded.len(), "backup failed");
                self.delete_chunks(&uploaded, "failed attempt").await;
                return self.fail_attempt(self.clock.now_millis(), size_bytes, uploaded.len(), e);
            }
        };

        if let Err(e) = self.timed(self.remote.publish_manifest(&manifest)).await {
            if !self.publish_landed(&manifest.backup_id).await {
                warn!(
                    backup_id = %manifest.backup_id,
                    error = %e,
                    "manifest publish unconfirmed, keeping its chunks"
                );
                self.remember_strays(&uploaded)?;
                return self.fail_attempt(self.clock.now_millis(), size_bytes, uploaded.len(), e);
            }
            info!(backup_id = %manifest.backup_id, error = %e, "manifest publish confirmed after error");
        }

        self.append_record(BackupRecord {
            timestamp: self.clock.now_millis(),
            size_bytes,
            success: true,
            files_uploaded: uploaded.len() as u32,
            error: None,
        })?;
        if let Some(previous) = previous.filter(|p| p.backup_id != manifest.backup_id) {
            self.delete_chunks(&previous.chunks, "superseded").await;
        }
        self.sweep_strays(&manifest).await;

        info!(
            backup_id = %manifest.backup_id,
            chunks = manifest.chunks.len(),
            size_bytes,
            "backup published"
        );
        Ok(BackupReport {
            backup_id: manifest.backup_id,
            timestamp: manifest.created_at,
            size_bytes: manifest.total_size,
            chunks: manifest.chunks.len(),
            payload_checksum: manifest.payload_checksum,
        })
    }

    /// Stores every chunk and builds the manifest that would reference them.
    async fn stage_chunks(
        &self,
        payload: &[u8],
        uploaded: &mut Vec<ChunkInfo>,
    ) -> SyncResult<(Manifest, Option<Manifest>)> {
        let previous = self.timed(self.remote.fetch_manifest()).await?;
        let backup_id = Uuid::new_v4().to_string();

        for (index, chunk) in payload.chunks(self.chunk_size).enumerate() {
            let checksum = sha256_hex(chunk);
            let path = format!("{backup_id}/{index:05}");
            let stored = self
                .timed(self.remote.upload_chunk(&path, chunk, &checksum))
                .await?;
            debug!(backup_id = %backup_id, index, size = chunk.len(), "chunk uploaded");
            uploaded.push(ChunkInfo {
                index: index as u32,
                path: stored,
                size: chunk.len() as u64,
                checksum,
            });
        }

        let manifest = Manifest {
            format_version: MANIFEST_VERSION,
            backup_id,
            created_at: self.clock.now_millis(),
            total_size: payload.len() as u64,
            payload_checksum: sha256_hex(payload),
            chunks: uploaded.clone(),
        };
        Ok((manifest, previous))
    }

    async fn publish_landed(&self, backup_id: &str) -> bool {
        match self.timed(self.remote.fetch_manifest()).await {
            Ok(Some(current)) => current.backup_id == backup_id,
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "could not confirm manifest publish");
                false
            }
        }
    }

    fn fail_attempt(
        &self,
        timestamp: u64,
        size_bytes: u64,
        files_uploaded: usize,
        error: SyncError,
    ) -> SyncResult<BackupReport> {
        self.append_record(BackupRecord {
            timestamp,
            size_bytes,
            success: false,
            files_uploaded: files_uploaded as u32,
            error: Some(error.to_string()),
        })?;
        Err(error)
    }

    fn remember_strays(&self, chunks: &[ChunkInfo]) -> SyncResult<()> {
        let _lock = self.history_lock.lock();
        let mut strays: Vec<String> = self.store.get_json(keys::STRAY_CHUNKS)?.unwrap_or_default();
        strays.extend(chunks.iter().map(|c| c.path.clone()));
        self.store.set_json(keys::STRAY_CHUNKS, &strays)?;
        Ok(())
    }

    /// Deletes chunks of unconfirmed attempts that `current` does not use.
    async fn sweep_strays(&self, current: &Manifest) {
        let strays: Vec<String> = match self.store.get_json(keys::STRAY_CHUNKS) {
            Ok(Some(strays)) => strays,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "could not read stray chunk list");
                return;
            }
        };

        let mut kept = Vec::new();
        for path in strays {
            if current.chunks.iter().any(|c| c.path == path) {
                continue;
            }
            if let Err(e) = self.timed(self.remote.delete_chunk(&path)).await {
                warn!(path = %path, error = %e, "stray chunk cleanup failed");
                kept.push(path);
            }
        }

        let _lock = self.history_lock.lock();
        let result = if kept.is_empty() {
            self.store.delete(keys::STRAY_CHUNKS).map(|_| ())
        } else {
            self.store.set_json(keys::STRAY_CHUNKS, &kept)
        };
        if let Err(e) = result {
            warn!(error = %e, "could not update stray chunk list");
        }
    }

    /// Downloads and verifies the current backup.
    ///
    /// # Errors
    ///
    /// [`SyncError::NoBackup`] if nothing was published and
    /// [`SyncError::Integrity`] on any size or checksum mismatch.
    pub async fn restore(&self) -> SyncResult<RestoredBackup> {
        let manifest = self
            .timed(self.remote.fetch_manifest())
            .await?
            .ok_or(SyncError::NoBackup)?;
        if manifest.format_version != MANIFEST_VERSION {
            return Err(SyncError::integrity(format!(
                "unsupported manifest version {}",
                manifest.format_version
            )));
        }

        let mut payload = Vec::with_capacity(manifest.total_size.min(1 << 30) as usize);
        for (expected, chunk) in manifest.chunks.iter().enumerate() {
            if chunk.index as usize != expected {
                return Err(SyncError::integrity(format!(
                    "chunk {expected} missing from manifest"
                )));
            }
            let bytes = self.timed(self.remote.download_chunk(&chunk.path)).await?;
            if bytes.len() as u64 != chunk.size {
                return Err(SyncError::integrity(format!(
                    "chunk {} has {} bytes, expected {}",
                    chunk.index,
                    bytes.len(),
                    chunk.size
                )));
            }
            if sha256_hex(&bytes) != chunk.checksum {
                return Err(SyncError::integrity(format!(
                    "chunk {} checksum mismatch",
                    chunk.index
                )));
            }
            debug!(index = chunk.index, size = chunk.size, "chunk verified");
            payload.extend_from_slice(&bytes);
        }

        if payload.len() as u64 != manifest.total_size {
            return Err(SyncError::integrity("payload size mismatch"));
        }
        if sha256_hex(&payload) != manifest.payload_checksum {
            return Err(SyncError::integrity("payload checksum mismatch"));
        }

        info!(backup_id = %manifest.backup_id, size = payload.len(), "backup downloaded");
        Ok(RestoredBackup { manifest, payload })
    }

    async fn timed<T>(&self, call: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    async fn delete_chunks(&self, chunks: &[ChunkInfo], reason: &str) {
        for chunk in chunks {
            if let Err(e) = self.timed(self.remote.delete_chunk(&chunk.path)).await {
                warn!(path = %chunk.path, reason, error = %e, "chunk cleanup failed");
            }
        }
    }

    fn append_record(&self, mut record: BackupRecord) -> SyncResult<()> {
        let _lock = self.history_lock.lock();
        let mut history = self.history()?;
        if let Some(last) = history.last() {
            record.timestamp = record.timestamp.max(last.timestamp);
        }
        if record.consumed_quota() {
            let now = record.timestamp;
            let mut usage: Vec<u64> = match self.store.get_json(keys::QUOTA_USAGE)? {
                Some(usage) => usage,
                None => quota_consumers(&history),
            };
            usage.retain(|&t| now.saturating_sub(t) < DAY_MS);
            usage.push(now);
            self.store.set_json(keys::QUOTA_USAGE, &usage)?;
        }
        history.push(record);
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history = history.split_off(excess);
        }
        self.store.set_json(keys::HISTORY, &history)?;
        Ok(())
    }
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("chunk_size", &self.chunk_size)
            .field("history_limit", &self.history_limit)
            .field("request_timeout", &self.request_timeout)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::MemoryRemote;
    use keepsake_storage::InMemoryStore;

    const MINUTE: Duration = Duration::from_secs(60);
    const T0: u64 = 1_700_000_000_000;

    struct Fixture {
        clock: Arc<ManualClock>,
        remote: Arc<MemoryRemote>,
        manager: BackupManager,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let remote = Arc::new(MemoryRemote::new());
        let manager = BackupManager::new(
            &config,
            Arc::new(InMemoryStore::new()),
            remote.clone(),
            clock.clone(),
        );
        Fixture {
            clock,
            remote,
            manager,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn record(timestamp: u64, success: bool, files_uploaded: u32) -> BackupRecord {
        BackupRecord {
            timestamp,
            size_bytes: 1,
            success,
            files_uploaded,
            error: None,
        }
    }

    #[test]
    fn window_counts_only_quota_consumers() {
        let limits = RateLimitConfig::new(1, 10);
        let history = vec![record(T0, false, 0)];
        let window = RateLimitWindow::from_history(&history, &limits, T0 + 1);
        assert_eq!(window, RateLimitWindow::default());

        let history = vec![record(T0, false, 2)];
        let window = RateLimitWindow::from_history(&history, &limits, T0 + 1);
        assert_eq!(window.next_allowed_sync_time, Some(T0 + HOUR_MS));
        assert_eq!(window.daily_count, 1);
    }

    #[test]
    fn daily_cap_closes_window() {
        let limits = RateLimitConfig::new(5, 3);
        let history: Vec<_> = (0..3).map(|i| record(T0 + i * 2 * HOUR_MS, true, 1)).collect();
        let now = T0 + 5 * HOUR_MS;
        let window = RateLimitWindow::from_history(&history, &limits, now);
        assert_eq!(window.daily_count, 3);
        assert_eq!(window.next_allowed_sync_time, Some(T0 + DAY_MS));
        assert!(window.check(now).is_err());
        assert!(window.check(T0 + DAY_MS).is_ok());
    }

    #[tokio::test]
    async fn chunks_respect_cap_and_restore_verifies() {
        let f = fixture(SyncConfig::default().with_chunk_size(1000));
        let data = payload(4_321);

        let report = f.manager.upload(&data).await.unwrap();
        assert_eq!(report.chunks, 5);

        let manifest = f.remote.manifest().unwrap();
        for chunk in &manifest.chunks {
            assert!(chunk.size <= 1000);
            assert_eq!(f.remote.chunk(&chunk.path).unwrap().len() as u64, chunk.size);
        }

        let restored = f.manager.restore().await.unwrap();
        assert_eq!(restored.payload, data);
        assert_eq!(restored.manifest.backup_id, report.backup_id);
    }

    #[tokio::test]
    async fn rate_limit_refusal_is_recorded() {
        let f = fixture(SyncConfig::default());
        f.manager.upload(&payload(10)).await.unwrap();

        f.clock.advance(30 * MINUTE);
        let err = f.manager.upload(&payload(10)).await.unwrap_err();
        assert!(matches!(err, SyncError::RateLimited { retry_at } if retry_at == T0 + HOUR_MS));

        f.clock.advance(31 * MINUTE);
        f.manager.upload(&payload(10)).await.unwrap();

        let history = f.manager.history().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|r| r.success).collect::<Vec<_>>(),
            vec![true, false, true]
        );
        assert_eq!(history[1].files_uploaded, 0);
    }

    #[tokio::test]
    async fn failed_chunk_keeps_previous_restore_point() {
        let f = fixture(
            SyncConfig::default()
                .with_chunk_size(100)
                .with_rate_limit(RateLimitConfig::new(10, 10)),
        );
        let first = payload(250);
        f.manager.upload(&first).await.unwrap();
        let before = f.remote.manifest().unwrap();
        let chunks_before = f.remote.chunk_paths();

        f.remote.fail_upload_at(2);
        let err = f.manager.upload(&payload(300)).await.unwrap_err();
        assert!(err.is_retryable());

        assert_eq!(f.remote.manifest().unwrap(), before);
        assert_eq!(f.remote.chunk_paths(), chunks_before);
        assert_eq!(f.manager.restore().await.unwrap().payload, first);

        let last = f.manager.history().unwrap().pop().unwrap();
        assert!(!last.success);
        assert_eq!(last.files_uploaded, 2);
        assert!(last.consumed_quota());
    }

    #[tokio::test]
    async fn superseded_chunks_are_collected() {
        let f = fixture(
            SyncConfig::default()
                .with_chunk_size(64)
                .with_rate_limit(RateLimitConfig::new(10, 10)),
        );
        f.manager.upload(&payload(200)).await.unwrap();
        let report = f.manager.upload(&payload(100)).await.unwrap();

        let paths = f.remote.chunk_paths();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.starts_with(&report.backup_id)));
    }

    #[tokio::test]
    async fn tampered_chunk_is_integrity_error() {
        let f = fixture(SyncConfig::default().with_chunk_size(50));
        f.manager.upload(&payload(120)).await.unwrap();
        let path = f.remote.manifest().unwrap().chunks[1].path.clone();
        assert!(f.remote.tamper_chunk(&path));

        assert!(matches!(
            f.manager.restore().await,
            Err(SyncError::Integrity { .. })
        ));
    }

    #[tokio::test]
    async fn empty_remote_is_no_backup() {
        let f = fixture(SyncConfig::default());
        assert!(matches!(f.manager.restore().await, Err(SyncError::NoBackup)));
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let f = fixture(SyncConfig::default().with_request_timeout(Duration::from_millis(20)));
        f.remote.set_latency(Some(Duration::from_secs(5)));
        assert!(matches!(
            f.manager.upload(&payload(10)).await,
            Err(SyncError::Timeout)
        ));
        let last = f.manager.history().unwrap().pop().unwrap();
        assert!(!last.success);
        assert!(!last.consumed_quota());
    }

    #[test]
    fn history_is_bounded_and_monotonic() {
        let f = fixture(SyncConfig::default().with_history_limit(3));
        for ts in [T0, T0 + 10, T0 + 5, T0 + 20] {
            f.manager.append_record(record(ts, false, 0)).unwrap();
        }
        let history = f.manager.history().unwrap();
        let stamps: Vec<u64> = history.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![T0 + 10, T0 + 10, T0 + 20]);
    }

    #[test]
    fn zero_cap_never_opens() {
        assert_eq!(window_release(&[], 0, HOUR_MS, T0), Some(u64::MAX));
        let window = RateLimitWindow::from_usage(&[], &RateLimitConfig::new(0, 10), T0);
        assert!(matches!(
            window.check(T0 + DAY_MS),
            Err(SyncError::RateLimited { retry_at: u64::MAX })
        ));
    }

    #[tokio::test]
    async fn refusals_do_not_evict_counted_uploads() {
        let f = fixture(SyncConfig::default().with_history_limit(3));
        f.manager.upload(&payload(10)).await.unwrap();

        for _ in 0..4 {
            f.clock.advance(MINUTE);
            assert!(matches!(
                f.manager.upload(&payload(10)).await,
                Err(SyncError::RateLimited { .. })
            ));
        }
        let history = f.manager.history().unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| !r.consumed_quota()));

        f.clock.advance(MINUTE);
        let err = f.manager.upload(&payload(10)).await.unwrap_err();
        assert!(matches!(err, SyncError::RateLimited { retry_at } if retry_at == T0 + HOUR_MS));
        assert_eq!(f.manager.rate_limit_window().unwrap().daily_count, 1);
    }

    #[tokio::test]
    async fn publish_that_lands_before_timeout_is_a_backup() {
        let f = fixture(
            SyncConfig::default()
                .with_chunk_size(64)
                .with_request_timeout(Duration::from_millis(50))
                .with_rate_limit(RateLimitConfig::new(10, 10)),
        );
        f.manager.upload(&payload(100)).await.unwrap();

        let data = payload(200);
        f.remote.set_publish_stall(Some(Duration::from_secs(5)));
        let report = f.manager.upload(&data).await.unwrap();
        f.remote.set_publish_stall(None);

        assert_eq!(f.remote.manifest().unwrap().backup_id, report.backup_id);
        assert_eq!(f.manager.restore().await.unwrap().payload, data);
        assert!(f
            .remote
            .chunk_paths()
            .iter()
            .all(|p| p.starts_with(&report.backup_id)));
        assert!(f.manager.history().unwrap().last().unwrap().success);
    }

    #[tokio::test]
    async fn unconfirmed_publish_keeps_chunks_until_next_backup() {
        let f = fixture(
            SyncConfig::default()
                .with_chunk_size(64)
                .with_rate_limit(RateLimitConfig::new(10, 10)),
        );
        let first = payload(100);
        f.manager.upload(&first).await.unwrap();

        f.remote.set_fail_publish(true);
        assert!(f.manager.upload(&payload(200)).await.is_err());
        assert_eq!(f.remote.chunk_paths().len(), 2 + 4);
        assert_eq!(f.manager.restore().await.unwrap().payload, first);

        f.remote.set_fail_publish(false);
        let report = f.manager.upload(&payload(50)).await.unwrap();
        let paths = f.remote.chunk_paths();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].starts_with(&report.backup_id));
    }
}
