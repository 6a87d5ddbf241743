//! The sync orchestrator.

use crate::backup::{BackupManager, BackupRecord, BackupReport};
use crate::clock::{millis, Clock, SystemClock};
use crate::config::SyncConfig;
use crate::credentials::Credentials;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpMethod;
use crate::metadata::{keys, SyncMetadata};
use crate::queue::{MutationQueue, QueueReport};
use crate::remote::RemoteBackend;
use crate::status::{StatusHub, Subscription, SyncState, SyncStatus};
use crate::threshold::{SyncTrigger, ThresholdEvaluator};
use crate::transport::OperationTransport;
use keepsake_codec::{KeyMaterial, PlayerSnapshot, SnapshotCodec};
use keepsake_storage::{KeyValueStore, KeyValueStoreExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Collaborators injected into the engine.
pub struct EngineDeps {
    /// Local persistent store.
    pub store: Arc<dyn KeyValueStore>,
    /// Remote backup storage.
    pub remote: Arc<dyn RemoteBackend>,
    /// Delivery of queued operations.
    pub transport: Arc<dyn OperationTransport>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl EngineDeps {
    /// Bundles the collaborators with the system clock.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteBackend>,
        transport: Arc<dyn OperationTransport>,
    ) -> Self {
        Self {
            store,
            remote,
            transport,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// A remote call a local mutation needs confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOperation {
    /// HTTP method.
    pub method: HttpMethod,
    /// Remote API path.
    pub endpoint: String,
    /// JSON body.
    pub payload: Value,
}

/// A local change to one snapshot section.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Section name.
    pub section: String,
    /// New section content.
    pub value: Value,
    /// Remote operation to queue, if any.
    pub remote: Option<RemoteOperation>,
}

impl Mutation {
    /// Replaces `section` with `value`.
    pub fn new(section: impl Into<String>, value: Value) -> Self {
        Self {
            section: section.into(),
            value,
            remote: None,
        }
    }

    /// Also queues a remote operation.
    pub fn with_remote(
        mut self,
        method: HttpMethod,
        endpoint: impl Into<String>,
        payload: Value,
    ) -> Self {
        self.remote = Some(RemoteOperation {
            method,
            endpoint: endpoint.into(),
            payload,
        });
        self
    }
}

/// What an automatic sync trigger did.
#[derive(Debug)]
pub enum AutoSyncOutcome {
    /// No threshold reached.
    NotDue,
    /// Another sync or restore is running.
    InFlight,
    /// Paused after a failure.
    BackingOff {
        /// End of the pause (Unix millis).
        until: u64,
    },
    /// The device is offline.
    Offline,
    /// Due, but no credentials yet; retried once they are configured.
    Deferred(SyncTrigger),
    /// Due, but the rate limit refuses uploads.
    RateLimited {
        /// Earliest allowed upload (Unix millis).
        retry_at: u64,
    },
    /// A backup was published.
    Completed {
        /// The threshold that fired.
        trigger: SyncTrigger,
        /// The published backup.
        report: BackupReport,
    },
    /// The backup failed.
    Failed {
        /// The threshold that fired, if evaluation got that far.
        trigger: Option<SyncTrigger>,
        /// The failure.
        error: SyncError,
    },
}

impl AutoSyncOutcome {
    /// Returns true if a backup was published.
    pub fn is_completed(&self) -> bool {
        matches!(self, AutoSyncOutcome::Completed { .. })
    }
}

/// Summary of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// The restored backup.
    pub backup_id: String,
    /// When it was created (Unix millis).
    pub created_at: u64,
    /// Sections overwritten by the remote copy.
    pub sections_replaced: Vec<String>,
}

/// The local-first sync engine.
///
/// Owns the local snapshot, the mutation queue and the backup schedule for
/// one profile. At most one backup or restore runs at a time; overlapping
/// triggers are collapsed.
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteBackend>,
    transport: Arc<dyn OperationTransport>,
    clock: Arc<dyn Clock>,
    codec: SnapshotCodec,
    evaluator: ThresholdEvaluator,
    queue: MutationQueue,
    backups: BackupManager,
    status: StatusHub,
    credentials: RwLock<Option<Credentials>>,
    in_flight: AtomicBool,
    online: AtomicBool,
    error_until: Mutex<Option<u64>>,
    metadata_lock: Mutex<()>,
}

impl SyncEngine {
    /// Opens the engine over persisted state. Starts online.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or an unreadable store.
    pub fn new(config: SyncConfig, deps: EngineDeps) -> SyncResult<Self> {
        config.validate()?;
        let EngineDeps {
            store,
            remote,
            transport,
            clock,
        } = deps;

        let mut metadata = SyncMetadata::load(store.as_ref())?;
        if metadata.status == SyncState::Syncing {
            // Interrupted run; nothing was committed.
            metadata.status = SyncState::Idle;
            metadata.save(store.as_ref())?;
        }

        let credentials = Credentials::load(store.as_ref())?;
        if let Some(creds) = &credentials {
            remote.set_auth_token(Some(creds.token().clone()));
            transport.set_auth_token(Some(creds.token().clone()));
        }

        let status = StatusHub::new(SyncStatus {
            is_online: true,
            last_sync_time: metadata.last_activity(),
            pending_changes: metadata.pending_change_count,
            state: metadata.status,
            error_message: metadata.error_message.clone(),
            ..SyncStatus::default()
        });

        let queue = MutationQueue::new(Arc::clone(&store), Arc::clone(&clock), status.clone())
            .with_max_retries(config.max_retries)
            .with_request_timeout(config.request_timeout);
        queue.refresh_status()?;

        let backups = BackupManager::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&clock),
        );
        let now = clock.now_millis();
        let rate_limited_until = backups
            .rate_limit_window()?
            .next_allowed_sync_time
            .filter(|&t| t > now);
        status.update(|s| s.rate_limited_until = rate_limited_until);

        info!(
            user_id = %config.user_id,
            pending = metadata.pending_change_count,
            credentials = credentials.is_some(),
            "sync engine opened"
        );

        Ok(Self {
            codec: SnapshotCodec::new(config.codec_options()),
            evaluator: ThresholdEvaluator::new(config.thresholds),
            config,
            store,
            remote,
            transport,
            clock,
            queue,
            backups,
            status,
            credentials: RwLock::new(credentials),
            in_flight: AtomicBool::new(false),
            online: AtomicBool::new(true),
            error_until: Mutex::new(None),
            metadata_lock: Mutex::new(()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the mutation queue.
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    /// Returns a receiver of status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Runs `listener` on every status change until the returned
    /// [`Subscription`] is dropped. Requires a tokio runtime.
    pub fn subscribe_with<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&SyncStatus) + Send + 'static,
    {
        self.status.subscribe_with(listener)
    }

    /// Returns the persisted sync metadata.
    pub fn metadata(&self) -> SyncResult<SyncMetadata> {
        SyncMetadata::load(self.store.as_ref())
    }

    /// Returns the backup history, oldest first.
    pub fn history(&self) -> SyncResult<Vec<BackupRecord>> {
        self.backups.history()
    }

    /// Returns the local snapshot.
    pub fn snapshot(&self) -> SyncResult<PlayerSnapshot> {
        Ok(self
            .store
            .get_json(keys::SNAPSHOT)?
            .unwrap_or_else(|| PlayerSnapshot::new(self.config.user_id.clone())))
    }

    /// Returns the last reported connectivity.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Returns true once credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.credentials.read().is_some()
    }

    /// Applies a local change.
    ///
    /// The section is written in one store write before anything else
    /// happens. A remote operation carried by the mutation is queued and,
    /// when online, a queue pass runs. Finally an automatic backup is
    /// considered.
    ///
    /// # Errors
    ///
    /// Only local store failures; [`SyncError::QuotaExceeded`] when the
    /// device is full.
    pub async fn apply_mutation(&self, mutation: Mutation) -> SyncResult<AutoSyncOutcome> {
        let now = self.clock.now_millis();
        let Mutation {
            section,
            value,
            remote,
        } = mutation;

        let mut snapshot = self.snapshot()?;
        snapshot.set_section(section.clone(), value);
        snapshot.updated_at = snapshot.updated_at.max(now);
        self.store.set_json(keys::SNAPSHOT, &snapshot)?;

        let size = self.codec.estimate_size(&snapshot);
        let metadata = self.update_metadata(|m| {
            m.pending_change_count += 1;
            m.estimated_snapshot_size = size;
        })?;
        self.status
            .update(|s| s.pending_changes = metadata.pending_change_count);
        debug!(%section, pending = metadata.pending_change_count, size, "mutation applied");

        if let Some(op) = remote {
            self.queue.enqueue(op.endpoint, op.method, op.payload)?;
            if self.is_online() {
                if let Err(e) = self.process_queue().await {
                    warn!(error = %e, "queue pass after mutation failed");
                }
            }
        }

        Ok(self.trigger_auto_sync().await)
    }

    /// Starts a backup if one is due and nothing prevents it.
    pub async fn trigger_auto_sync(&self) -> AutoSyncOutcome {
        let now = self.clock.now_millis();
        let backing_off = self.backoff_until(now);

        let metadata = match self.metadata() {
            Ok(metadata) => metadata,
            Err(error) => return AutoSyncOutcome::Failed { trigger: None, error },
        };
        let due = self
            .evaluator
            .evaluate(&metadata, metadata.estimated_snapshot_size, now)
            .or(metadata.deferred_trigger);
        let Some(trigger) = due else {
            return AutoSyncOutcome::NotDue;
        };

        if self.in_flight.load(Ordering::Acquire) {
            return AutoSyncOutcome::InFlight;
        }
        if let Some(until) = backing_off {
            debug!(until, "backup due but backing off");
            return AutoSyncOutcome::BackingOff { until };
        }
        if !self.is_online() {
            return AutoSyncOutcome::Offline;
        }
        if !self.has_credentials() {
            if metadata.deferred_trigger != Some(trigger) {
                if let Err(error) = self.update_metadata(|m| m.deferred_trigger = Some(trigger)) {
                    return AutoSyncOutcome::Failed {
                        trigger: Some(trigger),
                        error,
                    };
                }
            }
            info!(%trigger, "backup due without credentials, deferring");
            return AutoSyncOutcome::Deferred(trigger);
        }

        match self.backups.rate_limit_window() {
            Ok(window) => {
                if let Err(SyncError::RateLimited { retry_at }) = window.check(now) {
                    self.status.update(|s| s.rate_limited_until = Some(retry_at));
                    debug!(retry_at, "backup due but rate limited");
                    return AutoSyncOutcome::RateLimited { retry_at };
                }
            }
            Err(error) => {
                return AutoSyncOutcome::Failed {
                    trigger: Some(trigger),
                    error,
                }
            }
        }

        info!(%trigger, "automatic backup triggered");
        match self.run_backup().await {
            Ok(report) => AutoSyncOutcome::Completed { trigger, report },
            Err(SyncError::AlreadyInFlight) => AutoSyncOutcome::InFlight,
            Err(SyncError::RateLimited { retry_at }) => AutoSyncOutcome::RateLimited { retry_at },
            Err(error) => AutoSyncOutcome::Failed {
                trigger: Some(trigger),
                error,
            },
        }
    }

    /// Backs up now, ignoring the thresholds and any error backoff.
    ///
    /// # Errors
    ///
    /// [`SyncError::RateLimited`] if the window is closed,
    /// [`SyncError::Offline`], [`SyncError::NoCredentials`],
    /// [`SyncError::AlreadyInFlight`] or the failure of the upload.
    pub async fn manual_sync(&self) -> SyncResult<BackupReport> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        info!("manual backup requested");
        self.run_backup().await
    }

    /// Replaces local sections with the ones from the latest backup.
    ///
    /// Sections only present locally are kept. Nothing is written unless
    /// the whole backup downloaded, verified and decoded.
    ///
    /// # Errors
    ///
    /// [`SyncError::NoBackup`], [`SyncError::Integrity`],
    /// [`SyncError::Decode`] and the usual remote failures.
    pub async fn restore_from_remote(&self) -> SyncResult<RestoreReport> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        let _guard = self.enter()?;
        let key = self.key_material()?;
        info!("restore requested");

        self.begin_run()?;
        let result = self.restore_once(&key).await;
        self.finish_run(&result);
        result
    }

    /// Runs a delivery pass over the mutation queue.
    ///
    /// # Errors
    ///
    /// [`SyncError::Offline`] when offline, or a local store failure.
    pub async fn process_queue(&self) -> SyncResult<QueueReport> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        let report = self.queue.process_all(self.transport.as_ref()).await?;
        if report.delivered > 0 && report.remaining == 0 {
            let now = self.clock.now_millis();
            let metadata = self.update_metadata(|m| m.last_queue_flush = Some(now))?;
            self.status
                .update(|s| s.last_sync_time = metadata.last_activity());
        }
        Ok(report)
    }

    /// Reports connectivity. Coming back online runs a queue pass, whose
    /// report is returned.
    ///
    /// # Errors
    ///
    /// A local store failure during that pass.
    pub async fn set_online(&self, online: bool) -> SyncResult<Option<QueueReport>> {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        self.status.update(|s| s.is_online = online);

        match (was_online, online) {
            (false, true) => {
                info!("connectivity restored");
                self.process_queue().await.map(Some)
            }
            (true, false) => {
                info!("connectivity lost");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Stores credentials locally and hands the token to the remote ports,
    /// then runs a queue pass when online and re-evaluates the schedule,
    /// including a deferred trigger.
    ///
    /// # Errors
    ///
    /// A local store failure.
    pub async fn configure_credentials(
        &self,
        credentials: Credentials,
    ) -> SyncResult<AutoSyncOutcome> {
        credentials.save(self.store.as_ref())?;
        self.remote.set_auth_token(Some(credentials.token().clone()));
        self.transport
            .set_auth_token(Some(credentials.token().clone()));
        *self.credentials.write() = Some(credentials);
        info!("credentials configured");

        if self.is_online() {
            if let Err(e) = self.process_queue().await {
                warn!(error = %e, "queue pass after configuring credentials failed");
            }
        }
        Ok(self.trigger_auto_sync().await)
    }

    /// One scheduler step: a queue pass when online, then an automatic
    /// backup check.
    pub async fn tick(&self) -> AutoSyncOutcome {
        if self.is_online() {
            if let Err(e) = self.process_queue().await {
                warn!(error = %e, "scheduled queue pass failed");
            }
        }
        self.trigger_auto_sync().await
    }

    /// Runs [`tick`](Self::tick) every `interval` until the handle is
    /// aborted.
    pub fn spawn_scheduler(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let outcome = engine.tick().await;
                debug!(?outcome, "scheduler tick");
            }
        })
    }

    async fn run_backup(&self) -> SyncResult<BackupReport> {
        let _guard = self.enter()?;
        let key = self.key_material()?;

        self.begin_run()?;
        let result = self.backup_once(&key).await;
        self.finish_run(&result);
        result
    }

    async fn backup_once(&self, key: &KeyMaterial) -> SyncResult<BackupReport> {
        // Changes made while uploading stay pending.
        let pending_at_start = self.metadata()?.pending_change_count;
        let snapshot = self.snapshot()?;
        let payload = self.codec.compact(&snapshot, key)?;

        let report = self.backups.upload(&payload).await?;

        let metadata = self.update_metadata(|m| {
            m.last_sync_time = Some(report.timestamp);
            m.pending_change_count = m.pending_change_count.saturating_sub(pending_at_start);
            m.deferred_trigger = None;
        })?;
        let now = self.clock.now_millis();
        let rate_limited_until = self
            .backups
            .rate_limit_window()?
            .next_allowed_sync_time
            .filter(|&t| t > now);
        self.status.update(|s| {
            s.pending_changes = metadata.pending_change_count;
            s.last_sync_time = metadata.last_activity();
            s.rate_limited_until = rate_limited_until;
        });
        Ok(report)
    }

    async fn restore_once(&self, key: &KeyMaterial) -> SyncResult<RestoreReport> {
        let restored = self.backups.restore().await?;
        let remote = self.codec.expand(&restored.payload, key)?;
        if remote.user_id != self.config.user_id {
            return Err(SyncError::integrity(format!(
                "backup belongs to user {:?}",
                remote.user_id
            )));
        }

        let mut local = self.snapshot()?;
        let sections_replaced = local.merge_from(remote);
        self.store.set_json(keys::SNAPSHOT, &local)?;

        let size = self.codec.estimate_size(&local);
        self.update_metadata(|m| m.estimated_snapshot_size = size)?;

        info!(
            backup_id = %restored.manifest.backup_id,
            sections = sections_replaced.len(),
            "restore merged"
        );
        Ok(RestoreReport {
            backup_id: restored.manifest.backup_id,
            created_at: restored.manifest.created_at,
            sections_replaced,
        })
    }

    fn enter(&self) -> SyncResult<InFlightGuard<'_>> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("sync or restore already in flight");
            return Err(SyncError::AlreadyInFlight);
        }
        Ok(InFlightGuard(&self.in_flight))
    }

    fn key_material(&self) -> SyncResult<KeyMaterial> {
        self.credentials
            .read()
            .as_ref()
            .map(|c| c.key_material().clone())
            .ok_or(SyncError::NoCredentials)
    }

    fn begin_run(&self) -> SyncResult<()> {
        self.update_metadata(|m| m.status = SyncState::Syncing)?;
        self.status.update(|s| {
            s.is_syncing = true;
            s.state = SyncState::Syncing;
        });
        Ok(())
    }

    fn finish_run<T>(&self, result: &SyncResult<T>) {
        let failure = match result {
            Err(e) if !e.is_expected() => Some(e.to_string()),
            _ => None,
        };

        let state = match &failure {
            Some(message) => {
                let until = self
                    .clock
                    .now_millis()
                    .saturating_add(millis(self.config.error_backoff));
                *self.error_until.lock() = Some(until);
                warn!(error = %message, backoff_until = until, "sync failed");
                SyncState::Error
            }
            None => SyncState::Idle,
        };
        let retry_at = result.as_ref().err().and_then(SyncError::rate_limited_until);

        if let Err(e) = self.update_metadata(|m| {
            m.status = state;
            m.error_message = failure.clone();
        }) {
            warn!(error = %e, "could not persist sync state");
        }
        self.status.update(|s| {
            s.is_syncing = false;
            s.state = state;
            s.error_message = failure;
            if retry_at.is_some() {
                s.rate_limited_until = retry_at;
            }
        });
    }

    /// Returns the end of the error backoff, clearing it and the error state
    /// once it has passed.
    fn backoff_until(&self, now: u64) -> Option<u64> {
        {
            let mut error_until = self.error_until.lock();
            match *error_until {
                Some(until) if now < until => return Some(until),
                _ => *error_until = None,
            }
        }
        if self.status.current().state == SyncState::Error {
            self.status.update(|s| {
                s.state = SyncState::Idle;
                s.error_message = None;
            });
            if let Err(e) = self.update_metadata(|m| {
                m.status = SyncState::Idle;
                m.error_message = None;
            }) {
                warn!(error = %e, "could not persist cleared error state");
            }
        }
        None
    }

    fn update_metadata(&self, f: impl FnOnce(&mut SyncMetadata)) -> SyncResult<SyncMetadata> {
        let _lock = self.metadata_lock.lock();
        let mut metadata = SyncMetadata::load(self.store.as_ref())?;
        f(&mut metadata);
        metadata.save(self.store.as_ref())?;
        Ok(metadata)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("user_id", &self.config.user_id)
            .field("online", &self.is_online())
            .field("in_flight", &self.in_flight.load(Ordering::Acquire))
            .field("status", &self.status())
            .finish()
    }
}

/// RAII guard to reset the in-flight flag.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::{AuthToken, HttpClient, HttpOperationTransport, HttpRequest, HttpResponse};
    use crate::remote::MemoryRemote;
    use crate::transport::MemoryTransport;
    use keepsake_storage::InMemoryStore;
    use serde_json::json;

    const T0: u64 = 1_700_000_000_000;

    struct Harness {
        store: Arc<InMemoryStore>,
        remote: Arc<MemoryRemote>,
        transport: Arc<MemoryTransport>,
        clock: Arc<ManualClock>,
        engine: SyncEngine,
    }

    fn harness(config: SyncConfig) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(MemoryRemote::new());
        let transport = Arc::new(MemoryTransport::new());
        let clock = Arc::new(ManualClock::new(T0));
        let deps = EngineDeps::new(store.clone(), remote.clone(), transport.clone())
            .with_clock(clock.clone());
        let engine = SyncEngine::new(config, deps).unwrap();
        Harness {
            store,
            remote,
            transport,
            clock,
            engine,
        }
    }

    fn credentials() -> Credentials {
        Credentials::new(
            AuthToken::new("token-0001"),
            KeyMaterial::new(b"key material".to_vec()),
        )
    }

    #[tokio::test]
    async fn mutation_is_persisted_and_counted() {
        let h = harness(SyncConfig::new("p1"));
        let outcome = h
            .engine
            .apply_mutation(Mutation::new("ledger", json!({"coins": 3})))
            .await
            .unwrap();

        // Never backed up and no credentials: due, but deferred.
        assert!(matches!(outcome, AutoSyncOutcome::Deferred(SyncTrigger::Elapsed)));
        assert_eq!(
            h.engine.snapshot().unwrap().section("ledger"),
            Some(&json!({"coins": 3}))
        );
        assert_eq!(h.engine.metadata().unwrap().pending_change_count, 1);
        assert_eq!(h.engine.status().pending_changes, 1);
    }

    #[tokio::test]
    async fn deferred_trigger_runs_once_credentials_arrive() {
        let h = harness(SyncConfig::new("p1"));
        h.engine
            .apply_mutation(Mutation::new("stats", json!({"games": 1})))
            .await
            .unwrap();
        assert_eq!(
            h.engine.metadata().unwrap().deferred_trigger,
            Some(SyncTrigger::Elapsed)
        );

        let outcome = h.engine.configure_credentials(credentials()).await.unwrap();
        assert!(outcome.is_completed());

        let metadata = h.engine.metadata().unwrap();
        assert_eq!(metadata.deferred_trigger, None);
        assert_eq!(metadata.pending_change_count, 0);
        assert_eq!(metadata.last_sync_time, Some(T0));
        assert!(h.remote.manifest().is_some());
    }

    #[tokio::test]
    async fn failure_enters_backoff_then_recovers() {
        let config = SyncConfig::new("p1").with_error_backoff(Duration::from_secs(60));
        let h = harness(config);
        h.engine.configure_credentials(credentials()).await.unwrap();
        h.remote.set_unreachable(true);

        let outcome = h
            .engine
            .apply_mutation(Mutation::new("stats", json!({"games": 1})))
            .await
            .unwrap();
        assert!(matches!(outcome, AutoSyncOutcome::Failed { .. }));
        assert_eq!(h.engine.status().state, SyncState::Error);
        assert!(h.engine.status().error_message.is_some());

        h.clock.advance(Duration::from_secs(30));
        assert!(matches!(
            h.engine.trigger_auto_sync().await,
            AutoSyncOutcome::BackingOff { .. }
        ));

        h.remote.set_unreachable(false);
        h.clock.advance(Duration::from_secs(31));
        assert!(h.engine.trigger_auto_sync().await.is_completed());
        assert_eq!(h.engine.status().state, SyncState::Idle);
        assert_eq!(h.engine.status().error_message, None);
    }

    #[tokio::test]
    async fn expired_backoff_clears_persisted_error() {
        let config = SyncConfig::new("p1").with_error_backoff(Duration::from_secs(60));
        let h = harness(config.clone());
        h.engine.configure_credentials(credentials()).await.unwrap();
        h.remote.set_unreachable(true);
        h.engine
            .apply_mutation(Mutation::new("stats", json!({"games": 1})))
            .await
            .unwrap();
        assert_eq!(h.engine.metadata().unwrap().status, SyncState::Error);

        // Past the backoff but offline: nothing runs, yet the error is over.
        h.engine.set_online(false).await.unwrap();
        h.clock.advance(Duration::from_secs(61));
        assert!(matches!(
            h.engine.trigger_auto_sync().await,
            AutoSyncOutcome::Offline
        ));
        let metadata = h.engine.metadata().unwrap();
        assert_eq!(metadata.status, SyncState::Idle);
        assert_eq!(metadata.error_message, None);

        let deps = EngineDeps::new(h.store.clone(), h.remote.clone(), h.transport.clone())
            .with_clock(h.clock.clone());
        let reopened = SyncEngine::new(config, deps).unwrap();
        assert_eq!(reopened.status().state, SyncState::Idle);
        assert_eq!(reopened.status().error_message, None);
    }

    struct AcceptAll;

    #[async_trait::async_trait]
    impl HttpClient for AcceptAll {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, String> {
            Ok(HttpResponse::new(200, Vec::new()))
        }
    }

    #[tokio::test]
    async fn queue_waits_for_credentials_without_spending_retries() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let transport = Arc::new(HttpOperationTransport::new("https://api.example", AcceptAll));
        let deps = EngineDeps::new(store, Arc::new(MemoryRemote::new()), transport)
            .with_clock(clock.clone());
        let engine = SyncEngine::new(SyncConfig::new("p1").with_max_retries(2), deps).unwrap();

        engine
            .apply_mutation(
                Mutation::new("stats", json!({"games": 1})).with_remote(
                    HttpMethod::Post,
                    "/stats",
                    json!({"games": 1}),
                ),
            )
            .await
            .unwrap();
        for _ in 0..2 {
            clock.advance(Duration::from_secs(60));
            engine.tick().await;
        }
        let pending = engine.queue().pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 0);

        engine.configure_credentials(credentials()).await.unwrap();
        assert!(engine.queue().is_empty().unwrap());
        assert_eq!(engine.queue().failed_count().unwrap(), 0);
        assert_eq!(engine.status().failed_items, 0);
    }

    #[tokio::test]
    async fn offline_blocks_backups() {
        let h = harness(SyncConfig::new("p1"));
        h.engine.configure_credentials(credentials()).await.unwrap();
        h.engine.set_online(false).await.unwrap();

        let outcome = h
            .engine
            .apply_mutation(Mutation::new("stats", json!({})))
            .await
            .unwrap();
        assert!(matches!(outcome, AutoSyncOutcome::Offline));
        assert!(matches!(
            h.engine.manual_sync().await,
            Err(SyncError::Offline)
        ));
        assert_eq!(h.engine.status().phase(), crate::status::StatusPhase::Offline);
    }

    #[tokio::test]
    async fn manual_sync_without_credentials() {
        let h = harness(SyncConfig::new("p1"));
        assert!(matches!(
            h.engine.manual_sync().await,
            Err(SyncError::NoCredentials)
        ));
        assert_eq!(h.engine.status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn concurrent_manual_syncs_collapse() {
        let h = harness(SyncConfig::new("p1"));
        h.engine.configure_credentials(credentials()).await.unwrap();
        h.remote.set_latency(Some(Duration::from_millis(30)));

        let (first, second) = tokio::join!(h.engine.manual_sync(), h.engine.manual_sync());
        let results = [first.is_ok(), second.is_ok()];
        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(
            first.err().or(second.err()),
            Some(SyncError::AlreadyInFlight)
        ));
        assert!(!h.engine.status().is_syncing);
    }

    #[tokio::test]
    async fn restore_rejects_foreign_user() {
        let h = harness(SyncConfig::new("p1"));
        h.engine.configure_credentials(credentials()).await.unwrap();
        h.engine
            .apply_mutation(Mutation::new("stats", json!({"games": 2})))
            .await
            .unwrap();

        let other = SyncEngine::new(
            SyncConfig::new("p2"),
            EngineDeps::new(
                Arc::new(InMemoryStore::new()),
                h.remote.clone(),
                h.transport.clone(),
            )
            .with_clock(h.clock.clone()),
        )
        .unwrap();
        other.configure_credentials(credentials()).await.unwrap();

        assert!(matches!(
            other.restore_from_remote().await,
            Err(SyncError::Integrity { .. })
        ));
        assert!(other.snapshot().unwrap().sections.is_empty());
    }

    #[tokio::test]
    async fn interrupted_run_is_reset_on_open() {
        let store = Arc::new(InMemoryStore::new());
        SyncMetadata {
            status: SyncState::Syncing,
            ..SyncMetadata::default()
        }
        .save(store.as_ref())
        .unwrap();

        let engine = SyncEngine::new(
            SyncConfig::new("p1"),
            EngineDeps::new(
                store,
                Arc::new(MemoryRemote::new()),
                Arc::new(MemoryTransport::new()),
            ),
        )
        .unwrap();
        assert_eq!(engine.metadata().unwrap().status, SyncState::Idle);
        assert_eq!(engine.status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn credentials_survive_reopen() {
        let h = harness(SyncConfig::new("p1"));
        h.engine.configure_credentials(credentials()).await.unwrap();

        let reopened = SyncEngine::new(
            SyncConfig::new("p1"),
            EngineDeps::new(h.store.clone(), h.remote.clone(), h.transport.clone()),
        )
        .unwrap();
        assert!(reopened.has_credentials());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = SyncEngine::new(
            SyncConfig::new("p1").with_chunk_size(0),
            EngineDeps::new(
                Arc::new(InMemoryStore::new()),
                Arc::new(MemoryRemote::new()),
                Arc::new(MemoryTransport::new()),
            ),
        );
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
