//! Durable FIFO of operations awaiting remote confirmation.
//!
//! The queue lives in the local store under a single key, so every change
//! is one atomic write. A delivery pass works on a copy taken when it
//! starts; operations enqueued meanwhile wait for the next pass.

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpMethod;
use crate::metadata::keys;
use crate::status::StatusHub;
use crate::transport::OperationTransport;
use keepsake_storage::{KeyValueStore, KeyValueStoreExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An operation waiting for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique id, also sent as the idempotency key.
    pub id: Uuid,
    /// Remote API path.
    pub endpoint: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// JSON body.
    pub payload: Value,
    /// Enqueue time (Unix millis).
    pub enqueued_at: u64,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
}

impl QueuedOperation {
    /// Creates an operation with a fresh id.
    pub fn new(
        endpoint: impl Into<String>,
        method: HttpMethod,
        payload: Value,
        enqueued_at: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            method,
            payload,
            enqueued_at,
            retry_count: 0,
        }
    }
}

/// Outcome of one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// Operations delivered and removed.
    pub delivered: usize,
    /// Operations that failed and stay queued.
    pub retried: usize,
    /// Operations dropped after exhausting their retries.
    pub dropped: usize,
    /// Operations left in the queue after the pass.
    pub remaining: usize,
}

/// The mutation queue.
pub struct MutationQueue {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    status: StatusHub,
    max_retries: u32,
    request_timeout: Duration,
    processing: AtomicBool,
    write_lock: Mutex<()>,
}

impl MutationQueue {
    /// Creates a queue over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, status: StatusHub) -> Self {
        Self {
            store,
            clock,
            status,
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            processing: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Sets the delivery attempts per operation.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the bound for each delivery.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Persists a new operation and returns its id.
    ///
    /// # Errors
    ///
    /// Fails only if the local store fails; a full store surfaces as
    /// [`SyncError::QuotaExceeded`] and nothing is queued.
    pub fn enqueue(
        &self,
        endpoint: impl Into<String>,
        method: HttpMethod,
        payload: Value,
    ) -> SyncResult<Uuid> {
        let operation = QueuedOperation::new(endpoint, method, payload, self.clock.now_millis());
        let id = operation.id;
        let len = {
            let _lock = self.write_lock.lock();
            let mut queue = self.load()?;
            queue.push(operation);
            self.save(&queue)?;
            queue.len()
        };
        debug!(operation_id = %id, queue_size = len, "operation enqueued");
        self.status.update(|s| s.queue_size = len);
        Ok(id)
    }

    /// Returns a copy of the queued operations in delivery order.
    pub fn pending(&self) -> SyncResult<Vec<QueuedOperation>> {
        self.load()
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> SyncResult<usize> {
        Ok(self.load()?.len())
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the number of operations dropped after exhausting retries.
    pub fn failed_count(&self) -> SyncResult<u64> {
        Ok(self.store.get_json(keys::QUEUE_FAILED)?.unwrap_or(0))
    }

    /// Resets the failure tally.
    pub fn clear_failed(&self) -> SyncResult<()> {
        {
            let _lock = self.write_lock.lock();
            self.store.delete(keys::QUEUE_FAILED)?;
        }
        self.status.update(|s| s.failed_items = 0);
        Ok(())
    }

    /// Returns true while a delivery pass runs.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Publishes the persisted counters.
    pub fn refresh_status(&self) -> SyncResult<()> {
        let len = self.len()?;
        let failed = self.failed_count()?;
        self.status.update(|s| {
            s.queue_size = len;
            s.failed_items = failed;
        });
        Ok(())
    }

    /// Tries to deliver every queued operation, oldest first.
    ///
    /// A delivered operation is removed. A failed one has its retry count
    /// incremented and is dropped, and counted as failed, once the count
    /// reaches the maximum. A call made while another pass runs returns an
    /// empty report.
    ///
    /// # Errors
    ///
    /// Only local store failures are returned; delivery failures are
    /// absorbed into the retry budget. A transport without credentials ends
    /// the pass without charging any operation a retry.
    pub async fn process_all(&self, transport: &dyn OperationTransport) -> SyncResult<QueueReport> {
        if self.processing.swap(true, Ordering::AcqRel) {
            debug!("queue pass already running");
            return Ok(QueueReport::default());
        }
        let _guard = ProcessingGuard(&self.processing);

        let batch = self.load()?;
        if batch.is_empty() {
            return Ok(QueueReport::default());
        }
        info!(queued = batch.len(), "starting queue pass");

        let mut report = QueueReport::default();
        for operation in batch {
            let outcome =
                match tokio::time::timeout(self.request_timeout, transport.deliver(&operation))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout),
                };

            match outcome {
                Ok(()) => {
                    debug!(operation_id = %operation.id, endpoint = %operation.endpoint, "operation delivered");
                    self.remove(operation.id)?;
                    report.delivered += 1;
                }
                Err(SyncError::NoCredentials) => {
                    // Nothing can be delivered until a token is configured.
                    debug!(operation_id = %operation.id, "no credentials, pausing queue pass");
                    break;
                }
                Err(e) => {
                    if self.record_failure(operation.id, &e)? {
                        report.dropped += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }

        report.remaining = self.len()?;
        info!(
            delivered = report.delivered,
            retried = report.retried,
            dropped = report.dropped,
            remaining = report.remaining,
            "queue pass complete"
        );
        Ok(report)
    }

    fn remove(&self, id: Uuid) -> SyncResult<()> {
        let len = {
            let _lock = self.write_lock.lock();
            let mut queue = self.load()?;
            queue.retain(|op| op.id != id);
            self.save(&queue)?;
            queue.len()
        };
        self.status.update(|s| s.queue_size = len);
        Ok(())
    }

    /// Returns true if the operation was dropped.
    fn record_failure(&self, id: Uuid, error: &SyncError) -> SyncResult<bool> {
        let (len, failed, dropped) = {
            let _lock = self.write_lock.lock();
            let mut queue = self.load()?;
            let Some(pos) = queue.iter().position(|op| op.id == id) else {
                return Ok(false);
            };

            queue[pos].retry_count += 1;
            let attempts = queue[pos].retry_count;
            let dropped = attempts >= self.max_retries;
            if dropped {
                let op = queue.remove(pos);
                warn!(
                    operation_id = %op.id,
                    endpoint = %op.endpoint,
                    attempts,
                    error = %error,
                    "dropping operation after exhausting retries"
                );
            } else {
                warn!(operation_id = %id, attempts, error = %error, "delivery failed, will retry");
            }

            self.save(&queue)?;
            let mut failed: u64 = self.store.get_json(keys::QUEUE_FAILED)?.unwrap_or(0);
            if dropped {
                failed += 1;
                self.store.set_json(keys::QUEUE_FAILED, &failed)?;
            }
            (queue.len(), failed, dropped)
        };

        self.status.update(|s| {
            s.queue_size = len;
            s.failed_items = failed;
        });
        Ok(dropped)
    }

    fn load(&self) -> SyncResult<Vec<QueuedOperation>> {
        Ok(self.store.get_json(keys::QUEUE)?.unwrap_or_default())
    }

    fn save(&self, queue: &[QueuedOperation]) -> SyncResult<()> {
        self.store.set_json(keys::QUEUE, queue)?;
        Ok(())
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("processing", &self.is_processing())
            .finish()
    }
}

/// RAII guard to reset the processing flag.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::status::SyncStatus;
    use crate::transport::MemoryTransport;
    use keepsake_storage::InMemoryStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        status: StatusHub,
        queue: MutationQueue,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let status = StatusHub::new(SyncStatus::default());
        let queue = MutationQueue::new(
            store.clone(),
            Arc::new(ManualClock::new(1_000)),
            status.clone(),
        );
        Fixture {
            store,
            status,
            queue,
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let f = fixture();
        let ids: Vec<Uuid> = (0..5)
            .map(|i| {
                f.queue
                    .enqueue("/scores", HttpMethod::Post, json!({"n": i}))
                    .unwrap()
            })
            .collect();

        let transport = MemoryTransport::new();
        let report = f.queue.process_all(&transport).await.unwrap();

        assert_eq!(report.delivered, 5);
        assert_eq!(report.remaining, 0);
        let applied: Vec<Uuid> = transport.applied().iter().map(|op| op.id).collect();
        assert_eq!(applied, ids);
        assert_eq!(f.status.current().queue_size, 0);
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let f = fixture();
        f.queue
            .enqueue("/ledger", HttpMethod::Put, json!({"coins": 5}))
            .unwrap();

        let reopened = MutationQueue::new(
            f.store.clone(),
            Arc::new(ManualClock::new(0)),
            StatusHub::new(SyncStatus::default()),
        );
        let pending = reopened.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].endpoint, "/ledger");
        assert_eq!(pending[0].enqueued_at, 1_000);
    }

    #[tokio::test]
    async fn retry_budget_drops_and_counts() {
        let f = fixture();
        let bad = f
            .queue
            .enqueue("/broken", HttpMethod::Post, json!({}))
            .unwrap();
        f.queue
            .enqueue("/scores", HttpMethod::Post, json!({"n": 1}))
            .unwrap();

        let transport = MemoryTransport::new();
        transport.fail_endpoint("/broken");

        let first = f.queue.process_all(&transport).await.unwrap();
        assert_eq!((first.delivered, first.retried), (1, 1));
        assert_eq!(f.queue.pending().unwrap()[0].retry_count, 1);

        f.queue.process_all(&transport).await.unwrap();
        let last = f.queue.process_all(&transport).await.unwrap();

        assert_eq!(last.dropped, 1);
        assert!(f.queue.is_empty().unwrap());
        assert_eq!(f.queue.failed_count().unwrap(), 1);
        assert_eq!(transport.attempts_for(bad), 3);
        assert_eq!(transport.applied().len(), 1);
        assert_eq!(f.status.current().failed_items, 1);

        f.queue.clear_failed().unwrap();
        assert_eq!(f.queue.failed_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn timeout_consumes_retry_budget() {
        let f = fixture();
        let queue = MutationQueue::new(
            f.store.clone(),
            Arc::new(ManualClock::new(0)),
            f.status.clone(),
        )
        .with_request_timeout(Duration::from_millis(10));
        queue.enqueue("/slow", HttpMethod::Post, json!({})).unwrap();

        let transport = MemoryTransport::new();
        transport.set_latency(Some(Duration::from_secs(5)));
        let report = queue.process_all(&transport).await.unwrap();

        assert_eq!(report.retried, 1);
        assert_eq!(queue.pending().unwrap()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn reentrant_pass_is_noop() {
        let f = fixture();
        let queue = Arc::new(MutationQueue::new(
            f.store.clone(),
            Arc::new(ManualClock::new(0)),
            f.status.clone(),
        ));
        queue.enqueue("/a", HttpMethod::Post, json!({})).unwrap();

        let transport = Arc::new(MemoryTransport::new());
        transport.set_latency(Some(Duration::from_millis(50)));

        let first = {
            let queue = Arc::clone(&queue);
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { queue.process_all(transport.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.is_processing());

        let second = queue.process_all(transport.as_ref()).await.unwrap();
        assert_eq!(second, QueueReport::default());

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.delivered, 1);
        assert_eq!(transport.delivery_count(), 1);
        assert!(!queue.is_processing());
    }

    #[tokio::test]
    async fn operations_enqueued_during_pass_wait_for_next() {
        let f = fixture();
        let queue = Arc::new(MutationQueue::new(
            f.store.clone(),
            Arc::new(ManualClock::new(0)),
            f.status.clone(),
        ));
        queue.enqueue("/a", HttpMethod::Post, json!({})).unwrap();

        let transport = Arc::new(MemoryTransport::new());
        transport.set_latency(Some(Duration::from_millis(50)));

        let pass = {
            let queue = Arc::clone(&queue);
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { queue.process_all(transport.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let late = queue.enqueue("/b", HttpMethod::Post, json!({})).unwrap();

        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(queue.pending().unwrap()[0].id, late);
    }

    #[test]
    fn full_store_rejects_enqueue() {
        let store = Arc::new(InMemoryStore::with_capacity(64));
        let queue = MutationQueue::new(
            store,
            Arc::new(ManualClock::new(0)),
            StatusHub::new(SyncStatus::default()),
        );
        let result = queue.enqueue("/a", HttpMethod::Post, json!({"blob": "x".repeat(200)}));
        assert!(matches!(result, Err(SyncError::QuotaExceeded { .. })));
        assert!(queue.pending().unwrap().is_empty());
    }

    struct Unauthenticated;

    #[async_trait::async_trait]
    impl OperationTransport for Unauthenticated {
        async fn deliver(&self, _operation: &QueuedOperation) -> SyncResult<()> {
            Err(SyncError::NoCredentials)
        }
    }

    #[tokio::test]
    async fn missing_credentials_pause_without_spending_retries() {
        let f = fixture();
        let queue = MutationQueue::new(
            f.store.clone(),
            Arc::new(ManualClock::new(0)),
            f.status.clone(),
        )
        .with_max_retries(2);
        queue.enqueue("/a", HttpMethod::Post, json!({})).unwrap();
        queue.enqueue("/b", HttpMethod::Post, json!({})).unwrap();

        for _ in 0..5 {
            let report = queue.process_all(&Unauthenticated).await.unwrap();
            assert_eq!((report.retried, report.dropped), (0, 0));
            assert_eq!(report.remaining, 2);
        }

        let pending = queue.pending().unwrap();
        assert!(pending.iter().all(|op| op.retry_count == 0));
        assert_eq!(queue.failed_count().unwrap(), 0);

        let transport = MemoryTransport::new();
        let report = queue.process_all(&transport).await.unwrap();
        assert_eq!(report.delivered, 2);
    }

    /// Rejects writes to the queue key once armed.
    struct QueueWriteFails {
        inner: InMemoryStore,
        armed: std::sync::atomic::AtomicBool,
    }

    impl KeyValueStore for QueueWriteFails {
        fn get(&self, key: &str) -> keepsake_storage::StorageResult<Option<serde_json::Value>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &serde_json::Value) -> keepsake_storage::StorageResult<()> {
            if key == keys::QUEUE && self.armed.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
            }
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> keepsake_storage::StorageResult<bool> {
            self.inner.delete(key)
        }

        fn keys(&self) -> keepsake_storage::StorageResult<Vec<String>> {
            self.inner.keys()
        }
    }

    #[tokio::test]
    async fn failed_queue_write_leaves_tally_untouched() {
        let store = Arc::new(QueueWriteFails {
            inner: InMemoryStore::new(),
            armed: AtomicBool::new(false),
        });
        let queue = MutationQueue::new(
            store.clone(),
            Arc::new(ManualClock::new(0)),
            StatusHub::new(SyncStatus::default()),
        )
        .with_max_retries(1);
        queue.enqueue("/broken", HttpMethod::Post, json!({})).unwrap();

        let transport = MemoryTransport::new();
        transport.fail_endpoint("/broken");
        store.armed.store(true, Ordering::SeqCst);

        assert!(queue.process_all(&transport).await.is_err());
        assert_eq!(queue.failed_count().unwrap(), 0);
        assert_eq!(queue.len().unwrap(), 1);

        store.armed.store(false, Ordering::SeqCst);
        let report = queue.process_all(&transport).await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(queue.failed_count().unwrap(), 1);
    }
}
