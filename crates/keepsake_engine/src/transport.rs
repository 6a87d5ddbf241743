//! Delivery of queued operations to the remote API.

use crate::error::{SyncError, SyncResult};
use crate::http::AuthToken;
use crate::queue::QueuedOperation;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Delivers queued operations to the remote API.
///
/// Implementations must send the operation id as its idempotency key so a
/// replay after an ambiguous failure is applied at most once.
#[async_trait]
pub trait OperationTransport: Send + Sync {
    /// Delivers one operation.
    async fn deliver(&self, operation: &QueuedOperation) -> SyncResult<()>;

    /// Installs or clears the credential used for remote calls.
    fn set_auth_token(&self, _token: Option<AuthToken>) {}
}

/// An in-memory operation sink for testing.
///
/// Deduplicates by operation id the way an idempotent remote API does.
#[derive(Debug)]
pub struct MemoryTransport {
    online: AtomicBool,
    applied: Mutex<Vec<QueuedOperation>>,
    seen: Mutex<HashSet<Uuid>>,
    fail_next: AtomicU32,
    failing_endpoints: Mutex<HashSet<String>>,
    attempts: Mutex<HashMap<Uuid, u32>>,
    deliveries: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl MemoryTransport {
    /// Creates a reachable transport.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            applied: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
            fail_next: AtomicU32::new(0),
            failing_endpoints: Mutex::new(HashSet::new()),
            attempts: Mutex::new(HashMap::new()),
            deliveries: AtomicUsize::new(0),
            latency: Mutex::new(None),
        }
    }

    /// Sets reachability. Unreachable deliveries fail retryably.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Fails the next `n` deliveries.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fails every delivery to `endpoint`.
    pub fn fail_endpoint(&self, endpoint: impl Into<String>) {
        self.failing_endpoints.lock().insert(endpoint.into());
    }

    /// Delays every delivery.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Operations applied, in application order, each at most once.
    pub fn applied(&self) -> Vec<QueuedOperation> {
        self.applied.lock().clone()
    }

    /// Total delivery calls, including failures and replays.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Delivery calls seen for one operation.
    pub fn attempts_for(&self, id: Uuid) -> u32 {
        self.attempts.lock().get(&id).copied().unwrap_or(0)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationTransport for MemoryTransport {
    async fn deliver(&self, operation: &QueuedOperation) -> SyncResult<()> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        *self.attempts.lock().entry(operation.id).or_default() += 1;

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::network_retryable("transport offline"));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::network_retryable("injected delivery failure"));
        }
        if self.failing_endpoints.lock().contains(&operation.endpoint) {
            return Err(SyncError::network_fatal(format!(
                "endpoint {} rejected the operation",
                operation.endpoint
            )));
        }

        if self.seen.lock().insert(operation.id) {
            self.applied.lock().push(operation.clone());
        }
        Ok(())
    }
}
