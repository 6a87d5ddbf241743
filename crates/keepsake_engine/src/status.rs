//! Observable sync status.
//!
//! The engine publishes a [`SyncStatus`] through a `tokio::sync::watch`
//! channel. Receivers always see the latest value; intermediate updates may
//! be coalesced.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Nothing running.
    #[default]
    Idle,
    /// A backup or restore is in flight.
    Syncing,
    /// The last backup or restore failed.
    Error,
}

/// What a user should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    /// No connectivity.
    Offline,
    /// A backup or restore is running.
    Syncing,
    /// Local changes or queued operations await the remote.
    Pending,
    /// Everything is on the remote.
    Synced,
    /// The last attempt failed.
    Error,
}

/// A point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Connectivity as last reported.
    pub is_online: bool,
    /// A backup or restore is in flight.
    pub is_syncing: bool,
    /// Operations waiting in the mutation queue.
    pub queue_size: usize,
    /// Latest of the last successful backup and the last queue flush.
    pub last_sync_time: Option<u64>,
    /// Operations dropped after exhausting their retries.
    pub failed_items: u64,
    /// Local changes not yet in a backup.
    pub pending_changes: u64,
    /// Orchestrator state.
    pub state: SyncState,
    /// Message of the last failure, if the state is [`SyncState::Error`].
    pub error_message: Option<String>,
    /// Uploads are refused until this time (Unix millis).
    pub rate_limited_until: Option<u64>,
}

impl SyncStatus {
    /// Maps the status to a single user-visible phase.
    pub fn phase(&self) -> StatusPhase {
        if !self.is_online {
            StatusPhase::Offline
        } else if self.is_syncing {
            StatusPhase::Syncing
        } else if self.state == SyncState::Error {
            StatusPhase::Error
        } else if self.queue_size > 0 || self.pending_changes > 0 {
            StatusPhase::Pending
        } else {
            StatusPhase::Synced
        }
    }
}

/// Owner of the status channel.
///
/// Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct StatusHub {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl StatusHub {
    /// Creates a hub holding `initial`.
    pub fn new(initial: SyncStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current status.
    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Applies `f` and notifies subscribers if the status changed.
    pub fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        self.tx.send_if_modified(|status| {
            let before = status.clone();
            f(status);
            *status != before
        });
    }

    /// Returns a receiver that observes every future change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Runs `listener` with the current status and then after every change.
    ///
    /// Must be called from within a tokio runtime. The listener runs on one
    /// task until the returned [`Subscription`] is dropped.
    pub fn subscribe_with<F>(&self, mut listener: F) -> Subscription
    where
        F: FnMut(&SyncStatus) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let status = rx.borrow_and_update().clone();
                listener(&status);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        Subscription { handle }
    }
}

/// Keeps a status listener alive. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
