//! Persisted sync metadata and the store keys the engine owns.

use crate::error::SyncResult;
use crate::status::SyncState;
use crate::threshold::SyncTrigger;
use keepsake_storage::{KeyValueStore, KeyValueStoreExt};
use serde::{Deserialize, Serialize};

/// Store keys owned by the engine.
pub(crate) mod keys {
    pub const SNAPSHOT: &str = "keepsake/snapshot";
    pub const METADATA: &str = "keepsake/metadata";
    pub const QUEUE: &str = "keepsake/queue";
    pub const QUEUE_FAILED: &str = "keepsake/queue_failed";
    pub const HISTORY: &str = "keepsake/history";
    pub const CREDENTIALS: &str = "keepsake/credentials";
    pub const QUOTA_USAGE: &str = "keepsake/quota_usage";
    pub const STRAY_CHUNKS: &str = "keepsake/stray_chunks";
}

/// Per-profile sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncMetadata {
    /// Time of the last successful backup (Unix millis).
    pub last_sync_time: Option<u64>,
    /// Local changes since the last successful backup.
    pub pending_change_count: u64,
    /// Orchestrator state when last persisted.
    pub status: SyncState,
    /// Message of the last failure.
    pub error_message: Option<String>,
    /// Size estimate of the current snapshot.
    pub estimated_snapshot_size: u64,
    /// A trigger that fired while credentials were missing.
    pub deferred_trigger: Option<SyncTrigger>,
    /// Time the mutation queue was last drained (Unix millis).
    pub last_queue_flush: Option<u64>,
}

impl SyncMetadata {
    /// Loads the metadata, or defaults for a fresh profile.
    pub(crate) fn load(store: &dyn KeyValueStore) -> SyncResult<Self> {
        Ok(store.get_json(keys::METADATA)?.unwrap_or_default())
    }

    pub(crate) fn save(&self, store: &dyn KeyValueStore) -> SyncResult<()> {
        store.set_json(keys::METADATA, self)?;
        Ok(())
    }

    /// Latest of the last backup and the last queue flush.
    pub fn last_activity(&self) -> Option<u64> {
        self.last_sync_time.max(self.last_queue_flush)
    }
}
