//! Operation delivery into a spool file beside the remote backups.
//!
//! Each delivered operation is appended as one JSON line to
//! `<remote>/operations.jsonl`. The operation id doubles as the idempotency
//! key for whoever consumes the spool.

use async_trait::async_trait;
use keepsake_engine::{OperationTransport, QueuedOperation, SyncError, SyncResult};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const SPOOL_FILE: &str = "operations.jsonl";

/// Appends delivered operations to a JSON-lines file.
#[derive(Debug, Clone)]
pub struct SpoolTransport {
    path: PathBuf,
}

impl SpoolTransport {
    /// Spools into `remote_root`.
    pub fn new(remote_root: &Path) -> Self {
        Self {
            path: remote_root.join(SPOOL_FILE),
        }
    }

    async fn append(&self, line: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line).await?;
        file.sync_all().await
    }
}

#[async_trait]
impl OperationTransport for SpoolTransport {
    async fn deliver(&self, op: &QueuedOperation) -> SyncResult<()> {
        let mut line = serde_json::to_vec(op)
            .map_err(|e| SyncError::network_fatal(format!("encode operation: {e}")))?;
        line.push(b'\n');

        self.append(&line)
            .await
            .map_err(|e| SyncError::network_retryable(format!("spool {:?}: {e}", self.path)))?;
        debug!(operation_id = %op.id, endpoint = %op.endpoint, "operation spooled");
        Ok(())
    }
}
