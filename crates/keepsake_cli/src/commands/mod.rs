//! CLI command implementations.

pub mod apply;
pub mod configure;
pub mod history;
pub mod queue;
pub mod status;
pub mod sync;

use crate::spool::SpoolTransport;
use keepsake_engine::{DirectoryBackend, EngineDeps, SyncConfig, SyncEngine};
use keepsake_storage::FileStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a profile lives.
pub struct Profile {
    /// Local profile directory.
    pub data: PathBuf,
    /// Remote backup directory.
    pub remote: PathBuf,
    /// Profile owner.
    pub user: String,
}

impl Profile {
    /// Opens the engine over the profile directories.
    pub fn open(&self) -> Result<SyncEngine, Box<dyn std::error::Error>> {
        let store = FileStore::open(&self.data)?;
        let deps = EngineDeps::new(
            Arc::new(store),
            Arc::new(DirectoryBackend::new(&self.remote)),
            Arc::new(SpoolTransport::new(&self.remote)),
        );
        Ok(SyncEngine::new(SyncConfig::new(self.user.clone()), deps)?)
    }
}

pub(crate) fn format_timestamp(ms: u64) -> String {
    let secs = ms / 1000;
    let days = secs / 86_400;
    let hours = (secs / 3600) % 24;
    let mins = (secs / 60) % 60;
    format!(
        "day {} {:02}:{:02}:{:02} UTC",
        days,
        hours,
        mins,
        secs % 60
    )
}

pub(crate) fn format_optional_timestamp(ms: Option<u64>) -> String {
    ms.map_or_else(|| "never".to_string(), format_timestamp)
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_days_since_epoch() {
        assert_eq!(format_timestamp(0), "day 0 00:00:00 UTC");
        assert_eq!(format_timestamp(86_400_000 + 3_723_000), "day 1 01:02:03 UTC");
        assert_eq!(format_optional_timestamp(None), "never");
    }

    #[test]
    fn sizes_pick_a_unit() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(150 * 1024 * 1024), "150.0 MB");
    }

    #[tokio::test]
    async fn profile_opens_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let profile = Profile {
            data: dir.path().join("data"),
            remote: dir.path().join("remote"),
            user: "tester".into(),
        };
        let engine = profile.open().unwrap();
        assert_eq!(engine.config().user_id, "tester");
        assert!(!engine.has_credentials());
    }
}
