//! Backup scheduling policy.

use crate::clock::millis;
use crate::config::ThresholdConfig;
use crate::metadata::SyncMetadata;
use serde::{Deserialize, Serialize};

/// The condition that made a backup due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Enough local changes accumulated.
    ChangeCount,
    /// The last backup is too old, or there never was one.
    Elapsed,
    /// The snapshot grew past the size threshold.
    SnapshotSize,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SyncTrigger::ChangeCount => "change_count",
            SyncTrigger::Elapsed => "elapsed",
            SyncTrigger::SnapshotSize => "snapshot_size",
        })
    }
}

/// Decides whether an automatic backup is due. Pure.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEvaluator {
    config: ThresholdConfig,
}

impl ThresholdEvaluator {
    /// Creates an evaluator.
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    /// Returns the thresholds.
    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Returns true if any threshold is reached.
    pub fn should_sync(&self, metadata: &SyncMetadata, estimated_size: u64, now: u64) -> bool {
        self.evaluate(metadata, estimated_size, now).is_some()
    }

    /// Returns the first threshold reached, checking change count, age and
    /// size in that order.
    ///
    /// A profile that was never backed up is due by age as soon as it has a
    /// pending change.
    pub fn evaluate(
        &self,
        metadata: &SyncMetadata,
        estimated_size: u64,
        now: u64,
    ) -> Option<SyncTrigger> {
        let pending = metadata.pending_change_count;
        if pending >= self.config.change_count {
            return Some(SyncTrigger::ChangeCount);
        }

        let elapsed = match metadata.last_sync_time {
            Some(last) => now.saturating_sub(last) >= millis(self.config.max_age),
            None => pending > 0,
        };
        if elapsed {
            return Some(SyncTrigger::Elapsed);
        }

        if estimated_size >= self.config.snapshot_size {
            return Some(SyncTrigger::SnapshotSize);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const HOUR: u64 = 60 * 60 * 1000;
    const DAY: u64 = 24 * HOUR;
    const MB: u64 = 1024 * 1024;
    const NOW: u64 = 100 * DAY;

    fn evaluator() -> ThresholdEvaluator {
        ThresholdEvaluator::new(
            ThresholdConfig::default()
                .with_change_count(100)
                .with_max_age(Duration::from_secs(7 * 24 * 3600))
                .with_snapshot_size(150 * MB),
        )
    }

    fn metadata(pending: u64, last_sync_ago: Option<u64>) -> SyncMetadata {
        SyncMetadata {
            pending_change_count: pending,
            last_sync_time: last_sync_ago.map(|ago| NOW - ago),
            ..SyncMetadata::default()
        }
    }

    #[test]
    fn below_every_threshold() {
        let m = metadata(50, Some(2 * DAY));
        assert!(!evaluator().should_sync(&m, 10 * MB, NOW));
    }

    #[test]
    fn change_count_triggers() {
        let m = metadata(150, Some(2 * DAY));
        assert!(evaluator().should_sync(&m, 10 * MB, NOW));
        assert_eq!(
            evaluator().evaluate(&m, 10 * MB, NOW),
            Some(SyncTrigger::ChangeCount)
        );
    }

    #[test]
    fn age_triggers() {
        let m = metadata(1, Some(7 * DAY));
        assert_eq!(evaluator().evaluate(&m, 0, NOW), Some(SyncTrigger::Elapsed));
    }

    #[test]
    fn size_triggers_without_changes() {
        let m = metadata(0, Some(HOUR));
        assert_eq!(
            evaluator().evaluate(&m, 160 * MB, NOW),
            Some(SyncTrigger::SnapshotSize)
        );
    }

    #[test]
    fn never_backed_up_needs_a_change() {
        assert!(!evaluator().should_sync(&metadata(0, None), 0, NOW));
        assert_eq!(
            evaluator().evaluate(&metadata(1, None), 0, NOW),
            Some(SyncTrigger::Elapsed)
        );
    }

    #[test]
    fn clock_behind_last_sync_is_not_elapsed() {
        let m = SyncMetadata {
            pending_change_count: 1,
            last_sync_time: Some(NOW + DAY),
            ..SyncMetadata::default()
        };
        assert!(!evaluator().should_sync(&m, 0, NOW));
    }
}
