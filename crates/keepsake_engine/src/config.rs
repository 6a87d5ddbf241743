//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use keepsake_codec::{CodecOptions, DEFAULT_SENSITIVE_KEYS};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Owner of the local profile.
    pub user_id: String,
    /// When an automatic backup becomes due.
    pub thresholds: ThresholdConfig,
    /// Delivery attempts per queued operation before it is dropped.
    pub max_retries: u32,
    /// Backup frequency caps.
    pub rate_limit: RateLimitConfig,
    /// Largest chunk uploaded as one remote file.
    pub chunk_size: usize,
    /// Number of backup records kept in the history.
    pub history_limit: usize,
    /// Upper bound for every remote call.
    pub request_timeout: Duration,
    /// How long automatic syncs pause after a failure.
    pub error_backoff: Duration,
    /// Period of the background scheduler.
    pub auto_sync_interval: Duration,
    /// Key names sealed separately from the snapshot body.
    pub sensitive_keys: Vec<String>,
    /// zstd level used for snapshot payloads.
    pub compression_level: i32,
}

impl SyncConfig {
    /// Creates a configuration with default policy for the given user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thresholds: ThresholdConfig::default(),
            max_retries: 3,
            rate_limit: RateLimitConfig::default(),
            chunk_size: (10 * MIB) as usize,
            history_limit: 50,
            request_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
            auto_sync_interval: Duration::from_secs(5 * 60),
            sensitive_keys: DEFAULT_SENSITIVE_KEYS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
            compression_level: 3,
        }
    }

    /// Sets the backup thresholds.
    pub fn with_thresholds(mut self, thresholds: ThresholdConfig) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Sets the delivery attempts per queued operation.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the rate limit.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sets the maximum chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the history bound.
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the error backoff.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Sets the scheduler period.
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    /// Sets the sensitive key names.
    pub fn with_sensitive_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the zstd compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Returns the codec options derived from this configuration.
    pub fn codec_options(&self) -> CodecOptions {
        CodecOptions {
            sensitive_keys: self.sensitive_keys.clone(),
            compression_level: self.compression_level,
        }
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> SyncResult<()> {
        if self.user_id.is_empty() {
            return Err(SyncError::InvalidConfig("user_id must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.max_retries == 0 {
            return Err(SyncError::InvalidConfig("max_retries must be positive".into()));
        }
        if self.rate_limit.max_per_hour == 0 || self.rate_limit.max_per_day == 0 {
            return Err(SyncError::InvalidConfig("rate limit caps must be positive".into()));
        }
        if self.history_limit == 0 {
            return Err(SyncError::InvalidConfig("history_limit must be positive".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("request_timeout must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("local")
    }
}

/// When an automatic backup becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdConfig {
    /// Pending local changes that make a backup due.
    pub change_count: u64,
    /// Age of the last backup that makes a backup due.
    pub max_age: Duration,
    /// Estimated snapshot size in bytes that makes a backup due.
    pub snapshot_size: u64,
}

impl ThresholdConfig {
    /// Sets the change count threshold.
    pub fn with_change_count(mut self, count: u64) -> Self {
        self.change_count = count;
        self
    }

    /// Sets the maximum backup age.
    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.max_age = age;
        self
    }

    /// Sets the snapshot size threshold.
    pub fn with_snapshot_size(mut self, bytes: u64) -> Self {
        self.snapshot_size = bytes;
        self
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            change_count: 100,
            max_age: 7 * DAY,
            snapshot_size: 150 * MIB,
        }
    }
}

/// Caps on backup frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Uploads allowed in any rolling hour.
    pub max_per_hour: u32,
    /// Uploads allowed in any rolling day.
    pub max_per_day: u32,
}

impl RateLimitConfig {
    /// Creates a rate limit.
    pub fn new(max_per_hour: u32, max_per_day: u32) -> Self {
        Self {
            max_per_hour,
            max_per_day,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(1, 10)
    }
}
