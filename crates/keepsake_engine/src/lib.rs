//! # Keepsake Sync Engine
//!
//! Local-first progress sync for a single player profile.
//!
//! This crate provides:
//! - A durable mutation queue replayed in order when connectivity returns
//! - Threshold evaluation deciding when a full backup is due
//! - Chunked, checksummed remote backups with rate limiting and history
//! - Verified restore with section-level merge into the local snapshot
//! - A status feed for UI observers
//!
//! ## Architecture
//!
//! Every local change is applied to the local store first and only then
//! considered for the network. The [`SyncEngine`] owns the local snapshot
//! and composes:
//!
//! 1. [`MutationQueue`] for per-operation remote calls
//! 2. [`ThresholdEvaluator`] for backup scheduling
//! 3. [`SnapshotCodec`](keepsake_codec::SnapshotCodec) for the payload
//! 4. [`BackupManager`] for upload, restore and quota accounting
//!
//! Remote storage and operation delivery are ports ([`RemoteBackend`],
//! [`OperationTransport`]) with in-memory, directory and HTTP
//! implementations.
//!
//! ## Key Invariants
//!
//! - Local writes never wait on the network
//! - A restore point is replaced only after the new one is complete
//! - At most one backup or restore runs at a time
//! - A failed or partial restore leaves the local snapshot untouched

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod clock;
mod config;
mod credentials;
mod directory;
mod engine;
mod error;
mod http;
mod metadata;
mod queue;
mod remote;
mod status;
mod threshold;
mod transport;

pub use backup::{
    BackupManager, BackupRecord, BackupReport, RateLimitWindow, RestoredBackup,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RateLimitConfig, SyncConfig, ThresholdConfig};
pub use credentials::Credentials;
pub use directory::DirectoryBackend;
pub use engine::{
    AutoSyncOutcome, EngineDeps, Mutation, RemoteOperation, RestoreReport, SyncEngine,
};
pub use error::{SyncError, SyncResult};
pub use http::{
    AuthToken, HttpBackend, HttpClient, HttpMethod, HttpOperationTransport, HttpRequest,
    HttpResponse,
};
pub use metadata::SyncMetadata;
pub use queue::{MutationQueue, QueueReport, QueuedOperation};
pub use remote::{sha256_hex, ChunkInfo, Manifest, MemoryRemote, RemoteBackend, MANIFEST_VERSION};
pub use status::{StatusHub, StatusPhase, Subscription, SyncState, SyncStatus};
pub use threshold::{SyncTrigger, ThresholdEvaluator};
pub use transport::{MemoryTransport, OperationTransport};

pub use keepsake_codec::{KeyMaterial, PlayerSnapshot};
