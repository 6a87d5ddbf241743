//! Status command implementation.

use super::{format_optional_timestamp, format_size, Profile};
use keepsake_engine::{StatusPhase, SyncMetadata, SyncStatus};
use serde::Serialize;

/// Status output.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Profile owner.
    pub user_id: String,
    /// Summary phase.
    pub phase: StatusPhase,
    /// Live status.
    pub status: SyncStatus,
    /// Persisted metadata.
    pub metadata: SyncMetadata,
    /// Credentials are configured.
    pub has_credentials: bool,
}

/// Runs the status command.
pub fn run(profile: &Profile, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = profile.open()?;
    let status = engine.status();
    let report = StatusReport {
        user_id: engine.config().user_id.clone(),
        phase: status.phase(),
        status,
        metadata: engine.metadata()?,
        has_credentials: engine.has_credentials(),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(())
}

fn print_text_output(report: &StatusReport) {
    println!("Keepsake Profile Status");
    println!("=======================");
    println!();
    println!("User:        {}", report.user_id);
    println!("Phase:       {:?}", report.phase);
    println!("Credentials: {}", if report.has_credentials { "configured" } else { "missing" });
    println!();
    println!("Sync:");
    println!(
        "  Last sync:        {}",
        format_optional_timestamp(report.status.last_sync_time)
    );
    println!(
        "  Last backup:      {}",
        format_optional_timestamp(report.metadata.last_sync_time)
    );
    println!("  Pending changes:  {}", report.metadata.pending_change_count);
    println!(
        "  Snapshot size:    {}",
        format_size(report.metadata.estimated_snapshot_size)
    );
    if let Some(trigger) = report.metadata.deferred_trigger {
        println!("  Deferred trigger: {trigger}");
    }
    if let Some(until) = report.status.rate_limited_until {
        println!("  Rate limited:     until {}", format_optional_timestamp(Some(until)));
    }
    println!();
    println!("Queue:");
    println!("  Pending:  {}", report.status.queue_size);
    println!("  Dropped:  {}", report.status.failed_items);

    if let Some(message) = &report.status.error_message {
        println!();
        println!("Last error: {message}");
    }
}
