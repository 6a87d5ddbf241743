//! Backup and restore commands.

use super::{format_size, format_timestamp, Profile};
use keepsake_engine::{Clock, SyncError, SystemClock};
use tracing::info;

/// Backs up the profile now.
pub async fn backup(profile: &Profile) -> Result<(), Box<dyn std::error::Error>> {
    let engine = profile.open()?;
    info!(remote = ?profile.remote, "starting manual backup");
    let report = match engine.manual_sync().await {
        Ok(report) => report,
        Err(SyncError::RateLimited { retry_at }) => {
            let wait_secs = retry_at.saturating_sub(SystemClock.now_millis()) / 1000;
            println!("✗ Backup refused by the rate limit");
            println!(
                "  Next backup allowed in {}m {:02}s ({})",
                wait_secs / 60,
                wait_secs % 60,
                format_timestamp(retry_at)
            );
            return Err("rate limited".into());
        }
        Err(e) => return Err(e.into()),
    };

    println!("✓ Backup published");
    println!("  Id:        {}", report.backup_id);
    println!("  Size:      {}", format_size(report.size_bytes));
    println!("  Chunks:    {}", report.chunks);
    println!("  Checksum:  {}", report.payload_checksum);
    println!("  Timestamp: {}", format_timestamp(report.timestamp));
    Ok(())
}

/// Merges the latest backup into the local profile.
pub async fn restore(profile: &Profile) -> Result<(), Box<dyn std::error::Error>> {
    let engine = profile.open()?;
    info!(remote = ?profile.remote, "starting restore");
    let report = engine.restore_from_remote().await?;

    println!("✓ Restored backup {}", report.backup_id);
    println!("  Created: {}", format_timestamp(report.created_at));
    if report.sections_replaced.is_empty() {
        println!("  No sections replaced");
    } else {
        println!("  Replaced sections:");
        for section in &report.sections_replaced {
            println!("    {section}");
        }
    }
    Ok(())
}
