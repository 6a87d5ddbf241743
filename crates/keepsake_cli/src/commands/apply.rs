//! Apply command implementation.

use super::Profile;
use keepsake_engine::{AutoSyncOutcome, HttpMethod, Mutation};

/// Writes a section and reports whether a backup followed.
pub async fn run(
    profile: &Profile,
    section: &str,
    value: &str,
    endpoint: Option<String>,
    method: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let value: serde_json::Value =
        serde_json::from_str(value).map_err(|e| format!("section value is not JSON: {e}"))?;

    let mut mutation = Mutation::new(section, value.clone());
    if let Some(endpoint) = endpoint {
        let method: HttpMethod = method.parse()?;
        mutation = mutation.with_remote(method, endpoint, value);
    }

    let engine = profile.open()?;
    let outcome = engine.apply_mutation(mutation).await?;

    println!("✓ Section {section:?} written");
    match outcome {
        AutoSyncOutcome::Completed { trigger, report } => {
            println!("  Backup {} published ({trigger})", report.backup_id);
        }
        AutoSyncOutcome::Deferred(trigger) => {
            println!("  Backup due ({trigger}) but no credentials configured");
        }
        AutoSyncOutcome::RateLimited { retry_at } => {
            println!(
                "  Backup due but rate limited until {}",
                super::format_timestamp(retry_at)
            );
        }
        AutoSyncOutcome::Failed { error, .. } => println!("  Backup failed: {error}"),
        other => tracing::debug!(?other, "no backup"),
    }

    let queued = engine.queue().len()?;
    if queued > 0 {
        println!("  {queued} operation(s) waiting for delivery");
    }
    Ok(())
}
