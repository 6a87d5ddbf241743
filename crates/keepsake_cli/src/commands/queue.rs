//! Queue command implementation.

use super::{format_timestamp, Profile};
use keepsake_engine::QueuedOperation;
use serde::Serialize;

/// Queue listing output.
#[derive(Debug, Serialize)]
pub struct QueueListing {
    /// Operations waiting for delivery, oldest first.
    pub pending: Vec<QueuedOperation>,
    /// Operations dropped after exhausting their retries.
    pub dropped: u64,
}

/// Lists pending operations, delivering them first if `flush` is set.
pub async fn run(
    profile: &Profile,
    flush: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = profile.open()?;

    if flush {
        let report = engine.process_queue().await?;
        eprintln!(
            "Delivered {}, retrying {}, dropped {}",
            report.delivered, report.retried, report.dropped
        );
    }

    let listing = QueueListing {
        pending: engine.queue().pending()?,
        dropped: engine.queue().failed_count()?,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&listing)?),
        _ => print_text_output(&listing),
    }
    Ok(())
}

fn print_text_output(listing: &QueueListing) {
    if listing.pending.is_empty() {
        println!("Queue is empty");
    }
    for op in &listing.pending {
        println!(
            "{}  {:6} {}  (queued {}, {} failed attempts)",
            op.id,
            op.method.as_str(),
            op.endpoint,
            format_timestamp(op.enqueued_at),
            op.retry_count
        );
    }
    if listing.dropped > 0 {
        println!();
        println!("{} operation(s) dropped after exhausting retries", listing.dropped);
    }
}
