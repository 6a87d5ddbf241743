//! History command implementation.

use super::{format_size, format_timestamp, Profile};

/// Prints the backup history, oldest first.
pub fn run(profile: &Profile, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = profile.open()?;
    let history = engine.history()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No backup attempts recorded");
        return Ok(());
    }
    for record in &history {
        let outcome = if record.success { "ok    " } else { "failed" };
        print!(
            "{}  {}  {:>10}  {} chunk(s)",
            format_timestamp(record.timestamp),
            outcome,
            format_size(record.size_bytes),
            record.files_uploaded
        );
        match &record.error {
            Some(error) => println!("  {error}"),
            None => println!(),
        }
    }
    Ok(())
}
