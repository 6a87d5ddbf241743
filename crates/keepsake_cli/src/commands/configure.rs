//! Configure command implementation.

use super::Profile;
use keepsake_engine::{AuthToken, AutoSyncOutcome, Credentials, KeyMaterial};

const PASSPHRASE_VAR: &str = "KEEPSAKE_PASSPHRASE";

/// Stores the token and the passphrase from the environment.
pub async fn run(profile: &Profile, token: String) -> Result<(), Box<dyn std::error::Error>> {
    let passphrase = std::env::var(PASSPHRASE_VAR)
        .map_err(|_| format!("{PASSPHRASE_VAR} must hold the encryption passphrase"))?;
    if passphrase.is_empty() {
        return Err(format!("{PASSPHRASE_VAR} is empty").into());
    }

    let credentials = Credentials::new(
        AuthToken::new(token),
        KeyMaterial::new(passphrase.into_bytes()),
    );

    let engine = profile.open()?;
    let outcome = engine.configure_credentials(credentials).await?;

    println!("✓ Credentials stored");
    match outcome {
        AutoSyncOutcome::Completed { trigger, report } => {
            println!("  Pending backup published ({trigger}): {}", report.backup_id);
        }
        AutoSyncOutcome::Failed { error, .. } => println!("  Pending backup failed: {error}"),
        _ => {}
    }
    Ok(())
}
