//! Keepsake CLI
//!
//! Command-line tools for a Keepsake profile stored on disk.
//!
//! # Commands
//!
//! - `status` - Show sync status and metadata
//! - `apply` - Write a section locally, optionally queueing a remote call
//! - `sync` - Back up now
//! - `restore` - Merge the latest backup into the local profile
//! - `queue` - List or flush pending remote operations
//! - `history` - Show backup attempts
//! - `configure` - Store the access token and encryption passphrase

mod commands;
mod spool;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Keepsake profile sync tools.
#[derive(Parser)]
#[command(name = "keepsake")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Local profile directory
    #[arg(global = true, short, long, default_value = "keepsake-data")]
    data: PathBuf,

    /// Directory acting as the remote backup host
    #[arg(global = true, short, long, default_value = "keepsake-remote")]
    remote: PathBuf,

    /// Profile owner
    #[arg(global = true, short, long, default_value = "local")]
    user: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync status and metadata
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a section of the local profile
    Apply {
        /// Section name
        section: String,

        /// Section content as JSON
        value: String,

        /// Also queue a remote call to this endpoint
        #[arg(short, long)]
        endpoint: Option<String>,

        /// HTTP method of the remote call
        #[arg(short, long, default_value = "POST")]
        method: String,
    },

    /// Back up now, ignoring thresholds
    Sync,

    /// Merge the latest backup into the local profile
    Restore,

    /// List pending remote operations
    Queue {
        /// Deliver pending operations
        #[arg(long)]
        flush: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show backup attempts, oldest first
    History {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Store credentials. The passphrase is read from KEEPSAKE_PASSPHRASE.
    Configure {
        /// Access token for the remote
        #[arg(short, long)]
        token: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("Keepsake CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let profile = commands::Profile {
        data: cli.data,
        remote: cli.remote,
        user: cli.user,
    };

    match cli.command {
        Commands::Status { format } => commands::status::run(&profile, &format),
        Commands::Apply {
            section,
            value,
            endpoint,
            method,
        } => commands::apply::run(&profile, &section, &value, endpoint, &method).await,
        Commands::Sync => commands::sync::backup(&profile).await,
        Commands::Restore => commands::sync::restore(&profile).await,
        Commands::Queue { flush, format } => commands::queue::run(&profile, flush, &format).await,
        Commands::History { format } => commands::history::run(&profile, &format),
        Commands::Configure { token } => commands::configure::run(&profile, token).await,
        Commands::Version => Ok(()),
    }
}
