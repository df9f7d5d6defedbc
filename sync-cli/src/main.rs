//! # sync-cli
//!
//! CLI tool for inspecting and managing contactsync account state.
//!
//! ## Commands
//!
//! - `init`: Set up an account and derive its encryption key
//! - `status`: Show anchors, restrictions and the last sync result
//! - `reset`: Force a full sync on the next attempt
//! - `forget`: Remove the account and its sync state
//!
//! ## Example
//!
//! ```bash
//! # Set up an account
//! sync-cli init --account alice@example.com --server sync.example.com:443
//!
//! # Inspect sync state
//! sync-cli status
//!
//! # Resend everything on the next sync
//! sync-cli reset
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sync_client::crypto::detect_total_ram_mb;
use sync_client::Argon2Params;
use sync_types::Account;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod state;

use commands::{forget, init, reset, status};

/// CLI tool for contactsync account state.
#[derive(Parser, Debug)]
#[command(name = "sync-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for account configuration and sync state
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set up an account and derive its encryption key
    Init {
        /// Account name
        #[arg(long, short)]
        account: String,

        /// Account type
        #[arg(long, default_value = "org.contactsync")]
        account_type: String,

        /// Sync server address
        #[arg(long, short)]
        server: String,

        /// Encryption passphrase (will prompt if not provided)
        #[arg(long, short)]
        passphrase: Option<String>,
    },

    /// Show sync state
    Status,

    /// Force a full sync on the next attempt
    Reset,

    /// Remove the account and its sync state
    Forget,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    config::set_dir_permissions_0700(&data_dir).await?;

    match cli.command {
        Commands::Init {
            account,
            account_type,
            server,
            passphrase,
        } => {
            let account = Account::new(account, account_type);
            let params = Argon2Params::for_ram_mb(detect_total_ram_mb());
            init::run(&data_dir, &account, &server, passphrase.as_deref(), params).await?;
        }
        Commands::Status => {
            status::run(&data_dir).await?;
        }
        Commands::Reset => {
            reset::run(&data_dir).await?;
        }
        Commands::Forget => {
            forget::run(&data_dir).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for sync-cli.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "contactsync", "sync-cli")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
