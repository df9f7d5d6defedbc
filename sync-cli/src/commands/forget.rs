//! Remove an account and all of its sync state.

use anyhow::{Context, Result};
use std::path::Path;
use sync_core::AccountStore;

use crate::config::{state_path, AccountConfig};
use crate::state::JsonAccountStore;

/// Run the forget command.
pub async fn run(data_dir: &Path) -> Result<()> {
    let config = AccountConfig::load(data_dir).await?;
    let account = config.account();
    let store = JsonAccountStore::open(state_path(data_dir))?;

    store
        .remove_account(&account)
        .context("Failed to remove account state")?;
    AccountConfig::remove(data_dir).await?;
    tracing::info!(account = %account, "Account forgotten");

    println!("Removed {} and its sync state.", account);
    Ok(())
}
