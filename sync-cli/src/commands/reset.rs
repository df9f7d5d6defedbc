//! Force a full sync on the next attempt.

use anyhow::{Context, Result};
use std::path::Path;
use sync_core::AnchorStore;

use crate::config::{state_path, AccountConfig};
use crate::state::JsonAccountStore;

/// Run the reset command.
pub async fn run(data_dir: &Path) -> Result<()> {
    let config = AccountConfig::load(data_dir).await?;
    let account = config.account();
    let store = JsonAccountStore::open(state_path(data_dir))?;

    AnchorStore::new(&store)
        .request_full_sync(&account)
        .context("Failed to reset anchors")?;
    tracing::info!(account = %account, "Full sync requested");

    println!("Full sync requested for {}.", account);
    println!("Every local contact and group will be sent on the next sync.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_client::Salt;
    use sync_types::{Account, AnchorUpdate, Marker, SyncAnchor};
    use tempfile::tempdir;

    #[tokio::test]
    async fn reset_sets_sentinel() {
        let dir = tempdir().unwrap();
        let account = Account::new("alice@example.com", "org.contactsync");
        AccountConfig::new(&account, "sync:443", &Salt::random().unwrap(), "00")
            .save(dir.path())
            .await
            .unwrap();
        {
            let store = JsonAccountStore::open(state_path(dir.path())).unwrap();
            AnchorStore::new(&store)
                .commit(
                    &account,
                    &AnchorUpdate {
                        group: Some(Marker::new(4)),
                        contact: Some(Marker::new(8)),
                    },
                )
                .unwrap();
        }

        run(dir.path()).await.unwrap();

        let store = JsonAccountStore::open(state_path(dir.path())).unwrap();
        assert_eq!(
            AnchorStore::new(&store).anchors(&account).unwrap(),
            SyncAnchor::full_sync()
        );
    }

    #[tokio::test]
    async fn reset_requires_account() {
        let dir = tempdir().unwrap();
        assert!(run(dir.path()).await.is_err());
    }
}
