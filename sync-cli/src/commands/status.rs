//! Show account sync state.

use anyhow::Result;
use std::path::Path;
use sync_core::{AccountData, AnchorStore};
use sync_types::{EntityType, Marker};

use crate::config::{state_path, unix_now, AccountConfig};
use crate::state::JsonAccountStore;

/// Run the status command.
pub async fn run(data_dir: &Path) -> Result<()> {
    println!("=== sync-cli status ===");
    println!();

    let config = match AccountConfig::load(data_dir).await {
        Ok(config) => config,
        Err(_) => {
            println!("Account: NOT INITIALIZED");
            println!();
            println!("Run 'sync-cli init --account <name> --server <address>' to set one up.");
            return Ok(());
        }
    };
    let account = config.account();
    let sync = config.sync_config(data_dir)?;

    println!("Account:");
    println!("  Name:    {}", account);
    println!("  Server:  {}", sync.server_address);
    println!("  Key:     {}", config.key_fingerprint);
    println!("  Salt:    {}", config.salt()?.to_hex());
    println!("  Init:    {}", format_timestamp(config.created_at));
    println!();

    let store = JsonAccountStore::open(state_path(data_dir))?;
    let anchors = AnchorStore::new(&store).anchors(&account)?;
    let data = AccountData::new(&store, &account);

    println!("Anchors:");
    println!("  Groups:   {}", format_marker(anchors.group));
    println!("  Contacts: {}", format_marker(anchors.contact));
    println!();

    println!("Server state:");
    println!(
        "  Salt saved:          {}",
        if data.salt_saved()? { "yes" } else { "no" }
    );
    match (data.restrictions()?, data.restrictions_fetched_at()?) {
        (Some(r), Some(at)) => {
            println!(
                "  Restrictions:        max {} contacts, photos {} ({})",
                r.max_contacts,
                if r.photo_sync { "on" } else { "off" },
                format_timestamp(at)
            );
        }
        _ => println!("  Restrictions:        not fetched"),
    }
    if data.explicit_photo_save()? {
        println!("  Photo resend:        pending");
    }
    for entity in EntityType::ALL {
        let pending = data.pending_new(entity)?;
        if !pending.is_empty() {
            println!("  Unconfirmed new {}s: {}", entity, pending.len());
        }
    }
    println!();

    match data.last_result()? {
        Some(result) => {
            println!("Last sync:");
            println!("  Result: {}", result.state);
            if let Some(message) = result.message {
                println!("  Detail: {}", message);
            }
            println!("  When:   {}", format_timestamp(result.finished_at));
        }
        None => println!("Last sync: never"),
    }

    Ok(())
}

fn format_marker(marker: Marker) -> String {
    if marker.is_full_sync() {
        "full sync pending".to_string()
    } else if marker == Marker::NEVER_SYNCED {
        "never synced".to_string()
    } else {
        marker.value().to_string()
    }
}

/// Format a Unix timestamp relative to now.
fn format_timestamp(ts: u64) -> String {
    let diff = unix_now().saturating_sub(ts);

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_client::Salt;
    use sync_core::{SyncOutcome, SyncResultState};
    use sync_types::{Account, Restrictions};
    use tempfile::tempdir;

    async fn init_account(dir: &Path) -> Account {
        let account = Account::new("alice@example.com", "org.contactsync");
        AccountConfig::new(
            &account,
            "sync:443",
            &Salt::random().unwrap(),
            "0011223344556677",
        )
        .save(dir)
        .await
        .unwrap();
        account
    }

    #[tokio::test]
    async fn status_without_init() {
        let dir = tempdir().unwrap();
        assert!(run(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn status_with_fresh_account() {
        let dir = tempdir().unwrap();
        init_account(dir.path()).await;
        assert!(run(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn status_with_history() {
        let dir = tempdir().unwrap();
        let account = init_account(dir.path()).await;
        let store = JsonAccountStore::open(state_path(dir.path())).unwrap();
        let data = AccountData::new(&store, &account);
        data.set_restrictions(&Restrictions::new(100, true), unix_now())
            .unwrap();
        data.set_last_result(
            &SyncOutcome::failed(SyncResultState::NetworkError, "timed out").to_stored(unix_now()),
        )
        .unwrap();

        assert!(run(dir.path()).await.is_ok());
    }

    #[test]
    fn markers_are_described() {
        assert_eq!(format_marker(Marker::FULL_SYNC), "full sync pending");
        assert_eq!(format_marker(Marker::NEVER_SYNCED), "never synced");
        assert_eq!(format_marker(Marker::new(17)), "17");
    }

    #[test]
    fn format_timestamp_works() {
        let now = unix_now();
        assert_eq!(format_timestamp(now), "just now");
        assert!(format_timestamp(now - 120).contains("minutes"));
        assert!(format_timestamp(now - 7200).contains("hours"));
        assert!(format_timestamp(now - 172800).contains("days"));
    }
}
