//! Set up an account in the data directory.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::{Argon2Params, PassphraseKeyManager, Salt};
use sync_types::Account;

use crate::config::AccountConfig;

/// Run the init command.
pub async fn run(
    data_dir: &Path,
    account: &Account,
    server_address: &str,
    passphrase: Option<&str>,
    params: Argon2Params,
) -> Result<()> {
    if AccountConfig::exists(data_dir).await {
        anyhow::bail!(
            "Account already initialized. Run 'sync-cli forget' or delete {} to start over.",
            data_dir.display()
        );
    }

    let passphrase = match passphrase {
        Some(p) => validate_passphrase(p)?,
        None => prompt_passphrase("Enter encryption passphrase: ")?,
    };

    let salt = Salt::random().context("Failed to generate salt")?;
    let fingerprint = PassphraseKeyManager::new()
        .unlock(account, &passphrase, salt.clone(), params)
        .context("Failed to derive account key")?;

    let config = AccountConfig::new(account, server_address, &salt, &fingerprint);
    config.save(data_dir).await?;
    tracing::info!(account = %account, "Account initialized");

    println!("Account initialized successfully!");
    println!();
    println!("  Account:     {}", account);
    println!("  Server:      {}", server_address);
    println!("  Key:         {}", fingerprint);
    println!(
        "  Derivation:  Argon2id, {} MiB, {} iterations",
        params.memory_mib(),
        params.iterations()
    );
    println!("  Data dir:    {}", data_dir.display());
    println!();
    println!("Other devices need the same passphrase to read synced contacts.");

    Ok(())
}

fn prompt_passphrase(prompt: &str) -> Result<String> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    validate_passphrase(&passphrase)
}

fn validate_passphrase(passphrase: &str) -> Result<String> {
    let trimmed = passphrase.trim().to_string();
    if trimmed.len() < 8 {
        anyhow::bail!("Passphrase must be at least 8 characters");
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn account() -> Account {
        Account::new("alice@example.com", "org.contactsync")
    }

    fn fast() -> Argon2Params {
        Argon2Params::for_ram_mb(0)
    }

    #[tokio::test]
    async fn init_creates_account_config() {
        let dir = tempdir().unwrap();
        run(dir.path(), &account(), "sync:443", Some("correct horse"), fast())
            .await
            .unwrap();

        let config = AccountConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.account(), account());
        assert_eq!(config.server_address, "sync:443");
        assert_eq!(config.key_fingerprint.len(), 16);
        assert!(config.salt().is_ok());
    }

    #[tokio::test]
    async fn init_fails_if_already_initialized() {
        let dir = tempdir().unwrap();
        run(dir.path(), &account(), "sync:443", Some("correct horse"), fast())
            .await
            .unwrap();

        let result = run(dir.path(), &account(), "sync:443", Some("correct horse"), fast()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn short_passphrase_rejected() {
        let dir = tempdir().unwrap();
        let result = run(dir.path(), &account(), "sync:443", Some("short"), fast()).await;
        assert!(result.is_err());
        assert!(!AccountConfig::exists(dir.path()).await);
    }
}
