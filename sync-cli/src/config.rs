//! Configuration management for sync-cli.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sync_client::{Salt, SyncConfig};
use sync_types::Account;

const ACCOUNT_FILE: &str = "account.json";
const SYNC_CONFIG_FILE: &str = "sync.toml";

/// The account this data directory manages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account name.
    pub name: String,
    /// Account type.
    pub account_type: String,
    /// Sync server address.
    pub server_address: String,
    /// Hex-encoded Argon2id salt for the account key.
    pub salt_hex: String,
    /// Fingerprint of the derived record key.
    pub key_fingerprint: String,
    /// When the account was set up.
    pub created_at: u64,
}

impl AccountConfig {
    /// Create a new account configuration.
    pub fn new(account: &Account, server_address: &str, salt: &Salt, fingerprint: &str) -> Self {
        Self {
            name: account.name.clone(),
            account_type: account.account_type.clone(),
            server_address: server_address.to_string(),
            salt_hex: salt.to_hex(),
            key_fingerprint: fingerprint.to_string(),
            created_at: unix_now(),
        }
    }

    /// The account identity.
    pub fn account(&self) -> Account {
        Account::new(self.name.clone(), self.account_type.clone())
    }

    /// The stored salt.
    pub fn salt(&self) -> Result<Salt> {
        Salt::from_hex(&self.salt_hex).context("Invalid salt in account configuration")
    }

    /// Load the account configuration from a directory.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(data_dir.join(ACCOUNT_FILE))
            .await
            .context("Account not initialized. Run 'sync-cli init' first.")?;
        serde_json::from_str(&contents).context("Invalid account configuration")
    }

    /// Save the account configuration to a directory.
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(ACCOUNT_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save account configuration")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Remove the account configuration.
    pub async fn remove(data_dir: &Path) -> Result<()> {
        tokio::fs::remove_file(data_dir.join(ACCOUNT_FILE))
            .await
            .context("Failed to remove account configuration")
    }

    /// Check if an account is configured.
    pub async fn exists(data_dir: &Path) -> bool {
        data_dir.join(ACCOUNT_FILE).exists()
    }

    /// Engine settings: `sync.toml` in the data directory if present,
    /// defaults for this account's server otherwise.
    pub fn sync_config(&self, data_dir: &Path) -> Result<SyncConfig> {
        let path = data_dir.join(SYNC_CONFIG_FILE);
        if path.exists() {
            Ok(SyncConfig::from_file(&path)?)
        } else {
            Ok(SyncConfig::new(self.server_address.clone()))
        }
    }
}

/// Path of the account state file.
pub fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join("state.json")
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config() -> AccountConfig {
        AccountConfig::new(
            &Account::new("alice@example.com", "org.contactsync"),
            "sync.example.com:443",
            &Salt::from_slice(&[0xAB; 16]).unwrap(),
            "0011223344556677",
        )
    }

    #[tokio::test]
    async fn account_config_roundtrip() {
        let dir = tempdir().unwrap();
        config().save(dir.path()).await.unwrap();

        let loaded = AccountConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded.account().name, "alice@example.com");
        assert_eq!(loaded.salt().unwrap().as_bytes(), &[0xAB; 16]);
        assert_eq!(loaded.key_fingerprint, "0011223344556677");
    }

    #[tokio::test]
    async fn load_without_init_explains() {
        let dir = tempdir().unwrap();
        let err = AccountConfig::load(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("sync-cli init"));
    }

    #[test]
    fn sync_config_defaults_to_account_server() {
        let dir = tempdir().unwrap();
        let sync = config().sync_config(dir.path()).unwrap();
        assert_eq!(sync.server_address, "sync.example.com:443");
    }

    #[test]
    fn sync_config_reads_toml_override() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SYNC_CONFIG_FILE),
            "server_address = \"other:443\"\nrequest_timeout_secs = 10\n",
        )
        .unwrap();

        let sync = config().sync_config(dir.path()).unwrap();
        assert_eq!(sync.server_address, "other:443");
        assert_eq!(sync.request_timeout(), Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn account_config_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        config().save(dir.path()).await.unwrap();

        let path = dir.path().join(ACCOUNT_FILE);
        let perms = tokio::fs::metadata(&path).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "file should be 0600");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn data_dir_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("test-data");
        tokio::fs::create_dir_all(&data_dir).await.unwrap();
        set_dir_permissions_0700(&data_dir).await.unwrap();

        let perms = tokio::fs::metadata(&data_dir).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o700, "dir should be 0700");
    }
}
