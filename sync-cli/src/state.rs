//! File-backed account store.
//!
//! All accounts share one JSON file. Every write rewrites the file through a
//! temporary sibling and a rename, so a crash leaves either the old or the
//! new contents.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sync_core::{AccountStore, AccountStoreError};
use sync_types::Account;

type Values = BTreeMap<String, BTreeMap<String, String>>;

/// [`AccountStore`] persisted as a JSON file.
#[derive(Debug)]
pub struct JsonAccountStore {
    path: PathBuf,
    values: Mutex<Values>,
}

impl JsonAccountStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AccountStoreError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| AccountStoreError::Corrupt {
                    key: path.display().to_string(),
                    detail: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Values::new(),
            Err(e) => return Err(AccountStoreError::Backend(e.to_string())),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Values> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, values: &Values) -> Result<(), AccountStoreError> {
        let contents = serde_json::to_string_pretty(values)
            .map_err(|e| AccountStoreError::Backend(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|e| AccountStoreError::Backend(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| AccountStoreError::Backend(e.to_string()))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| AccountStoreError::Backend(e.to_string()))
    }
}

impl AccountStore for JsonAccountStore {
    fn get(&self, account: &Account, key: &str) -> Result<Option<String>, AccountStoreError> {
        Ok(self
            .lock()
            .get(&account.storage_key())
            .and_then(|values| values.get(key).cloned()))
    }

    fn set_many(
        &self,
        account: &Account,
        entries: &[(&str, Option<String>)],
    ) -> Result<(), AccountStoreError> {
        let mut values = self.lock();
        let mut next = values.clone();
        let slot = next.entry(account.storage_key()).or_default();
        for (key, value) in entries {
            match value {
                Some(value) => {
                    slot.insert((*key).to_string(), value.clone());
                }
                None => {
                    slot.remove(*key);
                }
            }
        }
        if slot.is_empty() {
            next.remove(&account.storage_key());
        }
        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    fn remove_account(&self, account: &Account) -> Result<(), AccountStoreError> {
        let mut values = self.lock();
        let mut next = values.clone();
        if next.remove(&account.storage_key()).is_none() {
            return Ok(());
        }
        self.persist(&next)?;
        *values = next;
        tracing::debug!(account = %account, "Removed account state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{keys, AnchorStore};
    use sync_types::{EntityType, Marker};
    use tempfile::tempdir;

    fn account() -> Account {
        Account::new("alice@example.com", "org.contactsync")
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonAccountStore::open(dir.path().join("state.json")).unwrap();
        assert_eq!(store.get(&account(), keys::ANCHOR_GROUP).unwrap(), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = JsonAccountStore::open(&path).unwrap();
            AnchorStore::new(&store)
                .set_anchor(&account(), EntityType::Contact, Some(Marker::new(42)))
                .unwrap();
        }

        let store = JsonAccountStore::open(&path).unwrap();
        let marker = AnchorStore::new(&store)
            .get_anchor(&account(), EntityType::Contact)
            .unwrap();
        assert_eq!(marker, Marker::new(42));
    }

    #[test]
    fn none_removes_key() {
        let dir = tempdir().unwrap();
        let store = JsonAccountStore::open(dir.path().join("state.json")).unwrap();
        store
            .set(&account(), keys::SALT_SAVED, Some("true".into()))
            .unwrap();
        store.set(&account(), keys::SALT_SAVED, None).unwrap();
        assert_eq!(store.get(&account(), keys::SALT_SAVED).unwrap(), None);
    }

    #[test]
    fn accounts_are_isolated() {
        let dir = tempdir().unwrap();
        let store = JsonAccountStore::open(dir.path().join("state.json")).unwrap();
        let bob = Account::new("bob@example.com", "org.contactsync");
        store
            .set(&account(), keys::ANCHOR_GROUP, Some("3".into()))
            .unwrap();
        store.set(&bob, keys::ANCHOR_GROUP, Some("9".into())).unwrap();

        store.remove_account(&account()).unwrap();

        assert_eq!(store.get(&account(), keys::ANCHOR_GROUP).unwrap(), None);
        assert_eq!(
            store.get(&bob, keys::ANCHOR_GROUP).unwrap().as_deref(),
            Some("9")
        );
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonAccountStore::open(&path),
            Err(AccountStoreError::Corrupt { .. })
        ));
    }
}
