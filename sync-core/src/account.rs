//! Per-account key-value storage.
//!
//! The platform keeps small pieces of per-account state (anchors, flags,
//! restriction snapshots, notification timestamps) as string values keyed by
//! `(account, key)`. [`AccountStore`] is that interface, injected into the
//! engine; [`AccountData`] is a typed view over it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sync_types::{Account, EntityType, LocalId, Restrictions};
use thiserror::Error;

use crate::outcome::StoredResult;

/// Well-known account store keys.
pub mod keys {
    /// Contact marker.
    pub const ANCHOR_CONTACT: &str = "anchor.contact";
    /// Group marker.
    pub const ANCHOR_GROUP: &str = "anchor.group";
    /// JSON restriction snapshot.
    pub const RESTRICTIONS: &str = "restrictions";
    /// Unix seconds at which the restriction snapshot was stored.
    pub const RESTRICTIONS_FETCHED_AT: &str = "restrictions.fetched_at";
    /// One-shot request to resend all photos.
    pub const EXPLICIT_PHOTO_SAVE: &str = "explicit_photo_save";
    /// The key-derivation salt is confirmed stored on the server.
    pub const SALT_SAVED: &str = "salt_saved";
    /// JSON list of group temporary ids sent as new and not yet confirmed.
    pub const PENDING_NEW_GROUPS: &str = "pending_new.group";
    /// JSON list of contact temporary ids sent as new and not yet confirmed.
    pub const PENDING_NEW_CONTACTS: &str = "pending_new.contact";
    /// JSON result of the last attempt.
    pub const LAST_RESULT: &str = "last_result";
    /// Prefix for per-notification "last shown" timestamps.
    pub const NOTIFIED_AT_PREFIX: &str = "notified_at.";
}

/// Account store errors.
#[derive(Debug, Error)]
pub enum AccountStoreError {
    /// The backing store failed.
    #[error("account store backend error: {0}")]
    Backend(String),

    /// A stored value could not be interpreted.
    #[error("corrupt value for {key}: {detail}")]
    Corrupt {
        /// The key holding the bad value.
        key: String,
        /// What was wrong with it.
        detail: String,
    },
}

/// Key-value storage scoped by account.
pub trait AccountStore: Send + Sync {
    /// Read a value.
    fn get(&self, account: &Account, key: &str) -> Result<Option<String>, AccountStoreError>;

    /// Write several values atomically. `None` removes the key.
    fn set_many(
        &self,
        account: &Account,
        entries: &[(&str, Option<String>)],
    ) -> Result<(), AccountStoreError>;

    /// Remove every value of the account.
    fn remove_account(&self, account: &Account) -> Result<(), AccountStoreError>;

    /// Write a single value. `None` removes the key.
    fn set(
        &self,
        account: &Account,
        key: &str,
        value: Option<String>,
    ) -> Result<(), AccountStoreError> {
        self.set_many(account, &[(key, value)])
    }
}

/// In-memory account store.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MemoryAccountStore {
    inner: Arc<Mutex<HashMap<String, HashMap<String, String>>>>,
}

impl MemoryAccountStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored for an account.
    pub fn len(&self, account: &Account) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .get(&account.storage_key())
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

impl AccountStore for MemoryAccountStore {
    fn get(&self, account: &Account, key: &str) -> Result<Option<String>, AccountStoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .get(&account.storage_key())
            .and_then(|values| values.get(key).cloned()))
    }

    fn set_many(
        &self,
        account: &Account,
        entries: &[(&str, Option<String>)],
    ) -> Result<(), AccountStoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let values = inner.entry(account.storage_key()).or_default();
        for (key, value) in entries {
            match value {
                Some(v) => {
                    values.insert((*key).to_string(), v.clone());
                }
                None => {
                    values.remove(*key);
                }
            }
        }
        Ok(())
    }

    fn remove_account(&self, account: &Account) -> Result<(), AccountStoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.remove(&account.storage_key());
        Ok(())
    }
}

/// Typed view of one account's stored values.
pub struct AccountData<'a, S: AccountStore + ?Sized> {
    store: &'a S,
    account: &'a Account,
}

impl<'a, S: AccountStore + ?Sized> AccountData<'a, S> {
    /// Create a view over `account`'s values in `store`.
    pub fn new(store: &'a S, account: &'a Account) -> Self {
        Self { store, account }
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AccountStoreError> {
        match self.store.get(self.account, key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AccountStoreError::Corrupt {
                    key: key.to_string(),
                    detail: e.to_string(),
                }),
        }
    }

    fn json<T: Serialize>(key: &str, value: &T) -> Result<String, AccountStoreError> {
        serde_json::to_string(value).map_err(|e| AccountStoreError::Corrupt {
            key: key.to_string(),
            detail: e.to_string(),
        })
    }

    fn get_flag(&self, key: &str) -> Result<bool, AccountStoreError> {
        Ok(self.store.get(self.account, key)?.as_deref() == Some("true"))
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<(), AccountStoreError> {
        let value = if value { Some("true".to_string()) } else { None };
        self.store.set(self.account, key, value)
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>, AccountStoreError> {
        match self.store.get(self.account, key)? {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: std::num::ParseIntError| AccountStoreError::Corrupt {
                    key: key.to_string(),
                    detail: e.to_string(),
                }),
        }
    }

    /// The last stored restriction snapshot.
    pub fn restrictions(&self) -> Result<Option<Restrictions>, AccountStoreError> {
        self.get_json(keys::RESTRICTIONS)
    }

    /// When the restriction snapshot was stored (unix seconds).
    pub fn restrictions_fetched_at(&self) -> Result<Option<u64>, AccountStoreError> {
        self.get_u64(keys::RESTRICTIONS_FETCHED_AT)
    }

    /// Store a restriction snapshot together with its fetch time.
    pub fn set_restrictions(
        &self,
        restrictions: &Restrictions,
        now: u64,
    ) -> Result<(), AccountStoreError> {
        let json = Self::json(keys::RESTRICTIONS, restrictions)?;
        self.store.set_many(
            self.account,
            &[
                (keys::RESTRICTIONS, Some(json)),
                (keys::RESTRICTIONS_FETCHED_AT, Some(now.to_string())),
            ],
        )
    }

    /// Whether the next round must ask the server to resend photos.
    pub fn explicit_photo_save(&self) -> Result<bool, AccountStoreError> {
        self.get_flag(keys::EXPLICIT_PHOTO_SAVE)
    }

    /// Set or clear the one-shot explicit photo save flag.
    pub fn set_explicit_photo_save(&self, value: bool) -> Result<(), AccountStoreError> {
        self.set_flag(keys::EXPLICIT_PHOTO_SAVE, value)
    }

    /// Whether the key-derivation salt is confirmed stored server-side.
    pub fn salt_saved(&self) -> Result<bool, AccountStoreError> {
        self.get_flag(keys::SALT_SAVED)
    }

    /// Set or clear the salt-saved flag.
    pub fn set_salt_saved(&self, value: bool) -> Result<(), AccountStoreError> {
        self.set_flag(keys::SALT_SAVED, value)
    }

    fn pending_key(entity: EntityType) -> &'static str {
        match entity {
            EntityType::Contact => keys::PENDING_NEW_CONTACTS,
            EntityType::ContactGroup => keys::PENDING_NEW_GROUPS,
        }
    }

    /// Temporary ids sent as new and not yet confirmed.
    pub fn pending_new(&self, entity: EntityType) -> Result<Vec<LocalId>, AccountStoreError> {
        Ok(self.get_json(Self::pending_key(entity))?.unwrap_or_default())
    }

    /// Record the temporary ids sent as new in the current round.
    pub fn set_pending_new(
        &self,
        entity: EntityType,
        ids: &[LocalId],
    ) -> Result<(), AccountStoreError> {
        let key = Self::pending_key(entity);
        let value = if ids.is_empty() {
            None
        } else {
            Some(Self::json(key, &ids)?)
        };
        self.store.set(self.account, key, value)
    }

    /// Clear the pending-new markers of both entity types.
    pub fn clear_pending_new(&self) -> Result<(), AccountStoreError> {
        self.store.set_many(
            self.account,
            &[
                (keys::PENDING_NEW_GROUPS, None),
                (keys::PENDING_NEW_CONTACTS, None),
            ],
        )
    }

    /// When a notification of the given kind was last shown (unix seconds).
    pub fn last_notified(&self, kind: &str) -> Result<Option<u64>, AccountStoreError> {
        self.get_u64(&format!("{}{}", keys::NOTIFIED_AT_PREFIX, kind))
    }

    /// Record that a notification of the given kind was shown.
    pub fn set_last_notified(&self, kind: &str, now: u64) -> Result<(), AccountStoreError> {
        self.store.set(
            self.account,
            &format!("{}{}", keys::NOTIFIED_AT_PREFIX, kind),
            Some(now.to_string()),
        )
    }

    /// The persisted result of the last attempt.
    pub fn last_result(&self) -> Result<Option<StoredResult>, AccountStoreError> {
        self.get_json(keys::LAST_RESULT)
    }

    /// Persist the result of an attempt for display.
    pub fn set_last_result(&self, result: &StoredResult) -> Result<(), AccountStoreError> {
        let json = Self::json(keys::LAST_RESULT, result)?;
        self.store.set(self.account, keys::LAST_RESULT, Some(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::SyncResultState;

    fn account(name: &str) -> Account {
        Account::new(name, "org.contactsync")
    }

    // ===========================================
    // MemoryAccountStore Tests
    // ===========================================

    #[test]
    fn missing_key_reads_none() {
        let store = MemoryAccountStore::new();
        assert_eq!(store.get(&account("a"), "nope").unwrap(), None);
    }

    #[test]
    fn set_and_remove_value() {
        let store = MemoryAccountStore::new();
        let a = account("a");
        store.set(&a, "k", Some("v".into())).unwrap();
        assert_eq!(store.get(&a, "k").unwrap(), Some("v".into()));

        store.set(&a, "k", None).unwrap();
        assert_eq!(store.get(&a, "k").unwrap(), None);
    }

    #[test]
    fn values_are_scoped_by_account() {
        let store = MemoryAccountStore::new();
        store.set(&account("a"), "k", Some("1".into())).unwrap();
        assert_eq!(store.get(&account("b"), "k").unwrap(), None);
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryAccountStore::new();
        let other = store.clone();
        store.set(&account("a"), "k", Some("1".into())).unwrap();
        assert_eq!(other.get(&account("a"), "k").unwrap(), Some("1".into()));
    }

    #[test]
    fn remove_account_clears_everything() {
        let store = MemoryAccountStore::new();
        let a = account("a");
        store
            .set_many(&a, &[("x", Some("1".into())), ("y", Some("2".into()))])
            .unwrap();
        assert_eq!(store.len(&a), 2);

        store.remove_account(&a).unwrap();
        assert_eq!(store.len(&a), 0);
    }

    // ===========================================
    // AccountData Tests
    // ===========================================

    #[test]
    fn restrictions_roundtrip_with_timestamp() {
        let store = MemoryAccountStore::new();
        let a = account("a");
        let data = AccountData::new(&store, &a);
        assert_eq!(data.restrictions().unwrap(), None);

        data.set_restrictions(&Restrictions::new(100, true), 1_700_000_000)
            .unwrap();
        assert_eq!(
            data.restrictions().unwrap(),
            Some(Restrictions::new(100, true))
        );
        assert_eq!(data.restrictions_fetched_at().unwrap(), Some(1_700_000_000));
    }

    #[test]
    fn flags_default_to_false() {
        let store = MemoryAccountStore::new();
        let a = account("a");
        let data = AccountData::new(&store, &a);
        assert!(!data.explicit_photo_save().unwrap());
        assert!(!data.salt_saved().unwrap());

        data.set_explicit_photo_save(true).unwrap();
        data.set_salt_saved(true).unwrap();
        assert!(data.explicit_photo_save().unwrap());
        assert!(data.salt_saved().unwrap());

        data.set_explicit_photo_save(false).unwrap();
        assert!(!data.explicit_photo_save().unwrap());
        assert_eq!(store.get(&a, keys::EXPLICIT_PHOTO_SAVE).unwrap(), None);
    }

    #[test]
    fn pending_new_markers() {
        let store = MemoryAccountStore::new();
        let a = account("a");
        let data = AccountData::new(&store, &a);

        data.set_pending_new(EntityType::ContactGroup, &[LocalId::new(1), LocalId::new(2)])
            .unwrap();
        data.set_pending_new(EntityType::Contact, &[LocalId::new(7)])
            .unwrap();
        assert_eq!(
            data.pending_new(EntityType::ContactGroup).unwrap(),
            vec![LocalId::new(1), LocalId::new(2)]
        );

        data.clear_pending_new().unwrap();
        assert!(data.pending_new(EntityType::ContactGroup).unwrap().is_empty());
        assert!(data.pending_new(EntityType::Contact).unwrap().is_empty());
    }

    #[test]
    fn notification_timestamps_per_kind() {
        let store = MemoryAccountStore::new();
        let a = account("a");
        let data = AccountData::new(&store, &a);
        data.set_last_notified("photo_not_synced", 42).unwrap();
        assert_eq!(data.last_notified("photo_not_synced").unwrap(), Some(42));
        assert_eq!(data.last_notified("contact_not_synced").unwrap(), None);
    }

    #[test]
    fn last_result_roundtrip() {
        let store = MemoryAccountStore::new();
        let a = account("a");
        let data = AccountData::new(&store, &a);
        let result = StoredResult {
            state: SyncResultState::NetworkError,
            message: Some("connection refused".into()),
            finished_at: 99,
        };
        data.set_last_result(&result).unwrap();
        assert_eq!(data.last_result().unwrap(), Some(result));
    }

    #[test]
    fn corrupt_values_are_reported() {
        let store = MemoryAccountStore::new();
        let a = account("a");
        store
            .set(&a, keys::RESTRICTIONS, Some("{not json".into()))
            .unwrap();
        store
            .set(&a, keys::RESTRICTIONS_FETCHED_AT, Some("yesterday".into()))
            .unwrap();
        let data = AccountData::new(&store, &a);
        assert!(matches!(
            data.restrictions(),
            Err(AccountStoreError::Corrupt { .. })
        ));
        assert!(matches!(
            data.restrictions_fetched_at(),
            Err(AccountStoreError::Corrupt { .. })
        ));
    }
}
