//! Per-account synchronization watermarks.
//!
//! Each account holds one [`Marker`] per [`EntityType`]. Markers are opaque:
//! the engine only compares them for equality and checks for the
//! [`Marker::FULL_SYNC`] sentinel.

use sync_types::{Account, AnchorUpdate, EntityType, Marker, SyncAnchor};

use crate::account::{keys, AccountStore, AccountStoreError};

/// Reads and writes anchors through an [`AccountStore`].
pub struct AnchorStore<'a, S: AccountStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: AccountStore + ?Sized> AnchorStore<'a, S> {
    /// Create an anchor store over `store`.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn key(entity: EntityType) -> &'static str {
        match entity {
            EntityType::Contact => keys::ANCHOR_CONTACT,
            EntityType::ContactGroup => keys::ANCHOR_GROUP,
        }
    }

    /// Current marker for an entity type. Defaults to [`Marker::NEVER_SYNCED`].
    pub fn get_anchor(
        &self,
        account: &Account,
        entity: EntityType,
    ) -> Result<Marker, AccountStoreError> {
        let key = Self::key(entity);
        match self.store.get(account, key)? {
            None => Ok(Marker::NEVER_SYNCED),
            Some(raw) => raw.parse().map_err(|_| AccountStoreError::Corrupt {
                key: key.to_string(),
                detail: format!("not a marker: {raw:?}"),
            }),
        }
    }

    /// Both markers of an account.
    pub fn anchors(&self, account: &Account) -> Result<SyncAnchor, AccountStoreError> {
        Ok(SyncAnchor {
            contact: self.get_anchor(account, EntityType::Contact)?,
            group: self.get_anchor(account, EntityType::ContactGroup)?,
        })
    }

    /// Set one marker. `None` leaves the stored value untouched.
    pub fn set_anchor(
        &self,
        account: &Account,
        entity: EntityType,
        marker: Option<Marker>,
    ) -> Result<(), AccountStoreError> {
        match marker {
            Some(marker) => self
                .store
                .set(account, Self::key(entity), Some(marker.value().to_string())),
            None => Ok(()),
        }
    }

    /// Write every present marker of `update` in one store write.
    pub fn commit(&self, account: &Account, update: &AnchorUpdate) -> Result<(), AccountStoreError> {
        let entries: Vec<(&str, Option<String>)> = EntityType::ALL
            .iter()
            .filter_map(|&entity| {
                update
                    .get(entity)
                    .map(|marker| (Self::key(entity), Some(marker.value().to_string())))
            })
            .collect();

        if entries.is_empty() {
            return Ok(());
        }

        tracing::debug!(account = %account, ?update, "Committing anchors");
        self.store.set_many(account, &entries)
    }

    /// Reset both markers to the full-sync sentinel.
    pub fn request_full_sync(&self, account: &Account) -> Result<(), AccountStoreError> {
        tracing::info!(account = %account, "Resetting anchors to full sync");
        self.commit(
            account,
            &AnchorUpdate {
                contact: Some(Marker::FULL_SYNC),
                group: Some(Marker::FULL_SYNC),
            },
        )
    }
}
