//! Local contact database interface.
//!
//! The engine reads dirty records and writes server results through
//! [`ContactStore`]. Writes performed on behalf of the server never bump a
//! record's revision; only local edits do. That lets
//! [`ContactStore::clear_dirty`] refuse to clear a flag when the user edited
//! the record while the round was in flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sync_types::{Account, Contact, EntityType, Group, LocalId, LocalRecord, Payload, ServerId};
use thiserror::Error;

/// Contact store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist.
    #[error("{entity} {local_id} not found")]
    NotFound {
        /// Entity type.
        entity: EntityType,
        /// Local id.
        local_id: LocalId,
    },

    /// The backing database failed.
    #[error("contact database error: {0}")]
    Backend(String),
}

/// Narrow interface to the local contact database.
pub trait ContactStore: Send + Sync {
    /// All records of an entity type, tombstones included, in local id order.
    fn records(&self, account: &Account, entity: EntityType)
        -> Result<Vec<LocalRecord>, StoreError>;

    /// One record by local id.
    fn get(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
    ) -> Result<Option<LocalRecord>, StoreError>;

    /// One record by server id.
    fn find_by_server_id(
        &self,
        account: &Account,
        entity: EntityType,
        server_id: ServerId,
    ) -> Result<Option<LocalRecord>, StoreError>;

    /// Insert a clean record received from the server.
    fn insert(
        &self,
        account: &Account,
        server_id: ServerId,
        payload: Payload,
    ) -> Result<LocalId, StoreError>;

    /// Overwrite a record's payload with server content. Leaves the dirty
    /// flag and revision untouched.
    fn update(&self, account: &Account, local_id: LocalId, payload: Payload)
        -> Result<(), StoreError>;

    /// Remove a record outright.
    fn remove(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
    ) -> Result<(), StoreError>;

    /// Set or clear a record's server id. Returns `false` if the record is
    /// gone.
    fn set_server_id(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
        server_id: Option<ServerId>,
    ) -> Result<bool, StoreError>;

    /// Clear the dirty flag if the record is still at `revision`. Confirmed
    /// tombstones are removed. Returns whether anything was cleared.
    fn clear_dirty(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
        revision: u64,
    ) -> Result<bool, StoreError>;

    /// Flag every record of the account dirty. Returns how many were marked.
    fn mark_all_dirty(&self, account: &Account) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct AccountRecords {
    next_id: i64,
    groups: BTreeMap<LocalId, LocalRecord>,
    contacts: BTreeMap<LocalId, LocalRecord>,
}

impl AccountRecords {
    fn table(&mut self, entity: EntityType) -> &mut BTreeMap<LocalId, LocalRecord> {
        match entity {
            EntityType::Contact => &mut self.contacts,
            EntityType::ContactGroup => &mut self.groups,
        }
    }

    fn allocate(&mut self) -> LocalId {
        self.next_id += 1;
        LocalId::new(self.next_id)
    }
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<String, AccountRecords>,
    fail_next_write: Option<String>,
}

/// In-memory contact store with helpers that simulate local user edits.
///
/// Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MemoryContactStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryContactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next engine-side write to fail.
    pub fn fail_next_write(&self, error: &str) {
        self.lock().fail_next_write = Some(error.to_string());
    }

    fn create(&self, account: &Account, payload: Payload) -> LocalId {
        let mut inner = self.lock();
        let records = inner.accounts.entry(account.storage_key()).or_default();
        let local_id = records.allocate();
        let entity = payload.entity_type();
        records.table(entity).insert(
            local_id,
            LocalRecord {
                local_id,
                server_id: None,
                dirty: true,
                deleted: false,
                revision: 1,
                payload,
            },
        );
        local_id
    }

    /// Create a group as the user would.
    pub fn create_group(&self, account: &Account, name: &str) -> LocalId {
        self.create(account, Payload::Group(Group::new(name)))
    }

    /// Create a contact as the user would.
    pub fn create_contact(&self, account: &Account, contact: Contact) -> LocalId {
        self.create(account, Payload::Contact(contact))
    }

    /// Replace a record's content as the user would.
    pub fn edit(
        &self,
        account: &Account,
        local_id: LocalId,
        payload: Payload,
    ) -> Result<(), StoreError> {
        let entity = payload.entity_type();
        let mut inner = self.lock();
        let record = inner
            .accounts
            .get_mut(&account.storage_key())
            .and_then(|r| r.table(entity).get_mut(&local_id))
            .ok_or(StoreError::NotFound { entity, local_id })?;
        record.payload = payload;
        record.dirty = true;
        record.revision += 1;
        Ok(())
    }

    /// Delete a record as the user would (leaves a dirty tombstone).
    pub fn delete(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let record = inner
            .accounts
            .get_mut(&account.storage_key())
            .and_then(|r| r.table(entity).get_mut(&local_id))
            .ok_or(StoreError::NotFound { entity, local_id })?;
        record.deleted = true;
        record.dirty = true;
        record.revision += 1;
        Ok(())
    }

    /// Number of live (non-tombstone) records.
    pub fn live_count(&self, account: &Account, entity: EntityType) -> usize {
        let mut inner = self.lock();
        inner
            .accounts
            .get_mut(&account.storage_key())
            .map(|r| r.table(entity).values().filter(|rec| !rec.deleted).count())
            .unwrap_or(0)
    }

    fn write<T>(
        &self,
        account: &Account,
        f: impl FnOnce(&mut AccountRecords) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_write.take() {
            return Err(StoreError::Backend(error));
        }
        f(inner.accounts.entry(account.storage_key()).or_default())
    }

    fn read<T>(
        &self,
        account: &Account,
        entity: EntityType,
        f: impl FnOnce(&BTreeMap<LocalId, LocalRecord>) -> T,
    ) -> T {
        let mut inner = self.lock();
        let records = inner.accounts.entry(account.storage_key()).or_default();
        f(records.table(entity))
    }
}

impl ContactStore for MemoryContactStore {
    fn records(
        &self,
        account: &Account,
        entity: EntityType,
    ) -> Result<Vec<LocalRecord>, StoreError> {
        Ok(self.read(account, entity, |t| t.values().cloned().collect()))
    }

    fn get(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
    ) -> Result<Option<LocalRecord>, StoreError> {
        Ok(self.read(account, entity, |t| t.get(&local_id).cloned()))
    }

    fn find_by_server_id(
        &self,
        account: &Account,
        entity: EntityType,
        server_id: ServerId,
    ) -> Result<Option<LocalRecord>, StoreError> {
        Ok(self.read(account, entity, |t| {
            t.values()
                .find(|r| r.server_id == Some(server_id))
                .cloned()
        }))
    }

    fn insert(
        &self,
        account: &Account,
        server_id: ServerId,
        payload: Payload,
    ) -> Result<LocalId, StoreError> {
        self.write(account, |records| {
            let local_id = records.allocate();
            records.table(payload.entity_type()).insert(
                local_id,
                LocalRecord {
                    local_id,
                    server_id: Some(server_id),
                    dirty: false,
                    deleted: false,
                    revision: 0,
                    payload,
                },
            );
            Ok(local_id)
        })
    }

    fn update(
        &self,
        account: &Account,
        local_id: LocalId,
        payload: Payload,
    ) -> Result<(), StoreError> {
        let entity = payload.entity_type();
        self.write(account, |records| {
            let record = records
                .table(entity)
                .get_mut(&local_id)
                .ok_or(StoreError::NotFound { entity, local_id })?;
            record.payload = payload;
            Ok(())
        })
    }

    fn remove(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
    ) -> Result<(), StoreError> {
        self.write(account, |records| {
            records.table(entity).remove(&local_id);
            Ok(())
        })
    }

    fn set_server_id(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
        server_id: Option<ServerId>,
    ) -> Result<bool, StoreError> {
        self.write(account, |records| {
            Ok(match records.table(entity).get_mut(&local_id) {
                Some(record) => {
                    record.server_id = server_id;
                    true
                }
                None => false,
            })
        })
    }

    fn clear_dirty(
        &self,
        account: &Account,
        entity: EntityType,
        local_id: LocalId,
        revision: u64,
    ) -> Result<bool, StoreError> {
        self.write(account, |records| {
            let table = records.table(entity);
            let (deleted, current) = match table.get(&local_id) {
                Some(r) => (r.deleted, r.revision),
                None => return Ok(false),
            };
            if current != revision {
                return Ok(false);
            }
            if deleted {
                table.remove(&local_id);
            } else if let Some(record) = table.get_mut(&local_id) {
                record.dirty = false;
            }
            Ok(true)
        })
    }

    fn mark_all_dirty(&self, account: &Account) -> Result<usize, StoreError> {
        self.write(account, |records| {
            let mut marked = 0;
            for record in records
                .groups
                .values_mut()
                .chain(records.contacts.values_mut())
            {
                record.dirty = true;
                marked += 1;
            }
            Ok(marked)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("alice@example.com", "org.contactsync")
    }

    // ===========================================
    // Local Edit Helper Tests
    // ===========================================

    #[test]
    fn created_records_are_dirty_and_new() {
        let store = MemoryContactStore::new();
        let a = account();
        let id = store.create_group(&a, "Family");

        let record = store.get(&a, EntityType::ContactGroup, id).unwrap().unwrap();
        assert!(record.dirty);
        assert_eq!(record.server_id, None);
        assert_eq!(record.revision, 1);
    }

    #[test]
    fn local_ids_are_unique_across_entities() {
        let store = MemoryContactStore::new();
        let a = account();
        let g = store.create_group(&a, "Work");
        let c = store.create_contact(&a, Contact::new("Ada"));
        assert_ne!(g, c);
    }

    #[test]
    fn edit_and_delete_bump_revision() {
        let store = MemoryContactStore::new();
        let a = account();
        let id = store.create_contact(&a, Contact::new("Ada"));
        store
            .edit(&a, id, Payload::Contact(Contact::new("Ada L.")))
            .unwrap();
        store.delete(&a, EntityType::Contact, id).unwrap();

        let record = store.get(&a, EntityType::Contact, id).unwrap().unwrap();
        assert_eq!(record.revision, 3);
        assert!(record.deleted);
        assert_eq!(store.live_count(&a, EntityType::Contact), 0);
    }

    #[test]
    fn edit_missing_record_fails() {
        let store = MemoryContactStore::new();
        let result = store.edit(
            &account(),
            LocalId::new(99),
            Payload::Group(Group::new("x")),
        );
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    // ===========================================
    // ContactStore Tests
    // ===========================================

    #[test]
    fn insert_is_clean_and_findable() {
        let store = MemoryContactStore::new();
        let a = account();
        let id = store
            .insert(&a, ServerId::new(500), Payload::Group(Group::new("Remote")))
            .unwrap();

        let found = store
            .find_by_server_id(&a, EntityType::ContactGroup, ServerId::new(500))
            .unwrap()
            .unwrap();
        assert_eq!(found.local_id, id);
        assert!(!found.dirty);
    }

    #[test]
    fn update_keeps_dirty_flag_and_revision() {
        let store = MemoryContactStore::new();
        let a = account();
        let id = store.create_group(&a, "Old");
        store
            .update(&a, id, Payload::Group(Group::new("New")))
            .unwrap();
        let record = store.get(&a, EntityType::ContactGroup, id).unwrap().unwrap();
        assert_eq!(record.payload, Payload::Group(Group::new("New")));
        assert!(record.dirty);
        assert_eq!(record.revision, 1);
    }

    #[test]
    fn clear_dirty_checks_revision() {
        let store = MemoryContactStore::new();
        let a = account();
        let id = store.create_contact(&a, Contact::new("Ada"));

        store
            .edit(&a, id, Payload::Contact(Contact::new("Ada 2")))
            .unwrap();
        assert!(!store.clear_dirty(&a, EntityType::Contact, id, 1).unwrap());
        assert!(store.get(&a, EntityType::Contact, id).unwrap().unwrap().dirty);

        assert!(store.clear_dirty(&a, EntityType::Contact, id, 2).unwrap());
        assert!(!store.get(&a, EntityType::Contact, id).unwrap().unwrap().dirty);
    }

    #[test]
    fn clear_dirty_purges_confirmed_tombstone() {
        let store = MemoryContactStore::new();
        let a = account();
        let id = store.create_group(&a, "Gone");
        store.delete(&a, EntityType::ContactGroup, id).unwrap();

        assert!(store.clear_dirty(&a, EntityType::ContactGroup, id, 2).unwrap());
        assert!(store.get(&a, EntityType::ContactGroup, id).unwrap().is_none());
    }

    #[test]
    fn set_server_id_reports_missing_record() {
        let store = MemoryContactStore::new();
        let a = account();
        assert!(!store
            .set_server_id(&a, EntityType::Contact, LocalId::new(1), Some(ServerId::new(1)))
            .unwrap());
    }

    #[test]
    fn mark_all_dirty_covers_both_tables() {
        let store = MemoryContactStore::new();
        let a = account();
        store
            .insert(&a, ServerId::new(1), Payload::Group(Group::new("G")))
            .unwrap();
        store
            .insert(&a, ServerId::new(2), Payload::Contact(Contact::new("C")))
            .unwrap();
        assert_eq!(store.mark_all_dirty(&a).unwrap(), 2);
        assert!(store
            .records(&a, EntityType::Contact)
            .unwrap()
            .iter()
            .all(|r| r.dirty));
    }

    #[test]
    fn injected_write_failure_fires_once() {
        let store = MemoryContactStore::new();
        let a = account();
        store.fail_next_write("disk full");
        assert!(matches!(
            store.mark_all_dirty(&a),
            Err(StoreError::Backend(_))
        ));
        assert!(store.mark_all_dirty(&a).is_ok());
    }
}
