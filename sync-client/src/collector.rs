//! Dirty-set collection.
//!
//! Picks the local records that must go out in the next round, translates
//! them to wire form, and enforces account restrictions on the way:
//!
//! - groups always go first; if any dirty group still lacks a server id,
//!   contacts are deferred to a follow-up round so their group references
//!   can be expressed in server ids;
//! - with photo sync off, photos are stripped;
//! - once the account holds `max_contacts` contacts on the server, further
//!   new contacts are withheld.
//!
//! Restriction hits are reported through [`ConflictHandler`] and never fail
//! the round.

use std::collections::HashMap;
use std::time::Duration;

use sync_core::{AccountData, AccountStore, AccountStoreError};
use sync_types::{
    Account, Contact, DirtyReason, DirtyRecord, EntityType, LocalId, LocalRecord, Payload,
    Restrictions, ServerId, WireContact, WirePayload,
};

use crate::notify::{ConflictKind, Notifier};
use crate::store::{ContactStore, StoreError};

/// Receives records the collector had to hold back or trim.
pub trait ConflictHandler {
    /// A contact was sent without its photo.
    fn photo_not_synced(&mut self, local_id: LocalId);

    /// A new contact was not sent because the quota is reached.
    fn contact_not_synced(&mut self, local_id: LocalId);
}

/// Records selected for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtySet {
    /// Dirty groups, by local id.
    pub groups: Vec<DirtyRecord>,
    /// Dirty contacts, by local id. Empty when contacts are deferred.
    pub contacts: Vec<DirtyRecord>,
    /// Whether contacts take part in this round.
    pub sync_contacts: bool,
    /// Local ids of new groups needing server ids.
    pub group_id_requests: Vec<LocalId>,
    /// Local ids of new contacts needing server ids.
    pub contact_id_requests: Vec<LocalId>,
}

impl Default for DirtySet {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            contacts: Vec::new(),
            sync_contacts: true,
            group_id_requests: Vec::new(),
            contact_id_requests: Vec::new(),
        }
    }
}

impl DirtySet {
    /// Records of one entity type.
    pub fn records(&self, entity: EntityType) -> &[DirtyRecord] {
        match entity {
            EntityType::Contact => &self.contacts,
            EntityType::ContactGroup => &self.groups,
        }
    }

    /// Id requests of one entity type.
    pub fn id_requests(&self, entity: EntityType) -> &[LocalId] {
        match entity {
            EntityType::Contact => &self.contact_id_requests,
            EntityType::ContactGroup => &self.group_id_requests,
        }
    }

    /// Whether nothing is sent.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.contacts.is_empty()
    }
}

/// Collects dirty records from a [`ContactStore`].
pub struct Collector<'a, C: ContactStore + ?Sized> {
    store: &'a C,
}

impl<'a, C: ContactStore + ?Sized> Collector<'a, C> {
    /// Create a collector over `store`.
    pub fn new(store: &'a C) -> Self {
        Self { store }
    }

    /// Build the dirty set for one round.
    ///
    /// With `full_sync`, every local record is included regardless of its
    /// dirty flag. Records created and deleted before ever reaching the
    /// server are purged locally and not sent.
    pub fn collect(
        &self,
        account: &Account,
        restrictions: &Restrictions,
        full_sync: bool,
        handler: &mut dyn ConflictHandler,
    ) -> Result<DirtySet, StoreError> {
        let group_records = self.live_records(account, EntityType::ContactGroup)?;
        let groups: Vec<DirtyRecord> = group_records
            .iter()
            .filter_map(|r| selection_reason(r, full_sync).map(|reason| (r, reason)))
            .map(|(r, reason)| DirtyRecord {
                local_id: r.local_id,
                server_id: r.server_id,
                reason,
                revision: r.revision,
                payload: match (&r.payload, r.deleted) {
                    (Payload::Group(g), false) => Some(WirePayload::Group(g.clone())),
                    _ => None,
                },
            })
            .collect();

        let group_id_requests: Vec<LocalId> = new_ids(&groups);
        let sync_contacts = group_id_requests.is_empty();

        let mut set = DirtySet {
            groups,
            group_id_requests,
            sync_contacts,
            ..DirtySet::default()
        };

        if !sync_contacts {
            tracing::debug!(
                account = %account,
                new_groups = set.group_id_requests.len(),
                "Deferring contacts until new groups have server ids"
            );
            return Ok(set);
        }

        let group_ids: HashMap<LocalId, ServerId> = group_records
            .iter()
            .filter(|r| !r.deleted)
            .filter_map(|r| r.server_id.map(|s| (r.local_id, s)))
            .collect();

        let contact_records = self.live_records(account, EntityType::Contact)?;
        let mut on_server = contact_records
            .iter()
            .filter(|r| !r.deleted && r.server_id.is_some())
            .count();
        let quota = restrictions.max_contacts as usize;

        for record in &contact_records {
            let Some(reason) = selection_reason(record, full_sync) else {
                continue;
            };
            let contact = match (&record.payload, record.deleted) {
                (Payload::Contact(c), false) => Some(c),
                _ => None,
            };

            if record.server_id.is_none() && contact.is_some() {
                if on_server >= quota {
                    handler.contact_not_synced(record.local_id);
                    continue;
                }
                on_server += 1;
            }

            let payload = contact.map(|c| {
                let (wire, photo_stripped) = to_wire(c, &group_ids, restrictions.photo_sync);
                if photo_stripped {
                    handler.photo_not_synced(record.local_id);
                }
                WirePayload::Contact(wire)
            });

            set.contacts.push(DirtyRecord {
                local_id: record.local_id,
                server_id: record.server_id,
                reason,
                revision: record.revision,
                payload,
            });
        }
        set.contact_id_requests = new_ids(&set.contacts);

        tracing::debug!(
            account = %account,
            groups = set.groups.len(),
            contacts = set.contacts.len(),
            full_sync,
            "Collected dirty set"
        );
        Ok(set)
    }

    /// All records of an entity type, after purging never-sent tombstones.
    fn live_records(
        &self,
        account: &Account,
        entity: EntityType,
    ) -> Result<Vec<LocalRecord>, StoreError> {
        let mut records = self.store.records(account, entity)?;
        let mut purged = Vec::new();
        records.retain(|r| {
            let never_sent = r.deleted && r.server_id.is_none();
            if never_sent {
                purged.push(r.local_id);
            }
            !never_sent
        });
        for local_id in purged {
            tracing::debug!(account = %account, %entity, %local_id, "Purging unsent tombstone");
            self.store.remove(account, entity, local_id)?;
        }
        records.sort_by_key(|r| r.local_id);
        Ok(records)
    }
}

fn selection_reason(record: &LocalRecord, full_sync: bool) -> Option<DirtyReason> {
    match record.dirty_reason() {
        Some(reason) => Some(reason),
        None if full_sync => Some(DirtyReason::FullSync),
        None => None,
    }
}

fn new_ids(records: &[DirtyRecord]) -> Vec<LocalId> {
    records
        .iter()
        .filter(|r| r.server_id.is_none())
        .map(|r| r.local_id)
        .collect()
}

/// Wire form of a local contact. Returns whether a photo was stripped.
fn to_wire(
    contact: &Contact,
    group_ids: &HashMap<LocalId, ServerId>,
    photo_sync: bool,
) -> (WireContact, bool) {
    let photo_stripped = !photo_sync && contact.photo.is_some();
    let wire = WireContact {
        display_name: contact.display_name.clone(),
        phones: contact.phones.clone(),
        emails: contact.emails.clone(),
        groups: contact
            .groups
            .iter()
            .filter_map(|g| group_ids.get(g).copied())
            .collect(),
        photo: if photo_sync {
            contact.photo.clone()
        } else {
            None
        },
    };
    (wire, photo_stripped)
}

/// [`ConflictHandler`] that batches restriction hits into throttled
/// notifications.
#[derive(Debug, Default)]
pub struct ConflictReporter {
    photos: Vec<LocalId>,
    contacts: Vec<LocalId>,
}

impl ConflictReporter {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Contacts sent without photos.
    pub fn photos_not_synced(&self) -> &[LocalId] {
        &self.photos
    }

    /// New contacts withheld.
    pub fn contacts_not_synced(&self) -> &[LocalId] {
        &self.contacts
    }

    /// Notify about collected hits. A kind is notified at most once per
    /// `interval`; the last notification time is kept in the account store.
    pub fn flush<S: AccountStore + ?Sized>(
        &self,
        account: &Account,
        notifier: &dyn Notifier,
        data: &AccountData<'_, S>,
        now: u64,
        interval: Duration,
    ) -> Result<(), AccountStoreError> {
        for (kind, ids) in [
            (ConflictKind::PhotoNotSynced, &self.photos),
            (ConflictKind::ContactNotSynced, &self.contacts),
        ] {
            if ids.is_empty() {
                continue;
            }
            let due = match data.last_notified(kind.as_str())? {
                Some(last) => now.saturating_sub(last) >= interval.as_secs(),
                None => true,
            };
            if due {
                notifier.records_not_synced(account, kind, ids.len());
                data.set_last_notified(kind.as_str(), now)?;
            } else {
                tracing::debug!(account = %account, kind = kind.as_str(), "Notification throttled");
            }
        }
        Ok(())
    }
}

impl ConflictHandler for ConflictReporter {
    fn photo_not_synced(&mut self, local_id: LocalId) {
        self.photos.push(local_id);
    }

    fn contact_not_synced(&mut self, local_id: LocalId) {
        self.contacts.push(local_id);
    }
}
