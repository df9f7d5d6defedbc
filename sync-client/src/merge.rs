//! Applying a server response to the local store.
//!
//! Three steps per entity type, in this order:
//! 1. [`MergeEngine::save_ids`] attaches server ids to records that were
//!    sent as new;
//! 2. [`MergeEngine::apply`] writes server deltas, resolving conflicts with
//!    local edits;
//! 3. [`MergeEngine::clear_sync_flags`] clears the dirty flag of confirmed
//!    records only.
//!
//! The server echoes every record it accepted as a delta, so a sent record
//! is confirmed when it comes back in the deltas or in the id map.
//!
//! Conflict policy for a delta matching a local record:
//! - sent this round at the same revision, or clean locally: server wins;
//! - dirty but not sent, or edited after collection: local wins and the
//!   delta is skipped. If the server deleted the record, its server id is
//!   dropped so the local edit goes out as a new record.

use sync_types::{
    Account, Contact, DirtyRecord, EntityType, Group, IdMap, LocalId, LocalRecord, Payload,
    Restrictions, ServerRecord, WireContact, WirePayload,
};

use crate::store::{ContactStore, StoreError};

/// Writes server results into a [`ContactStore`].
pub struct MergeEngine<'a, C: ContactStore + ?Sized> {
    store: &'a C,
}

impl<'a, C: ContactStore + ?Sized> MergeEngine<'a, C> {
    /// Create a merge engine over `store`.
    pub fn new(store: &'a C) -> Self {
        Self { store }
    }

    /// Attach server ids from `id_map`. Entries whose local record is gone
    /// are absorbed. Returns how many records were updated.
    pub fn save_ids(
        &self,
        account: &Account,
        entity: EntityType,
        id_map: &IdMap,
    ) -> Result<usize, StoreError> {
        let mut saved = 0;
        for (local_id, server_id) in id_map.iter() {
            if self
                .store
                .set_server_id(account, entity, local_id, Some(server_id))?
            {
                saved += 1;
            } else {
                tracing::debug!(account = %account, %entity, %local_id, "Id for vanished record absorbed");
            }
        }
        Ok(saved)
    }

    /// Apply server deltas. Returns the local ids of sent records the
    /// deltas confirmed.
    pub fn apply(
        &self,
        account: &Account,
        entity: EntityType,
        deltas: &[ServerRecord],
        restrictions: &Restrictions,
        sent: &[DirtyRecord],
    ) -> Result<Vec<LocalId>, StoreError> {
        let mut updated = Vec::new();

        for delta in deltas {
            let local = self
                .store
                .find_by_server_id(account, entity, delta.server_id)?;

            let Some(local) = local else {
                if !delta.deleted {
                    if let Some(payload) = self.to_local(account, delta, restrictions)? {
                        let local_id = self.store.insert(account, delta.server_id, payload)?;
                        tracing::trace!(account = %account, %entity, %local_id, "Inserted server record");
                    }
                }
                continue;
            };

            let sent_unchanged = sent
                .iter()
                .any(|s| s.local_id == local.local_id && s.revision == local.revision);

            if sent_unchanged || !local.dirty {
                self.overwrite(account, entity, &local, delta, restrictions)?;
                if sent_unchanged {
                    updated.push(local.local_id);
                }
            } else if delta.deleted && !local.deleted {
                tracing::info!(
                    account = %account,
                    %entity,
                    local_id = %local.local_id,
                    "Server deleted a locally edited record; keeping local copy"
                );
                self.store
                    .set_server_id(account, entity, local.local_id, None)?;
            } else if delta.deleted {
                self.store.remove(account, entity, local.local_id)?;
            } else {
                tracing::debug!(
                    account = %account,
                    %entity,
                    local_id = %local.local_id,
                    "Local edit wins over server change"
                );
            }
        }

        Ok(updated)
    }

    /// Clear the dirty flag of every sent record present in `id_map` or
    /// `updated`. The store skips records edited since collection. Returns
    /// how many flags were cleared.
    pub fn clear_sync_flags(
        &self,
        account: &Account,
        entity: EntityType,
        sent: &[DirtyRecord],
        id_map: &IdMap,
        updated: &[LocalId],
    ) -> Result<usize, StoreError> {
        let mut cleared = 0;
        for record in sent {
            if !(id_map.contains(record.local_id) || updated.contains(&record.local_id)) {
                continue;
            }
            if self
                .store
                .clear_dirty(account, entity, record.local_id, record.revision)?
            {
                cleared += 1;
            }
        }
        tracing::debug!(account = %account, %entity, cleared, sent = sent.len(), "Cleared sync flags");
        Ok(cleared)
    }

    fn overwrite(
        &self,
        account: &Account,
        entity: EntityType,
        local: &LocalRecord,
        delta: &ServerRecord,
        restrictions: &Restrictions,
    ) -> Result<(), StoreError> {
        if delta.deleted {
            return self.store.remove(account, entity, local.local_id);
        }
        match self.to_local(account, delta, restrictions)? {
            Some(mut payload) => {
                if let (Payload::Contact(new), Payload::Contact(old)) = (&mut payload, &local.payload)
                {
                    if !restrictions.photo_sync {
                        new.photo = old.photo.clone();
                    }
                }
                self.store.update(account, local.local_id, payload)
            }
            None => Ok(()),
        }
    }

    /// Local form of a live delta's payload.
    fn to_local(
        &self,
        account: &Account,
        delta: &ServerRecord,
        restrictions: &Restrictions,
    ) -> Result<Option<Payload>, StoreError> {
        Ok(match &delta.payload {
            None => None,
            Some(WirePayload::Group(g)) => Some(Payload::Group(Group::new(g.name.clone()))),
            Some(WirePayload::Contact(c)) => {
                Some(Payload::Contact(self.contact_from_wire(account, c, restrictions)?))
            }
        })
    }

    fn contact_from_wire(
        &self,
        account: &Account,
        wire: &WireContact,
        restrictions: &Restrictions,
    ) -> Result<Contact, StoreError> {
        let mut groups = Vec::with_capacity(wire.groups.len());
        for server_id in &wire.groups {
            if let Some(group) =
                self.store
                    .find_by_server_id(account, EntityType::ContactGroup, *server_id)?
            {
                groups.push(group.local_id);
            }
        }
        Ok(Contact {
            display_name: wire.display_name.clone(),
            phones: wire.phones.clone(),
            emails: wire.emails.clone(),
            groups,
            photo: if restrictions.photo_sync {
                wire.photo.clone()
            } else {
                None
            },
        })
    }
}
