//! Record model shared by the local store, the collector and the merge engine.
//!
//! Locally, contacts reference their groups by [`LocalId`]; on the wire they
//! reference them by [`ServerId`]. [`Contact`] and [`WireContact`] are the
//! two sides of that translation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{EntityType, LocalId, ServerId};

/// A contact group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Group {
    /// Display name of the group.
    pub name: String,
}

impl Group {
    /// Create a group with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A contact as stored locally.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    /// Display name.
    pub display_name: String,
    /// Phone numbers.
    pub phones: Vec<String>,
    /// Email addresses.
    pub emails: Vec<String>,
    /// Groups this contact belongs to (local group ids).
    pub groups: Vec<LocalId>,
    /// Encoded photo, if any.
    pub photo: Option<Vec<u8>>,
}

impl Contact {
    /// Create a contact with only a display name.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("display_name", &"[REDACTED]")
            .field("phones", &self.phones.len())
            .field("emails", &self.emails.len())
            .field("groups", &self.groups)
            .field(
                "photo",
                &self.photo.as_ref().map(|p| format!("[{} bytes]", p.len())),
            )
            .finish()
    }
}

/// A contact as sent over the wire (inside the encrypted payload).
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireContact {
    /// Display name.
    pub display_name: String,
    /// Phone numbers.
    pub phones: Vec<String>,
    /// Email addresses.
    pub emails: Vec<String>,
    /// Groups this contact belongs to (server group ids).
    pub groups: Vec<ServerId>,
    /// Encoded photo, if any.
    pub photo: Option<Vec<u8>>,
}

impl fmt::Debug for WireContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireContact")
            .field("display_name", &"[REDACTED]")
            .field("phones", &self.phones.len())
            .field("emails", &self.emails.len())
            .field("groups", &self.groups)
            .field(
                "photo",
                &self.photo.as_ref().map(|p| format!("[{} bytes]", p.len())),
            )
            .finish()
    }
}

/// Entity-specific content of a local record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// A contact group.
    Group(Group),
    /// A contact.
    Contact(Contact),
}

impl Payload {
    /// The entity type of this payload.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Payload::Group(_) => EntityType::ContactGroup,
            Payload::Contact(_) => EntityType::Contact,
        }
    }
}

/// Entity-specific content of a record on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WirePayload {
    /// A contact group.
    Group(Group),
    /// A contact.
    Contact(WireContact),
}

impl WirePayload {
    /// The entity type of this payload.
    pub fn entity_type(&self) -> EntityType {
        match self {
            WirePayload::Group(_) => EntityType::ContactGroup,
            WirePayload::Contact(_) => EntityType::Contact,
        }
    }
}

/// Why a record is part of the outgoing dirty set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirtyReason {
    /// Created locally, never confirmed by the server.
    Created,
    /// Modified locally since the last confirmed sync.
    Modified,
    /// Deleted locally; the tombstone must reach the server.
    Deleted,
    /// Not flagged, but included because a full sync was requested.
    FullSync,
}

/// A record as held by the local contact store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRecord {
    /// Local identifier.
    pub local_id: LocalId,
    /// Server identifier, absent for records never confirmed by the server.
    pub server_id: Option<ServerId>,
    /// Changed since the last confirmed sync.
    pub dirty: bool,
    /// Deleted locally but not yet confirmed (tombstone).
    pub deleted: bool,
    /// Bumped by every local mutation.
    pub revision: u64,
    /// Entity content.
    pub payload: Payload,
}

impl LocalRecord {
    /// The entity type of this record.
    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    /// Why this record would be sent, if it is dirty.
    pub fn dirty_reason(&self) -> Option<DirtyReason> {
        if !self.dirty {
            None
        } else if self.deleted {
            Some(DirtyReason::Deleted)
        } else if self.server_id.is_none() {
            Some(DirtyReason::Created)
        } else {
            Some(DirtyReason::Modified)
        }
    }
}

/// A record selected for the outgoing round.
///
/// A snapshot: `revision` is the local revision at collection time, so
/// edits made while the round is in flight can be told apart.
#[derive(Clone, PartialEq, Eq)]
pub struct DirtyRecord {
    /// Local identifier.
    pub local_id: LocalId,
    /// Server identifier, absent for new records.
    pub server_id: Option<ServerId>,
    /// Why the record is being sent.
    pub reason: DirtyReason,
    /// Local revision at collection time.
    pub revision: u64,
    /// Wire payload; absent for deletions.
    pub payload: Option<WirePayload>,
}

impl DirtyRecord {
    /// Whether the record has never been confirmed by the server.
    pub fn is_new(&self) -> bool {
        self.server_id.is_none()
    }

    /// Whether the record is a deletion.
    pub fn is_deleted(&self) -> bool {
        self.reason == DirtyReason::Deleted
    }
}

impl fmt::Debug for DirtyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirtyRecord")
            .field("local_id", &self.local_id)
            .field("server_id", &self.server_id)
            .field("reason", &self.reason)
            .field("revision", &self.revision)
            .field("payload", &self.payload.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A server-side change delivered in a sync response.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Server identifier.
    pub server_id: ServerId,
    /// The record was deleted on the server.
    pub deleted: bool,
    /// Decrypted payload; absent for deletions.
    pub payload: Option<WirePayload>,
}

impl fmt::Debug for ServerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRecord")
            .field("server_id", &self.server_id)
            .field("deleted", &self.deleted)
            .field("payload", &self.payload.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Mapping from local temporary ids to server-assigned ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMap(BTreeMap<LocalId, ServerId>);

impl IdMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `local` was assigned `server`.
    pub fn insert(&mut self, local: LocalId, server: ServerId) {
        self.0.insert(local, server);
    }

    /// Server id assigned to `local`, if any.
    pub fn get(&self, local: LocalId) -> Option<ServerId> {
        self.0.get(&local).copied()
    }

    /// Whether `local` received a server id.
    pub fn contains(&self, local: LocalId) -> bool {
        self.0.contains_key(&local)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in local id order.
    pub fn iter(&self) -> impl Iterator<Item = (LocalId, ServerId)> + '_ {
        self.0.iter().map(|(l, s)| (*l, *s))
    }
}

impl FromIterator<(LocalId, ServerId)> for IdMap {
    fn from_iter<I: IntoIterator<Item = (LocalId, ServerId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
