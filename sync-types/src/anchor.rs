//! Synchronization watermarks.
//!
//! Every account tracks one [`Marker`] per [`EntityType`]. Markers are issued
//! by the server and are opaque to the client: the client only stores them,
//! echoes them back, and checks them for the full-sync sentinel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// The kinds of records that are synchronized independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// A contact.
    Contact,
    /// A contact group.
    ContactGroup,
}

impl EntityType {
    /// All entity types, in sync order (groups first).
    pub const ALL: [EntityType; 2] = [EntityType::ContactGroup, EntityType::Contact];

    /// Short lowercase name, used for storage keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Contact => "contact",
            EntityType::ContactGroup => "group",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque synchronization watermark issued by the server.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Marker(i64);

impl Marker {
    /// Sentinel forcing a full resynchronization of the entity type.
    ///
    /// The server never issues negative markers.
    pub const FULL_SYNC: Marker = Marker(-1);

    /// Marker of an entity type that has never been synced.
    pub const NEVER_SYNCED: Marker = Marker(0);

    /// Create a Marker with the given value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Whether this is the full-sync sentinel.
    pub fn is_full_sync(&self) -> bool {
        *self == Self::FULL_SYNC
    }
}

impl Default for Marker {
    fn default() -> Self {
        Self::NEVER_SYNCED
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full_sync() {
            write!(f, "Marker(FULL_SYNC)")
        } else {
            write!(f, "Marker({})", self.0)
        }
    }
}

impl FromStr for Marker {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Marker)
            .map_err(|e| WireError::InvalidData(format!("invalid marker {:?}: {}", s, e)))
    }
}

/// The pair of markers an account holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncAnchor {
    /// Marker for contacts.
    pub contact: Marker,
    /// Marker for contact groups.
    pub group: Marker,
}

impl SyncAnchor {
    /// Anchor with both entity types set to the full-sync sentinel.
    pub fn full_sync() -> Self {
        Self {
            contact: Marker::FULL_SYNC,
            group: Marker::FULL_SYNC,
        }
    }

    /// Get the marker for an entity type.
    pub fn get(&self, entity: EntityType) -> Marker {
        match entity {
            EntityType::Contact => self.contact,
            EntityType::ContactGroup => self.group,
        }
    }

    /// Set the marker for an entity type.
    pub fn set(&mut self, entity: EntityType, marker: Marker) {
        match entity {
            EntityType::Contact => self.contact = marker,
            EntityType::ContactGroup => self.group = marker,
        }
    }

    /// Whether any entity type requests a full sync.
    pub fn any_full_sync(&self) -> bool {
        self.contact.is_full_sync() || self.group.is_full_sync()
    }
}

/// New markers returned by the server for one round.
///
/// An absent entry means the server did not advance that entity type; the
/// previously stored marker must be preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnchorUpdate {
    /// New contact marker, if advanced.
    pub contact: Option<Marker>,
    /// New group marker, if advanced.
    pub group: Option<Marker>,
}

impl AnchorUpdate {
    /// Get the update for an entity type.
    pub fn get(&self, entity: EntityType) -> Option<Marker> {
        match entity {
            EntityType::Contact => self.contact,
            EntityType::ContactGroup => self.group,
        }
    }

    /// Drop the update for an entity type.
    pub fn without(mut self, entity: EntityType) -> Self {
        match entity {
            EntityType::Contact => self.contact = None,
            EntityType::ContactGroup => self.group = None,
        }
        self
    }
}
