//! # sync-types
//!
//! Wire format and data model types for the contactsync protocol.
//!
//! This crate provides the foundational types used across all contactsync crates:
//! - [`Account`], [`LocalId`], [`ServerId`], [`RequestId`] - Identity types
//! - [`Marker`], [`SyncAnchor`], [`AnchorUpdate`] - Per-entity sync watermarks
//! - [`LocalRecord`], [`DirtyRecord`], [`ServerRecord`], [`IdMap`] - Record model
//! - [`Restrictions`] - Server-declared account capabilities
//! - [`Message`] - Protocol messages (SyncRequest, SyncResponse, etc.)
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod anchor;
mod error;
mod ids;
mod messages;
mod records;
mod restrictions;

pub use anchor::{AnchorUpdate, EntityType, Marker, SyncAnchor};
pub use error::WireError;
pub use ids::{Account, LocalId, RequestId, ServerId};
pub use messages::{
    Fault, FaultCode, IncomingRecord, Message, OutgoingRecord, SaltAck, SaveSalt, SyncDirective,
    SyncRequest, SyncResponse, PROTOCOL_VERSION,
};
pub use records::{
    Contact, DirtyReason, DirtyRecord, Group, IdMap, LocalRecord, Payload, ServerRecord,
    WireContact, WirePayload,
};
pub use restrictions::Restrictions;
