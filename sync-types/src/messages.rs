//! Protocol messages for contactsync.
//!
//! One sync round is a single [`SyncRequest`] answered by a single
//! [`SyncResponse`] (or a [`Fault`]). Record payloads travel sealed: the
//! server only sees ids, deletion flags and ciphertext.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AnchorUpdate, IdMap, LocalId, RequestId, Restrictions, ServerId, SyncAnchor, WireError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Client sync round
    SyncRequest(SyncRequest),
    /// Server answer to a sync round
    SyncResponse(SyncResponse),
    /// Store the account's key-derivation salt on the server
    SaveSalt(SaveSalt),
    /// Acknowledge a stored salt
    SaltAck(SaltAck),
    /// Server-side failure
    Fault(Fault),
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Short name of the message type, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SyncRequest(_) => "SyncRequest",
            Message::SyncResponse(_) => "SyncResponse",
            Message::SaveSalt(_) => "SaveSalt",
            Message::SaltAck(_) => "SaltAck",
            Message::Fault(_) => "Fault",
        }
    }
}

/// A local record on its way to the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingRecord {
    /// Local identifier (temporary id for new records).
    pub local_id: LocalId,
    /// Server identifier, absent for new records.
    pub server_id: Option<ServerId>,
    /// Deletion tombstone.
    pub deleted: bool,
    /// Nonce-prefixed ciphertext of the MessagePack payload.
    pub sealed: Option<Vec<u8>>,
}

impl fmt::Debug for OutgoingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRecord")
            .field("local_id", &self.local_id)
            .field("server_id", &self.server_id)
            .field("deleted", &self.deleted)
            .field(
                "sealed",
                &self.sealed.as_ref().map(|s| format!("[{} bytes REDACTED]", s.len())),
            )
            .finish()
    }
}

/// A server record delivered to the client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingRecord {
    /// Server identifier.
    pub server_id: ServerId,
    /// Deleted on the server.
    pub deleted: bool,
    /// Nonce-prefixed ciphertext of the MessagePack payload.
    pub sealed: Option<Vec<u8>>,
}

impl fmt::Debug for IncomingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRecord")
            .field("server_id", &self.server_id)
            .field("deleted", &self.deleted)
            .field(
                "sealed",
                &self.sealed.as_ref().map(|s| format!("[{} bytes REDACTED]", s.len())),
            )
            .finish()
    }
}

/// Client request for one sync round.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Protocol version
    pub version: u8,
    /// Correlation id, echoed by the server
    pub request_id: RequestId,
    /// Credential token
    pub auth_token: String,
    /// Client's current markers
    pub anchors: SyncAnchor,
    /// Whether contacts take part in this round (false for groups-only rounds)
    pub sync_contacts: bool,
    /// Dirty groups
    pub groups: Vec<OutgoingRecord>,
    /// Dirty contacts
    pub contacts: Vec<OutgoingRecord>,
    /// Temporary ids of new groups needing server ids
    pub group_id_requests: Vec<LocalId>,
    /// Temporary ids of new contacts needing server ids
    pub contact_id_requests: Vec<LocalId>,
    /// Ask the server to include the account's restrictions
    pub request_restrictions: bool,
    /// Ask the server to resend photos for every contact
    pub explicit_photo_save: bool,
}

impl fmt::Debug for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRequest")
            .field("version", &self.version)
            .field("request_id", &self.request_id)
            .field("auth_token", &"[REDACTED]")
            .field("anchors", &self.anchors)
            .field("sync_contacts", &self.sync_contacts)
            .field("groups", &self.groups.len())
            .field("contacts", &self.contacts.len())
            .field("group_id_requests", &self.group_id_requests)
            .field("contact_id_requests", &self.contact_id_requests)
            .field("request_restrictions", &self.request_restrictions)
            .field("explicit_photo_save", &self.explicit_photo_save)
            .finish()
    }
}

/// Server instruction overriding normal round processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirective {
    /// The payloads were sealed with a key the server does not accept.
    #[serde(rename = "INVALID_KEY")]
    InvalidKey,
    /// The server requires a full resynchronization.
    #[serde(rename = "FORCE_FULLSYNC")]
    ForceFullSync,
}

/// Server answer to a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Correlation id of the request
    pub request_id: RequestId,
    /// New markers
    pub anchors: AnchorUpdate,
    /// Group changes since the client's group marker
    pub groups: Vec<IncomingRecord>,
    /// Contact changes since the client's contact marker
    pub contacts: Vec<IncomingRecord>,
    /// Server ids assigned to new groups
    pub group_ids: IdMap,
    /// Server ids assigned to new contacts
    pub contact_ids: IdMap,
    /// Optional directive
    pub directive: Option<SyncDirective>,
    /// Current restrictions, when requested or changed
    pub restrictions: Option<Restrictions>,
}

/// Store the account's key-derivation salt on the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSalt {
    /// Correlation id
    pub request_id: RequestId,
    /// Credential token
    pub auth_token: String,
    /// The salt bytes
    pub salt: Vec<u8>,
}

impl fmt::Debug for SaveSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveSalt")
            .field("request_id", &self.request_id)
            .field("auth_token", &"[REDACTED]")
            .field("salt", &"[REDACTED]")
            .finish()
    }
}

/// Acknowledge a stored salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaltAck {
    /// Correlation id of the [`SaveSalt`]
    pub request_id: RequestId,
}

/// Classification of a server-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCode {
    /// Credential token rejected
    Unauthorized,
    /// Request could not be parsed or violated the protocol
    BadRequest,
    /// Internal server failure
    Internal,
    /// Server temporarily unavailable
    Unavailable,
}

/// Server-side failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Correlation id, if the request could be parsed
    pub request_id: Option<RequestId>,
    /// Failure class
    pub code: FaultCode,
    /// Human-readable detail
    pub message: String,
}
