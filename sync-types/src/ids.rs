//! Identity types for contactsync.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity of a synchronization session.
///
/// All persisted sync state (anchors, restrictions, flags) is scoped by
/// account, and no state is shared between accounts.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Account {
    /// Account name, usually the user's login.
    pub name: String,
    /// Account type, identifying the provider.
    pub account_type: String,
}

impl Account {
    /// Create a new account identity.
    pub fn new(name: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_type: account_type.into(),
        }
    }

    /// Stable key for use in key-value stores.
    ///
    /// URL-safe base64 of `type/name`, so arbitrary account names cannot
    /// collide with store separators.
    pub fn storage_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}/{}", self.account_type, self.name))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.account_type)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({}/{})", self.account_type, self.name)
    }
}

/// Identifier of a record in the local contact database.
///
/// For records created locally and not yet confirmed by the server, this
/// doubles as the temporary id sent in the request's id map.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(i64);

impl LocalId {
    /// Create a LocalId from its raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

/// Identifier assigned to a record by the server.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerId(u64);

impl ServerId {
    /// Create a ServerId from its raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerId({})", self.0)
    }
}

/// Correlates a response with the request that produced it.
///
/// UUID v4 format (16 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(uuid::Uuid);

impl RequestId {
    /// Create a new random RequestId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_storage_key_is_stable() {
        let a = Account::new("alice@example.com", "org.contactsync");
        let b = Account::new("alice@example.com", "org.contactsync");
        assert_eq!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn account_storage_key_distinguishes_type() {
        let a = Account::new("alice", "type-a");
        let b = Account::new("alice", "type-b");
        assert_ne!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn account_storage_key_has_no_separators() {
        let a = Account::new("we/ird:name", "t");
        let key = a.storage_key();
        assert!(!key.contains('/'));
        assert!(!key.contains(':'));
    }

    #[test]
    fn request_id_is_uuid_v4() {
        let id = RequestId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
        assert_ne!(id, RequestId::new());
    }

    #[test]
    fn id_ordering_follows_value() {
        assert!(LocalId::new(1) < LocalId::new(2));
        assert!(ServerId::new(10) > ServerId::new(9));
    }
}
