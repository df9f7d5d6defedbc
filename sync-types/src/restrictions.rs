//! Server-declared account capabilities.

use serde::{Deserialize, Serialize};

/// Capabilities and quotas the server grants an account.
///
/// Compared structurally between rounds; any difference is handed to the
/// restriction reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restrictions {
    /// Maximum number of contacts the account may hold on the server.
    pub max_contacts: u32,
    /// Whether contact photos are synchronized.
    pub photo_sync: bool,
}

impl Restrictions {
    /// Create a restriction snapshot.
    pub fn new(max_contacts: u32, photo_sync: bool) -> Self {
        Self {
            max_contacts,
            photo_sync,
        }
    }
}

impl Default for Restrictions {
    /// Conservative defaults used before the server has declared anything.
    fn default() -> Self {
        Self {
            max_contacts: 100,
            photo_sync: false,
        }
    }
}
