//! User-facing notifications.
//!
//! Presentation is a platform concern; the engine only says what to show
//! or withdraw through [`Notifier`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sync_core::RestrictionNotice;
use sync_types::Account;

/// Records withheld from a round because of restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Photos were stripped because photo sync is off.
    PhotoNotSynced,
    /// New contacts were withheld because the quota is reached.
    ContactNotSynced,
}

impl ConflictKind {
    /// Stable name, used for throttling keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::PhotoNotSynced => "photo_not_synced",
            ConflictKind::ContactNotSynced => "contact_not_synced",
        }
    }
}

/// Presents notifications to the user.
pub trait Notifier: Send + Sync {
    /// Show that the account has no usable encryption key.
    fn missing_key_shown(&self, account: &Account);

    /// Withdraw the missing-key notification.
    fn missing_key_cleared(&self, account: &Account);

    /// Report a restriction change.
    fn restrictions_changed(&self, account: &Account, notice: RestrictionNotice);

    /// Report records withheld from synchronization.
    fn records_not_synced(&self, account: &Account, kind: ConflictKind, count: usize);
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Missing key shown.
    MissingKeyShown,
    /// Missing key withdrawn.
    MissingKeyCleared,
    /// Restriction change.
    Restrictions(RestrictionNotice),
    /// Records withheld.
    NotSynced {
        /// What was withheld.
        kind: ConflictKind,
        /// How many records.
        count: usize,
    },
}

/// Notifier that records everything, for tests and headless use.
///
/// Clones share state.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    inner: Arc<Mutex<Vec<(Account, Notification)>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Account, Notification)>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, account: &Account, notification: Notification) {
        self.lock().push((account.clone(), notification));
    }

    /// Everything recorded for an account, oldest first.
    pub fn notifications(&self, account: &Account) -> Vec<Notification> {
        self.lock()
            .iter()
            .filter(|(a, _)| a == account)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn missing_key_shown(&self, account: &Account) {
        self.push(account, Notification::MissingKeyShown);
    }

    fn missing_key_cleared(&self, account: &Account) {
        self.push(account, Notification::MissingKeyCleared);
    }

    fn restrictions_changed(&self, account: &Account, notice: RestrictionNotice) {
        self.push(account, Notification::Restrictions(notice));
    }

    fn records_not_synced(&self, account: &Account, kind: ConflictKind, count: usize) {
        self.push(account, Notification::NotSynced { kind, count });
    }
}
