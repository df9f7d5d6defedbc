//! Restriction reconciliation.
//!
//! Compares the previously stored [`Restrictions`] with the ones the server
//! just declared and decides whether the change forces a resynchronization.
//! Only enabling photo sync does: photos withheld so far must be re-sent.
//! Every other change is advisory.

use sync_types::Restrictions;

/// A user-facing notice about a restriction change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionNotice {
    /// Photos are now synchronized.
    PhotoSyncEnabled,
    /// Photos are no longer synchronized.
    PhotoSyncDisabled,
    /// The contact quota grew.
    MoreContactsAllowed {
        /// Previous quota.
        old: u32,
        /// New quota.
        new: u32,
    },
    /// The contact quota shrank.
    FewerContactsAllowed {
        /// Previous quota.
        old: u32,
        /// New quota.
        new: u32,
    },
}

/// Result of comparing two restriction snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Local state must be resent from scratch.
    pub resync_required: bool,
    /// The next round must ask the server to resend all photos.
    pub explicit_photo_save: bool,
    /// Notices to show the user.
    pub notices: Vec<RestrictionNotice>,
}

impl Reconciliation {
    /// Whether anything changed at all.
    pub fn is_empty(&self) -> bool {
        !self.resync_required && !self.explicit_photo_save && self.notices.is_empty()
    }
}

/// Reconcile a new restriction snapshot against the previous one.
///
/// With no previous snapshot there is nothing to compare: the caller stores
/// the new one and carries on.
pub fn reconcile(old: Option<&Restrictions>, new: &Restrictions) -> Reconciliation {
    let mut result = Reconciliation::default();
    let old = match old {
        Some(old) if old != new => old,
        _ => return result,
    };

    match (old.photo_sync, new.photo_sync) {
        (false, true) => {
            result.resync_required = true;
            result.explicit_photo_save = true;
            result.notices.push(RestrictionNotice::PhotoSyncEnabled);
        }
        (true, false) => result.notices.push(RestrictionNotice::PhotoSyncDisabled),
        _ => {}
    }

    if new.max_contacts > old.max_contacts {
        result.notices.push(RestrictionNotice::MoreContactsAllowed {
            old: old.max_contacts,
            new: new.max_contacts,
        });
    } else if new.max_contacts < old.max_contacts {
        result.notices.push(RestrictionNotice::FewerContactsAllowed {
            old: old.max_contacts,
            new: new.max_contacts,
        });
    }

    tracing::debug!(?old, ?new, ?result, "Reconciled restrictions");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabling_photo_sync_forces_resync() {
        let old = Restrictions::new(100, false);
        let new = Restrictions::new(100, true);
        let r = reconcile(Some(&old), &new);
        assert!(r.resync_required);
        assert!(r.explicit_photo_save);
        assert_eq!(r.notices, vec![RestrictionNotice::PhotoSyncEnabled]);
    }

    #[test]
    fn lowering_quota_is_advisory() {
        let old = Restrictions::new(100, false);
        let new = Restrictions::new(50, false);
        let r = reconcile(Some(&old), &new);
        assert!(!r.resync_required);
        assert!(!r.explicit_photo_save);
        assert_eq!(
            r.notices,
            vec![RestrictionNotice::FewerContactsAllowed { old: 100, new: 50 }]
        );
    }

    #[test]
    fn raising_quota_is_advisory() {
        let r = reconcile(
            Some(&Restrictions::new(100, true)),
            &Restrictions::new(500, true),
        );
        assert!(!r.resync_required);
        assert_eq!(
            r.notices,
            vec![RestrictionNotice::MoreContactsAllowed { old: 100, new: 500 }]
        );
    }

    #[test]
    fn disabling_photo_sync_is_advisory() {
        let r = reconcile(
            Some(&Restrictions::new(100, true)),
            &Restrictions::new(100, false),
        );
        assert!(!r.resync_required);
        assert!(!r.explicit_photo_save);
        assert_eq!(r.notices, vec![RestrictionNotice::PhotoSyncDisabled]);
    }

    #[test]
    fn combined_change_reports_both() {
        let r = reconcile(
            Some(&Restrictions::new(100, false)),
            &Restrictions::new(200, true),
        );
        assert!(r.resync_required);
        assert_eq!(r.notices.len(), 2);
    }

    #[test]
    fn identical_snapshots_change_nothing() {
        let same = Restrictions::new(100, true);
        assert!(reconcile(Some(&same), &same).is_empty());
    }

    #[test]
    fn first_snapshot_never_forces_resync() {
        let r = reconcile(None, &Restrictions::new(100, true));
        assert!(r.is_empty());
    }
}
