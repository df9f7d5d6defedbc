//! Phases of a sync attempt and the key-readiness decision table.
//!
//! This module is pure: it names the steps an attempt walks through and
//! decides how a failed key check ends the attempt. The actual I/O is
//! performed by sync-client.

use std::fmt;

use crate::outcome::{RetryAdvice, SyncResultState};

/// Steps of one sync attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncPhase {
    /// Attempt created.
    Init,
    /// Decide whether restrictions must be requested.
    RestrictionCheck,
    /// Acquire a token and verify key material.
    KeyReadyCheck,
    /// Make sure the key-derivation salt is stored server-side.
    SaltVerify,
    /// Collect dirty records, decide whether contacts take part.
    GroupSyncDecision,
    /// Send the round and process the response.
    ProtocolExchange,
    /// Persist the new markers.
    AnchorCommit,
    /// Clear confirmed dirty flags and one-shot markers.
    FlagCleanup,
    /// Attempt finished.
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Init => "init",
            SyncPhase::RestrictionCheck => "restriction-check",
            SyncPhase::KeyReadyCheck => "key-ready-check",
            SyncPhase::SaltVerify => "salt-verify",
            SyncPhase::GroupSyncDecision => "group-sync-decision",
            SyncPhase::ProtocolExchange => "protocol-exchange",
            SyncPhase::AnchorCommit => "anchor-commit",
            SyncPhase::FlagCleanup => "flag-cleanup",
            SyncPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Why key material is not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheckFailure {
    /// The token was rejected during the check.
    AuthFailed,
    /// The check itself failed (server could not confirm the key).
    CheckFailed,
    /// The key server could not be reached.
    NetworkError,
    /// No key has been set up for the account.
    MissingKey,
}

impl fmt::Display for KeyCheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyCheckFailure::AuthFailed => "key check rejected credentials",
            KeyCheckFailure::CheckFailed => "key check failed",
            KeyCheckFailure::NetworkError => "key check could not reach the server",
            KeyCheckFailure::MissingKey => "no encryption key for account",
        };
        f.write_str(s)
    }
}

/// How an attempt ends after a failed key check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDecision {
    /// Reported state.
    pub state: SyncResultState,
    /// Delayed retry, if any.
    pub retry: Option<RetryAdvice>,
    /// Show the missing-key notification.
    pub notify_missing_key: bool,
}

/// Decide how a failed key check ends the attempt.
pub fn key_check_decision(failure: KeyCheckFailure) -> KeyDecision {
    match failure {
        KeyCheckFailure::AuthFailed => KeyDecision {
            state: SyncResultState::AuthFailed,
            retry: Some(RetryAdvice { full_sync: true }),
            notify_missing_key: false,
        },
        KeyCheckFailure::CheckFailed => KeyDecision {
            state: SyncResultState::NetworkError,
            retry: Some(RetryAdvice { full_sync: true }),
            notify_missing_key: false,
        },
        KeyCheckFailure::NetworkError => KeyDecision {
            state: SyncResultState::NetworkError,
            retry: None,
            notify_missing_key: false,
        },
        KeyCheckFailure::MissingKey => KeyDecision {
            state: SyncResultState::MissingKey,
            retry: None,
            notify_missing_key: true,
        },
    }
}

/// Per-attempt options from the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Treat both anchors as the full-sync sentinel for this attempt.
    pub full_sync: bool,
}

impl SyncOptions {
    /// Options requesting a full sync.
    pub fn full_sync() -> Self {
        Self { full_sync: true }
    }
}
