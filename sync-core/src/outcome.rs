//! Attempt outcomes and the error-kind mapping.
//!
//! Every failure the engine can hit is reduced to an [`ErrorKind`], and
//! [`classify`] maps each kind to exactly one [`SyncResultState`], counter and
//! retry advice. The orchestrator consults nothing else when an attempt fails.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Final state of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncResultState {
    /// The round completed (possibly with a resync requested).
    Success,
    /// Credentials were rejected.
    AuthFailed,
    /// The server could not be reached, or the attempt was cancelled.
    NetworkError,
    /// The server failed or answered with something unusable.
    ServerError,
    /// No encryption key is available; the user must supply one.
    MissingKey,
}

impl fmt::Display for SyncResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncResultState::Success => "success",
            SyncResultState::AuthFailed => "auth failed",
            SyncResultState::NetworkError => "network error",
            SyncResultState::ServerError => "server error",
            SyncResultState::MissingKey => "missing key",
        };
        f.write_str(s)
    }
}

/// Tagged failure kind produced by the protocol client and the local stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credential token rejected.
    Auth,
    /// Transport I/O failure or timeout.
    Network,
    /// The server reported a fault.
    Server,
    /// Undecodable or unexpected response.
    Parse,
    /// A server payload could not be decrypted with the current key.
    InvalidKey,
    /// Writing the round's results to local storage failed.
    Apply,
    /// The attempt was cancelled.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Server => "server",
            ErrorKind::Parse => "parse",
            ErrorKind::InvalidKey => "invalid key",
            ErrorKind::Apply => "apply",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Counters reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Transport failures.
    Io,
    /// Credential failures.
    Auth,
    /// Unusable responses.
    Parse,
    /// Local storage failures.
    Database,
}

/// Per-attempt error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounters {
    /// Transport failures.
    pub io_errors: u32,
    /// Credential failures.
    pub auth_errors: u32,
    /// Unusable responses.
    pub parse_errors: u32,
    /// Local storage failures.
    pub database_errors: u32,
}

impl SyncCounters {
    /// Increment one counter.
    pub fn bump(&mut self, counter: Counter) {
        let slot = match counter {
            Counter::Io => &mut self.io_errors,
            Counter::Auth => &mut self.auth_errors,
            Counter::Parse => &mut self.parse_errors,
            Counter::Database => &mut self.database_errors,
        };
        *slot = slot.saturating_add(1);
    }

    /// Whether any counter is non-zero.
    pub fn any(&self) -> bool {
        self.io_errors + self.auth_errors + self.parse_errors + self.database_errors > 0
    }
}

/// Retry advice without a concrete delay (delays come from configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdvice {
    /// The retry must run as a full sync.
    pub full_sync: bool,
}

/// How an attempt that failed with a given [`ErrorKind`] ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    /// Reported state.
    pub state: SyncResultState,
    /// Counter to increment, if any.
    pub counter: Option<Counter>,
    /// Ask the scheduler for a delayed retry.
    pub retry: Option<RetryAdvice>,
    /// Key material must be discarded and anchors reset to the sentinel.
    pub reset_key: bool,
}

/// Map a failure kind to its outcome.
pub fn classify(kind: ErrorKind) -> Disposition {
    let (state, counter, retry, reset_key) = match kind {
        ErrorKind::Auth => (SyncResultState::AuthFailed, Some(Counter::Auth), None, false),
        ErrorKind::Network => (
            SyncResultState::NetworkError,
            Some(Counter::Io),
            Some(RetryAdvice { full_sync: true }),
            false,
        ),
        ErrorKind::Server => (
            SyncResultState::ServerError,
            None,
            Some(RetryAdvice { full_sync: false }),
            false,
        ),
        ErrorKind::Parse => (SyncResultState::ServerError, Some(Counter::Parse), None, false),
        ErrorKind::InvalidKey => (SyncResultState::AuthFailed, Some(Counter::Auth), None, true),
        ErrorKind::Apply => (
            SyncResultState::ServerError,
            Some(Counter::Database),
            None,
            false,
        ),
        ErrorKind::Cancelled => (SyncResultState::NetworkError, None, None, false),
    };
    Disposition {
        state,
        counter,
        retry,
        reset_key,
    }
}

/// A delayed retry requested from the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRequest {
    /// How long to wait.
    pub delay: Duration,
    /// Run the retry as a full sync.
    pub full_sync: bool,
}

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Exactly one state per attempt.
    pub state: SyncResultState,
    /// Human-readable detail for failures.
    pub message: Option<String>,
    /// Another round should run immediately.
    pub resync_requested: bool,
    /// Delayed retry, if any.
    pub retry: Option<RetryRequest>,
    /// Error counters.
    pub counters: SyncCounters,
}

impl SyncOutcome {
    /// A successful attempt.
    pub fn success() -> Self {
        Self {
            state: SyncResultState::Success,
            message: None,
            resync_requested: false,
            retry: None,
            counters: SyncCounters::default(),
        }
    }

    /// A failed attempt.
    pub fn failed(state: SyncResultState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: Some(message.into()),
            ..Self::success()
        }
    }

    /// Request an immediate follow-up round.
    pub fn with_resync(mut self) -> Self {
        self.resync_requested = true;
        self
    }

    /// Request a delayed retry.
    pub fn with_retry(mut self, delay: Duration, full_sync: bool) -> Self {
        self.retry = Some(RetryRequest { delay, full_sync });
        self
    }

    /// Whether the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.state == SyncResultState::Success
    }

    /// The persisted form of this outcome.
    pub fn to_stored(&self, finished_at: u64) -> StoredResult {
        StoredResult {
            state: self.state,
            message: self.message.clone(),
            finished_at,
        }
    }
}

/// Last attempt result as persisted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResult {
    /// Final state.
    pub state: SyncResultState,
    /// Failure detail.
    pub message: Option<String>,
    /// Unix seconds at which the attempt finished.
    pub finished_at: u64,
}
