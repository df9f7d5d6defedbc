//! # sync-client
//!
//! Client sync engine for contactsync.
//!
//! One call to [`SyncAdapter::perform_sync`] runs a full attempt for one
//! account: restriction check, key readiness, dirty-set collection, the
//! encrypted request/response exchange, merge, anchor commit and cleanup.
//!
//! ## Features
//!
//! - **E2E Encryption**: record payloads sealed with XChaCha20-Poly1305
//! - **Device-Adaptive Key Derivation**: Argon2id scales with available RAM
//! - **Per-Entity Anchors**: groups and contacts advance independently
//! - **Transport Abstraction**: pluggable transport layer (mock included)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sync_client::*;
//! use sync_core::{MemoryAccountStore, SyncOptions};
//!
//! let adapter = SyncAdapter::new(
//!     SyncConfig::new("sync.example.com:443"),
//!     MockTransport::new(),
//!     Arc::new(MemoryContactStore::new()),
//!     Arc::new(MemoryAccountStore::new()),
//!     Arc::new(StaticTokenProvider::new("token")),
//!     Arc::new(PassphraseKeyManager::new()),
//!     Arc::new(RecordingNotifier::new()),
//! );
//! let outcome = adapter
//!     .perform_sync(&account, SyncOptions::default(), &CancellationToken::new())
//!     .await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod collector;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod merge;
pub mod notify;
pub mod protocol;
pub mod retry;
pub mod store;
pub mod transport;

pub use adapter::SyncAdapter;
pub use collector::{Collector, ConflictHandler, ConflictReporter, DirtySet};
pub use config::{ConfigError, SyncConfig};
pub use credentials::{
    CredentialError, KeyManager, PassphraseKeyManager, StaticTokenProvider, TokenProvider,
};
pub use crypto::{
    AccountSecret, Argon2Params, CryptoError, RecordKey, Salt, KEY_SIZE, NONCE_SIZE, SALT_SIZE,
};
pub use merge::MergeEngine;
pub use notify::{ConflictKind, Notification, Notifier, RecordingNotifier};
pub use protocol::{ProtocolError, RoundOptions, RoundResponse, SyncProtocolClient};
pub use retry::RetryPolicy;
pub use store::{ContactStore, MemoryContactStore, StoreError};
pub use transport::{MockTransport, Transport, TransportError, MAX_MESSAGE_SIZE};
pub use tokio_util::sync::CancellationToken;
