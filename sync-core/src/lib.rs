//! # sync-core
//!
//! Pure logic for contactsync (no network I/O, instant tests).
//!
//! This crate implements the bookkeeping and decision logic of the sync
//! engine without any network access, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! Modules in this crate either are **pure** (they take input and produce
//! output without side effects) or talk only to the narrow
//! [`AccountStore`] key-value interface:
//! - [`AnchorStore`] persists per-entity watermarks
//! - [`reconcile`] decides whether a restriction change forces a resync
//! - [`classify`] maps every failure kind to exactly one outcome
//! - [`SyncPhase`] names the steps of one sync attempt
//!
//! The actual I/O (network, local contact database) is performed by
//! `sync-client`, which drives these decisions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod account;
pub mod anchor;
pub mod outcome;
pub mod restrictions;
pub mod state;

pub use account::{keys, AccountData, AccountStore, AccountStoreError, MemoryAccountStore};
pub use anchor::AnchorStore;
pub use outcome::{
    classify, Counter, Disposition, ErrorKind, RetryAdvice, RetryRequest, StoredResult,
    SyncCounters, SyncOutcome, SyncResultState,
};
pub use restrictions::{reconcile, Reconciliation, RestrictionNotice};
pub use state::{key_check_decision, KeyCheckFailure, KeyDecision, SyncOptions, SyncPhase};
