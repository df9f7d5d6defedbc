//! Credential tokens and encryption key readiness.
//!
//! [`TokenProvider`] hands out auth tokens and takes back rejected ones.
//! [`KeyManager`] owns the account's record key and the salt it was derived
//! from. Both are platform services; the `Static`/`Passphrase`
//! implementations here keep everything in memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sync_core::{ErrorKind, KeyCheckFailure};
use sync_types::Account;
use thiserror::Error;

use crate::crypto::{AccountSecret, Argon2Params, CryptoError, RecordKey, Salt};

/// Credential errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No token can be issued for the account.
    #[error("no credentials for {0}")]
    NoCredentials(String),

    /// The credential service could not be reached.
    #[error("credential service unavailable: {0}")]
    Unavailable(String),

    /// Key derivation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl CredentialError {
    /// How a failed token acquisition ends an attempt.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CredentialError::NoCredentials(_) | CredentialError::Crypto(_) => ErrorKind::Auth,
            CredentialError::Unavailable(_) => ErrorKind::Network,
        }
    }
}

/// Issues auth tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a token for the account. May return a cached one.
    async fn acquire(&self, account: &Account) -> Result<String, CredentialError>;

    /// Report a token as rejected so the next `acquire` returns a fresh one.
    async fn invalidate(&self, account: &Account, token: &str);
}

/// Manages the account's record key.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Verify the key is ready and return it.
    async fn check(&self, account: &Account, token: &str) -> Result<RecordKey, KeyCheckFailure>;

    /// The salt the key was derived from.
    fn salt(&self, account: &Account) -> Option<Salt>;

    /// Discard key material.
    fn clear(&self, account: &Account);
}

#[derive(Debug, Default)]
struct TokenState {
    generation: HashMap<Account, u32>,
    invalidated: Vec<String>,
    unavailable: bool,
}

/// Token provider that derives tokens from a fixed base string.
///
/// Each invalidation bumps a generation counter, so the next token differs
/// from the rejected one. Clones share state.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    base: String,
    state: Arc<Mutex<TokenState>>,
}

impl StaticTokenProvider {
    /// Create a provider issuing tokens based on `base`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tokens reported as rejected, oldest first.
    pub fn invalidated(&self) -> Vec<String> {
        self.lock().invalidated.clone()
    }

    /// Make `acquire` fail as if the credential service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire(&self, account: &Account) -> Result<String, CredentialError> {
        let state = self.lock();
        if state.unavailable {
            return Err(CredentialError::Unavailable(
                "token service offline".to_string(),
            ));
        }
        let generation = state.generation.get(account).copied().unwrap_or(0);
        Ok(format!("{}.{}", self.base, generation))
    }

    async fn invalidate(&self, account: &Account, token: &str) {
        let mut state = self.lock();
        *state.generation.entry(account.clone()).or_insert(0) += 1;
        state.invalidated.push(token.to_string());
        tracing::debug!(account = %account, "Token invalidated");
    }
}

#[derive(Default)]
struct KeyState {
    keys: HashMap<Account, (Salt, RecordKey)>,
    scripted: Vec<KeyCheckFailure>,
}

/// Key manager holding keys derived from user passphrases.
///
/// Failures can be scripted with [`PassphraseKeyManager::fail_next_check`].
/// Clones share state.
#[derive(Clone, Default)]
pub struct PassphraseKeyManager {
    state: Arc<Mutex<KeyState>>,
}

impl PassphraseKeyManager {
    /// Create an empty key manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, KeyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Derive and install the account key from a passphrase.
    pub fn unlock(
        &self,
        account: &Account,
        passphrase: &str,
        salt: Salt,
        params: Argon2Params,
    ) -> Result<String, CredentialError> {
        let secret = AccountSecret::from_passphrase_with_params(passphrase, &salt, params)?;
        let key = RecordKey::derive(&secret)?;
        Ok(self.install(account, salt, key))
    }

    /// Install an already derived key. Returns its fingerprint.
    pub fn install(&self, account: &Account, salt: Salt, key: RecordKey) -> String {
        let fingerprint = key.fingerprint();
        self.lock().keys.insert(account.clone(), (salt, key));
        fingerprint
    }

    /// Whether a key is installed for the account.
    pub fn has_key(&self, account: &Account) -> bool {
        self.lock().keys.contains_key(account)
    }

    /// Make the next `check` fail. Scripted failures fire in order.
    pub fn fail_next_check(&self, failure: KeyCheckFailure) {
        self.lock().scripted.push(failure);
    }
}

impl std::fmt::Debug for PassphraseKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PassphraseKeyManager")
            .field("accounts", &state.keys.len())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl KeyManager for PassphraseKeyManager {
    async fn check(&self, account: &Account, _token: &str) -> Result<RecordKey, KeyCheckFailure> {
        let mut state = self.lock();
        if !state.scripted.is_empty() {
            return Err(state.scripted.remove(0));
        }
        state
            .keys
            .get(account)
            .map(|(_, key)| key.clone())
            .ok_or(KeyCheckFailure::MissingKey)
    }

    fn salt(&self, account: &Account) -> Option<Salt> {
        self.lock().keys.get(account).map(|(salt, _)| salt.clone())
    }

    fn clear(&self, account: &Account) {
        self.lock().keys.remove(account);
        tracing::info!(account = %account, "Key material cleared");
    }
}
