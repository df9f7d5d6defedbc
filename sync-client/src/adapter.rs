//! Sync orchestrator.
//!
//! [`SyncAdapter::perform_sync`] drives one attempt for one account through
//! the phases of [`SyncPhase`]:
//!
//! ```text
//! Init → RestrictionCheck → KeyReadyCheck → SaltVerify → GroupSyncDecision
//!      → ProtocolExchange → AnchorCommit → FlagCleanup → Done
//! ```
//!
//! Every failure is reduced to an [`ErrorKind`] and mapped by
//! [`classify`]; the attempt always ends in exactly one
//! [`SyncResultState`], which is also persisted for display.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sync_core::{
    classify, key_check_decision, reconcile, AccountData, AccountStore, AccountStoreError,
    AnchorStore, Counter, ErrorKind, KeyCheckFailure, SyncCounters, SyncOptions, SyncOutcome,
    SyncPhase,
};
use sync_types::{Account, EntityType, LocalId, Restrictions, SyncAnchor, SyncDirective};
use tokio_util::sync::CancellationToken;

use crate::collector::{Collector, ConflictReporter, DirtySet};
use crate::config::SyncConfig;
use crate::credentials::{CredentialError, KeyManager, TokenProvider};
use crate::crypto::RecordKey;
use crate::merge::MergeEngine;
use crate::notify::Notifier;
use crate::protocol::{ProtocolError, RoundOptions, RoundResponse, SyncProtocolClient};
use crate::retry::RetryPolicy;
use crate::store::{ContactStore, StoreError};
use crate::transport::Transport;

/// A failure that aborts the attempt.
#[derive(Debug)]
struct Failure {
    kind: ErrorKind,
    message: String,
}

impl From<ProtocolError> for Failure {
    fn from(e: ProtocolError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Self {
            kind: ErrorKind::Apply,
            message: e.to_string(),
        }
    }
}

impl From<AccountStoreError> for Failure {
    fn from(e: AccountStoreError) -> Self {
        Self {
            kind: ErrorKind::Apply,
            message: e.to_string(),
        }
    }
}

impl From<CredentialError> for Failure {
    fn from(e: CredentialError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Why preparing credentials failed.
#[derive(Debug)]
enum PrepareError {
    Key(KeyCheckFailure),
    Failed(Failure),
}

impl From<Failure> for PrepareError {
    fn from(failure: Failure) -> Self {
        PrepareError::Failed(failure)
    }
}

/// Runs sync attempts against one server.
///
/// Collaborators are shared handles, so the adapter can be driven from any
/// task. Attempts for the same account must not overlap.
pub struct SyncAdapter<T: Transport> {
    config: SyncConfig,
    protocol: SyncProtocolClient<T>,
    store: Arc<dyn ContactStore>,
    accounts: Arc<dyn AccountStore>,
    tokens: Arc<dyn TokenProvider>,
    keys: Arc<dyn KeyManager>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    clock: fn() -> u64,
}

impl<T: Transport> SyncAdapter<T> {
    /// Create an adapter.
    pub fn new(
        config: SyncConfig,
        transport: T,
        store: Arc<dyn ContactStore>,
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<dyn TokenProvider>,
        keys: Arc<dyn KeyManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let protocol = SyncProtocolClient::new(
            transport,
            config.server_address.clone(),
            config.request_timeout(),
        );
        Self {
            retry: RetryPolicy::default(),
            config,
            protocol,
            store,
            accounts,
            tokens,
            keys,
            notifier,
            clock: unix_now,
        }
    }

    /// Replace the wall clock (unix seconds).
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// The adapter's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one sync attempt.
    ///
    /// Never fails: every error ends the attempt with a result state. When
    /// `cancel` fires during the exchange, nothing from the round is
    /// committed.
    pub async fn perform_sync(
        &self,
        account: &Account,
        options: SyncOptions,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        tracing::info!(account = %account, full_sync = options.full_sync, "Sync started");

        let outcome = match self.run(account, options, cancel).await {
            Ok(outcome) => outcome,
            Err(failure) => self.fail(account, failure),
        };

        let data = AccountData::new(&*self.accounts, account);
        if let Err(e) = data.set_last_result(&outcome.to_stored((self.clock)())) {
            tracing::warn!(account = %account, error = %e, "Failed to store sync result");
        }

        if outcome.is_success() {
            tracing::info!(
                account = %account,
                resync = outcome.resync_requested,
                "Sync finished"
            );
        } else {
            tracing::warn!(
                account = %account,
                state = %outcome.state,
                message = outcome.message.as_deref().unwrap_or(""),
                "Sync failed"
            );
        }
        outcome
    }

    async fn run(
        &self,
        account: &Account,
        options: SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, Failure> {
        let data = AccountData::new(&*self.accounts, account);
        let anchor_store = AnchorStore::new(&*self.accounts);
        let now = (self.clock)();

        phase(account, SyncPhase::RestrictionCheck);
        let stored = data.restrictions()?;
        let request_restrictions = match (stored, data.restrictions_fetched_at()?) {
            (Some(_), Some(fetched_at)) => {
                now.saturating_sub(fetched_at) >= self.config.restriction_refresh().as_secs()
            }
            _ => true,
        };
        let mut restrictions = stored.unwrap_or_default();

        phase(account, SyncPhase::KeyReadyCheck);
        let prepared = self
            .retry
            .run(
                |attempt| self.prepare(account, cancel, attempt),
                |e| matches!(e, PrepareError::Failed(f) if f.kind == ErrorKind::Auth),
            )
            .await;
        let (token, key) = match prepared {
            Ok(ready) => ready,
            Err(PrepareError::Key(failure)) => return Ok(self.key_not_ready(account, failure)),
            Err(PrepareError::Failed(failure)) => return Err(failure),
        };

        phase(account, SyncPhase::GroupSyncDecision);
        let mut anchors = anchor_store.anchors(account)?;
        if options.full_sync {
            anchors = SyncAnchor::full_sync();
        }
        let full_sync = anchors.any_full_sync();
        let mut reporter = ConflictReporter::new();
        let dirty = Collector::new(&*self.store).collect(
            account,
            &restrictions,
            full_sync,
            &mut reporter,
        )?;
        reporter.flush(
            account,
            &*self.notifier,
            &data,
            now,
            self.config.notification_interval(),
        )?;
        for entity in EntityType::ALL {
            data.set_pending_new(entity, dirty.id_requests(entity))?;
        }
        let explicit_photo_save = data.explicit_photo_save()?;
        tracing::debug!(
            account = %account,
            full_sync,
            groups = dirty.groups.len(),
            contacts = dirty.contacts.len(),
            sync_contacts = dirty.sync_contacts,
            "Collected local changes"
        );

        phase(account, SyncPhase::ProtocolExchange);
        let round = RoundOptions {
            anchors,
            request_restrictions,
            explicit_photo_save,
        };
        let response = match self
            .protocol
            .sync(account, &token, &dirty, round, &key, cancel)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.kind() == ErrorKind::Auth {
                    self.tokens.invalidate(account, &token).await;
                }
                return Err(e.into());
            }
        };

        match response.directive {
            Some(SyncDirective::InvalidKey) => {
                tracing::warn!(account = %account, "Server rejected the record key");
                self.tokens.invalidate(account, &token).await;
                self.discard_key(account)?;
                self.force_full_resync(account)?;
                return Ok(SyncOutcome::success().with_resync());
            }
            Some(SyncDirective::ForceFullSync) => {
                tracing::info!(account = %account, "Server requested a full sync");
                self.force_full_resync(account)?;
                return Ok(SyncOutcome::success().with_resync());
            }
            None => {}
        }

        if let Some(new) = response.restrictions {
            let previous = data.restrictions()?;
            let reconciliation = reconcile(previous.as_ref(), &new);
            data.set_restrictions(&new, now)?;
            for notice in reconciliation.notices {
                self.notifier.restrictions_changed(account, notice);
            }
            if reconciliation.explicit_photo_save {
                data.set_explicit_photo_save(true)?;
            }
            if reconciliation.resync_required {
                tracing::info!(account = %account, "Restrictions changed; resyncing");
                self.force_full_resync(account)?;
                return Ok(SyncOutcome::success().with_resync());
            }
            restrictions = new;
        }

        let updated = self.merge(account, &dirty, &response, &restrictions, &key)?;

        phase(account, SyncPhase::AnchorCommit);
        let update = if dirty.sync_contacts {
            response.anchors
        } else {
            response.anchors.without(EntityType::Contact)
        };
        anchor_store.commit(account, &update)?;

        phase(account, SyncPhase::FlagCleanup);
        let merge = MergeEngine::new(&*self.store);
        for (entity, updated) in updated {
            merge.clear_sync_flags(
                account,
                entity,
                dirty.records(entity),
                response.id_map(entity),
                &updated,
            )?;
        }
        data.clear_pending_new()?;
        if explicit_photo_save && dirty.sync_contacts {
            data.set_explicit_photo_save(false)?;
        }

        phase(account, SyncPhase::Done);
        let outcome = SyncOutcome::success();
        if dirty.sync_contacts {
            Ok(outcome)
        } else {
            tracing::debug!(account = %account, "Contacts deferred until groups have ids");
            Ok(outcome.with_resync())
        }
    }

    /// Get a token and a ready key, and make sure the salt is on the server.
    /// A rejected token is invalidated before the error is returned, so a
    /// retry starts with a fresh one.
    async fn prepare(
        &self,
        account: &Account,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<(String, RecordKey), PrepareError> {
        let token = self
            .tokens
            .acquire(account)
            .await
            .map_err(Failure::from)?;

        let key = self
            .keys
            .check(account, &token)
            .await
            .map_err(PrepareError::Key)?;
        self.notifier.missing_key_cleared(account);

        phase(account, SyncPhase::SaltVerify);
        let data = AccountData::new(&*self.accounts, account);
        if !data.salt_saved().map_err(Failure::from)? {
            if let Some(salt) = self.keys.salt(account) {
                if let Err(e) = self.protocol.save_salt(account, &token, &salt, cancel).await {
                    if e.kind() == ErrorKind::Auth {
                        tracing::debug!(account = %account, attempt, "Token rejected; refreshing");
                        self.tokens.invalidate(account, &token).await;
                    }
                    return Err(Failure::from(e).into());
                }
                data.set_salt_saved(true).map_err(Failure::from)?;
            }
        }

        Ok((token, key))
    }

    fn merge(
        &self,
        account: &Account,
        dirty: &DirtySet,
        response: &RoundResponse,
        restrictions: &Restrictions,
        key: &RecordKey,
    ) -> Result<Vec<(EntityType, Vec<LocalId>)>, Failure> {
        let mut opened = Vec::with_capacity(2);
        for entity in EntityType::ALL {
            if entity == EntityType::Contact && !dirty.sync_contacts {
                continue;
            }
            opened.push((entity, response.open_deltas(entity, key)?));
        }

        let merge = MergeEngine::new(&*self.store);
        let mut updated = Vec::with_capacity(opened.len());
        for (entity, deltas) in opened {
            merge.save_ids(account, entity, response.id_map(entity))?;
            let ids = merge.apply(
                account,
                entity,
                &deltas,
                restrictions,
                dirty.records(entity),
            )?;
            updated.push((entity, ids));
        }
        Ok(updated)
    }

    fn key_not_ready(&self, account: &Account, failure: KeyCheckFailure) -> SyncOutcome {
        let decision = key_check_decision(failure);
        if decision.notify_missing_key {
            self.notifier.missing_key_shown(account);
        }
        let mut outcome = SyncOutcome::failed(decision.state, failure.to_string());
        match failure {
            KeyCheckFailure::AuthFailed => outcome.counters.bump(Counter::Auth),
            KeyCheckFailure::CheckFailed | KeyCheckFailure::NetworkError => {
                outcome.counters.bump(Counter::Io)
            }
            KeyCheckFailure::MissingKey => {}
        }
        match decision.retry {
            Some(advice) => {
                outcome.with_retry(self.config.key_check_retry_delay(), advice.full_sync)
            }
            None => outcome,
        }
    }

    fn fail(&self, account: &Account, failure: Failure) -> SyncOutcome {
        let disposition = classify(failure.kind);
        tracing::debug!(
            account = %account,
            kind = %failure.kind,
            state = %disposition.state,
            "Mapped failure"
        );

        let mut counters = SyncCounters::default();
        if let Some(counter) = disposition.counter {
            counters.bump(counter);
        }
        let mut outcome = SyncOutcome {
            counters,
            ..SyncOutcome::failed(disposition.state, failure.message)
        };
        if let Some(advice) = disposition.retry {
            outcome = outcome.with_retry(self.config.network_retry_delay(), advice.full_sync);
        }
        if disposition.reset_key {
            let reset = self
                .discard_key(account)
                .and_then(|()| self.force_full_resync(account));
            match reset {
                Ok(()) => outcome = outcome.with_resync(),
                Err(e) => {
                    tracing::error!(account = %account, error = %e.message, "Failed to reset key state")
                }
            }
        }
        outcome
    }

    fn discard_key(&self, account: &Account) -> Result<(), Failure> {
        self.keys.clear(account);
        AccountData::new(&*self.accounts, account).set_salt_saved(false)?;
        Ok(())
    }

    /// Mark every record dirty and reset both anchors to the sentinel.
    fn force_full_resync(&self, account: &Account) -> Result<(), Failure> {
        let marked = self.store.mark_all_dirty(account)?;
        AnchorStore::new(&*self.accounts).request_full_sync(account)?;
        AccountData::new(&*self.accounts, account).clear_pending_new()?;
        tracing::debug!(account = %account, marked, "Full resync scheduled");
        Ok(())
    }
}

fn phase(account: &Account, phase: SyncPhase) {
    tracing::debug!(account = %account, %phase, "Entering phase");
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
