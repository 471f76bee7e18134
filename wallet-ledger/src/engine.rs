//! Main ledger orchestration layer
//!
//! Ties together the wallet store, transaction log, and cache collaborator
//! into the deposit/withdraw/transfer/batch API. Every operation runs as an
//! independent unit of work; correctness under concurrent writers comes
//! from revision-gated wallet writes with bounded retry, and balance
//! mutations commit atomically with the transaction's terminal status.
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use wallet_ledger::{Config, LedgerEngine, TenantId, UserId};
//!
//! fn main() -> wallet_ledger::Result<()> {
//!     let engine = LedgerEngine::open(Config::default())?;
//!
//!     let tenant = TenantId::new("marketplace-1");
//!     engine.create_wallet(&tenant, &UserId::new("alice"))?;
//!     engine.deposit(
//!         &tenant,
//!         &UserId::new("alice"),
//!         Decimal::from(100),
//!         "card",
//!         Default::default(),
//!     )?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    cache::{Cache, MemoryCache},
    config::EngineConfig,
    metrics::Metrics,
    types::{
        TenantId, Transaction, TransactionKind, TransferRequest, UserId, Wallet, WalletRef,
        WalletStatus,
    },
    Config, Error, Result, Storage,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Wallet ledger engine
pub struct LedgerEngine {
    /// Wallet and transaction log stores
    storage: Arc<Storage>,

    /// Cache collaborator (best-effort, never a source of truth)
    cache: Arc<dyn Cache>,

    /// Metrics collector
    metrics: Metrics,

    /// Engine tuning
    config: EngineConfig,
}

impl LedgerEngine {
    /// Construct the engine with explicit collaborators
    pub fn new(storage: Arc<Storage>, cache: Arc<dyn Cache>, config: &Config) -> Result<Self> {
        Ok(Self {
            storage,
            cache,
            metrics: Metrics::new()?,
            config: config.engine.clone(),
        })
    }

    /// Open storage from configuration with the in-process cache
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let cache = Arc::new(MemoryCache::from_config(&config.cache));
        Self::new(storage, cache, &config)
    }

    /// Direct storage access (read paths of collaborators)
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// Cache collaborator handle
    pub fn cache(&self) -> Arc<dyn Cache> {
        self.cache.clone()
    }

    /// Metrics collector (for scraping)
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // Wallet lifecycle

    /// Create a wallet with zero balance and active status
    ///
    /// Fails with `AlreadyExists` if the user already has a wallet in this
    /// tenant; uniqueness is enforced by the store's user index.
    pub fn create_wallet(&self, tenant: &TenantId, user: &UserId) -> Result<Wallet> {
        let wallet = Wallet::new(tenant.clone(), user.clone());
        self.storage.create_wallet(&wallet)?;
        self.metrics.wallets_created_total.inc();

        tracing::info!(
            wallet_id = %wallet.id,
            tenant_id = %tenant,
            user_id = %user,
            "Wallet created"
        );

        Ok(wallet)
    }

    /// Look up a user's wallet, cache first
    ///
    /// On a miss the store is read and the cache populated under the
    /// wallet's tag. Cache failures are logged and swallowed.
    pub fn get_wallet(&self, tenant: &TenantId, user: &UserId) -> Result<Wallet> {
        lookup_wallet_cached(
            &self.storage,
            self.cache.as_ref(),
            Some(&self.metrics),
            tenant,
            user,
        )?
        .ok_or_else(|| Error::WalletNotFound(user.to_string()))
    }

    /// Change a wallet's status (freeze, unfreeze, close)
    ///
    /// Closed wallets are never reopened; wallets are closed, not deleted.
    pub fn set_wallet_status(
        &self,
        tenant: &TenantId,
        user: &UserId,
        status: WalletStatus,
    ) -> Result<Wallet> {
        let mut wallet = self.require_wallet(tenant, user)?;

        for attempt in 0.. {
            if wallet.status == WalletStatus::Closed {
                return Err(Error::WalletNotActive {
                    user: user.to_string(),
                    status: wallet.status.to_string(),
                });
            }

            let mut next = wallet.clone();
            next.status = status;
            next.last_updated = Utc::now().max(wallet.last_updated);

            match self.storage.replace_wallet(&next, wallet.revision) {
                Ok(stored) => {
                    self.invalidate_wallet(tenant, user);
                    tracing::info!(
                        wallet_id = %stored.id,
                        tenant_id = %tenant,
                        user_id = %user,
                        status = %status,
                        "Wallet status changed"
                    );
                    return Ok(stored);
                }
                Err(Error::RevisionConflict { .. }) if attempt < self.config.max_write_retries => {
                    wallet = self.require_wallet(tenant, user)?;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop always returns")
    }

    // Value movement

    /// Deposit funds into a user's wallet
    ///
    /// `channel` names the funding source kind (card, payout, refund);
    /// it is recorded on the transaction, not interpreted.
    pub fn deposit(
        &self,
        tenant: &TenantId,
        user: &UserId,
        amount: Decimal,
        channel: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<Transaction> {
        let _timer = self.metrics.operation_duration.start_timer();
        validate_amount(amount)?;

        let wallet = self.active_wallet(tenant, user)?;

        let tx = Transaction::pending(
            tenant.clone(),
            TransactionKind::Deposit {
                to: WalletRef::of(&wallet),
                channel: channel.to_string(),
            },
            amount,
            metadata,
        );
        self.storage.create_transaction(&tx)?;

        let result = self.apply_single(tenant, user, wallet, &tx, |w| {
            Ok(w.credited(amount, Utc::now()))
        });
        self.settle(tenant, &tx, result, &[user])
    }

    /// Withdraw funds from a user's wallet
    pub fn withdraw(
        &self,
        tenant: &TenantId,
        user: &UserId,
        amount: Decimal,
        metadata: HashMap<String, Value>,
    ) -> Result<Transaction> {
        let _timer = self.metrics.operation_duration.start_timer();
        validate_amount(amount)?;

        let wallet = self.active_wallet(tenant, user)?;
        // Pre-check so an obviously uncovered withdrawal writes no record
        if wallet.balance < amount {
            return Err(Error::InsufficientFunds {
                available: wallet.balance,
                requested: amount,
            });
        }

        let tx = Transaction::pending(
            tenant.clone(),
            TransactionKind::Withdrawal {
                from: WalletRef::of(&wallet),
            },
            amount,
            metadata,
        );
        self.storage.create_transaction(&tx)?;

        let result = self.apply_single(tenant, user, wallet, &tx, |w| {
            w.debited(amount, Utc::now())
        });
        self.settle(tenant, &tx, result, &[user])
    }

    /// Transfer funds between two wallets in the same tenant
    ///
    /// The debit, the credit, and the transaction's terminal status commit
    /// as one atomic batch; a revision conflict retries the whole
    /// read-check-commit cycle.
    pub fn transfer(
        &self,
        tenant: &TenantId,
        from_user: &UserId,
        to_user: &UserId,
        amount: Decimal,
        metadata: HashMap<String, Value>,
    ) -> Result<Transaction> {
        let _timer = self.metrics.operation_duration.start_timer();
        validate_amount(amount)?;
        if from_user == to_user {
            return Err(Error::SameWallet(from_user.to_string()));
        }

        let from_wallet = self.active_wallet(tenant, from_user)?;
        let to_wallet = self.active_wallet(tenant, to_user)?;

        if from_wallet.balance < amount {
            return Err(Error::InsufficientFunds {
                available: from_wallet.balance,
                requested: amount,
            });
        }

        let tx = Transaction::pending(
            tenant.clone(),
            TransactionKind::Transfer {
                from: WalletRef::of(&from_wallet),
                to: WalletRef::of(&to_wallet),
            },
            amount,
            metadata,
        );
        self.storage.create_transaction(&tx)?;

        let result = self.apply_transfer(tenant, &tx, from_wallet, to_wallet, amount);
        self.settle(tenant, &tx, result, &[from_user, to_user])
    }

    /// Process a batch of transfers
    ///
    /// Per-source outgoing sums are pre-checked against current balances
    /// and the whole batch is rejected before any mutation if a source
    /// cannot cover its total. The pre-check is not a reservation: each
    /// transfer then executes independently through the single-transfer
    /// path, and a late failure does not roll back earlier transfers.
    pub fn process_batch(
        &self,
        tenant: &TenantId,
        requests: &[TransferRequest],
    ) -> Result<Vec<Transaction>> {
        // Resolve the distinct set of wallets touched by the batch
        let mut wallets: HashMap<UserId, Wallet> = HashMap::new();
        for request in requests {
            for user in [&request.from_user, &request.to_user] {
                if !wallets.contains_key(user) {
                    wallets.insert(user.clone(), self.require_wallet(tenant, user)?);
                }
            }
        }

        // Per-source funds pre-check
        let mut outgoing: HashMap<&UserId, Decimal> = HashMap::new();
        for request in requests {
            *outgoing.entry(&request.from_user).or_insert(Decimal::ZERO) += request.amount;
        }
        for (user, total) in &outgoing {
            let wallet = &wallets[*user];
            if wallet.balance < *total {
                return Err(Error::InsufficientFunds {
                    available: wallet.balance,
                    requested: *total,
                });
            }
        }

        let mut transactions = Vec::with_capacity(requests.len());
        for request in requests {
            transactions.push(self.transfer(
                tenant,
                &request.from_user,
                &request.to_user,
                request.amount,
                request.metadata.clone(),
            )?);
        }

        Ok(transactions)
    }

    // Queries

    /// Transactions where the user appears as source or destination,
    /// newest first
    pub fn transaction_history(
        &self,
        tenant: &TenantId,
        user: &UserId,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        self.storage.transaction_history(
            tenant,
            user,
            limit.unwrap_or(self.config.default_history_limit),
        )
    }

    // Reconciliation

    /// Fail pending transactions older than `max_age`
    ///
    /// A pending record whose originating call has long returned indicates
    /// a crash between record creation and commit. Balance mutations commit
    /// atomically with the terminal status, so such a record implies no
    /// balances moved and failing it is the safe compensation.
    pub fn reconcile_pending(
        &self,
        tenant: &TenantId,
        max_age: chrono::Duration,
    ) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let stale = self.storage.pending_older_than(tenant, cutoff)?;
        let mut reconciled = 0;

        for mut tx in stale {
            // A stale index entry can point at a record that settled since
            // the scan; leave those alone and keep sweeping.
            if tx.status.is_terminal() {
                tracing::debug!(
                    tx_id = %tx.id,
                    tenant_id = %tenant,
                    status = %tx.status,
                    "Pending index entry already settled, skipping"
                );
                continue;
            }

            tracing::warn!(
                tx_id = %tx.id,
                tenant_id = %tenant,
                kind = tx.kind.label(),
                created_at = %tx.timestamp,
                "Failing orphaned pending transaction"
            );

            tx.fail("reconciled: pending past deadline, balances not applied")?;
            match self.storage.replace_transaction(&tx) {
                Ok(()) => {
                    self.metrics.transactions_failed_total.inc();
                    reconciled += 1;
                }
                Err(Error::InvalidTransition { .. }) => {
                    tracing::debug!(
                        tx_id = %tx.id,
                        tenant_id = %tenant,
                        "Transaction settled during the sweep, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(reconciled)
    }

    // Internal helpers

    /// Fresh store read, bypassing the cache (mutations need the current
    /// revision)
    fn require_wallet(&self, tenant: &TenantId, user: &UserId) -> Result<Wallet> {
        self.storage
            .find_wallet_by_user(tenant, user)?
            .ok_or_else(|| Error::WalletNotFound(user.to_string()))
    }

    fn active_wallet(&self, tenant: &TenantId, user: &UserId) -> Result<Wallet> {
        let wallet = self.require_wallet(tenant, user)?;
        if !wallet.is_active() {
            return Err(Error::WalletNotActive {
                user: user.to_string(),
                status: wallet.status.to_string(),
            });
        }
        Ok(wallet)
    }

    /// Commit a single-wallet mutation with bounded CAS retry
    fn apply_single(
        &self,
        tenant: &TenantId,
        user: &UserId,
        mut wallet: Wallet,
        tx: &Transaction,
        mutate: impl Fn(&Wallet) -> Result<Wallet>,
    ) -> Result<Transaction> {
        for attempt in 0.. {
            let updated = mutate(&wallet)?;
            let mut done = tx.clone();
            done.complete()?;

            match self
                .storage
                .commit_transaction(&done, &[(updated, wallet.revision)])
            {
                Ok(()) => return Ok(done),
                Err(Error::RevisionConflict { .. }) if attempt < self.config.max_write_retries => {
                    tracing::debug!(
                        tx_id = %tx.id,
                        attempt,
                        "Revision conflict, retrying with re-read wallet"
                    );
                    wallet = self.active_wallet(tenant, user)?;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop always returns")
    }

    /// Commit a two-wallet transfer with bounded CAS retry
    fn apply_transfer(
        &self,
        tenant: &TenantId,
        tx: &Transaction,
        mut from_wallet: Wallet,
        mut to_wallet: Wallet,
        amount: Decimal,
    ) -> Result<Transaction> {
        let from_user = from_wallet.user_id.clone();
        let to_user = to_wallet.user_id.clone();

        for attempt in 0.. {
            let now = Utc::now();
            let debited = from_wallet.debited(amount, now)?;
            let credited = to_wallet.credited(amount, now);
            let mut done = tx.clone();
            done.complete()?;

            match self.storage.commit_transaction(
                &done,
                &[
                    (debited, from_wallet.revision),
                    (credited, to_wallet.revision),
                ],
            ) {
                Ok(()) => return Ok(done),
                Err(Error::RevisionConflict { .. }) if attempt < self.config.max_write_retries => {
                    tracing::debug!(
                        tx_id = %tx.id,
                        attempt,
                        "Revision conflict, retrying with re-read wallets"
                    );
                    from_wallet = self.active_wallet(tenant, &from_user)?;
                    to_wallet = self.active_wallet(tenant, &to_user)?;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop always returns")
    }

    /// Record the outcome of the mutation phase
    ///
    /// On success, invalidates the affected users' cache tags and bumps
    /// metrics. On failure, drives the transaction to `Failed` with error
    /// details and re-raises; the caller retries the whole logical
    /// operation if it wants to (a retry gets a new transaction id).
    fn settle(
        &self,
        tenant: &TenantId,
        tx: &Transaction,
        result: Result<Transaction>,
        users: &[&UserId],
    ) -> Result<Transaction> {
        match result {
            Ok(done) => {
                for user in users {
                    self.invalidate_wallet(tenant, user);
                }
                self.metrics
                    .transactions_total
                    .with_label_values(&[done.kind.label()])
                    .inc();

                tracing::info!(
                    tx_id = %done.id,
                    tenant_id = %tenant,
                    kind = done.kind.label(),
                    amount = %done.amount,
                    "Transaction completed"
                );

                Ok(done)
            }
            Err(e) => {
                tracing::error!(
                    tx_id = %tx.id,
                    tenant_id = %tenant,
                    kind = tx.kind.label(),
                    error = %e,
                    "Transaction failed during mutation phase"
                );

                let mut failed = tx.clone();
                if failed.fail(e.to_string()).is_ok() {
                    if let Err(mark_err) = self.storage.replace_transaction(&failed) {
                        tracing::error!(
                            tx_id = %tx.id,
                            error = %mark_err,
                            "Could not record failed status; reconciler will pick it up"
                        );
                    }
                }
                self.metrics.transactions_failed_total.inc();

                Err(e)
            }
        }
    }

    /// Best-effort cache eviction for a user's wallet entries
    fn invalidate_wallet(&self, tenant: &TenantId, user: &UserId) {
        if let Err(e) = self.cache.invalidate_tag(&wallet_tag(tenant, user)) {
            tracing::warn!(
                tenant_id = %tenant,
                user_id = %user,
                error = %e,
                "Cache invalidation failed"
            );
        }
    }
}

impl std::fmt::Debug for LedgerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEngine").finish_non_exhaustive()
    }
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(())
}

/// Cache key for a user's wallet
pub(crate) fn wallet_cache_key(user: &UserId) -> String {
    format!("wallet:{}", user)
}

/// Invalidation tag covering a user's wallet entries
pub(crate) fn wallet_tag(tenant: &TenantId, user: &UserId) -> String {
    format!("wallet:{}:{}", tenant, user)
}

/// Read-through wallet lookup shared by the engine and the query facade
///
/// Cache failures never block the read: they are logged and the store is
/// consulted directly.
pub(crate) fn lookup_wallet_cached(
    storage: &Storage,
    cache: &dyn Cache,
    metrics: Option<&Metrics>,
    tenant: &TenantId,
    user: &UserId,
) -> Result<Option<Wallet>> {
    let key = wallet_cache_key(user);

    match cache.get(&key, tenant) {
        Ok(Some(bytes)) => match bincode::deserialize::<Wallet>(&bytes) {
            Ok(wallet) => {
                if let Some(m) = metrics {
                    m.cache_hits_total.inc();
                }
                return Ok(Some(wallet));
            }
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "Corrupt cache entry, re-reading store");
            }
        },
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(user_id = %user, error = %e, "Cache read failed");
        }
    }

    if let Some(m) = metrics {
        m.cache_misses_total.inc();
    }

    let wallet = match storage.find_wallet_by_user(tenant, user)? {
        Some(wallet) => wallet,
        None => return Ok(None),
    };

    match bincode::serialize(&wallet) {
        Ok(bytes) => {
            if let Err(e) = cache.set(&key, bytes, &[wallet_tag(tenant, user)], tenant) {
                tracing::warn!(user_id = %user, error = %e, "Cache write failed");
            }
        }
        Err(e) => {
            tracing::warn!(user_id = %user, error = %e, "Cache serialization failed");
        }
    }

    Ok(Some(wallet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, CacheResult};
    use crate::types::TransactionStatus;
    use tempfile::TempDir;

    fn create_test_engine() -> (LedgerEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (LedgerEngine::open(config).unwrap(), temp_dir)
    }

    fn tenant() -> TenantId {
        TenantId::new("marketplace-1")
    }

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn fund(engine: &LedgerEngine, who: &str, amount: i64) -> Wallet {
        let wallet = engine.create_wallet(&tenant(), &user(who)).unwrap();
        if amount > 0 {
            engine
                .deposit(&tenant(), &user(who), dec(amount), "card", HashMap::new())
                .unwrap();
        }
        wallet
    }

    #[test]
    fn test_create_wallet_unique_per_user() {
        let (engine, _temp) = create_test_engine();

        let wallet = engine.create_wallet(&tenant(), &user("alice")).unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert!(wallet.is_active());

        let again = engine.create_wallet(&tenant(), &user("alice"));
        assert!(matches!(again, Err(Error::AlreadyExists(_))));

        // Same user in another tenant is fine
        engine
            .create_wallet(&TenantId::new("marketplace-2"), &user("alice"))
            .unwrap();
    }

    #[test]
    fn test_deposit_rejects_non_positive_amounts() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 0);

        for amount in [dec(0), dec(-5)] {
            let result = engine.deposit(&tenant(), &user("alice"), amount, "card", HashMap::new());
            assert!(matches!(result, Err(Error::InvalidAmount(_))));
        }

        // No transaction record was created
        let history = engine
            .transaction_history(&tenant(), &user("alice"), None)
            .unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_deposit_missing_wallet() {
        let (engine, _temp) = create_test_engine();
        let result = engine.deposit(&tenant(), &user("ghost"), dec(10), "card", HashMap::new());
        assert!(matches!(result, Err(Error::WalletNotFound(_))));
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 100);

        let tx = engine
            .withdraw(&tenant(), &user("alice"), dec(40), HashMap::new())
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.kind.label(), "withdrawal");

        let wallet = engine.get_wallet(&tenant(), &user("alice")).unwrap();
        assert_eq!(wallet.balance, dec(60));

        // Uncovered withdrawal is rejected before any record is written
        let too_much = engine.withdraw(&tenant(), &user("alice"), dec(1000), HashMap::new());
        assert!(matches!(too_much, Err(Error::InsufficientFunds { .. })));
        let wallet = engine.get_wallet(&tenant(), &user("alice")).unwrap();
        assert_eq!(wallet.balance, dec(60));
    }

    #[test]
    fn test_transfer_conservation() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 1000);
        fund(&engine, "bob", 250);

        let before_a = engine.get_wallet(&tenant(), &user("alice")).unwrap().balance;
        let before_b = engine.get_wallet(&tenant(), &user("bob")).unwrap().balance;

        let tx = engine
            .transfer(&tenant(), &user("alice"), &user("bob"), dec(300), HashMap::new())
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);

        let after_a = engine.get_wallet(&tenant(), &user("alice")).unwrap().balance;
        let after_b = engine.get_wallet(&tenant(), &user("bob")).unwrap().balance;

        assert_eq!(before_a - dec(300), after_a);
        assert_eq!(before_b + dec(300), after_b);
        assert_eq!(before_a + before_b, after_a + after_b);
    }

    #[test]
    fn test_transfer_to_self_rejected() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 100);

        let result = engine.transfer(
            &tenant(),
            &user("alice"),
            &user("alice"),
            dec(10),
            HashMap::new(),
        );
        assert!(matches!(result, Err(Error::SameWallet(_))));
    }

    #[test]
    fn test_transfer_insufficient_funds_leaves_balances_unchanged() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 500);
        fund(&engine, "bob", 0);

        let result = engine.transfer(
            &tenant(),
            &user("alice"),
            &user("bob"),
            dec(1000),
            HashMap::new(),
        );
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));

        assert_eq!(
            engine.get_wallet(&tenant(), &user("alice")).unwrap().balance,
            dec(500)
        );
        assert_eq!(
            engine.get_wallet(&tenant(), &user("bob")).unwrap().balance,
            dec(0)
        );
    }

    #[test]
    fn test_frozen_wallet_rejects_movement() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 100);
        fund(&engine, "bob", 100);

        engine
            .set_wallet_status(&tenant(), &user("bob"), WalletStatus::Frozen)
            .unwrap();

        let deposit = engine.deposit(&tenant(), &user("bob"), dec(10), "card", HashMap::new());
        assert!(matches!(deposit, Err(Error::WalletNotActive { .. })));

        let transfer = engine.transfer(
            &tenant(),
            &user("alice"),
            &user("bob"),
            dec(10),
            HashMap::new(),
        );
        assert!(matches!(transfer, Err(Error::WalletNotActive { .. })));

        // Unfreeze restores movement; closed stays closed
        engine
            .set_wallet_status(&tenant(), &user("bob"), WalletStatus::Active)
            .unwrap();
        engine
            .deposit(&tenant(), &user("bob"), dec(10), "card", HashMap::new())
            .unwrap();

        engine
            .set_wallet_status(&tenant(), &user("bob"), WalletStatus::Closed)
            .unwrap();
        let reopen = engine.set_wallet_status(&tenant(), &user("bob"), WalletStatus::Active);
        assert!(matches!(reopen, Err(Error::WalletNotActive { .. })));
    }

    #[test]
    fn test_batch_precheck_rejects_whole_batch() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 100);
        fund(&engine, "bob", 0);
        fund(&engine, "carol", 0);

        // Each transfer is covered alone, but not together
        let requests = vec![
            TransferRequest {
                from_user: user("alice"),
                to_user: user("bob"),
                amount: dec(70),
                metadata: HashMap::new(),
            },
            TransferRequest {
                from_user: user("alice"),
                to_user: user("carol"),
                amount: dec(60),
                metadata: HashMap::new(),
            },
        ];

        let result = engine.process_batch(&tenant(), &requests);
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));

        // Nothing moved, nothing recorded
        assert_eq!(
            engine.get_wallet(&tenant(), &user("alice")).unwrap().balance,
            dec(100)
        );
        assert_eq!(
            engine.get_wallet(&tenant(), &user("bob")).unwrap().balance,
            dec(0)
        );
        let history = engine
            .transaction_history(&tenant(), &user("bob"), None)
            .unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_batch_executes_all_transfers() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 100);
        fund(&engine, "bob", 50);
        fund(&engine, "carol", 0);

        let requests = vec![
            TransferRequest {
                from_user: user("alice"),
                to_user: user("carol"),
                amount: dec(30),
                metadata: HashMap::new(),
            },
            TransferRequest {
                from_user: user("bob"),
                to_user: user("carol"),
                amount: dec(20),
                metadata: HashMap::new(),
            },
        ];

        let txs = engine.process_batch(&tenant(), &requests).unwrap();
        assert_eq!(txs.len(), 2);
        assert!(txs.iter().all(|t| t.status == TransactionStatus::Completed));

        assert_eq!(
            engine.get_wallet(&tenant(), &user("carol")).unwrap().balance,
            dec(50)
        );
    }

    #[test]
    fn test_batch_missing_wallet_rejected_upfront() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 100);

        let requests = vec![TransferRequest {
            from_user: user("alice"),
            to_user: user("ghost"),
            amount: dec(10),
            metadata: HashMap::new(),
        }];

        let result = engine.process_batch(&tenant(), &requests);
        assert!(matches!(result, Err(Error::WalletNotFound(_))));
        assert_eq!(
            engine.get_wallet(&tenant(), &user("alice")).unwrap().balance,
            dec(100)
        );
    }

    #[test]
    fn test_end_to_end_scenario() {
        let (engine, _temp) = create_test_engine();

        // Wallet A starts at 1000, B at 0
        fund(&engine, "a", 1000);
        fund(&engine, "b", 0);

        // Deposit 0 is rejected, balance unchanged
        let rejected = engine.deposit(&tenant(), &user("a"), dec(0), "card", HashMap::new());
        assert!(matches!(rejected, Err(Error::InvalidAmount(_))));
        assert_eq!(
            engine.get_wallet(&tenant(), &user("a")).unwrap().balance,
            dec(1000)
        );

        // Transfer 500 from A to B
        let tx = engine
            .transfer(&tenant(), &user("a"), &user("b"), dec(500), HashMap::new())
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(
            engine.get_wallet(&tenant(), &user("a")).unwrap().balance,
            dec(500)
        );
        assert_eq!(
            engine.get_wallet(&tenant(), &user("b")).unwrap().balance,
            dec(500)
        );

        // History for A: the funding deposit plus exactly one transfer
        let history = engine
            .transaction_history(&tenant(), &user("a"), None)
            .unwrap();
        let transfers: Vec<_> = history
            .iter()
            .filter(|t| matches!(t.kind, TransactionKind::Transfer { .. }))
            .collect();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].id, tx.id);
    }

    #[test]
    fn test_history_newest_first_and_limited() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 0);

        let mut last_id = None;
        for i in 1..=4 {
            let tx = engine
                .deposit(&tenant(), &user("alice"), dec(i), "card", HashMap::new())
                .unwrap();
            last_id = Some(tx.id);
            // Millisecond timestamp resolution in the history index
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let history = engine
            .transaction_history(&tenant(), &user("alice"), Some(2))
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, last_id.unwrap());
    }

    #[test]
    fn test_cache_reflects_post_mutation_balance() {
        let (engine, _temp) = create_test_engine();
        fund(&engine, "alice", 100);

        // Warm the cache
        let before = engine.get_wallet(&tenant(), &user("alice")).unwrap();
        assert_eq!(before.balance, dec(100));

        engine
            .deposit(&tenant(), &user("alice"), dec(50), "card", HashMap::new())
            .unwrap();

        // After invalidation the read must not serve the pre-mutation value
        let after = engine.get_wallet(&tenant(), &user("alice")).unwrap();
        assert_eq!(after.balance, dec(150));
    }

    #[test]
    fn test_reconcile_fails_orphaned_pending() {
        let (engine, _temp) = create_test_engine();
        let wallet = fund(&engine, "alice", 100);

        // Simulate a crash between record creation and commit
        let mut orphan = Transaction::pending(
            tenant(),
            TransactionKind::Deposit {
                to: WalletRef::of(&wallet),
                channel: "card".to_string(),
            },
            dec(25),
            HashMap::new(),
        );
        orphan.timestamp = Utc::now() - chrono::Duration::minutes(30);
        engine.storage().create_transaction(&orphan).unwrap();

        let reconciled = engine
            .reconcile_pending(&tenant(), chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(reconciled, 1);

        let loaded = engine
            .storage()
            .get_transaction(&tenant(), orphan.id)
            .unwrap();
        assert_eq!(loaded.status, TransactionStatus::Failed);
        assert!(loaded.error.is_some());

        // The orphan never touched the balance
        assert_eq!(
            engine.get_wallet(&tenant(), &user("alice")).unwrap().balance,
            dec(100)
        );

        // Second pass finds nothing
        let again = engine
            .reconcile_pending(&tenant(), chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn test_reconcile_skips_settled_records() {
        let (engine, _temp) = create_test_engine();
        let wallet = fund(&engine, "alice", 100);

        // Record created twice with different timestamps leaves two pending
        // index entries; settling removes only the current one, so the
        // older entry now points at a completed transaction.
        let mut settled = Transaction::pending(
            tenant(),
            TransactionKind::Deposit {
                to: WalletRef::of(&wallet),
                channel: "card".to_string(),
            },
            dec(10),
            HashMap::new(),
        );
        settled.timestamp = Utc::now() - chrono::Duration::minutes(30);
        engine.storage().create_transaction(&settled).unwrap();
        settled.timestamp = settled.timestamp + chrono::Duration::seconds(1);
        engine.storage().create_transaction(&settled).unwrap();

        let mut done = settled.clone();
        done.complete().unwrap();
        engine.storage().replace_transaction(&done).unwrap();

        // A genuine orphan behind the stale entry must still be swept
        let mut orphan = Transaction::pending(
            tenant(),
            TransactionKind::Deposit {
                to: WalletRef::of(&wallet),
                channel: "card".to_string(),
            },
            dec(25),
            HashMap::new(),
        );
        orphan.timestamp = Utc::now() - chrono::Duration::minutes(20);
        engine.storage().create_transaction(&orphan).unwrap();

        let reconciled = engine
            .reconcile_pending(&tenant(), chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(reconciled, 1);

        let loaded = engine
            .storage()
            .get_transaction(&tenant(), settled.id)
            .unwrap();
        assert_eq!(loaded.status, TransactionStatus::Completed);

        let swept = engine
            .storage()
            .get_transaction(&tenant(), orphan.id)
            .unwrap();
        assert_eq!(swept.status, TransactionStatus::Failed);
    }

    /// Cache double whose every call fails
    struct FailingCache;

    impl Cache for FailingCache {
        fn get(&self, _: &str, _: &TenantId) -> CacheResult<Option<Vec<u8>>> {
            Err(CacheError("cache down".to_string()))
        }
        fn set(&self, _: &str, _: Vec<u8>, _: &[String], _: &TenantId) -> CacheResult<()> {
            Err(CacheError("cache down".to_string()))
        }
        fn invalidate(&self, _: &str, _: &TenantId) -> CacheResult<()> {
            Err(CacheError("cache down".to_string()))
        }
        fn invalidate_tag(&self, _: &str) -> CacheResult<()> {
            Err(CacheError("cache down".to_string()))
        }
    }

    #[test]
    fn test_cache_failures_never_fail_the_caller() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let engine = LedgerEngine::new(storage, Arc::new(FailingCache), &config).unwrap();

        engine.create_wallet(&tenant(), &user("alice")).unwrap();
        engine
            .deposit(&tenant(), &user("alice"), dec(100), "card", HashMap::new())
            .unwrap();

        let wallet = engine.get_wallet(&tenant(), &user("alice")).unwrap();
        assert_eq!(wallet.balance, dec(100));
    }
}
