//! Read-only query facade
//!
//! Serves reporting and analytics collaborators from the transaction log
//! and the cache; never mutates ledger state.

use crate::{
    cache::Cache,
    engine::lookup_wallet_cached,
    types::{TenantId, Transaction, UserId, Wallet},
    Error, Result, Storage,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Read-only view over the transaction log and wallet cache
pub struct QueryFacade {
    storage: Arc<Storage>,
    cache: Arc<dyn Cache>,
}

impl QueryFacade {
    /// Construct from shared collaborators
    pub fn new(storage: Arc<Storage>, cache: Arc<dyn Cache>) -> Self {
        Self { storage, cache }
    }

    /// Transactions touching `user`, newest first, bounded by `limit`
    pub fn transaction_history(
        &self,
        tenant: &TenantId,
        user: &UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        self.storage.transaction_history(tenant, user, limit)
    }

    /// Cached read-through wallet lookup
    pub fn wallet(&self, tenant: &TenantId, user: &UserId) -> Result<Wallet> {
        lookup_wallet_cached(&self.storage, self.cache.as_ref(), None, tenant, user)?
            .ok_or_else(|| Error::WalletNotFound(user.to_string()))
    }

    /// Pending transactions created before `cutoff`, oldest first
    ///
    /// Operational visibility for reconciliation monitoring: a non-empty
    /// result here means crashed operations are awaiting the reconciler.
    pub fn pending_transactions(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        self.storage.pending_older_than(tenant, cutoff)
    }
}

impl std::fmt::Debug for QueryFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFacade").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::MemoryCache, Config, LedgerEngine};
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn setup() -> (LedgerEngine, QueryFacade, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let cache = Arc::new(MemoryCache::from_config(&config.cache));
        let engine =
            LedgerEngine::new(storage.clone(), cache.clone(), &config).unwrap();
        let facade = QueryFacade::new(storage, cache);
        (engine, facade, temp_dir)
    }

    fn tenant() -> TenantId {
        TenantId::new("marketplace-1")
    }

    #[test]
    fn test_facade_sees_engine_writes() {
        let (engine, facade, _temp) = setup();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        engine.create_wallet(&tenant(), &alice).unwrap();
        engine.create_wallet(&tenant(), &bob).unwrap();
        engine
            .deposit(&tenant(), &alice, Decimal::from(100), "card", HashMap::new())
            .unwrap();
        engine
            .transfer(&tenant(), &alice, &bob, Decimal::from(40), HashMap::new())
            .unwrap();

        let wallet = facade.wallet(&tenant(), &alice).unwrap();
        assert_eq!(wallet.balance, Decimal::from(60));

        // Bob sees the transfer too, as destination
        let history = facade.transaction_history(&tenant(), &bob, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind.label(), "transfer");
        assert!(history[0].touches(&bob));
        assert!(history[0].touches(&alice));

        // No orphaned pending work
        let pending = facade.pending_transactions(&tenant(), Utc::now()).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_facade_missing_wallet() {
        let (_engine, facade, _temp) = setup();
        let result = facade.wallet(&tenant(), &UserId::new("ghost"));
        assert!(matches!(result, Err(Error::WalletNotFound(_))));
    }
}
