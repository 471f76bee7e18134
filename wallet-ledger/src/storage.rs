//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet records (key: tenant | wallet_id)
//! - `transactions` - Append-biased transaction log (key: tenant | tx_id)
//! - `indices` - Secondary indices:
//!   - `u | tenant | user` -> wallet_id. Presence of this key enforces the
//!     one-wallet-per-user rule at creation time.
//!   - `h | tenant | user | reverse_ts | tx_id` -> empty. Newest-first
//!     history scans.
//!   - `p | tenant | ts | tx_id` -> empty. Pending transactions, removed on
//!     terminal transition; drives reconciliation.
//!
//! Every key carries the tenant scope, so no cross-tenant read or write is
//! expressible through this API.
//!
//! Wallet writes are revision-gated: the check-and-set section runs under a
//! single write lock, and multi-key commits go through one `WriteBatch`.

use crate::{
    error::{Error, Result},
    types::{TenantId, Transaction, UserId, Wallet},
    Config,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";

/// Index tags (first key byte)
const IDX_USER_WALLET: u8 = b'u';
const IDX_HISTORY: u8 = b'h';
const IDX_PENDING: u8 = b'p';

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    /// Serializes check-and-set sections for wallet writes
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_wallets()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB with 3 column families");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_wallets() -> Options {
        let mut opts = Options::default();
        // Wallets are read hot, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::StoreUnavailable(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn wallet_key(tenant: &TenantId, wallet_id: Uuid) -> Vec<u8> {
        let mut key = tenant.as_str().as_bytes().to_vec();
        key.push(b'|');
        key.extend_from_slice(wallet_id.as_bytes());
        key
    }

    fn transaction_key(tenant: &TenantId, tx_id: Uuid) -> Vec<u8> {
        let mut key = tenant.as_str().as_bytes().to_vec();
        key.push(b'|');
        key.extend_from_slice(tx_id.as_bytes());
        key
    }

    fn user_wallet_key(tenant: &TenantId, user: &UserId) -> Vec<u8> {
        let mut key = vec![IDX_USER_WALLET, b'|'];
        key.extend_from_slice(tenant.as_str().as_bytes());
        key.push(b'|');
        key.extend_from_slice(user.as_str().as_bytes());
        key
    }

    fn history_prefix(tenant: &TenantId, user: &UserId) -> Vec<u8> {
        let mut key = vec![IDX_HISTORY, b'|'];
        key.extend_from_slice(tenant.as_str().as_bytes());
        key.push(b'|');
        key.extend_from_slice(user.as_str().as_bytes());
        key.push(b'|');
        key
    }

    fn history_key(tenant: &TenantId, user: &UserId, ts: DateTime<Utc>, tx_id: Uuid) -> Vec<u8> {
        let mut key = Self::history_prefix(tenant, user);
        // Reverse timestamp: forward iteration yields newest first
        let reverse_ts = (i64::MAX - ts.timestamp_millis()) as u64;
        key.extend_from_slice(&reverse_ts.to_be_bytes());
        key.extend_from_slice(tx_id.as_bytes());
        key
    }

    fn pending_prefix(tenant: &TenantId) -> Vec<u8> {
        let mut key = vec![IDX_PENDING, b'|'];
        key.extend_from_slice(tenant.as_str().as_bytes());
        key.push(b'|');
        key
    }

    fn pending_key(tenant: &TenantId, ts: DateTime<Utc>, tx_id: Uuid) -> Vec<u8> {
        let mut key = Self::pending_prefix(tenant);
        key.extend_from_slice(&(ts.timestamp_millis() as u64).to_be_bytes());
        key.extend_from_slice(tx_id.as_bytes());
        key
    }

    // Wallet operations

    /// Create a wallet, enforcing one wallet per (tenant, user)
    pub fn create_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let user_key = Self::user_wallet_key(&wallet.tenant_id, &wallet.user_id);

        let _guard = self.write_lock.lock();

        if self.db.get_cf(&cf_indices, &user_key)?.is_some() {
            return Err(Error::AlreadyExists(format!(
                "wallet for user {} in tenant {}",
                wallet.user_id, wallet.tenant_id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_wallets,
            Self::wallet_key(&wallet.tenant_id, wallet.id),
            bincode::serialize(wallet)?,
        );
        batch.put_cf(&cf_indices, &user_key, wallet.id.as_bytes());
        self.db.write(batch)?;

        tracing::debug!(
            wallet_id = %wallet.id,
            tenant_id = %wallet.tenant_id,
            user_id = %wallet.user_id,
            "Wallet created"
        );

        Ok(())
    }

    /// Get wallet by ID
    pub fn get_wallet(&self, tenant: &TenantId, wallet_id: Uuid) -> Result<Wallet> {
        let cf = self.cf_handle(CF_WALLETS)?;

        let value = self
            .db
            .get_cf(&cf, Self::wallet_key(tenant, wallet_id))?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        let wallet: Wallet = bincode::deserialize(&value)?;
        Ok(wallet)
    }

    /// Find a user's wallet via the user index
    pub fn find_wallet_by_user(&self, tenant: &TenantId, user: &UserId) -> Result<Option<Wallet>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let wallet_id = match self
            .db
            .get_cf(&cf_indices, Self::user_wallet_key(tenant, user))?
        {
            Some(bytes) => {
                let id_bytes: [u8; 16] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::StoreUnavailable("Corrupt user index entry".to_string()))?;
                Uuid::from_bytes(id_bytes)
            }
            None => return Ok(None),
        };

        self.get_wallet(tenant, wallet_id).map(Some)
    }

    /// Replace a wallet, gated on its revision (compare-and-swap)
    ///
    /// `wallet` carries the state the writer wants to publish;
    /// `expected_revision` is the revision the writer read. On success the
    /// stored record's revision is `expected_revision + 1`.
    pub fn replace_wallet(&self, wallet: &Wallet, expected_revision: u64) -> Result<Wallet> {
        let cf = self.cf_handle(CF_WALLETS)?;

        let _guard = self.write_lock.lock();

        let current = self.get_wallet(&wallet.tenant_id, wallet.id)?;
        if current.revision != expected_revision {
            return Err(Error::RevisionConflict {
                wallet_id: wallet.id,
                expected: expected_revision,
                actual: current.revision,
            });
        }

        let mut next = wallet.clone();
        next.revision = expected_revision + 1;
        self.db.put_cf(
            &cf,
            Self::wallet_key(&next.tenant_id, next.id),
            bincode::serialize(&next)?,
        )?;

        Ok(next)
    }

    // Transaction log operations

    /// Append a new pending transaction with its history and pending indices
    pub fn create_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.status.is_terminal() {
            return Err(Error::InvalidTransition {
                id: tx.id,
                status: tx.status.to_string(),
            });
        }

        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_txs,
            Self::transaction_key(&tx.tenant_id, tx.id),
            bincode::serialize(tx)?,
        );
        for user in tx.kind.users() {
            batch.put_cf(
                &cf_indices,
                Self::history_key(&tx.tenant_id, user, tx.timestamp, tx.id),
                b"",
            );
        }
        batch.put_cf(
            &cf_indices,
            Self::pending_key(&tx.tenant_id, tx.timestamp, tx.id),
            b"",
        );
        self.db.write(batch)?;

        tracing::debug!(
            tx_id = %tx.id,
            tenant_id = %tx.tenant_id,
            kind = tx.kind.label(),
            "Transaction created"
        );

        Ok(())
    }

    /// Get transaction by ID
    pub fn get_transaction(&self, tenant: &TenantId, tx_id: Uuid) -> Result<Transaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;

        let value = self
            .db
            .get_cf(&cf, Self::transaction_key(tenant, tx_id))?
            .ok_or(Error::TransactionNotFound(tx_id))?;

        let tx: Transaction = bincode::deserialize(&value)?;
        Ok(tx)
    }

    /// Replace a transaction record (terminal transitions only move forward)
    pub fn replace_transaction(&self, tx: &Transaction) -> Result<()> {
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let _guard = self.write_lock.lock();

        let current = self.get_transaction(&tx.tenant_id, tx.id)?;
        if current.status.is_terminal() {
            return Err(Error::InvalidTransition {
                id: tx.id,
                status: current.status.to_string(),
            });
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_txs,
            Self::transaction_key(&tx.tenant_id, tx.id),
            bincode::serialize(tx)?,
        );
        if tx.status.is_terminal() {
            batch.delete_cf(
                &cf_indices,
                Self::pending_key(&tx.tenant_id, current.timestamp, tx.id),
            );
        }
        self.db.write(batch)?;

        Ok(())
    }

    /// Commit a transaction together with its wallet mutations, atomically
    ///
    /// Each `(wallet, expected_revision)` pair is revision-checked; the
    /// terminal transaction record, every wallet write, and the pending
    /// index removal land in a single `WriteBatch`. An orphaned `Pending`
    /// record therefore implies no balances moved.
    pub fn commit_transaction(
        &self,
        tx: &Transaction,
        wallets: &[(Wallet, u64)],
    ) -> Result<()> {
        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let _guard = self.write_lock.lock();

        let current_tx = self.get_transaction(&tx.tenant_id, tx.id)?;
        if current_tx.status.is_terminal() {
            return Err(Error::InvalidTransition {
                id: tx.id,
                status: current_tx.status.to_string(),
            });
        }

        // Revision checks before anything is written
        for (wallet, expected) in wallets {
            let current = self.get_wallet(&wallet.tenant_id, wallet.id)?;
            if current.revision != *expected {
                return Err(Error::RevisionConflict {
                    wallet_id: wallet.id,
                    expected: *expected,
                    actual: current.revision,
                });
            }
        }

        let mut batch = WriteBatch::default();
        for (wallet, expected) in wallets {
            let mut next = wallet.clone();
            next.revision = expected + 1;
            batch.put_cf(
                &cf_wallets,
                Self::wallet_key(&next.tenant_id, next.id),
                bincode::serialize(&next)?,
            );
        }
        batch.put_cf(
            &cf_txs,
            Self::transaction_key(&tx.tenant_id, tx.id),
            bincode::serialize(tx)?,
        );
        batch.delete_cf(
            &cf_indices,
            Self::pending_key(&tx.tenant_id, current_tx.timestamp, tx.id),
        );
        self.db.write(batch)?;

        tracing::debug!(
            tx_id = %tx.id,
            tenant_id = %tx.tenant_id,
            kind = tx.kind.label(),
            wallets = wallets.len(),
            "Transaction committed"
        );

        Ok(())
    }

    // Queries

    /// Transactions touching `user`, newest first, bounded by `limit`
    pub fn transaction_history(
        &self,
        tenant: &TenantId,
        user: &UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = Self::history_prefix(tenant, user);
        let iter = self.db.iterator_cf(
            &cf_indices,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut txs = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) || txs.len() >= limit {
                break;
            }

            // Key tail: reverse_ts (8 bytes) || tx_id (16 bytes)
            if key.len() < prefix.len() + 24 {
                continue;
            }
            let id_bytes: [u8; 16] = key[key.len() - 16..].try_into().unwrap();
            txs.push(self.get_transaction(tenant, Uuid::from_bytes(id_bytes))?);
        }

        Ok(txs)
    }

    /// Pending transactions created before `cutoff`, oldest first
    pub fn pending_older_than(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = Self::pending_prefix(tenant);
        let iter = self.db.iterator_cf(
            &cf_indices,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let cutoff_millis = cutoff.timestamp_millis() as u64;
        let mut txs = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() < prefix.len() + 24 {
                continue;
            }

            let ts_bytes: [u8; 8] = key[prefix.len()..prefix.len() + 8].try_into().unwrap();
            // Keys are timestamp-ascending; everything after the cutoff is newer
            if u64::from_be_bytes(ts_bytes) >= cutoff_millis {
                break;
            }

            let id_bytes: [u8; 16] = key[key.len() - 16..].try_into().unwrap();
            txs.push(self.get_transaction(tenant, Uuid::from_bytes(id_bytes))?);
        }

        Ok(txs)
    }

    // Statistics

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        let wallets = self.approximate_count(CF_WALLETS)?;
        let transactions = self.approximate_count(CF_TRANSACTIONS)?;

        Ok(StorageStats {
            total_wallets: wallets,
            total_transactions: transactions,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(&cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate wallet count across all tenants
    pub total_wallets: u64,
    /// Approximate transaction count across all tenants
    pub total_transactions: u64,
}
