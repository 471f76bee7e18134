//! Error types for the wallet ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is zero or negative
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Source and destination are the same wallet
    #[error("Cannot transfer to same wallet: {0}")]
    SameWallet(String),

    /// Wallet not found for user
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Wallet exists but is frozen or closed
    #[error("Wallet for user {user} is not active: {status}")]
    WalletNotActive {
        /// Owning user
        user: String,
        /// Current wallet status
        status: String,
    },

    /// Source balance cannot cover the requested amount
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Current balance
        available: Decimal,
        /// Requested debit
        requested: Decimal,
    },

    /// Wallet already exists for this (tenant, user) pair
    #[error("Wallet already exists: {0}")]
    AlreadyExists(String),

    /// Revision check failed on a wallet write (concurrent writer won)
    #[error("Revision conflict on wallet {wallet_id}: expected {expected}, found {actual}")]
    RevisionConflict {
        /// Wallet whose write was rejected
        wallet_id: Uuid,
        /// Revision the writer read
        expected: u64,
        /// Revision currently stored
        actual: u64,
    },

    /// Transaction already reached a terminal state
    #[error("Invalid transition for transaction {id}: already {status}")]
    InvalidTransition {
        /// Transaction id
        id: Uuid,
        /// Terminal status it holds
        status: String,
    },

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// Transient store failure (RocksDB)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}
