//! Multi-tenant wallet ledger and transaction engine
//!
//! Moves value between user-owned wallet balances while preserving
//! conservation of funds, producing an auditable transaction trail, and
//! keeping a read-through cache coherent with ledger state.
//!
//! # Architecture
//!
//! - **Tenant scoping**: every record and every key carries the tenant;
//!   cross-tenant access is not expressible
//! - **Revision-gated writes**: wallet writes are compare-and-swap on a
//!   revision counter, retried with re-read state on conflict
//! - **Atomic commits**: balance mutations land in the same `WriteBatch`
//!   as the transaction's terminal status
//! - **Cache as accelerator**: the cache is never a source of truth and
//!   its failures never fail a caller
//!
//! # Invariants
//!
//! - Conservation: a committed transfer subtracts from exactly one wallet
//!   and adds to exactly one wallet, sum-invariant
//! - Balances are never negative at any quiescent state
//! - Transaction status moves one way: pending to completed or failed

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod query;
pub mod reconcile;
pub mod storage;
pub mod types;

// Re-exports
pub use cache::{Cache, MemoryCache};
pub use config::Config;
pub use engine::LedgerEngine;
pub use error::{Error, Result};
pub use query::QueryFacade;
pub use reconcile::{spawn_reconciler, ReconcilerHandle};
pub use storage::Storage;
pub use types::{
    TenantId, Transaction, TransactionKind, TransactionStatus, TransferRequest, UserId, Wallet,
    WalletRef, WalletStatus,
};
