//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Tenant scoping on every record

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Tenant identifier (isolation boundary)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Create new tenant ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier within a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wallet status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalletStatus {
    /// Accepts deposits, withdrawals, and transfers
    Active = 1,
    /// Temporarily blocked from all value movement
    Frozen = 2,
    /// Permanently retired (wallets are never deleted)
    Closed = 3,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Per-user, per-tenant balance record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID, unique within the tenant
    pub id: Uuid,

    /// Tenant scope (partitioning key)
    pub tenant_id: TenantId,

    /// Owning user (one active wallet per (tenant, user))
    pub user_id: UserId,

    /// Current balance; never negative at any quiescent state
    pub balance: Decimal,

    /// Wallet status
    pub status: WalletStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp (monotone non-decreasing)
    pub last_updated: DateTime<Utc>,

    /// Write revision, incremented on every committed write.
    /// Wallet writes are gated on this (compare-and-swap).
    pub revision: u64,
}

impl Wallet {
    /// Create a fresh active wallet with zero balance
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            balance: Decimal::ZERO,
            status: WalletStatus::Active,
            created_at: now,
            last_updated: now,
            revision: 0,
        }
    }

    /// True if the wallet accepts value movement
    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    /// Copy with the balance incremented by `amount`
    pub fn credited(&self, amount: Decimal, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.balance += amount;
        next.last_updated = now.max(self.last_updated);
        next
    }

    /// Copy with the balance decremented by `amount`
    ///
    /// Fails if the debit would drive the balance negative.
    pub fn debited(&self, amount: Decimal, now: DateTime<Utc>) -> crate::Result<Self> {
        if self.balance < amount {
            return Err(crate::Error::InsufficientFunds {
                available: self.balance,
                requested: amount,
            });
        }
        let mut next = self.clone();
        next.balance -= amount;
        next.last_updated = now.max(self.last_updated);
        Ok(next)
    }
}

/// Reference to a wallet as it appears on a transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRef {
    /// Owning user
    pub user_id: UserId,
    /// Wallet ID
    pub wallet_id: Uuid,
}

impl WalletRef {
    /// Build a reference from a wallet record
    pub fn of(wallet: &Wallet) -> Self {
        Self {
            user_id: wallet.user_id.clone(),
            wallet_id: wallet.id,
        }
    }
}

/// Transaction status state machine
///
/// `Pending` is the only initial state; `Completed` and `Failed` are
/// terminal. Transitions out of a terminal state are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Created, balances not yet applied
    Pending = 1,
    /// Balances applied (terminal)
    Completed = 2,
    /// Rejected during the mutation phase (terminal)
    Failed = 3,
}

impl TransactionStatus {
    /// True for terminal states
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Error detail recorded on a failed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Underlying error message
    pub message: String,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// Transaction payload, one variant per kind of value movement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Funds entering the ledger from outside
    Deposit {
        /// Destination wallet
        to: WalletRef,
        /// Caller-declared funding channel (e.g. "card", "payout")
        channel: String,
    },
    /// Funds leaving the ledger
    Withdrawal {
        /// Source wallet
        from: WalletRef,
    },
    /// Funds moving between two wallets in the same tenant
    Transfer {
        /// Source wallet
        from: WalletRef,
        /// Destination wallet
        to: WalletRef,
    },
}

impl TransactionKind {
    /// Source wallet, if the kind has one
    pub fn source(&self) -> Option<&WalletRef> {
        match self {
            TransactionKind::Deposit { .. } => None,
            TransactionKind::Withdrawal { from } => Some(from),
            TransactionKind::Transfer { from, .. } => Some(from),
        }
    }

    /// Destination wallet, if the kind has one
    pub fn destination(&self) -> Option<&WalletRef> {
        match self {
            TransactionKind::Deposit { to, .. } => Some(to),
            TransactionKind::Withdrawal { .. } => None,
            TransactionKind::Transfer { to, .. } => Some(to),
        }
    }

    /// Users touched by this transaction (source first)
    pub fn users(&self) -> Vec<&UserId> {
        self.source()
            .into_iter()
            .chain(self.destination())
            .map(|r| &r.user_id)
            .collect()
    }

    /// Kind label for logs and reporting
    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::Deposit { .. } => "deposit",
            TransactionKind::Withdrawal { .. } => "withdrawal",
            TransactionKind::Transfer { .. } => "transfer",
        }
    }
}

/// Auditable record of a single transaction attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID, generated at creation
    pub id: Uuid,

    /// Tenant scope; matches the tenant of every wallet it references
    pub tenant_id: TenantId,

    /// Kind-specific payload
    pub kind: TransactionKind,

    /// Current status
    pub status: TransactionStatus,

    /// Moved amount, strictly positive
    pub amount: Decimal,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Last status change
    pub last_updated: DateTime<Utc>,

    /// Populated only when status is Failed
    pub error: Option<ErrorDetails>,

    /// Opaque caller-supplied attributes, not interpreted by the engine
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Transaction {
    /// Create a new pending transaction
    pub fn pending(
        tenant_id: TenantId,
        kind: TransactionKind,
        amount: Decimal,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            kind,
            status: TransactionStatus::Pending,
            amount,
            timestamp: now,
            last_updated: now,
            error: None,
            metadata,
        }
    }

    /// Transition to Completed
    pub fn complete(&mut self) -> crate::Result<()> {
        self.transition(TransactionStatus::Completed)?;
        Ok(())
    }

    /// Transition to Failed, recording the underlying error
    pub fn fail(&mut self, message: impl Into<String>) -> crate::Result<()> {
        self.transition(TransactionStatus::Failed)?;
        self.error = Some(ErrorDetails {
            message: message.into(),
            timestamp: self.last_updated,
        });
        Ok(())
    }

    fn transition(&mut self, to: TransactionStatus) -> crate::Result<()> {
        if self.status.is_terminal() {
            return Err(crate::Error::InvalidTransition {
                id: self.id,
                status: self.status.to_string(),
            });
        }
        self.status = to;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// True if `user` appears as source or destination
    pub fn touches(&self, user: &UserId) -> bool {
        self.kind.users().into_iter().any(|u| u == user)
    }
}

/// Single transfer within a batch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Source user
    pub from_user: UserId,
    /// Destination user
    pub to_user: UserId,
    /// Amount to move
    pub amount: Decimal,
    /// Opaque attributes forwarded to the transaction record
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
