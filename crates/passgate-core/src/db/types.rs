//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Direction of a ledger movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsageKind {
    /// Purchased or granted credits
    Credit,
    /// Credits spent on an operation
    Debit,
    /// Explicit compensation after a failed operation
    Refund,
}

/// One balance change, appended to the wallet's history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageEvent {
    pub wallet: Address,
    pub kind: UsageKind,
    pub amount: u64,
    /// Operation name for debits
    pub operation: Option<String>,
    pub reason: String,
    pub balance_after: u64,
    /// Unix milliseconds
    pub at_ms: i64,
}

/// The operator agent registered for a wallet at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub owner: Address,
    pub status: String,
    /// Unix seconds
    pub created_at: i64,
}

/// Database statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbStats {
    pub total_secrets: usize,
    pub tombstoned_secrets: usize,
    pub wallets_with_balance: usize,
    pub total_credits: u64,
    pub usage_events: usize,
    pub agents: usize,
}
