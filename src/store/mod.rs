//! Persistence seam for credit accounts and analysis history.
//!
//! The ledger and the orchestrator only talk to [`CreditStore`] and
//! [`HistoryStore`]. Two backends ship with the crate:
//!
//! * [`MemoryStore`]: in-process maps with an optional JSON snapshot file.
//! * `PgStore`: PostgreSQL via sqlx (feature `postgres`).

use crate::error::StoreError;
use crate::output::HistoryRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One credit balance per (user, period).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: String,
    /// Calendar month, `YYYY-MM`.
    pub period: String,
    pub balance: u32,
}

/// Result of a conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The cost was subtracted; `balance` is the new value.
    Applied { balance: u32 },
    /// The balance was below the cost and was left unchanged.
    Insufficient { balance: u32 },
    /// No account exists for the key.
    Missing,
}

/// Storage for monthly credit balances.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Point lookup by (user, period).
    async fn get_account(&self, user_id: &str, period: &str) -> StoreResult<Option<CreditAccount>>;

    /// Insert `account` unless a row for its key exists, then return the
    /// stored row. A losing concurrent creator gets the winner's row.
    async fn insert_if_absent(&self, account: CreditAccount) -> StoreResult<CreditAccount>;

    /// Subtract `cost` only if the balance covers it, atomically.
    async fn try_debit(&self, user_id: &str, period: &str, cost: u32) -> StoreResult<DebitOutcome>;
}

/// Append-only storage for finished analyses.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert_record(&self, record: &HistoryRecord) -> StoreResult<()>;

    /// All records of `owner`, newest first.
    async fn list_for_owner(&self, owner: &str) -> StoreResult<Vec<HistoryRecord>>;
}
