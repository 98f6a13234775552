//! In-process store with an optional JSON snapshot.
//!
//! Every operation takes one lock for its whole read-modify-write, so
//! `insert_if_absent` and `try_debit` are atomic with respect to each other.

use super::{CreditAccount, CreditStore, DebitOutcome, HistoryStore, StoreResult};
use crate::error::StoreError;
use crate::output::HistoryRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct State {
    credits: BTreeMap<(String, String), u32>,
    history: Vec<HistoryRecord>,
}

/// On-disk form of a [`MemoryStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    credits: Vec<CreditAccount>,
    #[serde(default)]
    history: Vec<HistoryRecord>,
}

/// [`CreditStore`] + [`HistoryStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_credit_writes: AtomicBool,
    fail_history_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`MemoryStore::save`]. A missing file gives an empty store.
    pub async fn load(path: &Path) -> StoreResult<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        info!(
            "Loaded {} credit accounts and {} history records from {}",
            snapshot.credits.len(),
            snapshot.history.len(),
            path.display()
        );

        let state = State {
            credits: snapshot
                .credits
                .into_iter()
                .map(|a| ((a.user_id, a.period), a.balance))
                .collect(),
            history: snapshot.history,
        };
        Ok(Self {
            state: Mutex::new(state),
            ..Self::default()
        })
    }

    /// Write the whole store to `path` as pretty JSON.
    pub async fn save(&self, path: &Path) -> StoreResult<()> {
        let snapshot = {
            let state = self.state.lock().await;
            Snapshot {
                credits: state
                    .credits
                    .iter()
                    .map(|((user_id, period), balance)| CreditAccount {
                        user_id: user_id.clone(),
                        period: period.clone(),
                        balance: *balance,
                    })
                    .collect(),
                history: state.history.clone(),
            }
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Make `try_debit` fail, as a lost connection would.
    pub fn fail_credit_writes(&self, fail: bool) {
        self.fail_credit_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `insert_record` fail.
    pub fn fail_history_writes(&self, fail: bool) {
        self.fail_history_writes.store(fail, Ordering::SeqCst);
    }

    fn check_credit_writes(&self) -> StoreResult<()> {
        if self.fail_credit_writes.load(Ordering::SeqCst) {
            warn!("Injected credit write failure");
            return Err(StoreError::Backend("credit write unavailable".into()));
        }
        Ok(())
    }
}

fn key(user_id: &str, period: &str) -> (String, String) {
    (user_id.to_string(), period.to_string())
}

#[async_trait]
impl CreditStore for MemoryStore {
    async fn get_account(&self, user_id: &str, period: &str) -> StoreResult<Option<CreditAccount>> {
        let state = self.state.lock().await;
        Ok(state
            .credits
            .get(&key(user_id, period))
            .map(|balance| CreditAccount {
                user_id: user_id.to_string(),
                period: period.to_string(),
                balance: *balance,
            }))
    }

    async fn insert_if_absent(&self, account: CreditAccount) -> StoreResult<CreditAccount> {
        let mut state = self.state.lock().await;
        let balance = *state
            .credits
            .entry(key(&account.user_id, &account.period))
            .or_insert(account.balance);
        Ok(CreditAccount { balance, ..account })
    }

    async fn try_debit(&self, user_id: &str, period: &str, cost: u32) -> StoreResult<DebitOutcome> {
        self.check_credit_writes()?;
        let mut state = self.state.lock().await;
        let Some(balance) = state.credits.get_mut(&key(user_id, period)) else {
            return Ok(DebitOutcome::Missing);
        };
        if *balance < cost {
            return Ok(DebitOutcome::Insufficient { balance: *balance });
        }
        *balance -= cost;
        Ok(DebitOutcome::Applied { balance: *balance })
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn insert_record(&self, record: &HistoryRecord) -> StoreResult<()> {
        if self.fail_history_writes.load(Ordering::SeqCst) {
            warn!("Injected history write failure");
            return Err(StoreError::Backend("history write unavailable".into()));
        }
        self.state.lock().await.history.push(record.clone());
        Ok(())
    }

    async fn list_for_owner(&self, owner: &str) -> StoreResult<Vec<HistoryRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<HistoryRecord> = state
            .history
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
