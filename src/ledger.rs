//! Monthly credit ledger.
//!
//! Balances are partitioned by user and calendar month (`YYYY-MM`, UTC). A
//! month with no row yet counts as a full allowance and is materialised on
//! first read. Debits happen only after a successful model call and go
//! through the store's conditional decrement, so the balance never drops
//! below zero even when two reviews race.
//!
//! The period is computed on demand at every check; there is no rollover
//! timer. A snapshot fetched in an earlier month is stale and is refused.

use crate::config::{ModelCatalog, ModelOption};
use crate::error::{DenialReason, ReviewError, StoreError};
use crate::store::{CreditAccount, CreditStore, DebitOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ── Time ─────────────────────────────────────────────────────────────────

/// Source of "now", injectable so month rollover can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Period key for an instant, e.g. `2026-10`.
pub fn period_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

// ── Views ────────────────────────────────────────────────────────────────

/// A balance as read from the store at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSnapshot {
    pub user_id: String,
    pub period: String,
    pub balance: u32,
    pub limit: u32,
}

impl fmt::Display for CreditSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.balance, self.limit)
    }
}

/// What the caller currently knows about a user's credits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditView {
    /// Paid tiers are switched off.
    Unconfigured,
    /// Nobody is signed in.
    Unauthenticated,
    /// A fetch is in flight or failed.
    Loading,
    Loaded(CreditSnapshot),
}

impl CreditView {
    /// Text for the credits panel.
    pub fn display_text(&self) -> String {
        match self {
            CreditView::Unconfigured => "Not configured".to_string(),
            CreditView::Unauthenticated => "Login required".to_string(),
            CreditView::Loading => "Loading...".to_string(),
            CreditView::Loaded(s) => s.to_string(),
        }
    }
}

/// A catalog entry with its eligibility for the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionStatus {
    pub option: ModelOption,
    /// Why the option cannot be chosen; `None` when it can.
    pub denied: Option<DenialReason>,
}

impl OptionStatus {
    pub fn is_enabled(&self) -> bool {
        self.denied.is_none()
    }
}

// ── Ledger ───────────────────────────────────────────────────────────────

/// Credit accounting over a [`CreditStore`].
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn CreditStore>,
    limit: u32,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditLedger")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditStore>, monthly_limit: u32) -> Self {
        Self {
            store,
            limit: monthly_limit,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn monthly_limit(&self) -> u32 {
        self.limit
    }

    /// `false` when the limit is zero and every paid tier is off.
    pub fn is_configured(&self) -> bool {
        self.limit > 0
    }

    pub fn current_period(&self) -> String {
        period_key(self.clock.now())
    }

    /// Read the user's balance for the current month, creating the account
    /// at the full limit if this is the month's first read.
    pub async fn fetch(&self, user_id: &str) -> Result<CreditSnapshot, StoreError> {
        let period = self.current_period();
        let account = match self.store.get_account(user_id, &period).await? {
            Some(account) => account,
            None => {
                debug!("Materialising credits for {} in {}", user_id, period);
                self.store
                    .insert_if_absent(CreditAccount {
                        user_id: user_id.to_string(),
                        period: period.clone(),
                        balance: self.limit,
                    })
                    .await?
            }
        };
        Ok(self.snapshot(account))
    }

    fn snapshot(&self, account: CreditAccount) -> CreditSnapshot {
        CreditSnapshot {
            user_id: account.user_id,
            period: account.period,
            balance: account.balance.min(self.limit),
            limit: self.limit,
        }
    }

    /// The view a credits panel should show for `user`.
    pub async fn view(&self, user: Option<&str>) -> CreditView {
        if !self.is_configured() {
            return CreditView::Unconfigured;
        }
        let Some(user) = user else {
            return CreditView::Unauthenticated;
        };
        match self.fetch(user).await {
            Ok(snapshot) => CreditView::Loaded(snapshot),
            Err(e) => {
                warn!("Failed to load credits for {}: {}", user, e);
                CreditView::Loading
            }
        }
    }

    /// Eligibility of one option given what the caller knows.
    ///
    /// Checks, in order: free option, limit configured, identity present,
    /// balance loaded for this user, period still current, balance covers cost.
    pub fn check_eligibility(
        &self,
        user: Option<&str>,
        option: &ModelOption,
        view: &CreditView,
    ) -> Result<(), DenialReason> {
        if option.is_free() {
            return Ok(());
        }
        if !self.is_configured() {
            return Err(DenialReason::Unconfigured);
        }
        let Some(user) = user else {
            return Err(DenialReason::Unauthenticated);
        };
        let snapshot = match view {
            CreditView::Loaded(s) if s.user_id == user => s,
            _ => return Err(DenialReason::Loading),
        };
        let current = self.current_period();
        if snapshot.period != current {
            return Err(DenialReason::StalePeriod {
                fetched: snapshot.period.clone(),
                current,
            });
        }
        if snapshot.balance < option.cost {
            return Err(DenialReason::InsufficientBalance {
                balance: snapshot.balance,
                cost: option.cost,
            });
        }
        Ok(())
    }

    /// The pre-call gate used by the orchestrator.
    ///
    /// Uses `cached` when given, otherwise fetches. A stale cached snapshot
    /// triggers a refresh and the request is still refused. Returns the
    /// snapshot the decision was made against (`None` for free options).
    pub async fn authorize(
        &self,
        user: Option<&str>,
        option: &ModelOption,
        cached: Option<CreditSnapshot>,
    ) -> Result<Option<CreditSnapshot>, ReviewError> {
        if option.is_free() {
            return Ok(None);
        }

        let view = match (self.is_configured(), user, cached) {
            (true, Some(_), Some(snapshot)) => CreditView::Loaded(snapshot),
            (true, Some(u), None) => match self.fetch(u).await {
                Ok(snapshot) => CreditView::Loaded(snapshot),
                Err(e) => {
                    warn!("Failed to load credits for {}: {}", u, e);
                    CreditView::Loading
                }
            },
            _ => CreditView::Unauthenticated,
        };

        match self.check_eligibility(user, option, &view) {
            Ok(()) => match view {
                CreditView::Loaded(snapshot) => Ok(Some(snapshot)),
                _ => Err(ReviewError::Internal("eligible without a balance".into())),
            },
            Err(reason) => {
                if let (DenialReason::StalePeriod { current, .. }, Some(u)) = (&reason, user) {
                    info!("Credit period rolled over to {}, refreshing", current);
                    if let Err(e) = self.fetch(u).await {
                        warn!("Credit refresh failed: {}", e);
                    }
                }
                info!("Review refused: {}", reason);
                Err(ReviewError::EligibilityDenied { reason })
            }
        }
    }

    /// Every catalog option with its eligibility.
    pub fn availability(
        &self,
        catalog: &ModelCatalog,
        user: Option<&str>,
        view: &CreditView,
    ) -> Vec<OptionStatus> {
        catalog
            .options()
            .iter()
            .map(|option| OptionStatus {
                option: option.clone(),
                denied: self.check_eligibility(user, option, view).err(),
            })
            .collect()
    }

    /// Select `id` in `catalog` if it exists and is eligible; otherwise the
    /// selection is left unchanged.
    pub fn select_option<'c>(
        &self,
        catalog: &'c mut ModelCatalog,
        id: &str,
        user: Option<&str>,
        view: &CreditView,
    ) -> Result<&'c ModelOption, ReviewError> {
        let option = catalog.get(id).ok_or_else(|| ReviewError::UnknownModel {
            model: id.to_string(),
        })?;
        self.check_eligibility(user, option, view)
            .map_err(|reason| ReviewError::EligibilityDenied { reason })?;
        catalog.select(id)
    }

    /// Subtract `cost` from the (user, period) balance if it covers it.
    pub async fn debit(
        &self,
        user_id: &str,
        period: &str,
        cost: u32,
    ) -> Result<DebitOutcome, StoreError> {
        let outcome = self.store.try_debit(user_id, period, cost).await?;
        match outcome {
            DebitOutcome::Applied { balance } => {
                info!("Debited {} credits from {} ({} left)", cost, user_id, balance)
            }
            DebitOutcome::Insufficient { balance } => {
                warn!("Debit of {} refused for {}: balance {}", cost, user_id, balance)
            }
            DebitOutcome::Missing => warn!("No credit account for {} in {}", user_id, period),
        }
        Ok(outcome)
    }

    /// Re-fetch the balance in the background after a failed write.
    pub fn reconcile(&self, user_id: &str) -> JoinHandle<Option<CreditSnapshot>> {
        let ledger = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            match ledger.fetch(&user_id).await {
                Ok(snapshot) => {
                    info!("Reconciled credits for {}: {}", user_id, snapshot);
                    Some(snapshot)
                }
                Err(e) => {
                    warn!("Credit reconciliation failed for {}: {}", user_id, e);
                    None
                }
            }
        })
    }
}
