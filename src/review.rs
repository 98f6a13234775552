//! Review orchestrator: one request from PDF bytes to a settled outcome.
//!
//! ## State machine
//!
//! ```text
//! Idle ─▶ ValidatingEligibility ─▶ ExtractingText ─▶ Prompting ─▶ AwaitingModel
//!                                                                     │
//!          Done ◀─ Settling ◀─ NormalizingAndPersisting ◀─────────────┘
//! ```
//!
//! `Failed` is reachable from every state before the model has answered.
//! Once an answer exists, later problems (unparseable output, a history
//! write error, a refused or failed debit) are recorded as warnings on the
//! [`ReviewOutcome`] and the review still ends in `Done`.
//!
//! ## Credits
//!
//! Paid tiers are gated before any work is done and debited after the model
//! call succeeds, through the store's conditional decrement. Dropping the
//! `review` future before settlement leaves the balance untouched: the
//! debit is the last store call and is a single atomic operation.

use crate::config::{ModelOption, ReviewConfig};
use crate::error::{BookkeepingError, ReviewError};
use crate::ledger::{CreditLedger, CreditSnapshot};
use crate::output::{CreditStatus, HistoryRecord, NormalizedReport, ReviewOutcome, ReviewStats};
use crate::pipeline::extract::{PdfiumExtractor, TextExtractor};
use crate::pipeline::input::Document;
use crate::pipeline::llm::{
    collect_reply, LlmModelProvider, ModelError, ModelProvider, ModelRequest,
};
use crate::pipeline::normalize::format_percent;
use crate::pipeline::parse::parse_report;
use crate::progress::ReviewState;
use crate::prompts::build_review_prompt;
use crate::session::UserId;
use crate::store::{CreditStore, DebitOutcome, HistoryStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One user-initiated review.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub document: Option<Document>,
    /// Model id; `None` uses the catalog's current selection.
    pub model: Option<String>,
    /// Signed-in user. Absent means free tiers only and no history.
    pub user: Option<UserId>,
    pub submitted_at: DateTime<Utc>,
    /// Balance the caller already holds, e.g. from a credits panel.
    /// Absent means the ledger is read fresh.
    pub cached_credits: Option<CreditSnapshot>,
}

impl AnalysisRequest {
    pub fn new(document: Option<Document>) -> Self {
        Self {
            document,
            model: None,
            user: None,
            submitted_at: Utc::now(),
            cached_credits: None,
        }
    }

    pub fn model(mut self, id: impl Into<String>) -> Self {
        self.model = Some(id.into());
        self
    }

    pub fn user(mut self, user: Option<UserId>) -> Self {
        self.user = user;
        self
    }

    pub fn cached_credits(mut self, snapshot: CreditSnapshot) -> Self {
        self.cached_credits = Some(snapshot);
        self
    }
}

/// Runs reviews against a fixed set of collaborators.
pub struct Reviewer {
    config: ReviewConfig,
    model: Arc<dyn ModelProvider>,
    extractor: Arc<dyn TextExtractor>,
    ledger: CreditLedger,
    history: Arc<dyn HistoryStore>,
}

impl std::fmt::Debug for Reviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reviewer")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl Reviewer {
    pub fn new(
        config: ReviewConfig,
        model: Arc<dyn ModelProvider>,
        extractor: Arc<dyn TextExtractor>,
        credits: Arc<dyn CreditStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let ledger = CreditLedger::new(credits, config.monthly_credit_limit);
        Self {
            config,
            model,
            extractor,
            ledger,
            history,
        }
    }

    /// Production wiring: edgequake-llm for the model, pdfium for text, and
    /// one store for both credits and history.
    pub fn with_store<S>(config: ReviewConfig, store: Arc<S>) -> Self
    where
        S: CreditStore + HistoryStore + 'static,
    {
        let model = Arc::new(LlmModelProvider::from_config(&config));
        Self::new(
            config,
            model,
            Arc::new(PdfiumExtractor::new()),
            store.clone(),
            store,
        )
    }

    /// Replace the ledger, e.g. to inject a clock.
    pub fn with_ledger(mut self, ledger: CreditLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// Run one review to completion.
    ///
    /// # Errors
    /// Any [`ReviewError`] means the model never answered and nothing was
    /// charged or written.
    pub async fn review(&self, request: AnalysisRequest) -> Result<ReviewOutcome, ReviewError> {
        let started = Instant::now();
        self.notify(ReviewState::Idle);

        match self.run(request, started).await {
            Ok(outcome) => {
                self.notify(ReviewState::Done);
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_review_complete(outcome.is_structured());
                }
                info!(
                    "Review done in {}ms ({} warnings)",
                    outcome.stats.total_duration_ms,
                    outcome.warnings.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                self.notify(ReviewState::Failed);
                warn!("Review failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: AnalysisRequest,
        started: Instant,
    ) -> Result<ReviewOutcome, ReviewError> {
        let AnalysisRequest {
            document,
            model,
            user,
            submitted_at,
            cached_credits,
        } = request;

        let document = document.ok_or(ReviewError::NoFileSelected)?;
        let option = self.resolve_option(model.as_deref())?;
        let mut stats = ReviewStats::default();

        // ── Gate ─────────────────────────────────────────────────────────
        self.notify(ReviewState::ValidatingEligibility);
        let approved = self
            .ledger
            .authorize(user.as_deref(), &option, cached_credits)
            .await?;

        // ── Extract ──────────────────────────────────────────────────────
        self.notify(ReviewState::ExtractingText);
        let file_name = document.file_name.clone();
        let t = Instant::now();
        let text = self.extract(document).await?;
        stats.extract_duration_ms = t.elapsed().as_millis() as u64;
        stats.extracted_chars = text.chars().count();
        debug!("Extracted {} chars", stats.extracted_chars);

        // ── Prompt ───────────────────────────────────────────────────────
        self.notify(ReviewState::Prompting);
        let prompt = build_review_prompt(self.config.system_prompt.as_deref(), &text);
        stats.prompt_chars = prompt.chars().count();

        // ── Model ────────────────────────────────────────────────────────
        self.notify(ReviewState::AwaitingModel);
        let t = Instant::now();
        let collected = self.call_model(&option, &prompt).await?;
        stats.model_duration_ms = t.elapsed().as_millis() as u64;
        stats.response_chars = collected.text.chars().count();
        stats.chunks = collected.chunks;
        let raw_text = collected.text;

        // From here on the user has an answer; nothing below returns Err.
        let mut warnings = Vec::new();

        // ── Normalise + persist ──────────────────────────────────────────
        self.notify(ReviewState::NormalizingAndPersisting);
        let report = match parse_report(&raw_text) {
            Ok(report) => Some(report),
            Err(w) => {
                warn!("{}", w);
                warnings.push(w);
                None
            }
        };

        let history = match (&report, user.as_deref()) {
            (Some(report), Some(owner)) => {
                let record = history_record(report, owner, file_name.as_deref(), submitted_at);
                match record {
                    Ok(record) => match self.history.insert_record(&record).await {
                        Ok(()) => {
                            debug!("Saved history record {}", record.id);
                            Some(record)
                        }
                        Err(e) => {
                            let w = BookkeepingError::PersistenceFailed {
                                detail: e.to_string(),
                            };
                            warn!("{}", w);
                            warnings.push(w);
                            None
                        }
                    },
                    Err(w) => {
                        warn!("{}", w);
                        warnings.push(w);
                        None
                    }
                }
            }
            _ => None,
        };

        // ── Settle ───────────────────────────────────────────────────────
        self.notify(ReviewState::Settling);
        let (credits, reconciliation) = match approved {
            Some(snapshot) => self.settle(&option, snapshot, &mut warnings).await,
            None => (CreditStatus::Untouched, None),
        };

        stats.total_duration_ms = started.elapsed().as_millis() as u64;
        Ok(ReviewOutcome {
            model: option.id,
            raw_text,
            report,
            history,
            credits,
            warnings,
            stats,
            reconciliation,
        })
    }

    fn resolve_option(&self, model: Option<&str>) -> Result<ModelOption, ReviewError> {
        let catalog = &self.config.catalog;
        match model {
            Some(id) => catalog
                .get(id)
                .cloned()
                .ok_or_else(|| ReviewError::UnknownModel {
                    model: id.to_string(),
                }),
            None => Ok(catalog.selected().clone()),
        }
    }

    async fn extract(&self, document: Document) -> Result<String, ReviewError> {
        let extractor = Arc::clone(&self.extractor);
        let bytes = document.bytes;
        tokio::task::spawn_blocking(move || extractor.extract_text(&bytes))
            .await
            .map_err(|e| ReviewError::Internal(format!("extraction task panicked: {e}")))?
    }

    async fn call_model(
        &self,
        option: &ModelOption,
        prompt: &str,
    ) -> Result<crate::pipeline::llm::CollectedText, ReviewError> {
        let request = ModelRequest {
            model: &option.id,
            prompt,
            stream: self.config.streaming,
        };
        let reply = self.model.generate(request).await.map_err(model_error)?;
        collect_reply(reply, self.config.progress_callback.as_ref())
            .await
            .map_err(model_error)
    }

    async fn settle(
        &self,
        option: &ModelOption,
        approved: CreditSnapshot,
        warnings: &mut Vec<BookkeepingError>,
    ) -> (CreditStatus, Option<tokio::task::JoinHandle<Option<CreditSnapshot>>>) {
        let user = approved.user_id.clone();
        match self.ledger.debit(&user, &approved.period, option.cost).await {
            Ok(DebitOutcome::Applied { balance }) => (
                CreditStatus::Settled(CreditSnapshot {
                    balance,
                    ..approved
                }),
                None,
            ),
            Ok(DebitOutcome::Insufficient { balance }) => {
                warnings.push(BookkeepingError::DebitRejected {
                    balance,
                    cost: option.cost,
                });
                (
                    CreditStatus::Stale(CreditSnapshot {
                        balance,
                        ..approved
                    }),
                    None,
                )
            }
            Ok(DebitOutcome::Missing) => {
                let w = BookkeepingError::LedgerWriteFailed {
                    detail: format!("no credit account for period {}", approved.period),
                };
                warn!("{}", w);
                warnings.push(w);
                let handle = self.ledger.reconcile(&user);
                (CreditStatus::Stale(approved), Some(handle))
            }
            Err(e) => {
                let w = BookkeepingError::LedgerWriteFailed {
                    detail: e.to_string(),
                };
                warn!("{}", w);
                warnings.push(w);
                let handle = self.ledger.reconcile(&user);
                (CreditStatus::Stale(approved), Some(handle))
            }
        }
    }

    fn notify(&self, state: ReviewState) {
        debug!("Review state: {}", state);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_state(state);
        }
    }
}

fn model_error(e: ModelError) -> ReviewError {
    match e {
        ModelError::NotConfigured { provider, hint } => {
            ReviewError::ProviderNotConfigured { provider, hint }
        }
        ModelError::Call(message) => ReviewError::ModelCallFailed { message },
    }
}

/// Title fallback: model title, then the file name, then "Untitled".
fn history_title(report: &NormalizedReport, file_name: Option<&str>) -> String {
    [report.result.title.as_deref(), file_name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("Untitled")
        .to_string()
}

fn history_record(
    report: &NormalizedReport,
    owner: &str,
    file_name: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<HistoryRecord, BookkeepingError> {
    let full_result =
        serde_json::to_value(&report.result).map_err(|e| BookkeepingError::PersistenceFailed {
            detail: e.to_string(),
        })?;
    Ok(HistoryRecord {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        created_at,
        title: history_title(report, file_name),
        summary: report.result.summary.clone(),
        score: report
            .sta_score
            .map(|v| v.to_string())
            .or_else(|| report.result.score.clone()),
        ai_score: report
            .ai_suspicion
            .map(format_percent)
            .or_else(|| report.result.ai_score.clone()),
        full_result,
    })
}
