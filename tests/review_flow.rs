//! Integration tests for the review orchestrator.
//!
//! The model and the text extractor are scripted fakes and credits/history
//! live in a `MemoryStore`, so these run without network access or pdfium.
//!
//! Run with:
//!   cargo test --test review_flow

use async_trait::async_trait;
use futures::stream;
use sta_review::{
    AnalysisRequest, BookkeepingError, CreditAccount, CreditSnapshot, CreditStatus, CreditStore,
    DebitOutcome, DenialReason, Document, HistoryStore, MemoryStore, ModelError, ModelProvider,
    ModelReply, ModelRequest, ReviewConfig, ReviewError, ReviewProgressCallback, ReviewState,
    Reviewer, StoreError, TextExtractor,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

const ANALYSIS: &str = r#"{"title":"Sales Forecasting with LSTM","author":"Kim, J. and Lee, S.","score":"420/500","scoreUsage":"STA rubric","aiScore":"85%","aiReason":"uniform phrasing","summary":"LSTM beats the baselines."}"#;

enum Script {
    Text(String),
    Chunks(Vec<String>),
    Fail(String),
    BrokenStream(Vec<String>, String),
}

struct ScriptedModel {
    script: Script,
    calls: AtomicUsize,
    models: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().unwrap().push(request.model.to_string());
        assert!(request.prompt.contains("Deep learning for sales forecasting"));

        let chunks = |items: &[String], tail: Option<&String>| {
            let mut out: Vec<Result<String, ModelError>> =
                items.iter().cloned().map(Ok).collect();
            if let Some(msg) = tail {
                out.push(Err(ModelError::Call(msg.clone())));
            }
            ModelReply::Stream(Box::pin(stream::iter(out)))
        };

        match &self.script {
            Script::Text(t) => Ok(ModelReply::Text(t.clone())),
            Script::Chunks(items) => Ok(chunks(items.as_slice(), None)),
            Script::Fail(msg) => Err(ModelError::Call(msg.clone())),
            Script::BrokenStream(items, msg) => Ok(chunks(items.as_slice(), Some(msg))),
        }
    }
}

#[derive(Default)]
struct FakeExtractor {
    calls: AtomicUsize,
}

impl TextExtractor for FakeExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ReviewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !bytes.starts_with(b"%PDF") {
            return Err(ReviewError::DocumentUnreadable {
                detail: "missing %PDF header".into(),
            });
        }
        Ok("Deep learning for sales forecasting\nResults\n".to_string())
    }
}

/// Counts every credit-store call on top of a `MemoryStore`.
struct CountingCredits {
    inner: Arc<MemoryStore>,
    calls: AtomicUsize,
}

#[async_trait]
impl CreditStore for CountingCredits {
    async fn get_account(
        &self,
        user_id: &str,
        period: &str,
    ) -> Result<Option<CreditAccount>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_account(user_id, period).await
    }

    async fn insert_if_absent(&self, account: CreditAccount) -> Result<CreditAccount, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_if_absent(account).await
    }

    async fn try_debit(
        &self,
        user_id: &str,
        period: &str,
        cost: u32,
    ) -> Result<DebitOutcome, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.try_debit(user_id, period, cost).await
    }
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<ReviewState>>,
    chunks: AtomicUsize,
    completed: Mutex<Option<bool>>,
}

impl ReviewProgressCallback for Recorder {
    fn on_state(&self, state: ReviewState) {
        self.states.lock().unwrap().push(state);
    }
    fn on_chunk(&self, _chunk_len: usize, _total_len: usize) {
        self.chunks.fetch_add(1, Ordering::SeqCst);
    }
    fn on_review_complete(&self, structured: bool) {
        *self.completed.lock().unwrap() = Some(structured);
    }
}

struct Harness {
    reviewer: Reviewer,
    store: Arc<MemoryStore>,
    credits: Arc<CountingCredits>,
    model: Arc<ScriptedModel>,
    extractor: Arc<FakeExtractor>,
    progress: Arc<Recorder>,
}

impl Harness {
    fn new(monthly_limit: u32, script: Script) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let credits = Arc::new(CountingCredits {
            inner: store.clone(),
            calls: AtomicUsize::new(0),
        });
        let model = ScriptedModel::new(script);
        let extractor = Arc::new(FakeExtractor::default());
        let progress = Arc::new(Recorder::default());

        let config = ReviewConfig::builder()
            .monthly_credit_limit(monthly_limit)
            .progress_callback(progress.clone())
            .build()
            .unwrap();
        let reviewer = Reviewer::new(
            config,
            model.clone(),
            extractor.clone(),
            credits.clone(),
            store.clone(),
        );
        Self {
            reviewer,
            store,
            credits,
            model,
            extractor,
            progress,
        }
    }

    fn period(&self) -> String {
        self.reviewer.ledger().current_period()
    }

    async fn balance(&self, user: &str) -> Option<u32> {
        self.store
            .get_account(user, &self.period())
            .await
            .unwrap()
            .map(|a| a.balance)
    }

    fn states(&self) -> Vec<ReviewState> {
        self.progress.states.lock().unwrap().clone()
    }
}

fn paper() -> Document {
    Document::from_bytes(b"%PDF-1.7 fake body".to_vec(), Some("sales.pdf".into()))
}

fn request(model: &str, user: Option<&str>) -> AnalysisRequest {
    AnalysisRequest::new(Some(paper()))
        .model(model)
        .user(user.map(str::to_string))
}

fn fenced_chunks() -> Vec<String> {
    let fenced = format!("```json\n{ANALYSIS}\n```");
    let mid = fenced.len() / 2;
    vec![
        fenced[..10].to_string(),
        fenced[10..mid].to_string(),
        fenced[mid..].to_string(),
    ]
}

// ── Free tier ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn free_tier_anonymous_unparseable_output_is_done_with_raw_text() {
    let h = Harness::new(300, Script::Text("I could not score this paper.".into()));

    let outcome = h
        .reviewer
        .review(request("gemini-2.5-flash-lite", None))
        .await
        .expect("review should succeed");

    assert_eq!(outcome.raw_text, "I could not score this paper.");
    assert!(outcome.report.is_none());
    assert!(outcome.history.is_none());
    assert_eq!(outcome.credits, CreditStatus::Untouched);
    assert!(matches!(
        outcome.warnings.as_slice(),
        [BookkeepingError::ResultUnparseable { .. }]
    ));
    assert_eq!(h.credits.calls.load(Ordering::SeqCst), 0, "ledger was touched");
    assert_eq!(
        h.states(),
        vec![
            ReviewState::Idle,
            ReviewState::ValidatingEligibility,
            ReviewState::ExtractingText,
            ReviewState::Prompting,
            ReviewState::AwaitingModel,
            ReviewState::NormalizingAndPersisting,
            ReviewState::Settling,
            ReviewState::Done,
        ]
    );
    assert_eq!(*h.progress.completed.lock().unwrap(), Some(false));
}

#[tokio::test]
async fn free_tier_works_with_paid_tiers_disabled() {
    let h = Harness::new(0, Script::Text(ANALYSIS.into()));
    let outcome = h
        .reviewer
        .review(request("gemini-2.5-flash-lite", None))
        .await
        .unwrap();
    let report = outcome.report.expect("structured report");
    assert_eq!(report.sta_score, Some(420));
    // Anonymous reviews are not saved.
    assert!(outcome.history.is_none());
}

#[tokio::test]
async fn free_tier_signed_in_saves_history_but_never_debits() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    let outcome = h
        .reviewer
        .review(request("gemini-2.5-flash-lite", Some("alice")))
        .await
        .unwrap();
    assert!(outcome.history.is_some());
    assert_eq!(outcome.credits, CreditStatus::Untouched);
    assert_eq!(h.credits.calls.load(Ordering::SeqCst), 0);
}

// ── Request validation ───────────────────────────────────────────────────────

#[tokio::test]
async fn missing_file_contacts_nobody() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    let err = h
        .reviewer
        .review(AnalysisRequest::new(None).user(Some("alice".into())))
        .await
        .unwrap_err();

    assert!(matches!(err, ReviewError::NoFileSelected));
    assert_eq!(err.to_string(), "Please select a PDF file.");
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.credits.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.states(), vec![ReviewState::Idle, ReviewState::Failed]);
}

#[tokio::test]
async fn unknown_model_is_refused() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    let err = h
        .reviewer
        .review(request("gpt-9-ultra", Some("alice")))
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::UnknownModel { ref model } if model == "gpt-9-ultra"));
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn default_selection_is_flash() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    let req = AnalysisRequest::new(Some(paper())).user(Some("alice".into()));
    let outcome = h.reviewer.review(req).await.unwrap();
    assert_eq!(outcome.model, "gemini-2.5-flash");
    assert_eq!(h.balance("alice").await, Some(250));
}

#[tokio::test]
async fn unreadable_document_fails_before_the_model() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    let req = AnalysisRequest::new(Some(Document::from_bytes(b"<html>".to_vec(), None)))
        .model("gemini-2.5-flash-lite");
    let err = h.reviewer.review(req).await.unwrap_err();
    assert!(matches!(err, ReviewError::DocumentUnreadable { .. }));
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
}

// ── Eligibility gate ─────────────────────────────────────────────────────────

#[tokio::test]
async fn paid_tier_gate_reasons() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    let err = h
        .reviewer
        .review(request("gemini-2.5-pro", None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReviewError::EligibilityDenied {
            reason: DenialReason::Unauthenticated
        }
    ));

    let off = Harness::new(0, Script::Text(ANALYSIS.into()));
    let err = off
        .reviewer
        .review(request("gemini-2.5-pro", Some("alice")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReviewError::EligibilityDenied {
            reason: DenialReason::Unconfigured
        }
    ));
    assert_eq!(off.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn insufficient_balance_is_refused_without_side_effects() {
    let h = Harness::new(30, Script::Text(ANALYSIS.into()));
    let err = h
        .reviewer
        .review(request("gemini-2.5-flash", Some("alice")))
        .await
        .unwrap_err();

    assert!(err.is_recoverable());
    match err {
        ReviewError::EligibilityDenied {
            reason: DenialReason::InsufficientBalance { balance, cost },
        } => {
            assert_eq!(balance, 30);
            assert_eq!(cost, 50);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.balance("alice").await, Some(30));
    assert!(h.store.list_for_owner("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_cached_balance_is_refused_and_refreshed() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    let stale = CreditSnapshot {
        user_id: "alice".into(),
        period: "1999-12".into(),
        balance: 300,
        limit: 300,
    };
    let err = h
        .reviewer
        .review(request("gemini-2.5-pro", Some("alice")).cached_credits(stale))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReviewError::EligibilityDenied {
            reason: DenialReason::StalePeriod { .. }
        }
    ));
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    // The refresh materialised this month's account.
    assert_eq!(h.balance("alice").await, Some(300));
}

// ── Paid tier happy path ─────────────────────────────────────────────────────

#[tokio::test]
async fn paid_review_streams_parses_saves_and_debits_once() {
    let h = Harness::new(300, Script::Chunks(fenced_chunks()));

    let outcome = h
        .reviewer
        .review(request("gemini-2.5-flash", Some("alice")))
        .await
        .unwrap();

    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.stats.chunks, 3);
    assert_eq!(h.progress.chunks.load(Ordering::SeqCst), 3);
    assert!(outcome.raw_text.starts_with("```json"));

    let report = outcome.report.as_ref().expect("structured report");
    assert_eq!(report.authors, vec!["Kim, J.", "Lee, S."]);
    assert_eq!(report.sta_score, Some(420));
    assert_eq!(report.ai_suspicion, Some(85.0));
    assert_eq!(report.sta_display(), "420 / 500");

    let record = outcome.history.as_ref().expect("history record");
    assert_eq!(record.title, "Sales Forecasting with LSTM");
    assert_eq!(record.score.as_deref(), Some("420"));
    assert_eq!(record.ai_score.as_deref(), Some("85"));
    assert_eq!(record.full_result["scoreUsage"], "STA rubric");

    match outcome.credits {
        CreditStatus::Settled(ref s) => {
            assert_eq!(s.balance, 250);
            assert_eq!(s.limit, 300);
        }
        ref other => panic!("unexpected credits: {other:?}"),
    }
    assert_eq!(h.balance("alice").await, Some(250));
    assert_eq!(h.store.list_for_owner("alice").await.unwrap().len(), 1);
    assert_eq!(*h.model.models.lock().unwrap(), vec!["gemini-2.5-flash"]);
    assert_eq!(*h.progress.completed.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn title_falls_back_to_file_name() {
    let h = Harness::new(300, Script::Text(r#"{"score":"0.5","aiScore":"1/4"}"#.into()));
    let outcome = h
        .reviewer
        .review(request("gemini-2.5-pro", Some("alice")))
        .await
        .unwrap();
    let record = outcome.history.unwrap();
    assert_eq!(record.title, "sales.pdf");
    assert_eq!(record.score.as_deref(), Some("250"));
    assert_eq!(record.ai_score.as_deref(), Some("25"));
    assert_eq!(h.balance("alice").await, Some(200));
}

// ── Failures after the gate ──────────────────────────────────────────────────

#[tokio::test]
async fn model_failure_is_verbatim_and_charges_nothing() {
    let h = Harness::new(300, Script::Fail("429 quota exceeded".into()));
    let err = h
        .reviewer
        .review(request("gemini-2.5-pro", Some("alice")))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "429 quota exceeded");
    assert!(!err.is_recoverable());
    assert_eq!(h.balance("alice").await, Some(300));
    assert!(h.store.list_for_owner("alice").await.unwrap().is_empty());
    assert_eq!(h.states().last(), Some(&ReviewState::Failed));
}

#[tokio::test]
async fn broken_stream_discards_partial_text_and_charges_nothing() {
    let h = Harness::new(
        300,
        Script::BrokenStream(vec!["{\"title\":".into()], "stream reset by peer".into()),
    );
    let err = h
        .reviewer
        .review(request("gemini-2.5-flash", Some("alice")))
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::ModelCallFailed { ref message } if message == "stream reset by peer"));
    assert_eq!(h.balance("alice").await, Some(300));
}

#[tokio::test]
async fn empty_stream_is_unparseable_but_still_settled() {
    let h = Harness::new(300, Script::Chunks(vec![]));
    let outcome = h
        .reviewer
        .review(request("gemini-2.5-flash", Some("alice")))
        .await
        .unwrap();
    assert_eq!(outcome.raw_text, "");
    assert!(outcome.report.is_none());
    assert!(outcome.history.is_none());
    assert!(matches!(
        outcome.warnings.as_slice(),
        [BookkeepingError::ResultUnparseable { .. }]
    ));
    assert!(matches!(outcome.credits, CreditStatus::Settled(ref s) if s.balance == 250));
}

#[tokio::test]
async fn history_write_failure_is_absorbed() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    h.store.fail_history_writes(true);

    let outcome = h
        .reviewer
        .review(request("gemini-2.5-flash", Some("alice")))
        .await
        .expect("a failed history write must not fail the review");

    assert!(outcome.report.is_some());
    assert!(outcome.history.is_none());
    assert!(matches!(
        outcome.warnings.as_slice(),
        [BookkeepingError::PersistenceFailed { .. }]
    ));
    assert!(matches!(outcome.credits, CreditStatus::Settled(ref s) if s.balance == 250));
    assert_eq!(h.states().last(), Some(&ReviewState::Done));
}

#[tokio::test]
async fn ledger_write_failure_starts_reconciliation() {
    let h = Harness::new(300, Script::Text(ANALYSIS.into()));
    // Materialise first so the gate passes, then break writes.
    h.reviewer.ledger().fetch("alice").await.unwrap();
    h.store.fail_credit_writes(true);

    let mut outcome = h
        .reviewer
        .review(request("gemini-2.5-flash", Some("alice")))
        .await
        .expect("a failed debit must not fail the review");

    assert!(outcome.report.is_some());
    assert!(matches!(
        outcome.warnings.as_slice(),
        [BookkeepingError::LedgerWriteFailed { .. }]
    ));
    assert!(matches!(outcome.credits, CreditStatus::Stale(_)));

    let handle = outcome.reconciliation.take().expect("reconciliation task");
    let refreshed = handle.await.unwrap().expect("re-fetched balance");
    assert_eq!(refreshed.balance, 300);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_paid_reviews_cannot_overspend() {
    let h = Arc::new(Harness::new(50, Script::Text(ANALYSIS.into())));

    let a = {
        let h = h.clone();
        tokio::spawn(async move {
            h.reviewer
                .review(request("gemini-2.5-flash", Some("alice")))
                .await
        })
    };
    let b = {
        let h = h.clone();
        tokio::spawn(async move {
            h.reviewer
                .review(request("gemini-2.5-flash", Some("alice")))
                .await
        })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let mut settled = 0;
    for result in results {
        match result {
            Ok(outcome) => match outcome.credits {
                CreditStatus::Settled(_) => settled += 1,
                CreditStatus::Stale(_) => assert!(matches!(
                    outcome.warnings.as_slice(),
                    [BookkeepingError::DebitRejected { cost: 50, .. }]
                )),
                CreditStatus::Untouched => panic!("paid review left credits untouched"),
            },
            // The second review may also be stopped at the gate.
            Err(ReviewError::EligibilityDenied { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(settled, 1);
    assert_eq!(h.balance("alice").await, Some(0));
}
