//! # sta-review
//!
//! Review research papers with a large language model: extract the text of a
//! PDF, ask a model for an STA quality score (0–500) and an AI-authorship
//! suspicion percentage, normalise whatever it answers, keep a history, and
//! charge paid model tiers against a monthly credit allowance.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Gate     paid tiers: identity, period, balance ≥ cost
//!  ├─ 2. Extract  page-ordered text via pdfium (spawn_blocking)
//!  ├─ 3. Prompt   task + example pair + text
//!  ├─ 4. Model    one call, streamed or not, no retries
//!  ├─ 5. Parse    strip fences, decode JSON, normalise scores, save history
//!  └─ 6. Settle   atomic conditional debit for paid tiers
//! ```
//!
//! Anything that goes wrong before the model answers is an `Err`. After that,
//! problems are warnings on the [`ReviewOutcome`]: a user who got an answer
//! is never told the review failed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sta_review::{AnalysisRequest, Document, MemoryStore, ReviewConfig, Reviewer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider key read from GEMINI_API_KEY
//!     let config = ReviewConfig::builder()
//!         .monthly_credit_limit(300)
//!         .build()?;
//!     let reviewer = Reviewer::with_store(config, Arc::new(MemoryStore::new()));
//!
//!     let bytes = std::fs::read("paper.pdf")?;
//!     let request = AnalysisRequest::new(Some(Document::from_bytes(bytes, None)))
//!         .model("gemini-2.5-flash")
//!         .user(Some("alice".into()));
//!     let outcome = reviewer.review(request).await?;
//!
//!     match &outcome.report {
//!         Some(report) => println!("STA {}  AI {}", report.sta_display(), report.suspicion_display()),
//!         None => println!("{}", outcome.raw_text),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature    | Default | Description |
//! |------------|---------|-------------|
//! | `cli`      | on      | Enables the `sta-review` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `postgres` | off     | `PgStore` credit/history backend over sqlx |
//!
//! ## Model Tiers
//!
//! | Model | Label | Credits |
//! |-------|-------|---------|
//! | `gemini-2.5-flash-lite` | Superfast | 0 |
//! | `gemini-2.5-flash`      | Flash     | 50 (default selection) |
//! | `gemini-2.5-pro`        | Pro       | 100 |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod review;
pub mod session;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ModelCatalog, ModelOption, ReviewConfig, ReviewConfigBuilder, FLASH_COST, PRO_COST};
pub use error::{BookkeepingError, DenialReason, ReviewError, StoreError};
pub use ledger::{CreditLedger, CreditSnapshot, CreditView, OptionStatus};
pub use output::{AnalysisResult, CreditStatus, HistoryRecord, NormalizedReport, ReviewOutcome, ReviewStats};
pub use pipeline::extract::{PdfiumExtractor, TextExtractor};
pub use pipeline::input::{load_document, Document};
pub use pipeline::llm::{LlmModelProvider, ModelError, ModelProvider, ModelReply, ModelRequest};
pub use pipeline::normalize::{normalize_percent, normalize_sta_score};
pub use pipeline::parse::{extract_authors, parse_analysis};
pub use progress::{NoopProgressCallback, ProgressCallback, ReviewProgressCallback, ReviewState};
pub use review::{AnalysisRequest, Reviewer};
pub use session::{SessionProvider, StaticSession, UserId, WatchSession};
pub use store::{CreditAccount, CreditStore, DebitOutcome, HistoryStore, MemoryStore};
#[cfg(feature = "postgres")]
pub use store::PgStore;
