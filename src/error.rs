//! Error types for the sta-review library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReviewError`]: **Fatal**: the review cannot produce a model answer
//!   (no file, unreadable PDF, eligibility denied, provider failure).
//!   Returned as `Err(ReviewError)` from [`crate::review::Reviewer::review`].
//!
//! * [`BookkeepingError`]: **Non-fatal**: the model already answered but a
//!   downstream step (parsing, history write, credit debit) went wrong.
//!   Stored in [`crate::output::ReviewOutcome::warnings`] so a user who got
//!   an answer is never told the review failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the sta-review library.
#[derive(Debug, Error)]
pub enum ReviewError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The review was requested without a PDF.
    #[error("Please select a PDF file.")]
    NoFileSelected,

    /// The requested model identifier is not in the catalog.
    #[error("Unsupported model selection: '{model}'")]
    UnknownModel { model: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The bytes do not start with the `%PDF` header.
    #[error("Input is not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The PDF could not be parsed; retrying cannot change the outcome.
    #[error("PDF could not be read: {detail}")]
    DocumentUnreadable { detail: String },

    // ── Eligibility ───────────────────────────────────────────────────────
    /// The credit ledger refused a paid-tier review.
    #[error("{reason}")]
    EligibilityDenied { reason: DenialReason },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider could not be created (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The provider call or its stream failed. The message is the provider's.
    #[error("{message}")]
    ModelCallFailed { message: String },

    // ── Storage ───────────────────────────────────────────────────────────
    /// A store operation needed *before* the model call failed
    /// (e.g. materialising the credit account).
    #[error("Credit information could not be loaded: {0}")]
    Store(#[from] StoreError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReviewError {
    /// `true` when the user can retry after resolving the condition.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReviewError::NoFileSelected
                | ReviewError::UnknownModel { .. }
                | ReviewError::EligibilityDenied { .. }
        )
    }
}

/// Why the eligibility gate refused a paid-tier option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    /// Monthly credit limit is zero or absent.
    Unconfigured,
    /// No authenticated identity.
    Unauthenticated,
    /// The balance has not been fetched yet.
    Loading,
    /// The calendar month changed since the balance was fetched.
    StalePeriod { fetched: String, current: String },
    /// The balance does not cover the option's cost.
    InsufficientBalance { balance: u32, cost: u32 },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::Unconfigured => write!(f, "Paid models are not configured."),
            DenialReason::Unauthenticated => write!(f, "Please log in to use paid models."),
            DenialReason::Loading => {
                write!(f, "Credit information is still loading. Please try again shortly.")
            }
            DenialReason::StalePeriod { current, .. } => write!(
                f,
                "A new monthly allowance ({current}) applies; credits are being refreshed. Please try again."
            ),
            DenialReason::InsufficientBalance { balance, cost } => write!(
                f,
                "Not enough credits remaining ({balance} left, {cost} required)."
            ),
        }
    }
}

/// A non-fatal error raised after the model has answered.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookkeepingError {
    /// The model output is not a JSON object; shown as raw text only.
    #[error("Model output could not be parsed as an analysis: {detail}")]
    ResultUnparseable { detail: String },

    /// Writing the history record failed.
    #[error("Failed to save history: {detail}")]
    PersistenceFailed { detail: String },

    /// Writing the credit debit failed; a reconciliation was started.
    #[error("Failed to update credits: {detail}")]
    LedgerWriteFailed { detail: String },

    /// The conditional decrement was refused (a concurrent review spent the balance).
    #[error("Credit debit of {cost} refused; balance is {balance}")]
    DebitRejected { balance: u32, cost: u32 },
}

/// Errors from a [`crate::store::CreditStore`] / [`crate::store::HistoryStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A record could not be (de)serialised.
    #[error("serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}
