//! Progress-callback trait for review state transitions.
//!
//! Inject an [`Arc<dyn ReviewProgressCallback>`] via
//! [`crate::config::ReviewConfigBuilder::progress_callback`] to follow a
//! review through its states and watch streamed chunks arrive.
//!
//! # Example
//!
//! ```rust
//! use sta_review::{ReviewConfig, ReviewProgressCallback, ReviewState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ChunkCounter(AtomicUsize);
//!
//! impl ReviewProgressCallback for ChunkCounter {
//!     fn on_chunk(&self, _chunk_len: usize, _total_len: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ReviewConfig::builder()
//!     .progress_callback(Arc::new(ChunkCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// States of a single review.
///
/// `Failed` is reachable from every state except `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Idle,
    ValidatingEligibility,
    ExtractingText,
    Prompting,
    AwaitingModel,
    NormalizingAndPersisting,
    Settling,
    Done,
    Failed,
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewState::Idle => "idle",
            ReviewState::ValidatingEligibility => "checking credits",
            ReviewState::ExtractingText => "extracting text",
            ReviewState::Prompting => "building prompt",
            ReviewState::AwaitingModel => "waiting for model",
            ReviewState::NormalizingAndPersisting => "normalising result",
            ReviewState::Settling => "settling credits",
            ReviewState::Done => "done",
            ReviewState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Called by the orchestrator as a review progresses.
///
/// All methods default to no-ops so implementors override only what they need.
pub trait ReviewProgressCallback: Send + Sync {
    /// Called on every state transition, `Failed` included.
    fn on_state(&self, state: ReviewState) {
        let _ = state;
    }

    /// Called for each streamed chunk in arrival order.
    ///
    /// # Arguments
    /// * `chunk_len`: byte length of this chunk
    /// * `total_len`: byte length accumulated so far
    fn on_chunk(&self, chunk_len: usize, total_len: usize) {
        let _ = (chunk_len, total_len);
    }

    /// Called once when the review ends in `Done`.
    ///
    /// # Arguments
    /// * `structured`: whether the output parsed into a report
    fn on_review_complete(&self, structured: bool) {
        let _ = structured;
    }
}

/// No-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ReviewProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ReviewConfig`].
pub type ProgressCallback = Arc<dyn ReviewProgressCallback>;
