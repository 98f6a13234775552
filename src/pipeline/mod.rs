//! Pipeline stages for reviewing a paper.
//!
//! Each submodule implements exactly one step. The orchestrator in
//! [`crate::review`] wires them together and owns the state machine.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ (prompt) ──▶ llm ──▶ parse ──▶ normalize
//! (path/URL)  (pdfium)               (model)  (JSON)    (scores)
//! ```
//!
//! 1. [`input`]  : load PDF bytes from a path or URL and check the magic
//! 2. [`extract`]: page-ordered plain text; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`llm`]    : one model call, streamed or not; the only stage with
//!    network I/O besides URL downloads
//! 4. [`parse`]  : strip markdown fences and decode the analysis object
//! 5. [`normalize`]: canonical STA score and suspicion percentage

pub mod extract;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod parse;
