//! Result parsing: turn raw model output into an [`AnalysisResult`].
//!
//! Models are asked for bare JSON but regularly wrap it in ```` ```json ````
//! fences or answer in prose. A failed parse is an expected outcome, not an
//! exception: the caller still shows the raw text, it just skips the
//! structured report and the history write.

use crate::error::BookkeepingError;
use crate::output::{AnalysisResult, NormalizedReport};
use crate::pipeline::normalize::{normalize_percent, normalize_sta_score};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n?(.*?)\r?\n?```\s*$").unwrap());

static RE_ANY_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?\n?").unwrap());

static RE_AND: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\band\b").unwrap());

static RE_INITIALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\p{Lu}\.(?:\s*-?\s*)?)+$").unwrap());

/// Strip code-fence markers and surrounding whitespace.
///
/// An outer fence (with any language tag) is removed first; stray fence
/// markers left inside are dropped afterwards.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    };
    RE_ANY_FENCE.replace_all(&inner, "").trim().to_string()
}

/// Parse model output into an [`AnalysisResult`].
///
/// The body must be a JSON object; arrays, scalars and prose yield
/// [`BookkeepingError::ResultUnparseable`]. Empty output is unparseable too.
pub fn parse_analysis(raw: &str) -> Result<AnalysisResult, BookkeepingError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(BookkeepingError::ResultUnparseable {
            detail: "model returned no content".into(),
        });
    }

    let value: Value =
        serde_json::from_str(&body).map_err(|e| BookkeepingError::ResultUnparseable {
            detail: e.to_string(),
        })?;

    if !value.is_object() {
        return Err(BookkeepingError::ResultUnparseable {
            detail: format!("expected a JSON object, got {}", json_kind(&value)),
        });
    }

    serde_json::from_value(value).map_err(|e| BookkeepingError::ResultUnparseable {
        detail: e.to_string(),
    })
}

/// Parse and derive canonical fields in one step.
pub fn parse_report(raw: &str) -> Result<NormalizedReport, BookkeepingError> {
    parse_analysis(raw).map(normalize_report)
}

/// Derive authors and canonical scores from a parsed result.
pub fn normalize_report(result: AnalysisResult) -> NormalizedReport {
    let authors = extract_authors(result.author.as_deref().unwrap_or(""));
    let sta_score = result.score.as_deref().and_then(normalize_sta_score);
    let ai_suspicion = result.ai_score.as_deref().and_then(normalize_percent);
    NormalizedReport {
        result,
        authors,
        sta_score,
        ai_suspicion,
    }
}

/// Split an author field into individual names. Never fails.
///
/// A JSON list is parsed and each entry trimmed. Anything else is split on
/// `and`, `,`, `;`, `&` and newlines. Fragments made only of initials
/// (`J.`, `S. K.`) are joined back onto the preceding surname so that
/// `"Kim, J. and Lee, S."` stays two authors.
pub fn extract_authors(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if let Ok(Value::Array(entries)) = serde_json::from_str::<Value>(trimmed) {
        return entries
            .iter()
            .map(|entry| match entry {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string().trim().to_string(),
            })
            .filter(|entry| !entry.is_empty())
            .collect();
    }

    let normalised = RE_AND.replace_all(trimmed, ",").replace([';', '&', '\n'], ",");

    let mut authors: Vec<String> = Vec::new();
    for fragment in normalised.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        match authors.last_mut() {
            Some(prev) if RE_INITIALS.is_match(fragment) && !RE_INITIALS.is_match(prev) => {
                prev.push_str(", ");
                prev.push_str(fragment);
            }
            _ => authors.push(fragment.to_string()),
        }
    }
    authors
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
