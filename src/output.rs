//! Result types produced by a review.

use crate::error::BookkeepingError;
use crate::ledger::CreditSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The structured analysis a model returns, as-is.
///
/// Missing keys stay `None`; nothing is defaulted. Keys the model adds on
/// top of the known ones are preserved verbatim in [`AnalysisResult::extra`].
/// Score fields are kept as the model's raw text; canonical values live in
/// [`NormalizedReport`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Raw author text: a JSON list (serialised) or a delimited string.
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Raw STA score text, e.g. `"420/500"`.
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,

    /// Scoring criteria the model applied.
    #[serde(
        rename = "scoreUsage",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub score_usage: Option<String>,

    /// Raw AI-suspicion text, e.g. `"85%"`.
    #[serde(
        rename = "aiScore",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub ai_score: Option<String>,

    /// Rationale for the suspicion score.
    #[serde(
        rename = "aiReason",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub ai_reason: Option<String>,

    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accept strings, numbers, booleans, lists and objects for a text field.
///
/// Models routinely answer `"score": 420` or `"author": ["A", "B"]` where a
/// string was asked for. Non-strings are kept as their JSON text so the raw
/// value survives; `null` is absence.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// A parsed analysis with canonical scores derived from the raw fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedReport {
    pub result: AnalysisResult,
    /// Authors split out of [`AnalysisResult::author`]; empty when none were found.
    pub authors: Vec<String>,
    /// Canonical STA score in `0..=500`, `None` when no confident value.
    pub sta_score: Option<u16>,
    /// Canonical suspicion percentage in `0..=100`, `None` when no confident value.
    pub ai_suspicion: Option<f64>,
}

impl NormalizedReport {
    /// STA score for display: canonical `"N / 500"` or the raw model text.
    pub fn sta_display(&self) -> String {
        match self.sta_score {
            Some(v) => format!("{v} / 500"),
            None => self.result.score.clone().unwrap_or_else(|| "Unknown".into()),
        }
    }

    /// Suspicion for display: canonical `"N%"` or the raw model text.
    pub fn suspicion_display(&self) -> String {
        match self.ai_suspicion {
            Some(v) => format!("{}%", crate::pipeline::normalize::format_percent(v)),
            None => self.result.ai_score.clone().unwrap_or_else(|| "Unknown".into()),
        }
    }
}

/// A persisted analysis. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub summary: Option<String>,
    /// Canonical STA score when available, else the raw text.
    pub score: Option<String>,
    /// Canonical suspicion percentage when available, else the raw text.
    pub ai_score: Option<String>,
    /// Full serialised [`AnalysisResult`].
    pub full_result: Value,
}

/// Credit state after settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CreditStatus {
    /// Free tier or unauthenticated: the ledger was not touched.
    Untouched,
    /// The debit was applied.
    Settled(CreditSnapshot),
    /// The debit failed or was refused; the balance shown may be stale
    /// until the reconciliation re-fetch finishes.
    Stale(CreditSnapshot),
}

/// Everything a finished review hands back to the caller.
#[derive(Debug, Serialize)]
pub struct ReviewOutcome {
    /// Model identifier used.
    pub model: String,
    /// Model output, verbatim.
    pub raw_text: String,
    /// Parsed and normalised analysis; `None` when the output was not JSON.
    pub report: Option<NormalizedReport>,
    /// History record written for this review, if any.
    pub history: Option<HistoryRecord>,
    pub credits: CreditStatus,
    /// Non-fatal problems after the model answered.
    pub warnings: Vec<BookkeepingError>,
    pub stats: ReviewStats,
    /// Background re-fetch started after a failed debit write.
    #[serde(skip)]
    pub reconciliation: Option<JoinHandle<Option<CreditSnapshot>>>,
}

impl ReviewOutcome {
    /// `true` when the output parsed into a structured report.
    pub fn is_structured(&self) -> bool {
        self.report.is_some()
    }
}

/// Timing and size figures for one review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub extracted_chars: usize,
    pub prompt_chars: usize,
    pub response_chars: usize,
    /// Chunks received (1 for non-streaming calls).
    pub chunks: usize,
    pub extract_duration_ms: u64,
    pub model_duration_ms: u64,
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_list_fields_keep_raw_json_text() {
        let r: AnalysisResult = serde_json::from_str(
            r#"{"title":"T","author":["A","B"],"score":420,"aiScore":null}"#,
        )
        .unwrap();
        assert_eq!(r.author.as_deref(), Some(r#"["A","B"]"#));
        assert_eq!(r.score.as_deref(), Some("420"));
        assert_eq!(r.ai_score, None);
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let r: AnalysisResult =
            serde_json::from_str(r#"{"summary":"s","keywords":["x"],"lang":"ko"}"#).unwrap();
        assert_eq!(r.extra.len(), 2);
        assert_eq!(r.extra["lang"], Value::String("ko".into()));

        let back = serde_json::to_value(&r).unwrap();
        assert_eq!(back["keywords"][0], "x");
        assert!(back.get("title").is_none());
    }

    #[test]
    fn display_falls_back_to_raw_text() {
        let report = NormalizedReport {
            result: AnalysisResult {
                score: Some("excellent".into()),
                ai_score: Some("85%".into()),
                ..Default::default()
            },
            authors: vec![],
            sta_score: None,
            ai_suspicion: Some(85.0),
        };
        assert_eq!(report.sta_display(), "excellent");
        assert_eq!(report.suspicion_display(), "85%");
    }
}
