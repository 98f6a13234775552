//! Score normalisation: map free-form model score strings onto canonical ranges.
//!
//! Models answer `"420"`, `"420/500"`, `"0.84"`, `"about 85%"` or `"1/4"` for
//! the same question. Both functions here are total: they never panic and
//! return `None` when no confident value exists. `Some(0)` is a real score
//! and must stay distinguishable from absence.

use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound of the STA scale.
pub const STA_MAX: f64 = 500.0;

/// Upper bound of the suspicion percentage.
pub const PERCENT_MAX: f64 = 100.0;

static RE_FRACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*/\s*(\d+(?:\.\d+)?)").unwrap());

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

static RE_DENOMINATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d+(?:\.\d+)?)").unwrap());

/// Normalise an STA score to an integer in `0..=500`.
///
/// 1. A `n/d` fraction anywhere in the text scales as `n / d × 500`
///    (`d ≤ 0` yields `None`).
/// 2. Otherwise the first number is used: values `≤ 1` are a fraction of 1
///    and scale by 500, larger values are already on the 0–500 scale and are
///    clamped.
pub fn normalize_sta_score(raw: &str) -> Option<u16> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = RE_FRACTION.captures(trimmed) {
        let numerator: f64 = caps[1].parse().ok()?;
        let denominator: f64 = caps[2].parse().ok()?;
        if denominator <= 0.0 {
            return None;
        }
        return round_into_range(numerator / denominator * STA_MAX, STA_MAX);
    }

    let value: f64 = RE_NUMBER.find(trimmed)?.as_str().parse().ok()?;
    if value <= 1.0 {
        round_into_range(value * STA_MAX, STA_MAX)
    } else {
        round_into_range(value, STA_MAX)
    }
}

/// Normalise an AI-suspicion value to a percentage in `0.0..=100.0`.
///
/// Every character other than digits and `.` becomes a separator; the first
/// token that parses as a number wins. When the raw text contains `/` and the
/// number is `≤ 1`, it is divided by the denominator after the slash and
/// scaled to 100. A bare decimal below 2 (`"0.85"`, `"1.2"`) with no `%` or
/// `percent` marker is a ratio of 1 and scales to 100. Any other number is
/// clamped.
pub fn normalize_percent(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_digit() || c == '.' { c } else { ' ' })
        .collect();

    let (token, value) = cleaned.split_whitespace().find_map(|token| {
        token
            .parse::<f64>()
            .ok()
            .filter(|v| !v.is_nan())
            .map(|v| (token, v))
    })?;

    if value <= 1.0 && raw.contains('/') {
        if let Some(denominator) = RE_DENOMINATOR
            .captures(raw)
            .and_then(|caps| caps[1].parse::<f64>().ok())
        {
            if denominator > 0.0 {
                return clamp_percent(value / denominator * PERCENT_MAX);
            }
        }
    }

    if token.contains('.') && value < 2.0 && !has_percent_marker(raw) && !raw.contains('/') {
        return clamp_percent(value * PERCENT_MAX);
    }

    clamp_percent(value)
}

fn has_percent_marker(raw: &str) -> bool {
    raw.contains('%') || raw.to_ascii_lowercase().contains("percent")
}

fn clamp_percent(value: f64) -> Option<f64> {
    if value.is_nan() {
        return None;
    }
    Some(value.clamp(0.0, PERCENT_MAX))
}

/// Render a canonical percentage without a trailing `.0` (`85.0` → `"85"`).
pub fn format_percent(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        let s = format!("{value:.2}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

// NaN (e.g. `inf / inf` from huge operands) has no reading; infinities clamp.
fn round_into_range(value: f64, max: f64) -> Option<u16> {
    if value.is_nan() {
        return None;
    }
    Some(value.clamp(0.0, max).round() as u16)
}
