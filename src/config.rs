//! Configuration types for a paper review.
//!
//! All review behaviour is controlled through [`ReviewConfig`], built via
//! [`ReviewConfigBuilder`]. The model tiers and their credit costs live in a
//! [`ModelCatalog`] inside the config.

use crate::error::ReviewError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Credits consumed by the mid tier.
pub const FLASH_COST: u32 = 50;

/// Credits consumed by the top tier.
pub const PRO_COST: u32 = 100;

/// Configuration for paper reviews.
///
/// # Example
/// ```rust
/// use sta_review::ReviewConfig;
///
/// let config = ReviewConfig::builder()
///     .monthly_credit_limit(300)
///     .streaming(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.catalog.selected().id, "gemini-2.5-flash");
/// ```
#[derive(Clone)]
pub struct ReviewConfig {
    /// Credits each user gets per calendar month. `0` disables every paid tier.
    pub monthly_credit_limit: u32,

    /// Available model tiers and the current selection.
    pub catalog: ModelCatalog,

    /// LLM provider name (e.g. "gemini", "openai"). Default: "gemini".
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`
    /// and is used for every model id.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 8192.
    pub max_tokens: usize,

    /// Consume the answer as a token stream when the provider supports it. Default: true.
    pub streaming: bool,

    /// Replacement for the built-in task description.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives state transitions and streamed chunks.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            monthly_credit_limit: 0,
            catalog: ModelCatalog::default(),
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 8192,
            streaming: true,
            system_prompt: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ReviewConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewConfig")
            .field("monthly_credit_limit", &self.monthly_credit_limit)
            .field("catalog", &self.catalog)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("streaming", &self.streaming)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl ReviewConfig {
    /// Create a new builder for `ReviewConfig`.
    pub fn builder() -> ReviewConfigBuilder {
        ReviewConfigBuilder {
            config: Self::default(),
        }
    }

    /// `true` when paid tiers can be used at all.
    pub fn paid_tiers_enabled(&self) -> bool {
        self.monthly_credit_limit > 0
    }
}

/// Builder for [`ReviewConfig`].
#[derive(Debug)]
pub struct ReviewConfigBuilder {
    config: ReviewConfig,
}

impl ReviewConfigBuilder {
    pub fn monthly_credit_limit(mut self, limit: u32) -> Self {
        self.config.monthly_credit_limit = limit;
        self
    }

    /// Parse a limit from text (e.g. an env var). Invalid or negative input disables paid tiers.
    pub fn monthly_credit_limit_str(mut self, raw: &str) -> Self {
        self.config.monthly_credit_limit = raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v.min(u32::MAX as i64) as u32)
            .unwrap_or(0);
        self
    }

    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.config.catalog = catalog;
        self
    }

    pub fn model(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if let Some(idx) = self.config.catalog.position(&id) {
            self.config.catalog.selected = idx;
        } else {
            // rejected in build()
            self.config.catalog.selected = usize::MAX;
        }
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn streaming(mut self, v: bool) -> Self {
        self.config.streaming = v;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ReviewConfig, ReviewError> {
        let c = &self.config;
        if c.catalog.options.is_empty() {
            return Err(ReviewError::InvalidConfig(
                "model catalog must contain at least one option".into(),
            ));
        }
        if c.catalog.selected >= c.catalog.options.len() {
            return Err(ReviewError::InvalidConfig(
                "selected model is not in the catalog".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ReviewError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Model tiers ──────────────────────────────────────────────────────────

/// One selectable model tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    /// Provider model identifier, e.g. "gemini-2.5-pro".
    pub id: String,
    /// Display label, e.g. "Pro".
    pub label: String,
    /// Credits debited per successful review. `0` means unmetered.
    pub cost: u32,
    /// Help text shown under the selector.
    pub helper: String,
}

impl ModelOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>, cost: u32) -> Self {
        let helper = if cost == 0 {
            "No credits required".to_string()
        } else {
            format!("Consumes {cost} credits per analysis")
        };
        Self {
            id: id.into(),
            label: label.into(),
            cost,
            helper,
        }
    }

    /// Zero-cost options are always eligible.
    pub fn is_free(&self) -> bool {
        self.cost == 0
    }
}

/// The model tiers on offer, with exactly one selected.
///
/// Deserialisation goes through the same checks as [`ModelCatalog::new`]:
/// an empty list or an out-of-range selection is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CatalogRepr")]
pub struct ModelCatalog {
    options: Vec<ModelOption>,
    selected: usize,
}

#[derive(Deserialize)]
struct CatalogRepr {
    options: Vec<ModelOption>,
    #[serde(default)]
    selected: usize,
}

impl TryFrom<CatalogRepr> for ModelCatalog {
    type Error = ReviewError;

    fn try_from(repr: CatalogRepr) -> Result<Self, Self::Error> {
        let mut catalog = Self::new(repr.options)?;
        if repr.selected >= catalog.options.len() {
            return Err(ReviewError::InvalidConfig(format!(
                "selected model index {} is out of range",
                repr.selected
            )));
        }
        catalog.selected = repr.selected;
        Ok(catalog)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            options: vec![
                ModelOption::new("gemini-2.5-flash-lite", "Superfast", 0),
                ModelOption::new("gemini-2.5-flash", "Flash", FLASH_COST),
                ModelOption::new("gemini-2.5-pro", "Pro", PRO_COST),
            ],
            selected: 1,
        }
    }
}

impl ModelCatalog {
    /// Build a catalog; the first option starts selected.
    pub fn new(options: Vec<ModelOption>) -> Result<Self, ReviewError> {
        if options.is_empty() {
            return Err(ReviewError::InvalidConfig(
                "model catalog must contain at least one option".into(),
            ));
        }
        Ok(Self {
            options,
            selected: 0,
        })
    }

    pub fn options(&self) -> &[ModelOption] {
        &self.options
    }

    /// The currently selected option.
    ///
    /// Falls back to the first option if the selection index is invalid;
    /// [`ReviewConfigBuilder::build`] rejects that state.
    pub fn selected(&self) -> &ModelOption {
        self.options
            .get(self.selected)
            .unwrap_or(&self.options[0])
    }

    pub fn get(&self, id: &str) -> Option<&ModelOption> {
        self.options.iter().find(|o| o.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.options.iter().position(|o| o.id == id)
    }

    /// Move the selection to `id`.
    ///
    /// Eligibility is not checked here; use
    /// [`crate::ledger::CreditLedger::select_option`] for the gated variant.
    pub fn select(&mut self, id: &str) -> Result<&ModelOption, ReviewError> {
        let idx = self.position(id).ok_or_else(|| ReviewError::UnknownModel {
            model: id.to_string(),
        })?;
        self.selected = idx;
        Ok(&self.options[idx])
    }
}
