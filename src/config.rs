//! Configuration types for menu extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Every knob lives in one struct so a
//! job run can be reproduced from its logged configuration.

use crate::error::MenuExtractError;
use crate::progress::ProgressCallback;
use crate::schema::Stage;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for extracting a menu.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use menu_extract::{ExtractionConfig, StageAttempts};
///
/// let config = ExtractionConfig::builder()
///     .concurrency(4)
///     .model("gpt-4.1-mini")
///     .attempts(StageAttempts { items: 4, ..StageAttempts::default() })
///     .build()
///     .unwrap();
/// assert_eq!(config.attempts.items, 4);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum number of units in flight at once, across every stage run
    /// through the same extractor. Default: 4.
    ///
    /// Each unit holds its slot for its whole retry loop, so this is also an
    /// upper bound on concurrent model calls.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, the provider's
    /// default (or `EDGEQUAKE_MODEL`) is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per unit. Default: 8192.
    ///
    /// A long category with many add-on groups easily exceeds 4 000 output
    /// tokens; a truncated response is a syntax error and burns an attempt.
    pub max_tokens: usize,

    /// Attempt budgets per stage. Default: 2 / 3 / 2 / 2.
    pub attempts: StageAttempts,

    /// Fixed delay between attempts of one unit, in milliseconds. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted menus.
    pub password: Option<String>,

    /// Root of the job storage tree (`uploads/`, `outputs/`). Default: `./storage`.
    pub storage_dir: PathBuf,

    /// Directory of prompt template overrides. If None, built-ins are used.
    pub prompts_dir: Option<PathBuf>,

    /// Receives per-stage and per-unit progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            attempts: StageAttempts::default(),
            retry_backoff_ms: 1000,
            api_timeout_secs: 120,
            max_rendered_pixels: 2000,
            password: None,
            storage_dir: PathBuf::from("./storage"),
            prompts_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("attempts", &self.attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("storage_dir", &self.storage_dir)
            .field("prompts_dir", &self.prompts_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
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

    pub fn attempts(mut self, attempts: StageAttempts) -> Self {
        self.config.attempts = attempts;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    pub fn prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.prompts_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, MenuExtractError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(MenuExtractError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(MenuExtractError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(MenuExtractError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        for stage in Stage::ALL {
            if c.attempts.for_stage(stage) == 0 {
                return Err(MenuExtractError::InvalidConfig(format!(
                    "Attempt budget for {} must be ≥ 1",
                    stage
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Attempt budgets ──────────────────────────────────────────────────────

/// How many times each stage may call the model for one unit.
///
/// Stage 2 gets one more attempt than the others: item lists are the longest
/// responses and the most likely to come back truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempts {
    pub categories: u32,
    pub items: u32,
    pub bases: u32,
    pub addons: u32,
}

impl Default for StageAttempts {
    fn default() -> Self {
        Self {
            categories: 2,
            items: 3,
            bases: 2,
            addons: 2,
        }
    }
}

impl StageAttempts {
    /// The same budget for every stage.
    pub fn uniform(n: u32) -> Self {
        Self {
            categories: n,
            items: n,
            bases: n,
            addons: n,
        }
    }

    pub fn for_stage(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Categories => self.categories,
            Stage::Items => self.items,
            Stage::Bases => self.bases,
            Stage::Addons => self.addons,
        }
    }
}
