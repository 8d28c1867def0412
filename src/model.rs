//! The vision-model capability the extraction pipeline depends on.
//!
//! The pipeline never talks to an LLM API directly. It calls
//! [`VisionModel::complete`] with one prompt, one page image and the JSON
//! Schema of the record it expects back, and receives raw text. Parsing,
//! validation and retries happen above this seam, so a test double only has
//! to return strings.
//!
//! [`EdgequakeModel`] adapts any `edgequake_llm` provider (OpenAI, Anthropic,
//! Gemini, Ollama, ...) to this trait.

use crate::config::ExtractionConfig;
use crate::error::MenuExtractError;
use crate::schema::UnitId;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One structured-output request for one unit of work.
#[derive(Debug, Clone, Copy)]
pub struct VisionRequest<'a> {
    /// The unit this request belongs to, for logging and test doubles.
    pub unit: &'a UnitId,
    /// Fully rendered prompt.
    pub prompt: &'a str,
    /// The page the unit is about.
    pub image: &'a ImageData,
    /// Name of the expected record contract.
    pub record: &'static str,
    /// JSON Schema of the expected record.
    pub schema: &'a Value,
}

/// A model call that produced no text at all.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The provider rejected or failed the request (network, auth, 5xx, ...).
    #[error("{0}")]
    Provider(String),

    /// The provider returned an empty completion.
    #[error("provider returned an empty response")]
    EmptyResponse,
}

/// A vision-capable model that answers with text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, request: VisionRequest<'_>) -> Result<String, ModelError>;
}

// ── edgequake-llm adapter ────────────────────────────────────────────────

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct EdgequakeModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl EdgequakeModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, MenuExtractError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }
}

#[async_trait]
impl VisionModel for EdgequakeModel {
    async fn complete(&self, request: VisionRequest<'_>) -> Result<String, ModelError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(system_message(request.record, request.schema)),
            ChatMessage::user_with_images(request.prompt, vec![request.image.clone()]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ModelError::Provider(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            request.unit,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(response.content)
    }
}

/// Stand-in for jobs that only read or edit documents. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredModel;

#[async_trait]
impl VisionModel for UnconfiguredModel {
    async fn complete(&self, _request: VisionRequest<'_>) -> Result<String, ModelError> {
        Err(ModelError::Provider("no vision model configured".into()))
    }
}

/// The instruction that pins the answer to a single JSON object.
fn system_message(record: &str, schema: &Value) -> String {
    let schema = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "You extract structured data from restaurant menu page images.\n\
         Answer with exactly one JSON object that conforms to the JSON Schema \
         below (record type: {record}).\n\
         Do not wrap the JSON in Markdown fences and do not add commentary.\n\
         Use null for optional values that are not printed on the page; never invent values.\n\n\
         JSON Schema:\n{schema}"
    )
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, MenuExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        MenuExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. the pre-built `config.provider`;
/// 2. `config.provider_name` with `config.model` (or [`DEFAULT_MODEL`]);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set;
/// 4. OpenAI, when `OPENAI_API_KEY` is set;
/// 5. [`ProviderFactory::from_env`] auto-detection.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, MenuExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| MenuExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
