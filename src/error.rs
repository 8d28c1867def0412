//! Error types for the menu-extract library.
//!
//! Failures come in two layers:
//!
//! * [`ExtractionFailure`] - one unit of work (a page, or a page + category)
//!   exhausted its attempt budget. It carries the unit's identity and the
//!   *last* captured [`FailureCause`], so the caller always sees the deepest
//!   diagnostic available rather than a generic "something failed".
//!
//! * [`MenuExtractError`] - **Fatal** for the stage: a unit failure bubbled
//!   up, an upstream document failed re-validation, a required artifact is
//!   missing, or the environment is misconfigured. A stage either returns a
//!   complete document or one of these; there is no partial document.

use crate::prompts::TemplateError;
use crate::schema::{SchemaViolation, Stage, UnitId};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the menu-extract library.
#[derive(Debug, Error)]
pub enum MenuExtractError {
    // ── Unit failures ─────────────────────────────────────────────────────
    /// A unit of work failed after all of its attempts.
    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    /// The prompt for a unit could not be rendered. Never retried.
    #[error(transparent)]
    Template(#[from] TemplateError),

    // ── Inter-stage contract errors ───────────────────────────────────────
    /// A persisted document of a prior stage failed re-validation.
    #[error("{stage} document is invalid: {detail}")]
    UpstreamDocumentInvalid { stage: Stage, detail: String },

    /// Two upstream documents that must describe the same pages and
    /// categories disagree.
    #[error("Upstream documents are misaligned: {detail}")]
    StageMisaligned { detail: String },

    /// A required artifact (PDF, prior-stage document, page image) is absent.
    #[error("Required resource is missing: {resource}")]
    ResourceMissing { resource: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The file is not a PDF at all.
    #[error("Input is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF")]
    WrongPassword,

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Reading or writing an artifact failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A document could not be serialised for persistence.
    #[error("Failed to serialise {stage} document: {source}")]
    Serialization {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A unit of work that failed after exhausting its attempts.
#[derive(Debug, Clone, Error)]
#[error("{unit} failed after {attempts} attempt(s): {cause}")]
pub struct ExtractionFailure {
    /// Which page/category failed.
    pub unit: UnitId,
    /// How many attempts were made.
    pub attempts: u32,
    /// The cause captured on the final attempt.
    pub cause: FailureCause,
}

/// Why a single attempt at a unit of work failed.
#[derive(Debug, Clone, Error)]
pub enum FailureCause {
    /// The model answered, but not with a schema-valid JSON object.
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] ResponseDiagnostic),

    /// Transport or provider-level failure.
    #[error("provider failure: {message}")]
    ProviderFailure { message: String },

    /// The model call did not complete within the per-call timeout.
    #[error("model call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Diagnostic attached to a response that could not be accepted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResponseDiagnostic {
    /// The text is not JSON. `offset` is a byte offset into the cleaned text
    /// and `excerpt` the raw text around it.
    #[error("JSON decode error at byte {offset}: {message} (near {excerpt:?})")]
    Syntax {
        offset: usize,
        message: String,
        excerpt: String,
    },

    /// The text is JSON but violates the record contract.
    #[error(transparent)]
    Schema(#[from] SchemaViolation),
}
