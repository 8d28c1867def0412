//! # menu-extract
//!
//! Turn a restaurant menu PDF into structured, priced menu data with Vision
//! Language Models (VLMs).
//!
//! Menus are visual documents: prices sit in columns, add-ons hide in
//! footnotes, sizes live in table headers. Instead of parsing the PDF's text
//! layer, every page is rasterised and shown to a VLM, one narrowly scoped
//! question at a time. Each stage's answers are validated against a typed
//! record contract and persisted as a JSON document the next stage builds on.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ Render   rasterise pages via pdfium (spawn_blocking) → base64 PNG
//!  │
//!  ├─ Stage 1  categories         one unit per page
//!  ├─ Stage 2  items              one unit per (page, category)
//!  ├─ Stage 3  base pricing       one unit per (page, category)
//!  └─ Stage 4  items with add-ons one unit per (page, category)
//!
//! every unit:  prompt ─▶ model ─▶ clean ─▶ parse ─▶ validate ─▶ retry?
//! every stage: bounded fan-out, order-preserving, all-or-nothing
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use menu_extract::{ExtractionConfig, MenuExtractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::builder().storage_dir("storage").build()?;
//!     let extractor = MenuExtractor::from_config(config)?;
//!
//!     let job = extractor.create_job(&std::fs::read("menu.pdf")?).await?;
//!     let menu = extractor.run_all(&job, "Chez Nous").await?;
//!     println!("{}", serde_json::to_string_pretty(&menu)?);
//!     Ok(())
//! }
//! ```
//!
//! Stages can also be run one at a time, with a manual review of the
//! categories between Stage 1 and Stage 2:
//!
//! ```rust,no_run
//! # use menu_extract::{ExtractionConfig, MenuExtractor, Stage};
//! # async fn review(extractor: MenuExtractor, pdf: Vec<u8>) -> Result<(), menu_extract::MenuExtractError> {
//! let job = extractor.create_job(&pdf).await?;
//! let mut categories = serde_json::to_value(extractor.extract_categories(&job, "Chez Nous").await?)
//!     .map_err(|e| menu_extract::MenuExtractError::Internal(e.to_string()))?;
//! categories["pages"][0]["data"]["categories"][0]["name_raw"] = "Starters".into();
//! extractor.replace_document(&job, Stage::Categories, categories).await?;
//!
//! extractor.extract_items(&job).await?;
//! extractor.extract_bases(&job).await?;
//! extractor.extract_addons(&job).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `menu-extract` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! menu-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod audit;
pub mod config;
pub mod error;
pub mod extractor;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod stages;
pub mod store;
pub mod summary;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use audit::{AuditAction, AuditEvent, AuditSink, AuditStatus, JsonlAuditLog, NoopAuditSink};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, StageAttempts};
pub use error::{ExtractionFailure, FailureCause, MenuExtractError, ResponseDiagnostic};
pub use extractor::MenuExtractor;
pub use model::{EdgequakeModel, ModelError, UnconfiguredModel, VisionModel, VisionRequest};
pub use pipeline::encode::PageImage;
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::{PromptRenderer, PromptVars, TemplateError, TemplateId};
pub use schema::{
    AddonsDocument, BasesDocument, CategoriesDocument, CategoryKey, ItemsDocument, Stage, UnitId,
};
pub use store::{DocumentSlot, DocumentStore, FsDocumentStore, JobId};
pub use summary::{JobListing, JobSummary};
