//! The job-run context: injected services plus stage orchestration.
//!
//! ```text
//!               ┌─────────────── MenuExtractor ───────────────┐
//!  create_job ─▶│ store.save_pdf                               │
//!  extract_* ──▶│ store.load ─▶ validate ─▶ rasterize ─▶ stage │─▶ store.save
//!               │                                  │           │─▶ audit.record
//!               └──────────────────────────────────┴───────────┘
//! ```
//!
//! Every service is an explicitly constructed handle owned by the extractor;
//! nothing is read from globals. One [`FanOut`] is created per extractor, so
//! its concurrency cap holds across every stage run through it.

use crate::audit::{AuditAction, AuditEvent, AuditSink, JsonlAuditLog, NoopAuditSink};
use crate::config::ExtractionConfig;
use crate::error::MenuExtractError;
use crate::model::{EdgequakeModel, UnconfiguredModel, VisionModel};
use crate::pipeline::encode::PageImage;
use crate::pipeline::fanout::FanOut;
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::unit::UnitExtractor;
use crate::prompts::PromptRenderer;
use crate::schema::{
    validate_document, AddonsDocument, BasesDocument, CategoriesDocument, CategoriesPage,
    CategoryKey, ItemsDocument, Stage, StageDocument, StagePage,
};
use crate::stages::{self, StageContext};
use crate::store::{DocumentSlot, DocumentStore, FsDocumentStore, JobId};
use crate::summary::{JobListing, JobSummary};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Runs extraction jobs against explicitly injected services.
pub struct MenuExtractor {
    config: ExtractionConfig,
    model: Arc<dyn VisionModel>,
    rasterizer: Arc<dyn PageRasterizer>,
    store: Arc<dyn DocumentStore>,
    audit: Arc<dyn AuditSink>,
    prompts: PromptRenderer,
    fanout: FanOut,
}

impl MenuExtractor {
    /// Production wiring: provider resolved from the config, filesystem
    /// store and JSON-lines history under `storage_dir`, pdfium rasteriser,
    /// prompt overrides from `prompts_dir`.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, MenuExtractError> {
        let model = Arc::new(EdgequakeModel::from_config(&config)?);
        Self::wire(config, model)
    }

    /// Same wiring as [`from_config`](Self::from_config) but without a
    /// provider. Enough for creating jobs, reading, editing and summarising;
    /// any stage run fails its units.
    pub fn offline(config: ExtractionConfig) -> Result<Self, MenuExtractError> {
        Self::wire(config, Arc::new(UnconfiguredModel))
    }

    fn wire(config: ExtractionConfig, model: Arc<dyn VisionModel>) -> Result<Self, MenuExtractError> {
        let store = Arc::new(FsDocumentStore::new(&config.storage_dir));
        let audit = Arc::new(JsonlAuditLog::new(&config.storage_dir));
        let prompts = match &config.prompts_dir {
            Some(dir) => PromptRenderer::from_dir(dir)?,
            None => PromptRenderer::builtin(),
        };
        Ok(Self::new(config, model, store)
            .with_audit(audit)
            .with_prompts(prompts))
    }

    /// Minimal wiring: pdfium rasteriser, built-in prompts, no history.
    pub fn new(
        config: ExtractionConfig,
        model: Arc<dyn VisionModel>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            rasterizer: Arc::new(PdfiumRasterizer::from_config(&config)),
            audit: Arc::new(NoopAuditSink),
            prompts: PromptRenderer::builtin(),
            fanout: FanOut::new(config.concurrency),
            config,
            model,
            store,
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptRenderer) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn context(&self) -> StageContext {
        let units = UnitExtractor::new(
            Arc::clone(&self.model),
            Duration::from_millis(self.config.retry_backoff_ms),
            Duration::from_secs(self.config.api_timeout_secs),
        )
        .with_progress(self.config.progress_callback.clone());

        StageContext {
            units,
            prompts: self.prompts.clone(),
            fanout: self.fanout.clone(),
            attempts: self.config.attempts,
            progress: self.config.progress_callback.clone(),
        }
    }

    // ── Jobs ─────────────────────────────────────────────────────────────

    /// Store an uploaded menu and return its new job id.
    pub async fn create_job(&self, pdf: &[u8]) -> Result<JobId, MenuExtractError> {
        if !pdf.starts_with(b"%PDF") {
            return Err(MenuExtractError::NotAPdf {
                magic: pdf.iter().take(8).copied().collect(),
            });
        }
        let job = JobId::generate();
        self.store.save_pdf(&job, pdf).await?;
        info!("Created job {} ({} bytes)", job, pdf.len());
        Ok(job)
    }

    /// Every stored job, most recently uploaded first.
    pub async fn list_jobs(&self) -> Result<Vec<JobListing>, MenuExtractError> {
        let mut listings = Vec::new();
        for job in self.store.list_jobs().await? {
            let latest_stage = self.latest_stage(&job).await;
            listings.push(JobListing { job, latest_stage });
        }
        Ok(listings)
    }

    /// Remove a job's PDF, stage documents and history.
    pub async fn delete_job(&self, job: &JobId) -> Result<(), MenuExtractError> {
        self.store.delete_job(job).await?;
        info!("Deleted job {}", job);
        Ok(())
    }

    /// A slot that cannot be read still counts as written.
    async fn latest_stage(&self, job: &JobId) -> Option<Stage> {
        for slot in [
            DocumentSlot::Addons,
            DocumentSlot::Bases,
            DocumentSlot::Items,
            DocumentSlot::CategoriesRaw,
        ] {
            if !matches!(self.store.load_document(job, slot).await, Ok(None)) {
                return Some(slot.stage());
            }
        }
        None
    }

    /// Render every page of the job's PDF.
    pub async fn rasterize(&self, job: &JobId) -> Result<Vec<PageImage>, MenuExtractError> {
        let pdf = self.store.load_pdf(job).await?;
        let images = self.rasterizer.rasterize(pdf).await?;
        info!("Job {}: rendered {} page(s)", job, images.len());
        Ok(images)
    }

    // ── Stages ───────────────────────────────────────────────────────────

    /// Stage 1. Writes both the raw and the reviewed categories document.
    pub async fn extract_categories(
        &self,
        job: &JobId,
        restaurant_name: &str,
    ) -> Result<CategoriesDocument, MenuExtractError> {
        let result = async {
            let images = self.rasterize(job).await?;
            self.categories_with(job, restaurant_name, &images).await
        }
        .await;
        self.audited(job, Stage::Categories, AuditAction::Extract, result)
            .await
    }

    /// Stage 2, from the reviewed categories (or the raw ones if none were
    /// reviewed).
    pub async fn extract_items(&self, job: &JobId) -> Result<ItemsDocument, MenuExtractError> {
        let result = async {
            let categories = self.load_categories(job).await?;
            let images = self.rasterize(job).await?;
            self.items_with(job, &categories, &images).await
        }
        .await;
        self.audited(job, Stage::Items, AuditAction::Extract, result)
            .await
    }

    /// Stage 3.
    pub async fn extract_bases(&self, job: &JobId) -> Result<BasesDocument, MenuExtractError> {
        let result = async {
            let items = self.load(job, DocumentSlot::Items).await?;
            let images = self.rasterize(job).await?;
            self.bases_with(job, &items, &images).await
        }
        .await;
        self.audited(job, Stage::Bases, AuditAction::Extract, result)
            .await
    }

    /// Stage 4.
    pub async fn extract_addons(&self, job: &JobId) -> Result<AddonsDocument, MenuExtractError> {
        let result = async {
            let items = self.load(job, DocumentSlot::Items).await?;
            let bases = self.load(job, DocumentSlot::Bases).await?;
            let images = self.rasterize(job).await?;
            self.addons_with(job, &items, &bases, &images).await
        }
        .await;
        self.audited(job, Stage::Addons, AuditAction::Extract, result)
            .await
    }

    /// All four stages in order, rasterising the PDF once. Each stage's
    /// document is persisted before the next one starts.
    pub async fn run_all(
        &self,
        job: &JobId,
        restaurant_name: &str,
    ) -> Result<AddonsDocument, MenuExtractError> {
        let images = match self.rasterize(job).await {
            Ok(images) => images,
            Err(e) => {
                return self
                    .audited(job, Stage::Categories, AuditAction::Extract, Err(e))
                    .await
            }
        };

        let result = self.categories_with(job, restaurant_name, &images).await;
        let categories = self
            .audited(job, Stage::Categories, AuditAction::Extract, result)
            .await?;

        let result = self.items_with(job, &categories, &images).await;
        let items = self
            .audited(job, Stage::Items, AuditAction::Extract, result)
            .await?;

        let result = self.bases_with(job, &items, &images).await;
        let bases = self
            .audited(job, Stage::Bases, AuditAction::Extract, result)
            .await?;

        let result = self.addons_with(job, &items, &bases, &images).await;
        self.audited(job, Stage::Addons, AuditAction::Extract, result)
            .await
    }

    async fn categories_with(
        &self,
        job: &JobId,
        restaurant_name: &str,
        images: &[PageImage],
    ) -> Result<CategoriesDocument, MenuExtractError> {
        let doc = stages::categories::run(&self.context(), restaurant_name, images).await?;
        self.persist(job, DocumentSlot::CategoriesRaw, &doc).await?;
        self.persist(job, DocumentSlot::CategoriesReviewed, &doc).await?;
        info!("Job {}: {} categories found", job, doc.category_count());
        Ok(doc)
    }

    async fn items_with(
        &self,
        job: &JobId,
        categories: &CategoriesDocument,
        images: &[PageImage],
    ) -> Result<ItemsDocument, MenuExtractError> {
        let doc = stages::items::run(&self.context(), categories, images).await?;
        self.persist(job, DocumentSlot::Items, &doc).await?;
        info!("Job {}: {}", job, JobSummary::from_items(&doc));
        Ok(doc)
    }

    async fn bases_with(
        &self,
        job: &JobId,
        items: &ItemsDocument,
        images: &[PageImage],
    ) -> Result<BasesDocument, MenuExtractError> {
        let doc = stages::bases::run(&self.context(), items, images).await?;
        self.persist(job, DocumentSlot::Bases, &doc).await?;
        Ok(doc)
    }

    async fn addons_with(
        &self,
        job: &JobId,
        items: &ItemsDocument,
        bases: &BasesDocument,
        images: &[PageImage],
    ) -> Result<AddonsDocument, MenuExtractError> {
        let doc = stages::addons::run(&self.context(), items, bases, images).await?;
        self.persist(job, DocumentSlot::Addons, &doc).await?;
        Ok(doc)
    }

    // ── Edits ────────────────────────────────────────────────────────────

    /// Replace a stage document by hand.
    ///
    /// The document is fully validated first; an invalid edit changes
    /// nothing. A Stage 1 edit replaces the *reviewed* categories and leaves
    /// the raw extraction untouched.
    pub async fn replace_document(
        &self,
        job: &JobId,
        stage: Stage,
        document: Value,
    ) -> Result<(), MenuExtractError> {
        let result = async {
            match stage {
                Stage::Categories => {
                    let doc: CategoriesDocument = validate_document(document)?;
                    self.persist(job, DocumentSlot::CategoriesReviewed, &doc).await
                }
                Stage::Items => {
                    let doc: ItemsDocument = validate_document(document)?;
                    self.persist(job, DocumentSlot::Items, &doc).await
                }
                Stage::Bases => {
                    let doc: BasesDocument = validate_document(document)?;
                    self.persist(job, DocumentSlot::Bases, &doc).await
                }
                Stage::Addons => {
                    let doc: AddonsDocument = validate_document(document)?;
                    self.persist(job, DocumentSlot::Addons, &doc).await
                }
            }
        }
        .await;
        self.audited(job, stage, AuditAction::ManualEdit, result)
            .await
    }

    /// Re-extract a single category of Stage 2, 3 or 4 and persist the whole
    /// document with that category replaced. Returns the new document.
    pub async fn reextract(
        &self,
        job: &JobId,
        stage: Stage,
        page_number: usize,
        key: &CategoryKey,
    ) -> Result<Value, MenuExtractError> {
        let result = self.reextract_inner(job, stage, page_number, key).await;
        self.audited(job, stage, AuditAction::Reextract, result)
            .await
    }

    async fn reextract_inner(
        &self,
        job: &JobId,
        stage: Stage,
        page_number: usize,
        key: &CategoryKey,
    ) -> Result<Value, MenuExtractError> {
        let ctx = self.context();
        match stage {
            Stage::Categories => Err(MenuExtractError::InvalidConfig(
                "stage 1 works per page; re-run the categories stage instead".into(),
            )),
            Stage::Items => {
                let items: ItemsDocument = self.load(job, DocumentSlot::Items).await?;
                let images = self.rasterize(job).await?;
                let doc = stages::items::reextract(&ctx, &items, &images, page_number, key).await?;
                self.persist(job, DocumentSlot::Items, &doc).await?;
                to_value(&doc)
            }
            Stage::Bases => {
                let items: ItemsDocument = self.load(job, DocumentSlot::Items).await?;
                let bases: BasesDocument = self.load(job, DocumentSlot::Bases).await?;
                let images = self.rasterize(job).await?;
                let doc =
                    stages::bases::reextract(&ctx, &items, &bases, &images, page_number, key)
                        .await?;
                self.persist(job, DocumentSlot::Bases, &doc).await?;
                to_value(&doc)
            }
            Stage::Addons => {
                let items: ItemsDocument = self.load(job, DocumentSlot::Items).await?;
                let bases: BasesDocument = self.load(job, DocumentSlot::Bases).await?;
                let addons: AddonsDocument = self.load(job, DocumentSlot::Addons).await?;
                let images = self.rasterize(job).await?;
                let doc = stages::addons::reextract(
                    &ctx,
                    &items,
                    &bases,
                    &addons,
                    &images,
                    page_number,
                    key,
                )
                .await?;
                self.persist(job, DocumentSlot::Addons, &doc).await?;
                to_value(&doc)
            }
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// The current, validated document of `stage`.
    pub async fn load_document(&self, job: &JobId, stage: Stage) -> Result<Value, MenuExtractError> {
        match stage {
            Stage::Categories => to_value(&self.load_categories(job).await?),
            Stage::Items => {
                let doc: ItemsDocument = self.load(job, DocumentSlot::Items).await?;
                to_value(&doc)
            }
            Stage::Bases => {
                let doc: BasesDocument = self.load(job, DocumentSlot::Bases).await?;
                to_value(&doc)
            }
            Stage::Addons => {
                let doc: AddonsDocument = self.load(job, DocumentSlot::Addons).await?;
                to_value(&doc)
            }
        }
    }

    /// Counts from the most complete document the job has.
    pub async fn summary(&self, job: &JobId) -> Result<JobSummary, MenuExtractError> {
        if self.store.load_document(job, DocumentSlot::Addons).await?.is_some() {
            let doc: AddonsDocument = self.load(job, DocumentSlot::Addons).await?;
            return Ok(JobSummary::from_addons(&doc));
        }
        let doc: ItemsDocument = self.load(job, DocumentSlot::Items).await?;
        Ok(JobSummary::from_items(&doc))
    }

    /// Reviewed categories, falling back to the raw extraction.
    async fn load_categories(&self, job: &JobId) -> Result<CategoriesDocument, MenuExtractError> {
        match self
            .store
            .load_document(job, DocumentSlot::CategoriesReviewed)
            .await?
        {
            Some(value) => validate_document::<CategoriesPage>(value),
            None => self.load(job, DocumentSlot::CategoriesRaw).await,
        }
    }

    async fn load<P: StagePage>(
        &self,
        job: &JobId,
        slot: DocumentSlot,
    ) -> Result<StageDocument<P>, MenuExtractError> {
        let value = self
            .store
            .load_document(job, slot)
            .await?
            .ok_or_else(|| MenuExtractError::ResourceMissing {
                resource: format!("{} document of job {}", slot.stage().name(), job),
            })?;
        validate_document(value)
    }

    async fn persist<P: StagePage>(
        &self,
        job: &JobId,
        slot: DocumentSlot,
        doc: &StageDocument<P>,
    ) -> Result<(), MenuExtractError> {
        self.store.save_document(job, slot, &to_value(doc)?).await
    }

    /// Record the outcome of an operation and pass it through unchanged.
    async fn audited<T>(
        &self,
        job: &JobId,
        stage: Stage,
        action: AuditAction,
        result: Result<T, MenuExtractError>,
    ) -> Result<T, MenuExtractError> {
        if let Err(e) = &result {
            warn!("Job {}: {} {:?} failed: {}", job, stage, action, e);
        }
        self.audit
            .record(AuditEvent::outcome(job, stage, action, &result))
            .await;
        result
    }
}

fn to_value<P: StagePage>(doc: &StageDocument<P>) -> Result<Value, MenuExtractError> {
    serde_json::to_value(doc).map_err(|e| MenuExtractError::Serialization {
        stage: P::STAGE,
        source: e,
    })
}
