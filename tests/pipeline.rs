//! Offline integration tests for the four-stage pipeline.
//!
//! A scripted [`VisionModel`] answers by record type and a fake rasteriser
//! stands in for pdfium, so these tests need neither an API key nor a PDF
//! engine. Documents go through the real filesystem store in a temp dir.

use async_trait::async_trait;
use edgequake_llm::ImageData;
use menu_extract::schema::{validate_document, CategoryPage, CategoryWithItems};
use menu_extract::{
    AuditAction, AuditStatus, CategoryKey, DocumentSlot, DocumentStore, ExtractionConfig,
    FailureCause, FsDocumentStore, JobId, JsonlAuditLog, MenuExtractError, MenuExtractor,
    ModelError, PageImage, PageRasterizer, ResponseDiagnostic, Stage, VisionModel, VisionRequest,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PDF: &[u8] = b"%PDF-1.7\n%fake menu\n";

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Answers every record type with a small valid menu derived from the unit.
struct MenuModel {
    /// Category names per page; `pages[0]` is page 1.
    pages: Vec<Vec<&'static str>>,
    /// Record type whose every answer is truncated JSON.
    broken: Option<&'static str>,
    /// Per-unit latency; earlier categories answer slower.
    delay: Duration,
    /// Bumped between runs to tell fresh answers from old ones.
    generation: AtomicU32,
    calls: Mutex<HashMap<&'static str, u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MenuModel {
    fn new(pages: Vec<Vec<&'static str>>) -> Self {
        Self {
            pages,
            broken: None,
            delay: Duration::ZERO,
            generation: AtomicU32::new(0),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn broken(mut self, record: &'static str) -> Self {
        self.broken = Some(record);
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self, record: &str) -> u32 {
        self.calls.lock().unwrap().get(record).copied().unwrap_or(0)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn answer(&self, request: &VisionRequest<'_>) -> Value {
        let unit = request.unit;
        let name = unit
            .category
            .as_ref()
            .map(|(_, name)| name.clone())
            .unwrap_or_default();
        let version = self.generation.load(Ordering::SeqCst);
        let item = format!("{} special v{}", name, version);

        match request.record {
            "Categories" => json!({
                "categories": self.pages[unit.page_number - 1]
                    .iter()
                    .map(|n| json!({ "name_raw": n, "description_raw": null }))
                    .collect::<Vec<_>>()
            }),
            "CategoryWithItems" => json!({
                "category": { "name_raw": "whatever the model read" },
                "category_items": [
                    { "items": [{ "name_raw": item, "price_raw": "9.00", "size_prices": [] }] }
                ],
                "subcategory_items": []
            }),
            "CategoryBase" => json!({
                "category": { "name_raw": name },
                "pricing_mode": "per_item",
                "base_price": null,
                "sizes": [],
                "options": [],
                "notes": format!("{} notes v{}", name, version)
            }),
            "CategoryItemAddons" => json!({
                "category": { "name_raw": name },
                "category_items": [{ "items": [{
                    "name_raw": item,
                    "price_raw": "9.00",
                    "size_prices": [],
                    "addon_groups": [{
                        "name_raw": "Extras",
                        "selection": "multiple",
                        "min_select": 0,
                        "max_select": null,
                        "addons": [{ "name_raw": "Cheese", "price_raw": "1.00" }]
                    }]
                }]}],
                "subcategory_items": []
            }),
            other => panic!("unexpected record type {other}"),
        }
    }
}

#[async_trait]
impl VisionModel for MenuModel {
    async fn complete(&self, request: VisionRequest<'_>) -> Result<String, ModelError> {
        *self.calls.lock().unwrap().entry(request.record).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            // p1-c1 is the slowest, so completion order is the reverse of
            // submission order.
            let position = request
                .unit
                .category
                .as_ref()
                .and_then(|(key, _)| key.as_str().rsplit("-c").next()?.parse::<u32>().ok())
                .unwrap_or(1);
            tokio::time::sleep(self.delay * 20u32.saturating_sub(position)).await;
        }

        let result = if self.broken == Some(request.record) {
            Ok(r#"{"categories": [{"name_raw": "Pizz"#.to_string())
        } else {
            Ok(self.answer(&request).to_string())
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Reports the same page count for every PDF.
struct FakePages(usize);

#[async_trait]
impl PageRasterizer for FakePages {
    async fn rasterize(&self, _pdf: Vec<u8>) -> Result<Vec<PageImage>, MenuExtractError> {
        Ok((1..=self.0)
            .map(|p| PageImage::new(p, ImageData::new("AAAA".to_string(), "image/png")))
            .collect())
    }
}

/// Route `RUST_LOG`-filtered logs to the test harness's captured output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn extractor(model: Arc<MenuModel>, dir: &Path, concurrency: usize) -> MenuExtractor {
    init_tracing();
    let pages = model.pages.len();
    let config = ExtractionConfig::builder()
        .storage_dir(dir)
        .concurrency(concurrency)
        .retry_backoff_ms(0)
        .build()
        .unwrap();
    MenuExtractor::new(config, model, Arc::new(FsDocumentStore::new(dir)))
        .with_rasterizer(Arc::new(FakePages(pages)))
        .with_audit(Arc::new(JsonlAuditLog::new(dir)))
}

fn two_page_menu() -> Vec<Vec<&'static str>> {
    vec![vec!["Starters", "Mains"], vec!["Desserts"]]
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_all_builds_every_stage_document() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);

    let job = extractor.create_job(PDF).await.unwrap();
    let menu = extractor.run_all(&job, "Chez Nous").await.unwrap();

    assert_eq!(menu.restaurant_name, "Chez Nous");
    assert_eq!(menu.pages.len(), 2);
    let desserts = &menu.pages[1].categories[0];
    assert_eq!(desserts.category.key, Some(CategoryKey::new(2, 1)));
    assert_eq!(desserts.category.name_raw, "Desserts");
    assert_eq!(desserts.category_items[0].items[0].name_raw, "Desserts special v0");

    // One unit per page, then one per category for each later stage.
    assert_eq!(model.calls("Categories"), 2);
    assert_eq!(model.calls("CategoryWithItems"), 3);
    assert_eq!(model.calls("CategoryBase"), 3);
    assert_eq!(model.calls("CategoryItemAddons"), 3);

    let summary = extractor.summary(&job).await.unwrap();
    assert_eq!((summary.pages, summary.categories, summary.items), (2, 3, 3));

    let store = FsDocumentStore::new(dir.path());
    for slot in [
        DocumentSlot::CategoriesRaw,
        DocumentSlot::CategoriesReviewed,
        DocumentSlot::Items,
        DocumentSlot::Bases,
        DocumentSlot::Addons,
    ] {
        assert!(
            store.load_document(&job, slot).await.unwrap().is_some(),
            "{slot:?} not written"
        );
    }

    let history = JsonlAuditLog::new(dir.path()).history(&job).await.unwrap();
    let stages: Vec<Stage> = history.iter().map(|e| e.stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    assert!(history
        .iter()
        .all(|e| e.action == AuditAction::Extract && e.status == AuditStatus::Success));
}

#[tokio::test]
async fn stage_records_carry_upstream_category() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(model, dir.path(), 4);

    let job = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&job, "Chez Nous").await.unwrap();
    let items = extractor.extract_items(&job).await.unwrap();

    // The model echoes a different name; the Stage 1 category wins.
    let mains = &items.pages[0].categories[1];
    assert_eq!(mains.category.name_raw, "Mains");
    assert_eq!(mains.category.key, Some(CategoryKey::new(1, 2)));
}

// ── Fan-out ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fan_out_respects_cap_and_keeps_order() {
    let names = vec!["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(vec![names.clone()]).delayed(Duration::from_millis(2)));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);

    let job = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&job, "Chez Nous").await.unwrap();
    let items = extractor.extract_items(&job).await.unwrap();

    assert_eq!(model.peak(), 4);
    assert_eq!(model.calls("CategoryWithItems"), 10);

    let page = &items.pages[0];
    for (i, (record, name)) in page.categories.iter().zip(&names).enumerate() {
        assert_eq!(record.category.key, Some(CategoryKey::new(1, i + 1)));
        assert_eq!(record.category_items[0].items[0].name_raw, format!("{name} special v0"));
    }
}

// ── Retries ──────────────────────────────────────────────────────────────────

/// Run stages in order until one fails; return that stage's error.
async fn first_failure(extractor: &MenuExtractor, job: &JobId) -> (Stage, MenuExtractError) {
    if let Err(e) = extractor.extract_categories(job, "Chez Nous").await {
        return (Stage::Categories, e);
    }
    if let Err(e) = extractor.extract_items(job).await {
        return (Stage::Items, e);
    }
    if let Err(e) = extractor.extract_bases(job).await {
        return (Stage::Bases, e);
    }
    match extractor.extract_addons(job).await {
        Err(e) => (Stage::Addons, e),
        Ok(_) => panic!("no stage failed"),
    }
}

#[tokio::test]
async fn each_stage_spends_exactly_its_attempt_budget() {
    let cases = [
        ("Categories", Stage::Categories, 2),
        ("CategoryWithItems", Stage::Items, 3),
        ("CategoryBase", Stage::Bases, 2),
        ("CategoryItemAddons", Stage::Addons, 2),
    ];

    for (record, stage, budget) in cases {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(MenuModel::new(vec![vec!["Pizza"]]).broken(record));
        let extractor = extractor(Arc::clone(&model), dir.path(), 4);
        let job = extractor.create_job(PDF).await.unwrap();

        let (failed, err) = first_failure(&extractor, &job).await;
        assert_eq!(failed, stage);
        assert_eq!(model.calls(record), budget, "{record}");

        match err {
            MenuExtractError::Extraction(failure) => {
                assert_eq!(failure.attempts, budget);
                assert_eq!(failure.unit.stage, stage);
                assert!(matches!(
                    failure.cause,
                    FailureCause::MalformedResponse(ResponseDiagnostic::Syntax { .. })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }

        let history = JsonlAuditLog::new(dir.path()).history(&job).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.stage, stage);
        assert_eq!(last.status, AuditStatus::Failure);
        assert!(last.error_message.as_deref().unwrap().contains("attempt"));
    }
}

#[tokio::test]
async fn failed_stage_writes_no_document() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()).broken("CategoryBase"));
    let extractor = extractor(model, dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();

    extractor.extract_categories(&job, "Chez Nous").await.unwrap();
    extractor.extract_items(&job).await.unwrap();
    assert!(extractor.extract_bases(&job).await.is_err());

    let store = FsDocumentStore::new(dir.path());
    assert!(store
        .load_document(&job, DocumentSlot::Bases)
        .await
        .unwrap()
        .is_none());
}

// ── Inter-stage contracts ────────────────────────────────────────────────────

#[tokio::test]
async fn items_require_categories() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor(Arc::new(MenuModel::new(two_page_menu())), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();

    let err = extractor.extract_items(&job).await.unwrap_err();
    assert!(matches!(err, MenuExtractError::ResourceMissing { .. }), "got: {err}");
}

#[tokio::test]
async fn addons_reject_misaligned_bases() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();

    extractor.extract_categories(&job, "Chez Nous").await.unwrap();
    extractor.extract_items(&job).await.unwrap();
    extractor.extract_bases(&job).await.unwrap();

    // A hand edit that drops "Mains" from the bases keeps the document
    // valid on its own but no longer pairs with the items.
    let mut bases = extractor.load_document(&job, Stage::Bases).await.unwrap();
    bases["pages"][0]["categories"]
        .as_array_mut()
        .unwrap()
        .remove(1);
    extractor
        .replace_document(&job, Stage::Bases, bases)
        .await
        .unwrap();

    let err = extractor.extract_addons(&job).await.unwrap_err();
    match err {
        MenuExtractError::StageMisaligned { detail } => {
            assert!(detail.contains("p1-c2"), "got: {detail}")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(model.calls("CategoryItemAddons"), 0);
}

#[tokio::test]
async fn items_reject_categories_missing_a_page() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&job, "Chez Nous").await.unwrap();

    // Still a valid document on its own, but the PDF has two pages.
    let mut reviewed = extractor
        .load_document(&job, Stage::Categories)
        .await
        .unwrap();
    reviewed["pages"].as_array_mut().unwrap().remove(1);
    extractor
        .replace_document(&job, Stage::Categories, reviewed)
        .await
        .unwrap();

    let err = extractor.extract_items(&job).await.unwrap_err();
    match err {
        MenuExtractError::StageMisaligned { detail } => {
            assert!(detail.contains("1 page(s), the PDF has 2"), "got: {detail}")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(model.calls("CategoryWithItems"), 0);
    assert!(FsDocumentStore::new(dir.path())
        .load_document(&job, DocumentSlot::Items)
        .await
        .unwrap()
        .is_none());
}

// ── Review and edits ─────────────────────────────────────────────────────────

#[tokio::test]
async fn reviewed_categories_drive_item_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor(Arc::new(MenuModel::new(two_page_menu())), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&job, "Chez Nous").await.unwrap();

    let mut reviewed = extractor
        .load_document(&job, Stage::Categories)
        .await
        .unwrap();
    reviewed["pages"][0]["data"]["categories"][0]["name_raw"] = json!("Antipasti");
    extractor
        .replace_document(&job, Stage::Categories, reviewed)
        .await
        .unwrap();

    let items = extractor.extract_items(&job).await.unwrap();
    let first = &items.pages[0].categories[0];
    assert_eq!(first.category.name_raw, "Antipasti");
    assert_eq!(first.category_items[0].items[0].name_raw, "Antipasti special v0");

    // The raw extraction is kept as it was.
    let raw = FsDocumentStore::new(dir.path())
        .load_document(&job, DocumentSlot::CategoriesRaw)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw["pages"][0]["data"]["categories"][0]["name_raw"], "Starters");
}

#[tokio::test]
async fn invalid_edit_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor(Arc::new(MenuModel::new(two_page_menu())), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&job, "Chez Nous").await.unwrap();
    let before = extractor
        .load_document(&job, Stage::Categories)
        .await
        .unwrap();

    let mut edit = before.clone();
    edit["pages"][1]["data"]["categories"][0]["key"] = json!("p1-c1");
    let err = extractor
        .replace_document(&job, Stage::Categories, edit)
        .await
        .unwrap_err();
    match err {
        MenuExtractError::UpstreamDocumentInvalid { stage, detail } => {
            assert_eq!(stage, Stage::Categories);
            assert!(detail.contains("duplicate"), "got: {detail}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let after = extractor
        .load_document(&job, Stage::Categories)
        .await
        .unwrap();
    assert_eq!(before, after);

    let history = JsonlAuditLog::new(dir.path()).history(&job).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.action, AuditAction::ManualEdit);
    assert_eq!(last.status, AuditStatus::Failure);
}

#[tokio::test]
async fn reextract_replaces_only_the_target_category() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&job, "Chez Nous").await.unwrap();
    extractor.extract_items(&job).await.unwrap();

    model.generation.store(1, Ordering::SeqCst);
    let value = extractor
        .reextract(&job, Stage::Items, 1, &CategoryKey::new(1, 2))
        .await
        .unwrap();
    assert_eq!(model.calls("CategoryWithItems"), 4);

    let items = validate_document::<CategoryPage<CategoryWithItems>>(value).unwrap();
    let names: Vec<&str> = items
        .pages
        .iter()
        .flat_map(|p| &p.categories)
        .map(|c| c.category_items[0].items[0].name_raw.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["Starters special v0", "Mains special v1", "Desserts special v0"]
    );

    // Persisted as well.
    let stored = extractor.load_document(&job, Stage::Items).await.unwrap();
    assert_eq!(
        stored["pages"][0]["categories"][1]["category_items"][0]["items"][0]["name_raw"],
        "Mains special v1"
    );
}

#[tokio::test]
async fn reextract_bases_replaces_only_the_target_category() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&job, "Chez Nous").await.unwrap();
    extractor.extract_items(&job).await.unwrap();
    extractor.extract_bases(&job).await.unwrap();
    let items_before = extractor.load_document(&job, Stage::Items).await.unwrap();

    model.generation.store(1, Ordering::SeqCst);
    let value = extractor
        .reextract(&job, Stage::Bases, 1, &CategoryKey::new(1, 2))
        .await
        .unwrap();
    assert_eq!(model.calls("CategoryBase"), 4);

    let notes = |doc: &Value| -> Vec<String> {
        doc["pages"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|p| p["categories"].as_array().unwrap())
            .map(|c| c["notes"].as_str().unwrap().to_string())
            .collect()
    };
    let expected = vec!["Starters notes v0", "Mains notes v1", "Desserts notes v0"];
    assert_eq!(notes(&value), expected);
    assert_eq!(value["pages"][0]["categories"][1]["category"]["key"], "p1-c2");

    let stored = extractor.load_document(&job, Stage::Bases).await.unwrap();
    assert_eq!(notes(&stored), expected);

    // Upstream documents are left alone.
    let items_after = extractor.load_document(&job, Stage::Items).await.unwrap();
    assert_eq!(items_before, items_after);

    let history = JsonlAuditLog::new(dir.path()).history(&job).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!((last.stage, last.action), (Stage::Bases, AuditAction::Reextract));
    assert_eq!(last.status, AuditStatus::Success);
}

#[tokio::test]
async fn reextract_addons_replaces_only_the_target_category() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();
    extractor.run_all(&job, "Chez Nous").await.unwrap();
    let items_before = extractor.load_document(&job, Stage::Items).await.unwrap();
    let bases_before = extractor.load_document(&job, Stage::Bases).await.unwrap();

    model.generation.store(1, Ordering::SeqCst);
    let value = extractor
        .reextract(&job, Stage::Addons, 1, &CategoryKey::new(1, 2))
        .await
        .unwrap();
    assert_eq!(model.calls("CategoryItemAddons"), 4);

    let names = |doc: &Value| -> Vec<String> {
        doc["pages"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|p| p["categories"].as_array().unwrap())
            .map(|c| {
                c["category_items"][0]["items"][0]["name_raw"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    };
    let expected = vec!["Starters special v0", "Mains special v1", "Desserts special v0"];
    assert_eq!(names(&value), expected);
    assert_eq!(value["pages"][0]["categories"][1]["category"]["name_raw"], "Mains");

    let stored = extractor.load_document(&job, Stage::Addons).await.unwrap();
    assert_eq!(names(&stored), expected);

    // Both inputs are read, neither is rewritten.
    assert_eq!(items_before, extractor.load_document(&job, Stage::Items).await.unwrap());
    assert_eq!(bases_before, extractor.load_document(&job, Stage::Bases).await.unwrap());
}

#[tokio::test]
async fn reextract_addons_needs_the_category_in_the_bases() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();
    extractor.run_all(&job, "Chez Nous").await.unwrap();

    let mut bases = extractor.load_document(&job, Stage::Bases).await.unwrap();
    bases["pages"][0]["categories"]
        .as_array_mut()
        .unwrap()
        .remove(1);
    extractor
        .replace_document(&job, Stage::Bases, bases)
        .await
        .unwrap();

    let err = extractor
        .reextract(&job, Stage::Addons, 1, &CategoryKey::new(1, 2))
        .await
        .unwrap_err();
    match err {
        MenuExtractError::ResourceMissing { resource } => {
            assert!(resource.contains("bases document"), "got: {resource}")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(model.calls("CategoryItemAddons"), 3);
}

#[tokio::test]
async fn reextract_rejects_unknown_targets() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&job, "Chez Nous").await.unwrap();
    extractor.extract_items(&job).await.unwrap();

    let err = extractor
        .reextract(&job, Stage::Items, 2, &CategoryKey::new(1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, MenuExtractError::ResourceMissing { .. }), "got: {err}");

    let err = extractor
        .reextract(&job, Stage::Categories, 1, &CategoryKey::new(1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, MenuExtractError::InvalidConfig(_)), "got: {err}");

    assert_eq!(model.calls("CategoryWithItems"), 3);
}

// ── Jobs ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_job_rejects_non_pdf_input() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor(Arc::new(MenuModel::new(two_page_menu())), dir.path(), 4);

    let err = extractor
        .create_job(b"PK\x03\x04 not a pdf")
        .await
        .unwrap_err();
    match err {
        MenuExtractError::NotAPdf { magic } => assert_eq!(&magic[..4], b"PK\x03\x04"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn jobs_list_their_progress_and_can_be_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor(Arc::new(MenuModel::new(two_page_menu())), dir.path(), 4);

    let fresh = extractor.create_job(PDF).await.unwrap();
    let started = extractor.create_job(PDF).await.unwrap();
    extractor.extract_categories(&started, "Chez Nous").await.unwrap();
    extractor.extract_items(&started).await.unwrap();

    let mut listings = extractor.list_jobs().await.unwrap();
    listings.sort_by_key(|l| l.latest_stage.is_some());
    assert_eq!(listings.len(), 2);
    assert_eq!((&listings[0].job, listings[0].latest_stage), (&fresh, None));
    assert_eq!(
        (&listings[1].job, listings[1].latest_stage),
        (&started, Some(Stage::Items))
    );
    assert_eq!(listings[1].to_string(), format!("{started}  items"));

    extractor.delete_job(&started).await.unwrap();
    let listings = extractor.list_jobs().await.unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].job, fresh);

    let err = extractor.load_document(&started, Stage::Items).await.unwrap_err();
    assert!(matches!(err, MenuExtractError::ResourceMissing { .. }), "got: {err}");
    let err = extractor.delete_job(&started).await.unwrap_err();
    assert!(matches!(err, MenuExtractError::ResourceMissing { .. }), "got: {err}");
}

#[tokio::test]
async fn blank_restaurant_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MenuModel::new(two_page_menu()));
    let extractor = extractor(Arc::clone(&model), dir.path(), 4);
    let job = extractor.create_job(PDF).await.unwrap();

    let err = extractor.extract_categories(&job, "  ").await.unwrap_err();
    assert!(matches!(err, MenuExtractError::InvalidConfig(_)), "got: {err}");
    assert_eq!(model.calls("Categories"), 0);
}
