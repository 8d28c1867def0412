//! The four stage drivers.
//!
//! ```text
//! images ──▶ categories ──▶ items ──▶ bases ──┐
//!                              │              ▼
//!                              └─────────▶ addons
//! ```
//!
//! Every driver follows the same shape: re-validate its input documents,
//! plan one unit per page (Stage 1) or per (page, category) (Stages 2–4),
//! render every prompt up front, hand all units to the fan-out coordinator,
//! and reassemble the results into a page-indexed document. A driver returns
//! either a complete document or an error; there is no partial output.

pub mod addons;
pub mod bases;
pub mod categories;
pub mod items;

use crate::config::StageAttempts;
use crate::error::MenuExtractError;
use crate::pipeline::encode::{find_page, PageImage};
use crate::pipeline::fanout::FanOut;
use crate::pipeline::unit::UnitExtractor;
use crate::progress::ProgressCallback;
use crate::prompts::{PromptRenderer, PromptVars, TemplateId};
use crate::schema::{
    Category, CategoryKey, CategoryPage, HasCategory, Record, Stage, StageDocument, StagePage,
    UnitId,
};
use edgequake_llm::ImageData;
use serde::Serialize;
use tracing::info;

/// Services and settings shared by every stage of a job run.
#[derive(Clone)]
pub struct StageContext {
    pub units: UnitExtractor,
    pub prompts: PromptRenderer,
    pub fanout: FanOut,
    pub attempts: StageAttempts,
    pub progress: Option<ProgressCallback>,
}

impl StageContext {
    fn attempts(&self, stage: Stage) -> u32 {
        self.attempts.for_stage(stage)
    }

    fn stage_started(&self, stage: Stage, units: usize) {
        info!("{}: {} unit(s)", stage, units);
        if let Some(cb) = &self.progress {
            cb.on_stage_start(stage, units);
        }
    }

    fn stage_completed(&self, stage: Stage, units: usize) {
        info!("{}: complete", stage);
        if let Some(cb) = &self.progress {
            cb.on_stage_complete(stage, units);
        }
    }

    fn render(&self, stage: Stage, vars: &PromptVars) -> Result<String, MenuExtractError> {
        Ok(self.prompts.render(TemplateId::for_stage(stage), vars)?)
    }
}

// ── Planning helpers ─────────────────────────────────────────────────────

/// One (page, category) unit with its prompt already rendered.
pub(crate) struct PlannedUnit<'a> {
    pub id: UnitId,
    pub prompt: String,
    pub image: &'a ImageData,
    /// Canonical upstream category; replaces whatever the model echoes.
    pub category: Category,
}

/// Variables every stage template receives.
pub(crate) fn base_vars(restaurant_name: &str, page_number: usize) -> PromptVars {
    PromptVars::new()
        .set("restaurant_name", restaurant_name)
        .set("page_number", page_number)
}

/// Pretty JSON for embedding a prior-stage record in a `stage` prompt.
pub(crate) fn to_prompt_json<T: Serialize>(
    stage: Stage,
    value: &T,
) -> Result<String, MenuExtractError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| MenuExtractError::Serialization { stage, source: e })
}

pub(crate) fn image_for(
    images: &[PageImage],
    page_number: usize,
) -> Result<&ImageData, MenuExtractError> {
    find_page(images, page_number)
        .map(|p| &p.image)
        .ok_or_else(|| MenuExtractError::ResourceMissing {
            resource: format!("image of page {}", page_number),
        })
}

/// The document must cover the rendered PDF page for page: every page it
/// references was rendered, and every rendered page has an entry.
pub(crate) fn require_images<P: StagePage>(
    doc: &StageDocument<P>,
    images: &[PageImage],
) -> Result<(), MenuExtractError> {
    for page in &doc.pages {
        image_for(images, page.page_number())?;
    }
    if doc.pages.len() != images.len() {
        return Err(MenuExtractError::StageMisaligned {
            detail: format!(
                "{} document has {} page(s), the PDF has {}",
                P::STAGE.name(),
                doc.pages.len(),
                images.len()
            ),
        });
    }
    Ok(())
}

/// The key of a category from a validated document.
pub(crate) fn key_of(category: &Category) -> Result<&CategoryKey, MenuExtractError> {
    category
        .key
        .as_ref()
        .ok_or_else(|| MenuExtractError::Internal(format!(
            "category '{}' has no key after validation",
            category.name_raw
        )))
}

pub(crate) fn unit_for(stage: Stage, page_number: usize, category: &Category) -> Result<UnitId, MenuExtractError> {
    Ok(UnitId::category(
        stage,
        page_number,
        key_of(category)?.clone(),
        category.name_raw.clone(),
    ))
}

// ── Execution helpers ────────────────────────────────────────────────────

/// Run one planned unit and pin its category to the upstream one.
async fn run_unit<R>(ctx: &StageContext, unit: &PlannedUnit<'_>) -> Result<R, MenuExtractError>
where
    R: Record + HasCategory,
{
    let mut record: R = ctx
        .units
        .extract(&unit.id, &unit.prompt, unit.image, ctx.attempts(R::STAGE))
        .await?;
    *record.category_mut() = unit.category.clone();
    Ok(record)
}

/// Fan out every (page, category) unit of a stage and regroup the results
/// into pages. `plan[i]` holds the units of page `i + 1`, in document order.
pub(crate) async fn run_category_stage<R>(
    ctx: &StageContext,
    restaurant_name: &str,
    plan: Vec<Vec<PlannedUnit<'_>>>,
) -> Result<StageDocument<CategoryPage<R>>, MenuExtractError>
where
    R: Record + HasCategory,
{
    let stage = R::STAGE;
    let layout: Vec<usize> = plan.iter().map(Vec::len).collect();
    let flat: Vec<PlannedUnit<'_>> = plan.into_iter().flatten().collect();
    ctx.stage_started(stage, flat.len());

    let results: Vec<R> = ctx
        .fanout
        .run_bounded(flat.iter().map(|unit| run_unit::<R>(ctx, unit)).collect())
        .await?;

    let mut records = results.into_iter();
    let pages = layout
        .into_iter()
        .enumerate()
        .map(|(i, count)| CategoryPage {
            page_number: i + 1,
            categories: records.by_ref().take(count).collect(),
        })
        .collect();

    ctx.stage_completed(stage, flat.len());
    Ok(StageDocument {
        restaurant_name: restaurant_name.to_string(),
        pages,
    })
}

/// Re-run exactly one unit and return `doc` with that category replaced.
pub(crate) async fn replace_one<R>(
    ctx: &StageContext,
    doc: &StageDocument<CategoryPage<R>>,
    unit: PlannedUnit<'_>,
) -> Result<StageDocument<CategoryPage<R>>, MenuExtractError>
where
    R: Record + HasCategory + Clone,
{
    let stage = R::STAGE;
    let page_number = unit.id.page_number;
    let key = key_of(&unit.category)?.clone();
    let slot = locate(doc, page_number, &key)?;

    ctx.stage_started(stage, 1);
    let record = run_unit::<R>(ctx, &unit).await?;
    ctx.stage_completed(stage, 1);

    let mut updated = doc.clone();
    updated.pages[page_number - 1].categories[slot] = record;
    Ok(updated)
}

/// Position of `key` on `page_number` of `doc`.
pub(crate) fn locate<R: HasCategory>(
    doc: &StageDocument<CategoryPage<R>>,
    page_number: usize,
    key: &CategoryKey,
) -> Result<usize, MenuExtractError> {
    let page = page_number
        .checked_sub(1)
        .and_then(|i| doc.pages.get(i))
        .ok_or_else(|| MenuExtractError::ResourceMissing {
            resource: format!("page {} of the {} document", page_number, R::STAGE.name()),
        })?;
    page.categories
        .iter()
        .position(|r| r.category().key.as_ref() == Some(key))
        .ok_or_else(|| MenuExtractError::ResourceMissing {
            resource: format!(
                "category '{}' on page {} of the {} document",
                key,
                page_number,
                R::STAGE.name()
            ),
        })
}
