//! Stage 3: base pricing, sizes and options per category.

use super::{
    base_vars, image_for, locate, replace_one, require_images, run_category_stage,
    to_prompt_json, unit_for, PlannedUnit, StageContext,
};
use crate::error::MenuExtractError;
use crate::pipeline::encode::PageImage;
use crate::schema::{BasesDocument, CategoryKey, CategoryWithItems, ItemsDocument, Stage};

const STAGE: Stage = Stage::Bases;

/// One unit per (page, category) of the Stage 2 document.
pub async fn run(
    ctx: &StageContext,
    items: &ItemsDocument,
    images: &[PageImage],
) -> Result<BasesDocument, MenuExtractError> {
    items.revalidate()?;
    require_images(items, images)?;

    let restaurant = items.restaurant_name.as_str();
    let plan = items
        .pages
        .iter()
        .map(|page| {
            page.categories
                .iter()
                .map(|record| plan_unit(ctx, restaurant, page.page_number, record, images))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    run_category_stage(ctx, restaurant, plan).await
}

/// Re-extract the base pricing of one category.
///
/// The prompt is built from the category's current Stage 2 record, so an
/// edited item list is taken into account.
pub async fn reextract(
    ctx: &StageContext,
    items: &ItemsDocument,
    bases: &BasesDocument,
    images: &[PageImage],
    page_number: usize,
    key: &CategoryKey,
) -> Result<BasesDocument, MenuExtractError> {
    items.revalidate()?;
    bases.revalidate()?;
    require_images(items, images)?;
    require_images(bases, images)?;
    let slot = locate(items, page_number, key)?;
    let record = &items.pages[page_number - 1].categories[slot];
    let unit = plan_unit(ctx, &bases.restaurant_name, page_number, record, images)?;
    replace_one(ctx, bases, unit).await
}

fn plan_unit<'a>(
    ctx: &StageContext,
    restaurant_name: &str,
    page_number: usize,
    record: &CategoryWithItems,
    images: &'a [PageImage],
) -> Result<PlannedUnit<'a>, MenuExtractError> {
    let vars = base_vars(restaurant_name, page_number)
        .set("category", to_prompt_json(STAGE, record)?)
        .set("items_count", record.item_count());

    Ok(PlannedUnit {
        id: unit_for(STAGE, page_number, &record.category)?,
        prompt: ctx.render(STAGE, &vars)?,
        image: image_for(images, page_number)?,
        category: record.category.clone(),
    })
}
