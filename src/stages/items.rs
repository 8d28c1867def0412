//! Stage 2: the items of every category.

use super::{
    base_vars, image_for, locate, replace_one, require_images, run_category_stage, to_prompt_json,
    unit_for, PlannedUnit, StageContext,
};
use crate::error::MenuExtractError;
use crate::pipeline::encode::PageImage;
use crate::schema::{CategoriesDocument, Category, CategoryKey, ItemsDocument, Stage};

const STAGE: Stage = Stage::Items;

/// One unit per (page, category) of the Stage 1 document, across all pages
/// at once.
pub async fn run(
    ctx: &StageContext,
    categories: &CategoriesDocument,
    images: &[PageImage],
) -> Result<ItemsDocument, MenuExtractError> {
    categories.revalidate()?;
    require_images(categories, images)?;

    let restaurant = categories.restaurant_name.as_str();
    let plan = categories
        .pages
        .iter()
        .map(|page| {
            page.data
                .categories
                .iter()
                .map(|category| plan_unit(ctx, restaurant, page.page_number, category, images))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    run_category_stage(ctx, restaurant, plan).await
}

/// Re-extract the items of one category and return the whole document with
/// that category replaced.
pub async fn reextract(
    ctx: &StageContext,
    items: &ItemsDocument,
    images: &[PageImage],
    page_number: usize,
    key: &CategoryKey,
) -> Result<ItemsDocument, MenuExtractError> {
    items.revalidate()?;
    require_images(items, images)?;
    let slot = locate(items, page_number, key)?;
    let category = &items.pages[page_number - 1].categories[slot].category;
    let unit = plan_unit(ctx, &items.restaurant_name, page_number, category, images)?;
    replace_one(ctx, items, unit).await
}

fn plan_unit<'a>(
    ctx: &StageContext,
    restaurant_name: &str,
    page_number: usize,
    category: &Category,
    images: &'a [PageImage],
) -> Result<PlannedUnit<'a>, MenuExtractError> {
    let vars = base_vars(restaurant_name, page_number)
        .set("category_name", &category.name_raw)
        .set(
            "category_description",
            category.description_raw.as_deref().unwrap_or(""),
        )
        .set("categories", to_prompt_json(STAGE, category)?);

    Ok(PlannedUnit {
        id: unit_for(STAGE, page_number, category)?,
        prompt: ctx.render(STAGE, &vars)?,
        image: image_for(images, page_number)?,
        category: category.clone(),
    })
}
