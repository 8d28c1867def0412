//! Stage 4: items with their add-on groups.
//!
//! The only stage with two upstream inputs. Stage 2 and Stage 3 documents
//! must describe exactly the same pages and, per page, the same set of
//! category keys; records are then paired by key, never by position, and
//! Stage 2 order is kept. Any disagreement fails the stage before a single
//! model call is made.

use super::{
    base_vars, image_for, key_of, locate, replace_one, require_images, run_category_stage,
    to_prompt_json, unit_for, PlannedUnit, StageContext,
};
use crate::error::MenuExtractError;
use crate::pipeline::encode::PageImage;
use crate::schema::{
    AddonsDocument, BasesDocument, CategoryBase, CategoryKey, CategoryWithItems, ItemsDocument,
    Stage,
};
use std::collections::BTreeSet;

const STAGE: Stage = Stage::Addons;

/// One page of paired Stage 2 / Stage 3 records.
type AlignedPage<'a> = (usize, Vec<(&'a CategoryWithItems, &'a CategoryBase)>);

/// One unit per (page, category) of the Stage 2 document, each paired with
/// its Stage 3 base.
pub async fn run(
    ctx: &StageContext,
    items: &ItemsDocument,
    bases: &BasesDocument,
    images: &[PageImage],
) -> Result<AddonsDocument, MenuExtractError> {
    items.revalidate()?;
    bases.revalidate()?;
    let aligned = align(items, bases)?;
    require_images(items, images)?;

    let restaurant = items.restaurant_name.as_str();
    let plan = aligned
        .into_iter()
        .map(|(page_number, pairs)| {
            pairs
                .into_iter()
                .map(|(record, base)| plan_unit(ctx, restaurant, page_number, record, base, images))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    run_category_stage(ctx, restaurant, plan).await
}

/// Re-extract the add-ons of one category from its current Stage 2 and
/// Stage 3 records.
pub async fn reextract(
    ctx: &StageContext,
    items: &ItemsDocument,
    bases: &BasesDocument,
    addons: &AddonsDocument,
    images: &[PageImage],
    page_number: usize,
    key: &CategoryKey,
) -> Result<AddonsDocument, MenuExtractError> {
    items.revalidate()?;
    bases.revalidate()?;
    addons.revalidate()?;
    require_images(items, images)?;
    require_images(bases, images)?;
    require_images(addons, images)?;

    let item_slot = locate(items, page_number, key)?;
    let base_slot = locate(bases, page_number, key)?;
    let record = &items.pages[page_number - 1].categories[item_slot];
    let base = &bases.pages[page_number - 1].categories[base_slot];
    let unit = plan_unit(ctx, &addons.restaurant_name, page_number, record, base, images)?;
    replace_one(ctx, addons, unit).await
}

/// Check that both documents agree page by page and pair records by key.
pub fn align<'a>(
    items: &'a ItemsDocument,
    bases: &'a BasesDocument,
) -> Result<Vec<AlignedPage<'a>>, MenuExtractError> {
    if items.pages.len() != bases.pages.len() {
        return Err(MenuExtractError::StageMisaligned {
            detail: format!(
                "items document has {} page(s), bases document has {}",
                items.pages.len(),
                bases.pages.len()
            ),
        });
    }

    let mut aligned = Vec::with_capacity(items.pages.len());
    for (item_page, base_page) in items.pages.iter().zip(&bases.pages) {
        if item_page.page_number != base_page.page_number {
            return Err(MenuExtractError::StageMisaligned {
                detail: format!(
                    "page {} of the items document faces page {} of the bases document",
                    item_page.page_number, base_page.page_number
                ),
            });
        }

        let item_keys: BTreeSet<&CategoryKey> = item_page.keys().into_iter().collect();
        let base_keys: BTreeSet<&CategoryKey> = base_page.keys().into_iter().collect();
        if item_keys != base_keys {
            let only_items: Vec<String> =
                item_keys.difference(&base_keys).map(|k| k.to_string()).collect();
            let only_bases: Vec<String> =
                base_keys.difference(&item_keys).map(|k| k.to_string()).collect();
            return Err(MenuExtractError::StageMisaligned {
                detail: format!(
                    "page {}: categories only in items [{}], only in bases [{}]",
                    item_page.page_number,
                    only_items.join(", "),
                    only_bases.join(", ")
                ),
            });
        }

        let mut pairs = Vec::with_capacity(item_page.categories.len());
        for record in &item_page.categories {
            let key = key_of(&record.category)?;
            let base = base_page.find(key).ok_or_else(|| MenuExtractError::StageMisaligned {
                detail: format!("page {}: no base for category '{}'", item_page.page_number, key),
            })?;
            pairs.push((record, base));
        }
        aligned.push((item_page.page_number, pairs));
    }
    Ok(aligned)
}

fn plan_unit<'a>(
    ctx: &StageContext,
    restaurant_name: &str,
    page_number: usize,
    record: &CategoryWithItems,
    base: &CategoryBase,
    images: &'a [PageImage],
) -> Result<PlannedUnit<'a>, MenuExtractError> {
    let vars = base_vars(restaurant_name, page_number)
        .set("category", to_prompt_json(STAGE, record)?)
        .set("category_base", to_prompt_json(STAGE, base)?)
        .set("has_pricing", base.has_pricing());

    Ok(PlannedUnit {
        id: unit_for(STAGE, page_number, &record.category)?,
        prompt: ctx.render(STAGE, &vars)?,
        image: image_for(images, page_number)?,
        category: record.category.clone(),
    })
}
