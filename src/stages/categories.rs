//! Stage 1: discover the menu categories on every page.

use super::{base_vars, StageContext};
use crate::error::MenuExtractError;
use crate::pipeline::encode::PageImage;
use crate::schema::{Categories, CategoriesDocument, CategoriesPage, CategoryKey, Stage, UnitId};

/// One unit per page. Each accepted category is stamped with a
/// [`CategoryKey`] derived from its page and position; later stages carry
/// the key unchanged.
pub async fn run(
    ctx: &StageContext,
    restaurant_name: &str,
    images: &[PageImage],
) -> Result<CategoriesDocument, MenuExtractError> {
    if restaurant_name.trim().is_empty() {
        return Err(MenuExtractError::InvalidConfig(
            "restaurant name must not be empty".into(),
        ));
    }
    for (i, page) in images.iter().enumerate() {
        if page.page_number != i + 1 {
            return Err(MenuExtractError::ResourceMissing {
                resource: format!("image of page {}", i + 1),
            });
        }
    }

    let stage = Stage::Categories;
    let planned = images
        .iter()
        .map(|page| {
            let vars = base_vars(restaurant_name, page.page_number).set("additional_context", "");
            Ok((UnitId::page(stage, page.page_number), ctx.render(stage, &vars)?, page))
        })
        .collect::<Result<Vec<_>, MenuExtractError>>()?;

    ctx.stage_started(stage, planned.len());
    let attempts = ctx.attempts(stage);
    let results: Vec<Categories> = ctx
        .fanout
        .run_bounded(
            planned
                .iter()
                .map(|(id, prompt, page)| ctx.units.extract::<Categories>(id, prompt, &page.image, attempts))
                .collect(),
        )
        .await?;

    let pages = results
        .into_iter()
        .zip(&planned)
        .map(|(mut data, (_, _, page))| {
            stamp_keys(&mut data, page.page_number);
            CategoriesPage {
                page_number: page.page_number,
                data,
            }
        })
        .collect();

    ctx.stage_completed(stage, planned.len());
    Ok(CategoriesDocument {
        restaurant_name: restaurant_name.to_string(),
        pages,
    })
}

/// Assign `p{page}-c{n}` keys in the order the model listed the categories.
fn stamp_keys(data: &mut Categories, page_number: usize) {
    for (i, category) in data.categories.iter_mut().enumerate() {
        category.key = Some(CategoryKey::new(page_number, i + 1));
    }
}
