//! Stage documents: the uniform page-indexed envelope each stage produces
//! and the next stage destructures.

use super::records::{
    Categories, Category, CategoryBase, CategoryItemAddons, CategoryKey, CategoryWithItems,
    HasCategory,
};
use super::{require_text, Constraint, Stage, Validate};
use crate::error::MenuExtractError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// `{restaurant_name, pages: [...]}` - shared by all four stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDocument<P> {
    pub restaurant_name: String,
    pub pages: Vec<P>,
}

/// Stage 1 page: the categories found on one page, under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoriesPage {
    pub page_number: usize,
    pub data: Categories,
}

/// Stage 2–4 page: one record per category, in Stage 1 order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryPage<T> {
    pub page_number: usize,
    pub categories: Vec<T>,
}

pub type CategoriesDocument = StageDocument<CategoriesPage>;
pub type ItemsDocument = StageDocument<CategoryPage<CategoryWithItems>>;
pub type BasesDocument = StageDocument<CategoryPage<CategoryBase>>;
pub type AddonsDocument = StageDocument<CategoryPage<CategoryItemAddons>>;

/// Uniform access to the pages of any stage document.
pub trait StagePage: Validate + Serialize + DeserializeOwned {
    const STAGE: Stage;

    fn page_number(&self) -> usize;

    /// The categories on this page, in document order.
    fn categories(&self) -> Vec<&Category>;
}

impl Validate for CategoriesPage {
    fn check(&self) -> Result<(), Constraint> {
        self.data.check().map_err(|c| c.within("data"))
    }
}

impl StagePage for CategoriesPage {
    const STAGE: Stage = Stage::Categories;

    fn page_number(&self) -> usize {
        self.page_number
    }

    fn categories(&self) -> Vec<&Category> {
        self.data.categories.iter().collect()
    }
}

impl<T: Validate> Validate for CategoryPage<T> {
    fn check(&self) -> Result<(), Constraint> {
        for (i, record) in self.categories.iter().enumerate() {
            record
                .check()
                .map_err(|c| c.within(format!("categories[{}]", i)))?;
        }
        Ok(())
    }
}

impl<T> StagePage for CategoryPage<T>
where
    T: HasCategory + Serialize + DeserializeOwned,
{
    const STAGE: Stage = T::STAGE;

    fn page_number(&self) -> usize {
        self.page_number
    }

    fn categories(&self) -> Vec<&Category> {
        self.categories.iter().map(|r| r.category()).collect()
    }
}

impl<T> CategoryPage<T>
where
    T: HasCategory,
{
    /// The record for `key` on this page.
    pub fn find(&self, key: &CategoryKey) -> Option<&T> {
        self.categories
            .iter()
            .find(|r| r.category().key.as_ref() == Some(key))
    }

    /// The keys on this page in document order. Only meaningful on a
    /// validated document, where every category carries a key.
    pub fn keys(&self) -> Vec<&CategoryKey> {
        self.categories
            .iter()
            .filter_map(|r| r.category().key.as_ref())
            .collect()
    }
}

impl<P: StagePage> StageDocument<P> {
    pub fn stage(&self) -> Stage {
        P::STAGE
    }

    /// The page with the given 1-based number.
    pub fn page(&self, page_number: usize) -> Option<&P> {
        page_number
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .filter(|p| p.page_number() == page_number)
    }

    pub fn category_count(&self) -> usize {
        self.pages.iter().map(|p| p.categories().len()).sum()
    }
}

impl<P: StagePage> Validate for StageDocument<P> {
    fn check(&self) -> Result<(), Constraint> {
        require_text("restaurant_name", &self.restaurant_name)?;

        let mut seen = HashSet::new();
        for (i, page) in self.pages.iter().enumerate() {
            let prefix = format!("pages[{}]", i);
            if page.page_number() != i + 1 {
                return Err(Constraint::new(
                    "page_number",
                    format!("is {}, expected {}", page.page_number(), i + 1),
                )
                .within(prefix));
            }
            page.check().map_err(|c| c.within(&prefix))?;

            for category in page.categories() {
                let key = category.key.as_ref().ok_or_else(|| {
                    Constraint::new(
                        "key",
                        format!("missing on category '{}'", category.name_raw),
                    )
                    .within(&prefix)
                })?;
                if !seen.insert(key.clone()) {
                    return Err(Constraint::new(
                        "key",
                        format!("duplicate category key '{}'", key),
                    )
                    .within(&prefix));
                }
            }
        }
        Ok(())
    }
}

impl<P: StagePage> StageDocument<P> {
    /// Run the document invariants on an already typed document.
    pub fn revalidate(&self) -> Result<(), MenuExtractError> {
        self.check()
            .map_err(|c| MenuExtractError::UpstreamDocumentInvalid {
                stage: P::STAGE,
                detail: format!("`{}` {}", c.field, c.message),
            })
    }
}

/// Re-validate a persisted document of a prior stage.
///
/// Stored state is never trusted: the document may have been edited by hand
/// between stages.
pub fn validate_document<P: StagePage>(value: Value) -> Result<StageDocument<P>, MenuExtractError> {
    let doc: StageDocument<P> = serde_json::from_value(value).map_err(|e| {
        MenuExtractError::UpstreamDocumentInvalid {
            stage: P::STAGE,
            detail: e.to_string(),
        }
    })?;
    doc.revalidate()?;
    Ok(doc)
}
