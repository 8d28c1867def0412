//! Counting pages, categories and items of a job.

use crate::schema::{AddonsDocument, ItemsDocument, Stage};
use crate::store::JobId;
use serde::Serialize;
use std::fmt;

/// Size of an extracted menu.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub pages: usize,
    pub categories: usize,
    /// Category-level plus subcategory-level items.
    pub items: usize,
}

impl JobSummary {
    pub fn from_items(doc: &ItemsDocument) -> Self {
        Self {
            pages: doc.pages.len(),
            categories: doc.category_count(),
            items: doc
                .pages
                .iter()
                .flat_map(|p| &p.categories)
                .map(|c| c.item_count())
                .sum(),
        }
    }

    pub fn from_addons(doc: &AddonsDocument) -> Self {
        Self {
            pages: doc.pages.len(),
            categories: doc.category_count(),
            items: doc
                .pages
                .iter()
                .flat_map(|p| &p.categories)
                .map(|c| c.item_count())
                .sum(),
        }
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} page(s), {} categor{}, {} item(s)",
            self.pages,
            self.categories,
            if self.categories == 1 { "y" } else { "ies" },
            self.items
        )
    }
}

/// One row of the job list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobListing {
    pub job: JobId,
    /// Last stage with a persisted document; `None` right after upload.
    pub latest_stage: Option<Stage>,
}

impl fmt::Display for JobListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.latest_stage {
            Some(stage) => write!(f, "{}  {}", self.job, stage.name()),
            None => write!(f, "{}  uploaded", self.job),
        }
    }
}
