//! Structural contracts for everything the model returns and every stage
//! document the pipeline persists.
//!
//! Four record shapes form a partial order, each later one refining the
//! scoped sub-structure of the one before:
//!
//! ```text
//! Categories ──▶ CategoryWithItems ──▶ CategoryBase
//!                        │                  │
//!                        └──────┬───────────┘
//!                               ▼
//!                       CategoryItemAddons
//! ```
//!
//! Validation is pure and total: [`validate`] takes any JSON value and either
//! returns the typed record or a [`SchemaViolation`] naming what is wrong. All
//! record structs are `deny_unknown_fields`, so drifted field names (e.g.
//! `name` instead of `name_raw`) are rejected instead of coerced.

mod document;
mod records;

pub use document::{
    validate_document, AddonsDocument, BasesDocument, CategoriesDocument, CategoriesPage,
    CategoryPage, ItemsDocument, StageDocument, StagePage,
};
pub use records::{
    Addon, AddonGroup, BaseOption, Categories, Category, CategoryBase, CategoryItemAddons,
    CategoryKey, CategoryWithItems, HasCategory, Item, ItemGroup, ItemWithAddons, PricingMode,
    SelectionMode, SizePrice, SizeVariant, Subcategory,
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// ── Stages and units ─────────────────────────────────────────────────────

/// One of the four sequential extraction passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Stage 1: category discovery, one unit per page.
    Categories,
    /// Stage 2: items per category.
    Items,
    /// Stage 3: base pricing, sizes and options per category.
    Bases,
    /// Stage 4: items with add-on groups per category.
    Addons,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Categories, Stage::Items, Stage::Bases, Stage::Addons];

    /// 1-based stage number.
    pub fn number(self) -> u8 {
        match self {
            Stage::Categories => 1,
            Stage::Items => 2,
            Stage::Bases => 3,
            Stage::Addons => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Categories => "categories",
            Stage::Items => "items",
            Stage::Bases => "bases",
            Stage::Addons => "addons",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.name())
    }
}

/// Identity of the smallest independently retried extraction task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitId {
    pub stage: Stage,
    pub page_number: usize,
    /// `None` for page-level units (Stage 1).
    pub category: Option<(CategoryKey, String)>,
}

impl UnitId {
    pub fn page(stage: Stage, page_number: usize) -> Self {
        Self {
            stage,
            page_number,
            category: None,
        }
    }

    pub fn category(
        stage: Stage,
        page_number: usize,
        key: CategoryKey,
        name: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            page_number,
            category: Some((key, name.into())),
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} page {}", self.stage, self.page_number)?;
        if let Some((key, name)) = &self.category {
            write!(f, " category '{}' [{}]", name, key)?;
        }
        Ok(())
    }
}

// ── Validation ───────────────────────────────────────────────────────────

/// A semantic constraint a structurally well-formed value failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub field: String,
    pub message: String,
}

impl Constraint {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefix the field path, e.g. `name_raw` → `categories[2].name_raw`.
    pub fn within(self, prefix: impl fmt::Display) -> Self {
        Self {
            field: format!("{}.{}", prefix, self.field),
            message: self.message,
        }
    }
}

/// Reject blank names: an empty `name_raw` means the model lost the label.
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), Constraint> {
    if value.trim().is_empty() {
        return Err(Constraint::new(field, "must not be empty"));
    }
    Ok(())
}

/// Semantic checks that run after the shape has been accepted.
pub trait Validate {
    fn check(&self) -> Result<(), Constraint>;
}

/// A record the model is asked to produce for one unit of work.
pub trait Record: Validate + Serialize + DeserializeOwned + Send + 'static {
    /// Contract name, used in prompts and diagnostics.
    const NAME: &'static str;

    /// JSON Schema describing the record, handed to the model.
    fn json_schema() -> Value;
}

/// What kind of rule a rejected value broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingField,
    UnknownField,
    UnknownVariant,
    WrongType,
    Constraint,
    Other,
}

/// Structured rejection of a value against a record contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SchemaViolation {
    pub record: &'static str,
    pub kind: ViolationKind,
    /// Offending field or variant when it can be identified.
    pub field: Option<String>,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected ({:?}", self.record, self.kind)?;
        if let Some(field) = &self.field {
            write!(f, " at `{}`", field)?;
        }
        write!(f, "): {}", self.message)
    }
}

static SERDE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(missing field|unknown field|unknown variant) `([^`]*)`").unwrap()
});

impl SchemaViolation {
    fn from_serde(record: &'static str, err: &serde_json::Error) -> Self {
        let message = err.to_string();
        let (kind, field) = match SERDE_FIELD.captures(&message) {
            Some(caps) => {
                let kind = match &caps[1] {
                    "missing field" => ViolationKind::MissingField,
                    "unknown field" => ViolationKind::UnknownField,
                    _ => ViolationKind::UnknownVariant,
                };
                (kind, Some(caps[2].to_string()))
            }
            None if message.starts_with("invalid type") || message.starts_with("invalid value") => {
                (ViolationKind::WrongType, None)
            }
            None => (ViolationKind::Other, None),
        };
        Self {
            record,
            kind,
            field,
            message,
        }
    }

    fn from_constraint(record: &'static str, c: Constraint) -> Self {
        Self {
            record,
            kind: ViolationKind::Constraint,
            message: format!("`{}` {}", c.field, c.message),
            field: Some(c.field),
        }
    }
}

/// Validate an arbitrary JSON value against record contract `R`.
///
/// Never partially accepts: the result is either the complete typed record or
/// the first violation found.
pub fn validate<R: Record>(value: Value) -> Result<R, SchemaViolation> {
    let record: R =
        serde_json::from_value(value).map_err(|e| SchemaViolation::from_serde(R::NAME, &e))?;
    record
        .check()
        .map_err(|c| SchemaViolation::from_constraint(R::NAME, c))?;
    Ok(record)
}
