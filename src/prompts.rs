//! Prompt templates for the four extraction stages.
//!
//! Every stage has one built-in template. A directory of overrides can replace
//! any of them (`categories.txt`, `items.txt`, `bases.txt`, `addons.txt`);
//! templates not present in the directory keep their built-in text.
//!
//! Templates use `{{ name }}` placeholders and render **strictly**: a
//! placeholder with no value is an error, never an empty string. A prompt that
//! silently lost its category name would still produce schema-valid JSON for
//! the wrong category, which no amount of retrying can detect.
//!
//! The JSON Schema of the expected record is not part of these templates; the
//! model adapter sends it in the system message.

use crate::schema::Stage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Stage 1: find the menu categories on one page.
pub const CATEGORIES_TEMPLATE: &str = r#"You are reading page {{ page_number }} of the menu of "{{ restaurant_name }}".

List every menu category (section heading) visible on this page, in reading order.

Rules:
- Copy each category name exactly as printed into `name_raw`. Do not translate, correct or normalise it.
- If the category has a descriptive line under its heading (e.g. "served with fries"), copy it into `description_raw`; otherwise use null.
- Do not list dishes, prices, the restaurant name, opening hours or contact details as categories.
- If the page contains no categories, return an empty `categories` list.
{{ additional_context }}"#;

/// Stage 2: list the items of one category.
pub const ITEMS_TEMPLATE: &str = r#"You are reading page {{ page_number }} of the menu of "{{ restaurant_name }}".

Extract every item listed under the category "{{ category_name }}".
Category description: {{ category_description }}

The category as identified earlier:
{{ categories }}

Rules:
- Echo the category unchanged in `category`.
- Items directly under the category go in `category_items`; items under a sub-heading go in `subcategory_items`, one entry per sub-heading.
- Copy names, descriptions and prices exactly as printed (`name_raw`, `description_raw`, `price_raw`). Keep currency symbols.
- When an item lists several sizes with their own prices, put each in `size_prices` and leave `price_raw` null.
- Ignore items that belong to other categories on the same page."#;

/// Stage 3: determine how the category is priced.
pub const BASES_TEMPLATE: &str = r#"You are reading page {{ page_number }} of the menu of "{{ restaurant_name }}".

Determine the base pricing of the category below, which has {{ items_count }} item(s):
{{ category }}

Rules:
- Echo the category unchanged in `category`.
- `pricing_mode` is `per_item` when every item has its own price, `shared` when one price applies to the whole category, and `by_size` when the price depends on a size (small/medium/large, 30cm/40cm, ...).
- For `shared` pricing put the common price in `base_price`.
- List every size variant in `sizes` and every base choice (dough, bread, sauce base, ...) in `options`.
- Put pricing remarks printed near the category (e.g. "extra toppings 1.50 each") in `notes`."#;

/// Stage 4: items with their add-on groups.
pub const ADDONS_TEMPLATE: &str = r#"You are reading page {{ page_number }} of the menu of "{{ restaurant_name }}".

Extract the complete items of the category below, including their add-ons.

Items found earlier:
{{ category }}

Base pricing found earlier:
{{ category_base }}

The category has explicit base pricing: {{ has_pricing }}

Rules:
- Echo the category unchanged in `category` and keep the same items in the same groups.
- For each item, list the add-ons, extras, sides or choices the menu offers as `addon_groups`.
- `selection` is `single` when exactly one choice is allowed, `multiple` otherwise. Set `min_select`/`max_select` from the menu wording ("choose 2" → min 2, max 2); use min 0 and a null max when the menu gives no limit.
- Copy every name and price exactly as printed."#;

// ── Template identity ────────────────────────────────────────────────────

/// Which template to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    Categories,
    Items,
    Bases,
    Addons,
}

impl TemplateId {
    pub const ALL: [TemplateId; 4] = [
        TemplateId::Categories,
        TemplateId::Items,
        TemplateId::Bases,
        TemplateId::Addons,
    ];

    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Categories => TemplateId::Categories,
            Stage::Items => TemplateId::Items,
            Stage::Bases => TemplateId::Bases,
            Stage::Addons => TemplateId::Addons,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TemplateId::Categories => "categories",
            TemplateId::Items => "items",
            TemplateId::Bases => "bases",
            TemplateId::Addons => "addons",
        }
    }

    /// File name of the override inside a prompts directory.
    pub fn file_name(self) -> String {
        format!("{}.txt", self.name())
    }

    fn builtin(self) -> &'static str {
        match self {
            TemplateId::Categories => CATEGORIES_TEMPLATE,
            TemplateId::Items => ITEMS_TEMPLATE,
            TemplateId::Bases => BASES_TEMPLATE,
            TemplateId::Addons => ADDONS_TEMPLATE,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TemplateId {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| TemplateError::UnknownTemplate { name: s.to_string() })
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// A prompt could not be produced.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template references a variable the caller did not supply.
    #[error("template '{template}' references undefined variable '{variable}'")]
    MissingVariable {
        template: TemplateId,
        variable: String,
    },

    /// No template with this name exists.
    #[error("unknown prompt template '{name}' (expected one of: categories, items, bases, addons)")]
    UnknownTemplate { name: String },

    /// An override file could not be read.
    #[error("failed to read prompt template '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Variables ────────────────────────────────────────────────────────────

/// Values for the placeholders of one rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptVars(BTreeMap<String, String>);

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Strict `{{ var }}` renderer over the four stage templates.
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    templates: HashMap<TemplateId, String>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptRenderer {
    /// The built-in templates.
    pub fn builtin() -> Self {
        Self {
            templates: TemplateId::ALL
                .into_iter()
                .map(|id| (id, id.builtin().to_string()))
                .collect(),
        }
    }

    /// Built-in templates overridden by the `*.txt` files found in `dir`.
    ///
    /// Any `.txt` file whose stem is not a known template name is rejected,
    /// so a misspelt override never goes unnoticed.
    pub fn from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let io_err = |source| TemplateError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut renderer = Self::builtin();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let id: TemplateId = stem.parse()?;
            let text = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                path: path.clone(),
                source,
            })?;
            debug!("Prompt template '{}' overridden from {}", id, path.display());
            renderer.templates.insert(id, text);
        }
        Ok(renderer)
    }

    /// Replace one template.
    pub fn with_template(mut self, id: TemplateId, text: impl Into<String>) -> Self {
        self.templates.insert(id, text.into());
        self
    }

    /// Raw text of a template.
    pub fn template(&self, id: TemplateId) -> &str {
        self.templates
            .get(&id)
            .map(String::as_str)
            .unwrap_or_else(|| id.builtin())
    }

    /// Render `id`, failing on the first placeholder without a value.
    pub fn render(&self, id: TemplateId, vars: &PromptVars) -> Result<String, TemplateError> {
        let text = self.template(id);
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in RE_PLACEHOLDER.captures_iter(text) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let name = &caps[1];
            let value = vars.get(name).ok_or_else(|| TemplateError::MissingVariable {
                template: id,
                variable: name.to_string(),
            })?;
            out.push_str(&text[last..whole.start]);
            out.push_str(value);
            last = whole.end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Render by template name, as given on the command line or in a file.
    pub fn render_named(&self, name: &str, vars: &PromptVars) -> Result<String, TemplateError> {
        self.render(name.parse()?, vars)
    }
}
