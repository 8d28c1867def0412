//! The four per-unit record contracts and their building blocks.

use super::{require_text, Constraint, Record, Stage, Validate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Stable category identifier, assigned once by Stage 1 and carried
/// unchanged through every later stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryKey(String);

impl CategoryKey {
    /// Key for the `index`-th (1-based) category found on `page_number`.
    pub fn new(page_number: usize, index: usize) -> Self {
        Self(format!("p{}-c{}", page_number, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CategoryKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Stage 1 ──────────────────────────────────────────────────────────────

/// A menu section header as printed on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Category {
    /// Absent in model output; stamped by the Stage 1 driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<CategoryKey>,
    pub name_raw: String,
    #[serde(default)]
    pub description_raw: Option<String>,
}

impl Validate for Category {
    fn check(&self) -> Result<(), Constraint> {
        require_text("name_raw", &self.name_raw)
    }
}

/// Stage 1 unit record: every category found on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Categories {
    pub categories: Vec<Category>,
}

impl Validate for Categories {
    fn check(&self) -> Result<(), Constraint> {
        check_each("categories", &self.categories)
    }
}

impl Record for Categories {
    const NAME: &'static str = "Categories";

    fn json_schema() -> Value {
        object(
            json!({ "categories": { "type": "array", "items": category_schema() } }),
            &["categories"],
        )
    }
}

// ── Stage 2 ──────────────────────────────────────────────────────────────

/// One price per size, e.g. `Small → 8.50`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizePrice {
    pub size: String,
    pub price_raw: String,
}

/// A dish or drink as listed under a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Item {
    pub name_raw: String,
    #[serde(default)]
    pub description_raw: Option<String>,
    #[serde(default)]
    pub price_raw: Option<String>,
    pub size_prices: Vec<SizePrice>,
}

impl Validate for Item {
    fn check(&self) -> Result<(), Constraint> {
        require_text("name_raw", &self.name_raw)
    }
}

/// Items printed directly under the category header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemGroup<I> {
    pub items: Vec<I>,
}

impl<I: Validate> Validate for ItemGroup<I> {
    fn check(&self) -> Result<(), Constraint> {
        check_each("items", &self.items)
    }
}

/// Items printed under a named sub-heading of the category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subcategory<I> {
    pub name_raw: String,
    #[serde(default)]
    pub description_raw: Option<String>,
    pub items: Vec<I>,
}

impl<I: Validate> Validate for Subcategory<I> {
    fn check(&self) -> Result<(), Constraint> {
        require_text("name_raw", &self.name_raw)?;
        check_each("items", &self.items)
    }
}

/// Stage 2 unit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryWithItems {
    pub category: Category,
    pub category_items: Vec<ItemGroup<Item>>,
    pub subcategory_items: Vec<Subcategory<Item>>,
}

impl CategoryWithItems {
    /// Items across both groupings.
    pub fn item_count(&self) -> usize {
        count_items(&self.category_items, &self.subcategory_items)
    }
}

impl Validate for CategoryWithItems {
    fn check(&self) -> Result<(), Constraint> {
        self.category.check().map_err(|c| c.within("category"))?;
        check_each("category_items", &self.category_items)?;
        check_each("subcategory_items", &self.subcategory_items)
    }
}

impl Record for CategoryWithItems {
    const NAME: &'static str = "CategoryWithItems";

    fn json_schema() -> Value {
        grouped_schema(item_schema(None))
    }
}

// ── Stage 3 ──────────────────────────────────────────────────────────────

/// How prices attach to the items of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    /// Every item carries its own price.
    PerItem,
    /// One price applies to every item of the category.
    Shared,
    /// Prices depend on a size chosen from the category's size list.
    BySize,
}

/// A size offered across the category, e.g. `Large (14")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeVariant {
    pub name_raw: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

impl Validate for SizeVariant {
    fn check(&self) -> Result<(), Constraint> {
        require_text("name_raw", &self.name_raw)
    }
}

/// A category-wide option such as "add cheese".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaseOption {
    pub name_raw: String,
    #[serde(default)]
    pub price_raw: Option<String>,
}

impl Validate for BaseOption {
    fn check(&self) -> Result<(), Constraint> {
        require_text("name_raw", &self.name_raw)
    }
}

/// Stage 3 unit record: pricing context used to disambiguate Stage 4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryBase {
    pub category: Category,
    pub pricing_mode: PricingMode,
    #[serde(default)]
    pub base_price: Option<String>,
    pub sizes: Vec<SizeVariant>,
    pub options: Vec<BaseOption>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CategoryBase {
    pub fn has_pricing(&self) -> bool {
        self.base_price.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

impl Validate for CategoryBase {
    fn check(&self) -> Result<(), Constraint> {
        self.category.check().map_err(|c| c.within("category"))?;
        check_each("sizes", &self.sizes)?;
        check_each("options", &self.options)
    }
}

impl Record for CategoryBase {
    const NAME: &'static str = "CategoryBase";

    fn json_schema() -> Value {
        object(
            json!({
                "category": category_schema(),
                "pricing_mode": { "type": "string", "enum": ["per_item", "shared", "by_size"] },
                "base_price": nullable("string"),
                "sizes": { "type": "array", "items": object(
                    json!({
                        "name_raw": { "type": "string" },
                        "size": nullable("string"),
                        "price": nullable("string"),
                    }),
                    &["name_raw", "size", "price"],
                ) },
                "options": { "type": "array", "items": named_price_schema() },
                "notes": nullable("string"),
            }),
            &["category", "pricing_mode", "base_price", "sizes", "options", "notes"],
        )
    }
}

// ── Stage 4 ──────────────────────────────────────────────────────────────

/// Whether a guest picks one or several add-ons from a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Single,
    Multiple,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Addon {
    pub name_raw: String,
    #[serde(default)]
    pub price_raw: Option<String>,
}

impl Validate for Addon {
    fn check(&self) -> Result<(), Constraint> {
        require_text("name_raw", &self.name_raw)
    }
}

/// A set of add-ons offered together, e.g. "Choose your sauce".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddonGroup {
    pub name_raw: String,
    pub selection: SelectionMode,
    pub min_select: u32,
    #[serde(default)]
    pub max_select: Option<u32>,
    pub addons: Vec<Addon>,
}

impl Validate for AddonGroup {
    fn check(&self) -> Result<(), Constraint> {
        require_text("name_raw", &self.name_raw)?;
        if let Some(max) = self.max_select {
            if self.min_select > max {
                return Err(Constraint::new(
                    "min_select",
                    format!("{} exceeds max_select {}", self.min_select, max),
                ));
            }
        }
        check_each("addons", &self.addons)
    }
}

/// An [`Item`] enriched with its add-on groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemWithAddons {
    pub name_raw: String,
    #[serde(default)]
    pub description_raw: Option<String>,
    #[serde(default)]
    pub price_raw: Option<String>,
    pub size_prices: Vec<SizePrice>,
    pub addon_groups: Vec<AddonGroup>,
}

impl Validate for ItemWithAddons {
    fn check(&self) -> Result<(), Constraint> {
        require_text("name_raw", &self.name_raw)?;
        check_each("addon_groups", &self.addon_groups)
    }
}

/// Stage 4 unit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryItemAddons {
    pub category: Category,
    pub category_items: Vec<ItemGroup<ItemWithAddons>>,
    pub subcategory_items: Vec<Subcategory<ItemWithAddons>>,
}

impl CategoryItemAddons {
    pub fn item_count(&self) -> usize {
        count_items(&self.category_items, &self.subcategory_items)
    }
}

impl Validate for CategoryItemAddons {
    fn check(&self) -> Result<(), Constraint> {
        self.category.check().map_err(|c| c.within("category"))?;
        check_each("category_items", &self.category_items)?;
        check_each("subcategory_items", &self.subcategory_items)
    }
}

impl Record for CategoryItemAddons {
    const NAME: &'static str = "CategoryItemAddons";

    fn json_schema() -> Value {
        let addon_group = object(
            json!({
                "name_raw": { "type": "string" },
                "selection": { "type": "string", "enum": ["single", "multiple"] },
                "min_select": { "type": "integer", "minimum": 0 },
                "max_select": { "type": ["integer", "null"], "minimum": 0 },
                "addons": { "type": "array", "items": named_price_schema() },
            }),
            &["name_raw", "selection", "min_select", "max_select", "addons"],
        );
        grouped_schema(item_schema(Some(addon_group)))
    }
}

// ── Category access across stages ────────────────────────────────────────

/// Records scoped to exactly one category.
pub trait HasCategory: Validate {
    /// The stage whose documents hold this record.
    const STAGE: Stage;

    fn category(&self) -> &Category;
    fn category_mut(&mut self) -> &mut Category;
}

impl HasCategory for CategoryWithItems {
    const STAGE: Stage = Stage::Items;

    fn category(&self) -> &Category {
        &self.category
    }
    fn category_mut(&mut self) -> &mut Category {
        &mut self.category
    }
}

impl HasCategory for CategoryBase {
    const STAGE: Stage = Stage::Bases;

    fn category(&self) -> &Category {
        &self.category
    }
    fn category_mut(&mut self) -> &mut Category {
        &mut self.category
    }
}

impl HasCategory for CategoryItemAddons {
    const STAGE: Stage = Stage::Addons;

    fn category(&self) -> &Category {
        &self.category
    }
    fn category_mut(&mut self) -> &mut Category {
        &mut self.category
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn check_each<T: Validate>(field: &str, values: &[T]) -> Result<(), Constraint> {
    for (i, v) in values.iter().enumerate() {
        v.check().map_err(|c| c.within(format!("{}[{}]", field, i)))?;
    }
    Ok(())
}

fn count_items<I>(groups: &[ItemGroup<I>], subcategories: &[Subcategory<I>]) -> usize {
    groups.iter().map(|g| g.items.len()).sum::<usize>()
        + subcategories.iter().map(|s| s.items.len()).sum::<usize>()
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn nullable(ty: &str) -> Value {
    json!({ "type": [ty, "null"] })
}

fn category_schema() -> Value {
    object(
        json!({
            "name_raw": { "type": "string" },
            "description_raw": nullable("string"),
        }),
        &["name_raw", "description_raw"],
    )
}

fn named_price_schema() -> Value {
    object(
        json!({
            "name_raw": { "type": "string" },
            "price_raw": nullable("string"),
        }),
        &["name_raw", "price_raw"],
    )
}

/// Item schema; Stage 4 items additionally require `addon_groups`.
fn item_schema(addon_group: Option<Value>) -> Value {
    let mut properties = json!({
        "name_raw": { "type": "string" },
        "description_raw": nullable("string"),
        "price_raw": nullable("string"),
        "size_prices": { "type": "array", "items": object(
            json!({ "size": { "type": "string" }, "price_raw": { "type": "string" } }),
            &["size", "price_raw"],
        ) },
    });
    let mut required = vec!["name_raw", "description_raw", "price_raw", "size_prices"];
    if let Some(group) = addon_group {
        properties["addon_groups"] = json!({ "type": "array", "items": group });
        required.push("addon_groups");
    }
    object(properties, &required)
}

fn grouped_schema(item: Value) -> Value {
    object(
        json!({
            "category": category_schema(),
            "category_items": { "type": "array", "items": object(
                json!({ "items": { "type": "array", "items": item.clone() } }),
                &["items"],
            ) },
            "subcategory_items": { "type": "array", "items": object(
                json!({
                    "name_raw": { "type": "string" },
                    "description_raw": nullable("string"),
                    "items": { "type": "array", "items": item },
                }),
                &["name_raw", "description_raw", "items"],
            ) },
        }),
        &["category", "category_items", "subcategory_items"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{validate, ViolationKind};

    fn item(name: &str) -> Item {
        Item {
            name_raw: name.into(),
            description_raw: None,
            price_raw: Some("5.00".into()),
            size_prices: vec![],
        }
    }

    #[test]
    fn item_count_sums_both_groupings() {
        let record = CategoryWithItems {
            category: Category {
                key: Some(CategoryKey::new(1, 1)),
                name_raw: "Pasta".into(),
                description_raw: None,
            },
            category_items: vec![ItemGroup {
                items: vec![item("Carbonara"), item("Amatriciana")],
            }],
            subcategory_items: vec![Subcategory {
                name_raw: "Baked".into(),
                description_raw: None,
                items: vec![item("Lasagne"), item("Cannelloni"), item("Ziti")],
            }],
        };
        assert_eq!(record.item_count(), 5);
    }

    #[test]
    fn category_key_format() {
        assert_eq!(CategoryKey::new(4, 12).as_str(), "p4-c12");
    }

    #[test]
    fn key_is_not_serialised_when_absent() {
        let cat = Category {
            key: None,
            name_raw: "Drinks".into(),
            description_raw: None,
        };
        let v = serde_json::to_value(&cat).unwrap();
        assert!(v.get("key").is_none());
    }

    #[test]
    fn addon_group_bounds_are_checked() {
        let value = json!({
            "category": { "name_raw": "Wings" },
            "category_items": [ { "items": [ {
                "name_raw": "Hot Wings",
                "size_prices": [],
                "addon_groups": [ {
                    "name_raw": "Dips",
                    "selection": "multiple",
                    "min_select": 3,
                    "max_select": 2,
                    "addons": []
                } ]
            } ] } ],
            "subcategory_items": []
        });
        let err = validate::<CategoryItemAddons>(value).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Constraint);
        assert_eq!(
            err.field.as_deref(),
            Some("category_items[0].items[0].addon_groups[0].min_select")
        );
    }

    #[test]
    fn has_pricing_ignores_blank_price() {
        let mut base = CategoryBase {
            category: Category {
                key: None,
                name_raw: "Pizza".into(),
                description_raw: None,
            },
            pricing_mode: PricingMode::BySize,
            base_price: Some(" ".into()),
            sizes: vec![],
            options: vec![],
            notes: None,
        };
        assert!(!base.has_pricing());
        base.base_price = Some("11.00".into());
        assert!(base.has_pricing());
    }

    #[test]
    fn schemas_require_every_declared_property() {
        for schema in [
            Categories::json_schema(),
            CategoryWithItems::json_schema(),
            CategoryBase::json_schema(),
            CategoryItemAddons::json_schema(),
        ] {
            let props = schema["properties"].as_object().unwrap();
            let required = schema["required"].as_array().unwrap();
            assert_eq!(props.len(), required.len());
            assert_eq!(schema["additionalProperties"], json!(false));
        }
    }

    #[test]
    fn addons_schema_nests_addon_groups() {
        let schema = CategoryItemAddons::json_schema();
        let item = &schema["properties"]["category_items"]["items"]["properties"]["items"]["items"];
        assert!(item["properties"].get("addon_groups").is_some());
        let plain = CategoryWithItems::json_schema();
        let plain_item =
            &plain["properties"]["category_items"]["items"]["properties"]["items"]["items"];
        assert!(plain_item["properties"].get("addon_groups").is_none());
    }
}
