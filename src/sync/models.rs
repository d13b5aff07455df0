//! Typed menu records and the local view state built from snapshots.

use crate::error::Result;
use crate::normalizer::{ImageInput, ImageNormalizer};
use crate::types::{Document, DocumentId, Fields, Timestamp};
use serde::Serialize;
use serde_json::Value;

/// Shop-wide settings (singleton document).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub shop_name: String,
    /// Inlined image or external URL.
    pub logo_url: String,
    pub primary_color: String,
    pub background_color: String,
    pub currency: String,
    pub admin_password: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shop_name: "Premium Gold Lounge".to_string(),
            logo_url: "https://images.unsplash.com/photo-1514362545857-3bc16c4c7d1b?w=200&h=200&fit=crop"
                .to_string(),
            primary_color: "#D4AF37".to_string(),
            background_color: "#000000".to_string(),
            currency: "₺".to_string(),
            admin_password: "admin".to_string(),
        }
    }
}

impl Settings {
    /// Read a settings document. Missing or mistyped fields fall back to `defaults`.
    pub fn from_document(doc: &Document, defaults: &Settings) -> Self {
        let fields = &doc.fields;
        let or = |key: &str, fallback: &String| text(fields, key).unwrap_or_else(|| fallback.clone());
        Self {
            shop_name: or("shopName", &defaults.shop_name),
            logo_url: or("logoUrl", &defaults.logo_url),
            primary_color: or("primaryColor", &defaults.primary_color),
            background_color: or("backgroundColor", &defaults.background_color),
            currency: or("currency", &defaults.currency),
            admin_password: or("adminPassword", &defaults.admin_password),
        }
    }

    pub fn to_fields(&self) -> Fields {
        to_fields(self)
    }

    /// Normalize an upload and use it as the logo.
    /// On failure the current logo is left untouched.
    pub fn attach_logo(
        &mut self,
        normalizer: &ImageNormalizer,
        input: impl Into<ImageInput>,
    ) -> Result<()> {
        self.logo_url = normalizer.normalize(input)?.into_data_url();
        Ok(())
    }
}

/// A menu category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Category {
    pub id: DocumentId,
    pub name: String,
    pub created_at: Timestamp,
}

impl Category {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            name: text(&doc.fields, "name").unwrap_or_default(),
            created_at: millis(&doc.fields, "createdAt"),
        }
    }
}

/// A menu item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: DocumentId,
    pub name: String,
    /// Display text, e.g. "120".
    pub price: String,
    pub description: String,
    /// May point at a deleted category.
    pub category_id: String,
    pub image_url: String,
    pub created_at: Timestamp,
}

impl Item {
    pub fn from_document(doc: &Document) -> Self {
        let fields = &doc.fields;
        Self {
            id: doc.id.clone(),
            name: text(fields, "name").unwrap_or_default(),
            price: text(fields, "price").unwrap_or_default(),
            description: text(fields, "description").unwrap_or_default(),
            category_id: text(fields, "categoryId").unwrap_or_default(),
            image_url: text(fields, "imageUrl").unwrap_or_default(),
            created_at: millis(fields, "createdAt"),
        }
    }
}

/// Editable fields of an item, as submitted by the admin form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    pub name: String,
    pub price: String,
    pub description: String,
    pub category_id: String,
    pub image_url: String,
}

impl ItemDraft {
    /// Blank form, preselecting the first category.
    pub fn new_for(categories: &[Category]) -> Self {
        Self {
            category_id: categories
                .first()
                .map(|c| c.id.to_string())
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Form prefilled from an existing item.
    pub fn from_item(item: &Item) -> Self {
        Self {
            name: item.name.clone(),
            price: item.price.clone(),
            description: item.description.clone(),
            category_id: item.category_id.clone(),
            image_url: item.image_url.clone(),
        }
    }

    pub fn to_fields(&self) -> Fields {
        to_fields(self)
    }

    /// Normalize an upload and use it as the item image.
    /// On failure the current image is left untouched.
    pub fn attach_image(
        &mut self,
        normalizer: &ImageNormalizer,
        input: impl Into<ImageInput>,
    ) -> Result<()> {
        self.image_url = normalizer.normalize(input)?.into_data_url();
        Ok(())
    }
}

/// Which items a menu view shows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Category(DocumentId),
}

impl CategoryFilter {
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Category(id) => item.category_id == id.as_str(),
        }
    }
}

/// Local mirror of the three menu collections.
///
/// Rebuilt wholesale from every snapshot; never edited in place.
#[derive(Clone, Debug, Default)]
pub struct MenuState {
    pub settings: Settings,
    pub categories: Vec<Category>,
    pub items: Vec<Item>,
    pub(crate) items_loaded: bool,
}

impl MenuState {
    /// True once the first items snapshot has arrived.
    pub fn is_loaded(&self) -> bool {
        self.items_loaded
    }

    pub fn category(&self, id: &DocumentId) -> Option<&Category> {
        self.categories.iter().find(|c| &c.id == id)
    }

    /// Items whose name contains `search` (case-insensitive) and that pass `filter`.
    pub fn filtered_items(&self, search: &str, filter: &CategoryFilter) -> Vec<&Item> {
        let needle = search.to_lowercase();
        self.items
            .iter()
            .filter(|item| item.name.to_lowercase().contains(&needle) && filter.matches(item))
            .collect()
    }

    /// Items whose category reference no longer resolves.
    pub fn orphaned_items(&self) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|item| {
                !self
                    .categories
                    .iter()
                    .any(|c| c.id.as_str() == item.category_id)
            })
            .collect()
    }
}

fn to_fields<T: Serialize>(value: &T) -> Fields {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Fields::new(),
    }
}

/// String field, accepting numbers and booleans as text.
fn text(fields: &Fields, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn millis(fields: &Fields, key: &str) -> Timestamp {
    let value = fields.get(key);
    let ms = value
        .and_then(Value::as_i64)
        .or_else(|| value.and_then(Value::as_f64).map(|f| f as i64))
        .unwrap_or_default();
    Timestamp(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: serde_json::Value) -> Document {
        Document {
            id: DocumentId::new(id),
            fields: value.as_object().cloned().unwrap(),
        }
    }

    fn item(id: &str, name: &str, category: &str) -> Item {
        Item::from_document(&doc(id, json!({ "name": name, "categoryId": category })))
    }

    #[test]
    fn test_settings_fields_round_trip_names() {
        let fields = Settings::default().to_fields();
        assert_eq!(fields["shopName"], "Premium Gold Lounge");
        assert_eq!(fields["adminPassword"], "admin");
        assert_eq!(fields.len(), 6);
    }

    #[test]
    fn test_settings_tolerates_partial_documents() {
        let defaults = Settings::default();
        let settings = Settings::from_document(
            &doc("config", json!({ "shopName": "Kebab House", "currency": 5 })),
            &defaults,
        );

        assert_eq!(settings.shop_name, "Kebab House");
        assert_eq!(settings.currency, "5");
        assert_eq!(settings.primary_color, defaults.primary_color);
    }

    #[test]
    fn test_item_reads_numeric_price() {
        let item = Item::from_document(&doc(
            "i1",
            json!({ "name": "Lamb Shank", "price": 120, "createdAt": 1700000000000i64 }),
        ));
        assert_eq!(item.price, "120");
        assert_eq!(item.created_at, Timestamp(1_700_000_000_000));
        assert_eq!(item.description, "");
    }

    #[test]
    fn test_draft_defaults_to_first_category() {
        let categories = vec![
            Category::from_document(&doc("cat_1", json!({ "name": "Mains" }))),
            Category::from_document(&doc("cat_2", json!({ "name": "Drinks" }))),
        ];
        assert_eq!(ItemDraft::new_for(&categories).category_id, "cat_1");
        assert_eq!(ItemDraft::new_for(&[]).category_id, "");
    }

    #[test]
    fn test_draft_fields_have_no_id_or_timestamp() {
        let draft = ItemDraft {
            name: "Lamb Shank".into(),
            price: "120".into(),
            category_id: "cat_1".into(),
            ..Default::default()
        };
        let fields = draft.to_fields();
        assert_eq!(fields["categoryId"], "cat_1");
        assert!(!fields.contains_key("id"));
        assert!(!fields.contains_key("createdAt"));
    }

    #[test]
    fn test_filtered_items() {
        let state = MenuState {
            items: vec![
                item("1", "Lamb Shank", "cat_1"),
                item("2", "Lentil Soup", "cat_2"),
                item("3", "Lamb Chops", "cat_2"),
            ],
            ..Default::default()
        };

        let names = |items: Vec<&Item>| items.iter().map(|i| i.name.clone()).collect::<Vec<_>>();

        assert_eq!(state.filtered_items("", &CategoryFilter::All).len(), 3);
        assert_eq!(
            names(state.filtered_items("LAMB", &CategoryFilter::All)),
            vec!["Lamb Shank", "Lamb Chops"]
        );
        assert_eq!(
            names(state.filtered_items("lamb", &CategoryFilter::Category("cat_2".into()))),
            vec!["Lamb Chops"]
        );
        assert!(state
            .filtered_items("", &CategoryFilter::Category("cat_9".into()))
            .is_empty());
    }

    #[test]
    fn test_orphaned_items() {
        let state = MenuState {
            categories: vec![Category::from_document(&doc("cat_2", json!({ "name": "Soups" })))],
            items: vec![item("1", "Lamb Shank", "cat_1"), item("2", "Soup", "cat_2")],
            ..Default::default()
        };

        let orphans = state.orphaned_items();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].category_id, "cat_1");
    }
}
