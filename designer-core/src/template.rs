//! Starter templates authored in a fixed 400x400 reference space.
//!
//! Template objects are kept as raw JSON maps so only the fields an author
//! actually set are rescaled; they become [`CanvasObject`]s on application.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::object::CanvasObject;
use crate::DesignerResult;

/// Side of the square space templates are authored in.
pub const TEMPLATE_REFERENCE_SIZE: f32 = 400.0;

const BUILTIN_TEMPLATES: &str = include_str!("../templates/builtin.json");

/// Fields scaled along X.
const X_FIELDS: [&str; 3] = ["left", "width", "scaleX"];
/// Fields scaled along Y.
const Y_FIELDS: [&str; 3] = ["top", "height", "scaleY"];

/// Object list of a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateData {
    /// Objects as authored.
    #[serde(default)]
    pub objects: Vec<Map<String, Value>>,
}

/// A read-only starter design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Category slug.
    #[serde(default = "default_category")]
    pub category: String,
    /// Higher sorts first.
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Products the template applies to; empty means all.
    #[serde(default, alias = "products", deserialize_with = "ids_from_any")]
    pub applicable_product_ids: Vec<String>,
    /// Preview image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Objects to place.
    pub data: TemplateData,
}

fn default_category() -> String {
    "custom".to_string()
}

const fn default_priority() -> i64 {
    5
}

/// Accept product IDs written as numbers or strings.
fn ids_from_any<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "product id must be a string or number, got {other}"
            ))),
        })
        .collect()
}

impl Template {
    /// Parse and validate a template.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedTemplate`] if the payload is not a
    /// template or any of its objects is not a valid canvas object.
    pub fn from_json(json: &str) -> DesignerResult<Self> {
        let template: Self = serde_json::from_str(json)
            .map_err(|e| ValidationError::MalformedTemplate(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    /// Check every object deserializes.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedTemplate`] naming the first bad object.
    pub fn validate(&self) -> DesignerResult<()> {
        for (i, obj) in self.data.objects.iter().enumerate() {
            serde_json::from_value::<CanvasObject>(Value::Object(obj.clone())).map_err(|e| {
                ValidationError::MalformedTemplate(format!("{}: object {i}: {e}", self.id))
            })?;
        }
        Ok(())
    }

    /// Whether the template may be used on a product.
    #[must_use]
    pub fn applies_to(&self, product_id: &str) -> bool {
        self.applicable_product_ids.is_empty()
            || self.applicable_product_ids.iter().any(|p| p == product_id)
    }

    /// Map the template onto a canvas of the given size.
    ///
    /// Positions, sizes and scale factors are multiplied per axis by
    /// `target / 400`; font sizes by the smaller of the two factors. With
    /// `replacements`, every `[key]` in text content is replaced by its
    /// value; unknown placeholders stay as written. Each call yields objects
    /// with fresh IDs.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedTemplate`] if an object cannot be
    /// turned into a canvas object.
    pub fn apply(
        &self,
        target_width: f32,
        target_height: f32,
        replacements: Option<&BTreeMap<String, String>>,
    ) -> DesignerResult<Vec<CanvasObject>> {
        self.apply_from_reference(
            TEMPLATE_REFERENCE_SIZE,
            target_width,
            target_height,
            replacements,
        )
    }

    /// [`Template::apply`] with an explicit reference size.
    ///
    /// # Errors
    ///
    /// Same as [`Template::apply`].
    pub fn apply_from_reference(
        &self,
        reference: f32,
        target_width: f32,
        target_height: f32,
        replacements: Option<&BTreeMap<String, String>>,
    ) -> DesignerResult<Vec<CanvasObject>> {
        let sx = f64::from(target_width / reference);
        let sy = f64::from(target_height / reference);

        self.data
            .objects
            .iter()
            .map(|authored| {
                let mut obj = authored.clone();
                scale_fields(&mut obj, &X_FIELDS, sx);
                scale_fields(&mut obj, &Y_FIELDS, sy);
                scale_fields(&mut obj, &["fontSize"], sx.min(sy));
                if let Some(replacements) = replacements {
                    substitute_placeholders(&mut obj, replacements);
                }

                let mut placed: CanvasObject = serde_json::from_value(Value::Object(obj))
                    .map_err(|e| ValidationError::MalformedTemplate(e.to_string()))?;
                placed.regenerate_ids();
                placed.selectable = true;
                Ok(placed)
            })
            .collect()
    }
}

fn scale_fields(obj: &mut Map<String, Value>, fields: &[&str], factor: f64) {
    for field in fields {
        if let Some(value) = obj.get_mut(*field) {
            if let Some(n) = value.as_f64() {
                *value = Value::from(n * factor);
            }
        }
    }
}

fn substitute_placeholders(obj: &mut Map<String, Value>, replacements: &BTreeMap<String, String>) {
    let is_text = matches!(
        obj.get("type").and_then(Value::as_str),
        Some("text" | "i-text" | "textbox")
    );
    if !is_text {
        return;
    }
    if let Some(Value::String(text)) = obj.get_mut("text") {
        for (placeholder, value) in replacements {
            *text = text.replace(&format!("[{placeholder}]"), value);
        }
    }
}

/// The set of templates offered to the person editing a design.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    /// Create a catalog from templates.
    #[must_use]
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    /// The templates shipped with the designer.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled definitions fail to parse.
    pub fn builtin() -> DesignerResult<Self> {
        Self::from_json(BUILTIN_TEMPLATES)
    }

    /// Parse a JSON array of templates.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedTemplate`] if the payload or any
    /// template in it is invalid.
    pub fn from_json(json: &str) -> DesignerResult<Self> {
        let templates: Vec<Template> = serde_json::from_str(json)
            .map_err(|e| ValidationError::MalformedTemplate(e.to_string()))?;
        for template in &templates {
            template.validate()?;
        }
        Ok(Self::new(templates))
    }

    /// Add more templates, e.g. custom ones on top of the built-ins.
    pub fn extend(&mut self, templates: impl IntoIterator<Item = Template>) {
        self.templates.extend(templates);
    }

    /// Templates matching an optional category and product, highest
    /// priority first, then by name.
    #[must_use]
    pub fn filter(&self, category: Option<&str>, product_id: Option<&str>) -> Vec<&Template> {
        let mut matches: Vec<&Template> = self
            .templates
            .iter()
            .filter(|t| !matches!(category, Some(c) if !c.is_empty() && t.category != c))
            .filter(|t| !matches!(product_id, Some(p) if !p.is_empty() && !t.applies_to(p)))
            .collect();
        matches.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        matches
    }

    /// Look up a template by ID.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Distinct category slugs, sorted.
    #[must_use]
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.templates.iter().map(|t| t.category.as_str()).collect();
        categories.sort_unstable();
        categories.dedup();
        categories
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Display label for a known category slug.
#[must_use]
pub fn category_label(slug: &str) -> Option<&'static str> {
    match slug {
        "birthday" => Some("Birthday"),
        "wedding" => Some("Wedding"),
        "holiday" => Some("Holiday"),
        "sports" => Some("Sports"),
        "business" => Some("Business"),
        "fun" => Some("Fun & Humor"),
        "seasonal" => Some("Seasonal"),
        "custom" => Some("Custom Text"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use crate::DesignerError;

    fn headline() -> Template {
        Template::from_json(
            r#"{
                "id": "t1",
                "name": "Headline",
                "category": "birthday",
                "priority": 10,
                "products": [],
                "data": {"objects": [
                    {"type": "text", "text": "Hi [Name], age [Age]", "fontSize": 48,
                     "left": 200, "top": 200, "originX": "center", "originY": "center"},
                    {"type": "shape", "shape": "rect", "width": 100, "height": 50,
                     "scaleX": 1, "left": 0, "top": 0}
                ]}
            }"#,
        )
        .expect("template")
    }

    #[test]
    fn test_scaling_to_800_square() {
        let objects = headline().apply(800.0, 800.0, None).expect("apply");
        let text = &objects[0];
        assert!((text.transform.left - 400.0).abs() < 1e-4);
        assert!((text.transform.top - 400.0).abs() < 1e-4);
        let ObjectKind::Text { font_size, .. } = &text.kind else {
            panic!("expected text");
        };
        assert!((font_size - 96.0).abs() < 1e-4);
        // Scale factors absent from the template stay at 1.
        assert!((text.transform.scale_x - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_non_square_target_scales_per_axis() {
        let objects = headline().apply(800.0, 400.0, None).expect("apply");
        let rect = &objects[1];
        assert!((rect.transform.width - 200.0).abs() < 1e-4);
        assert!((rect.transform.height - 50.0).abs() < 1e-4);
        assert!((rect.transform.scale_x - 2.0).abs() < 1e-4);
        let ObjectKind::Text { font_size, .. } = &objects[0].kind else {
            panic!("expected text");
        };
        assert!((font_size - 48.0).abs() < 1e-4);
    }

    #[test]
    fn test_placeholders_replaced_and_unmatched_kept() {
        let mut replacements = BTreeMap::new();
        replacements.insert("Name".to_string(), "Sam".to_string());
        let objects = headline()
            .apply(400.0, 400.0, Some(&replacements))
            .expect("apply");
        let ObjectKind::Text { text, .. } = &objects[0].kind else {
            panic!("expected text");
        };
        assert_eq!(text, "Hi Sam, age [Age]");
    }

    #[test]
    fn test_apply_does_not_mutate_template_and_ids_are_fresh() {
        let template = headline();
        let before = template.clone();
        let first = template.apply(800.0, 800.0, None).expect("apply");
        let second = template.apply(800.0, 800.0, None).expect("apply");
        assert_eq!(template, before);
        assert_ne!(first[0].id, second[0].id);
    }

    #[test]
    fn test_malformed_template_rejected() {
        let err = Template::from_json(
            r#"{"id": "bad", "name": "Bad", "data": {"objects": [{"type": "sparkle"}]}}"#,
        )
        .expect_err("malformed");
        assert!(matches!(
            err,
            DesignerError::Validation(ValidationError::MalformedTemplate(_))
        ));
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = TemplateCatalog::builtin().expect("builtin");
        assert!(!catalog.is_empty());
        assert!(catalog.find("birthday-cake").is_some());
        assert!(catalog.categories().contains(&"wedding"));
    }

    #[test]
    fn test_catalog_filter_and_order() {
        let catalog = TemplateCatalog::from_json(
            r#"[
                {"id": "a", "name": "Zed", "category": "fun", "priority": 5, "data": {"objects": []}},
                {"id": "b", "name": "Alpha", "category": "fun", "priority": 5, "products": [7], "data": {"objects": []}},
                {"id": "c", "name": "Beta", "category": "fun", "priority": 9, "products": ["8"], "data": {"objects": []}},
                {"id": "d", "name": "Other", "category": "sports", "data": {"objects": []}}
            ]"#,
        )
        .expect("catalog");

        let ids: Vec<_> = catalog
            .filter(Some("fun"), None)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let ids: Vec<_> = catalog
            .filter(Some("fun"), Some("7"))
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);

        assert_eq!(catalog.filter(None, None).len(), 4);
        assert_eq!(catalog.categories(), vec!["fun", "sports"]);
        assert_eq!(category_label("fun"), Some("Fun & Humor"));
    }
}
