//! Serialized user content.
//!
//! The `{"objects": [...]}` shape is shared by history entries, session
//! records, saved designs and the cart hand-off.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::ValidationError;
use crate::object::CanvasObject;
use crate::DesignerResult;

/// User objects of a document at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignSnapshot {
    /// User objects in paint order.
    #[serde(default)]
    pub objects: Vec<CanvasObject>,
}

impl DesignSnapshot {
    /// Capture the user objects of a document.
    #[must_use]
    pub fn capture(doc: &Document) -> Self {
        Self {
            objects: doc.snapshot_user_objects(),
        }
    }

    /// Serialize to a compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> DesignerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a payload, keeping only selectable (user) objects.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedSession`] if the payload is not a
    /// `{"objects": [...]}` document.
    pub fn from_json(json: &str) -> DesignerResult<Self> {
        let mut snapshot: Self = serde_json::from_str(json)
            .map_err(|e| ValidationError::MalformedSession(e.to_string()))?;
        snapshot.objects.retain(|o| o.selectable);
        Ok(snapshot)
    }

    /// Number of user objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether there are no user objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DesignerError;

    #[test]
    fn test_from_json_drops_fixed_entries() {
        let json = r#"{"objects": [
            {"type": "image", "src": "bg.png", "selectable": false},
            {"type": "text", "text": "Hi"}
        ]}"#;
        let snapshot = DesignSnapshot::from_json(json).expect("parse");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.objects[0].kind_name(), "text");
    }

    #[test]
    fn test_malformed_payload_is_validation_error() {
        let err = DesignSnapshot::from_json("{\"objects\": 3}").expect_err("malformed");
        assert!(matches!(
            err,
            DesignerError::Validation(ValidationError::MalformedSession(_))
        ));
    }

    #[test]
    fn test_capture_excludes_fixed_layers() {
        use crate::document::LayerSource;
        use crate::raster::RasterImage;

        let mut doc = Document::new(100.0, 100.0);
        doc.load_variant(
            LayerSource::new("bg.png", RasterImage::filled(10, 10, [255; 4])),
            Some(LayerSource::new("mask.png", RasterImage::filled(10, 10, [255; 4]))),
        )
        .expect("load");
        doc.add_object(CanvasObject::text("A", 10.0, "Arial"));
        let snapshot = DesignSnapshot::capture(&doc);
        assert_eq!(snapshot.len(), 1);
        let json = snapshot.to_json().expect("json");
        assert!(json.starts_with("{\"objects\":["));
    }
}
