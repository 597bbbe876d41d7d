//! Change notifications emitted by the document.
//!
//! Mutations push events into a queue instead of invoking callbacks, so no
//! handler can re-enter the document while it is mid-rebuild.

use serde::{Deserialize, Serialize};

use crate::object::ObjectId;

/// Something that changed in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DocumentEvent {
    /// Background and mask were (re)loaded.
    VariantLoaded {
        /// Whether a mask layer is present.
        has_mask: bool,
    },
    /// A user object was added.
    Added {
        /// The new object.
        id: ObjectId,
    },
    /// A user object was removed.
    Removed {
        /// The removed object.
        id: ObjectId,
    },
    /// A user object was swapped for another in place.
    Replaced {
        /// Object that left the document.
        old: ObjectId,
        /// Object that took its slot.
        new: ObjectId,
    },
    /// A user object's properties changed.
    Modified {
        /// The changed object.
        id: ObjectId,
    },
    /// Paint order was corrected.
    Reordered,
    /// User content was replaced wholesale (undo, redo, session or template load).
    Restored {
        /// Number of user objects after the restore.
        count: usize,
    },
    /// Selection changed.
    SelectionChanged {
        /// Newly selected object, if any.
        selected: Option<ObjectId>,
    },
    /// Canvas dimensions changed.
    Resized {
        /// New width.
        width: f32,
        /// New height.
        height: f32,
    },
    /// Everything was removed.
    Cleared,
}

impl DocumentEvent {
    /// Whether the event changes user content (and so is worth a history entry).
    #[must_use]
    pub fn is_content_change(&self) -> bool {
        matches!(
            self,
            Self::Added { .. } | Self::Removed { .. } | Self::Replaced { .. } | Self::Modified { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let id = ObjectId::new();
        let json = serde_json::to_value(DocumentEvent::Added { id }).expect("serialize");
        assert_eq!(json["event"], "added");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn test_content_change_classification() {
        assert!(DocumentEvent::Removed { id: ObjectId::new() }.is_content_change());
        assert!(!DocumentEvent::Reordered.is_content_change());
        assert!(!DocumentEvent::SelectionChanged { selected: None }.is_content_change());
    }
}
