//! Undo/redo over serialized snapshots of user content.

use tracing::{debug, error};

use crate::document::Document;
use crate::snapshot::DesignSnapshot;
use crate::{DesignerError, DesignerResult};

/// Default number of retained entries.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// One immutable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    json: String,
    object_count: usize,
}

impl HistoryEntry {
    /// Serialized `{"objects": [...]}` payload.
    #[must_use]
    pub fn json(&self) -> &str {
        &self.json
    }

    /// Number of user objects in the snapshot.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.object_count
    }
}

/// Ordered snapshots plus a step pointer.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    step: Option<usize>,
    cap: usize,
    suspended: bool,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl History {
    /// Create an empty history holding at most `cap` entries.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            step: None,
            cap: cap.max(1),
            suspended: false,
        }
    }

    /// Snapshot the document's user objects.
    ///
    /// Returns `false` without changing anything while recording is
    /// suspended, during a layering pass, or when the snapshot equals the
    /// current entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized.
    pub fn record(&mut self, doc: &Document) -> DesignerResult<bool> {
        if doc.is_reordering() {
            return Ok(false);
        }
        self.record_snapshot(&DesignSnapshot::capture(doc))
    }

    /// Record a snapshot captured by the caller, for callers that adjust
    /// transient object state before it is stored.
    ///
    /// Same rules as [`History::record`] apart from the layering check.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized.
    pub fn record_snapshot(&mut self, snapshot: &DesignSnapshot) -> DesignerResult<bool> {
        if self.suspended {
            return Ok(false);
        }
        let json = snapshot.to_json()?;

        if let Some(step) = self.step {
            if self.entries[step].json == json {
                return Ok(false);
            }
        }

        let next = self.step.map_or(0, |s| s + 1);
        self.entries.truncate(next);
        self.entries.push(HistoryEntry {
            json,
            object_count: snapshot.len(),
        });
        self.step = Some(next);

        if self.entries.len() > self.cap {
            self.entries.remove(0);
            self.step = Some(next - 1);
        }
        Ok(true)
    }

    /// Step back one entry and restore it into the document.
    ///
    /// Returns `false` when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::StateCorruption`] if the entry cannot be
    /// parsed; the document's user content is cleared in that case.
    pub fn undo(&mut self, doc: &mut Document) -> DesignerResult<bool> {
        match self.step {
            Some(step) if step > 0 => {
                self.step = Some(step - 1);
                self.restore(doc, step - 1).map(|()| true)
            }
            _ => Ok(false),
        }
    }

    /// Step forward one entry and restore it into the document.
    ///
    /// # Errors
    ///
    /// Same as [`History::undo`].
    pub fn redo(&mut self, doc: &mut Document) -> DesignerResult<bool> {
        match self.step {
            Some(step) if step + 1 < self.entries.len() => {
                self.step = Some(step + 1);
                self.restore(doc, step + 1).map(|()| true)
            }
            _ => Ok(false),
        }
    }

    fn restore(&mut self, doc: &mut Document, index: usize) -> DesignerResult<()> {
        self.suspended = true;
        let result = serde_json::from_str::<DesignSnapshot>(&self.entries[index].json);
        let outcome = match result {
            Ok(snapshot) => {
                let count = doc.restore_user_objects(snapshot.objects);
                debug!(step = index, objects = count, "History entry restored");
                Ok(())
            }
            Err(e) => {
                error!(step = index, error = %e, "Corrupted history entry, clearing design");
                doc.clear_user_objects();
                Err(DesignerError::StateCorruption(e.to_string()))
            }
        };
        self.suspended = false;
        outcome
    }

    /// Whether some entry before the current one holds user content.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.step
            .is_some_and(|step| self.entries[..step].iter().any(|e| e.object_count > 0))
    }

    /// Whether there is an entry after the current one.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.step.is_some_and(|step| step + 1 < self.entries.len())
    }

    /// Suspend or resume recording.
    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    /// Whether recording is suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Drop all entries.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.step = None;
        self.suspended = false;
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the current entry.
    #[must_use]
    pub fn step(&self) -> Option<usize> {
        self.step
    }

    /// The current entry.
    #[must_use]
    pub fn current(&self) -> Option<&HistoryEntry> {
        self.step.and_then(|s| self.entries.get(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::LayerSource;
    use crate::object::CanvasObject;
    use crate::raster::RasterImage;

    fn doc() -> Document {
        let mut doc = Document::new(500.0, 500.0);
        doc.load_variant(
            LayerSource::new("bg.png", RasterImage::filled(10, 10, [255; 4])),
            Some(LayerSource::new("mask.png", RasterImage::filled(10, 10, [255; 4]))),
        )
        .expect("load");
        doc
    }

    #[test]
    fn test_duplicate_snapshot_not_recorded() {
        let mut doc = doc();
        let mut history = History::default();
        assert!(history.record(&doc).expect("record"));
        assert!(!history.record(&doc).expect("record"));
        doc.add_object(CanvasObject::text("A", 10.0, "Arial"));
        assert!(history.record(&doc).expect("record"));
        assert!(!history.record(&doc).expect("record"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_undo_redo_inverse() {
        let mut doc = doc();
        let mut history = History::default();
        history.record(&doc).expect("record");
        let a = doc.add_object(CanvasObject::text("A", 10.0, "Arial"));
        history.record(&doc).expect("record");
        doc.update_object(a, |o| o.transform.left = 99.0)
            .expect("update");
        history.record(&doc).expect("record");
        let state = DesignSnapshot::capture(&doc);

        assert!(history.undo(&mut doc).expect("undo"));
        assert_ne!(DesignSnapshot::capture(&doc), state);
        assert!(history.redo(&mut doc).expect("redo"));
        assert_eq!(DesignSnapshot::capture(&doc), state);
        assert!(doc.background().is_some() && doc.mask().is_some());
    }

    #[test]
    fn test_cap_discards_oldest() {
        let mut doc = doc();
        let mut history = History::new(50);
        for i in 0..60 {
            doc.add_object(CanvasObject::text(format!("T{i}"), 10.0, "Arial"));
            history.record(&doc).expect("record");
        }
        assert_eq!(history.len(), 50);
        assert_eq!(history.step(), Some(49));

        let mut undos = 0;
        while history.undo(&mut doc).expect("undo") {
            undos += 1;
        }
        assert_eq!(undos, 49);
        // Oldest surviving state is the 11th recorded one.
        assert_eq!(doc.user_objects().count(), 11);
    }

    #[test]
    fn test_record_after_undo_truncates_redo_branch() {
        let mut doc = doc();
        let mut history = History::default();
        history.record(&doc).expect("record");
        doc.add_object(CanvasObject::text("A", 10.0, "Arial"));
        history.record(&doc).expect("record");
        history.undo(&mut doc).expect("undo");
        assert!(history.can_redo());

        doc.add_object(CanvasObject::text("B", 10.0, "Arial"));
        history.record(&doc).expect("record");
        assert!(!history.can_redo());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_can_undo_requires_prior_user_content() {
        let mut doc = doc();
        let mut history = History::default();
        history.record(&doc).expect("record");
        doc.add_object(CanvasObject::text("A", 10.0, "Arial"));
        history.record(&doc).expect("record");
        // Only an empty canvas precedes the current step.
        assert!(!history.can_undo());

        doc.add_object(CanvasObject::text("B", 10.0, "Arial"));
        history.record(&doc).expect("record");
        assert!(history.can_undo());
    }

    #[test]
    fn test_suspended_recording_is_ignored() {
        let mut doc = doc();
        let mut history = History::default();
        history.set_suspended(true);
        doc.add_object(CanvasObject::text("A", 10.0, "Arial"));
        assert!(!history.record(&doc).expect("record"));
        assert!(history.is_empty());
    }

    #[test]
    fn test_noop_at_boundaries() {
        let mut doc = doc();
        let mut history = History::default();
        assert!(!history.undo(&mut doc).expect("undo"));
        history.record(&doc).expect("record");
        assert!(!history.undo(&mut doc).expect("undo"));
        assert!(!history.redo(&mut doc).expect("redo"));
    }

    #[test]
    fn test_corrupted_entry_clears_design() {
        let mut doc = doc();
        let mut history = History::default();
        history.record(&doc).expect("record");
        doc.add_object(CanvasObject::text("A", 10.0, "Arial"));
        history.record(&doc).expect("record");
        history.entries[0].json = "{not json".to_string();

        let err = history.undo(&mut doc).expect_err("corrupt");
        assert!(matches!(err, DesignerError::StateCorruption(_)));
        assert_eq!(doc.user_objects().count(), 0);
        assert!(doc.background().is_some());
        assert!(!history.is_suspended());
    }
}
