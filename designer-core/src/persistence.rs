//! Per-variant session recovery and the saved-design library.
//!
//! Session writes degrade silently: a full or broken store only produces a
//! warning and an attempt to free space by purging expired records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ValidationError;
use crate::object::CanvasObject;
use crate::snapshot::DesignSnapshot;
use crate::store::KeyValueStore;
use crate::DesignerResult;

/// Key prefix of session records.
pub const SESSION_KEY_PREFIX: &str = "designer_session_";

/// Key of the saved-design library.
pub const SAVED_DESIGNS_KEY: &str = "customDesigns";

/// Default record lifetime: two hours.
pub const DEFAULT_SESSION_TTL_MS: u64 = 2 * 60 * 60 * 1000;

/// Recoverable editing state for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Variant the objects were placed on.
    pub variant_id: String,
    /// User objects in paint order.
    pub user_objects: Vec<CanvasObject>,
    /// Unix timestamp of the save, in milliseconds.
    pub timestamp: u64,
}

impl SessionRecord {
    /// Whether the record is older than `ttl_ms` at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp) > ttl_ms
    }
}

/// Reads and writes [`SessionRecord`]s with a time-to-live.
#[derive(Clone)]
pub struct SessionPersistence {
    store: Arc<dyn KeyValueStore>,
    ttl_ms: u64,
}

impl std::fmt::Debug for SessionPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPersistence")
            .field("ttl_ms", &self.ttl_ms)
            .finish_non_exhaustive()
    }
}

impl SessionPersistence {
    /// Create persistence over a store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_ms: u64) -> Self {
        Self { store, ttl_ms }
    }

    /// Store key for a variant.
    #[must_use]
    pub fn key(variant_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{variant_id}")
    }

    /// Save the user objects for a variant.
    ///
    /// Returns whether the write succeeded. On failure the error is logged
    /// and expired records are purged.
    pub fn save(&self, variant_id: &str, user_objects: &[CanvasObject], now_ms: u64) -> bool {
        let record = SessionRecord {
            variant_id: variant_id.to_string(),
            user_objects: user_objects.to_vec(),
            timestamp: now_ms,
        };
        let result = serde_json::to_string(&record)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .set(&Self::key(variant_id), &json)
                    .map_err(|e| e.to_string())
            });

        match result {
            Ok(()) => {
                debug!(variant_id, objects = user_objects.len(), "Session saved");
                true
            }
            Err(e) => {
                warn!(variant_id, error = %e, "Failed to save session, storage might be full");
                self.purge_expired(now_ms);
                false
            }
        }
    }

    /// Load a fresh record for a variant.
    ///
    /// Expired and unreadable records are deleted and yield `None`.
    #[must_use]
    pub fn load(&self, variant_id: &str, now_ms: u64) -> Option<SessionRecord> {
        let key = Self::key(variant_id);
        let raw = match self.store.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(variant_id, error = %e, "Session store unreadable");
                return None;
            }
        };

        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) if !record.is_expired(now_ms, self.ttl_ms) => Some(record),
            Ok(_) => {
                info!(variant_id, "Discarding expired session");
                self.remove_quietly(&key);
                None
            }
            Err(e) => {
                warn!(variant_id, error = %e, "Discarding malformed session");
                self.remove_quietly(&key);
                None
            }
        }
    }

    /// Delete every expired or unreadable session record.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cannot list session store");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(SESSION_KEY_PREFIX)) {
            let stale = match self.store.get(key) {
                Ok(Some(raw)) => serde_json::from_str::<SessionRecord>(&raw)
                    .map_or(true, |r| r.is_expired(now_ms, self.ttl_ms)),
                Ok(None) => false,
                Err(_) => true,
            };
            if stale && self.remove_quietly(key) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Purged expired sessions");
        }
        removed
    }

    /// Delete the record for a variant.
    pub fn clear(&self, variant_id: &str) {
        self.remove_quietly(&Self::key(variant_id));
    }

    fn remove_quietly(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "Failed to remove stored record");
                false
            }
        }
    }
}

/// A design saved under a name by the person editing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedDesign {
    /// Display name.
    pub name: String,
    /// Unix timestamp of the save, in milliseconds.
    pub date: u64,
    /// Saved user objects.
    pub canvas_data: DesignSnapshot,
    /// Variant the design belongs to.
    pub variant_id: String,
}

/// Named designs kept under a single store key.
#[derive(Clone)]
pub struct DesignLibrary {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for DesignLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesignLibrary").finish_non_exhaustive()
    }
}

impl DesignLibrary {
    /// Create a library over a store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Every saved design. An unreadable library reads as empty.
    #[must_use]
    pub fn all(&self) -> Vec<SavedDesign> {
        match self.store.get(SAVED_DESIGNS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Saved design library unreadable");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Saved design library unavailable");
                Vec::new()
            }
        }
    }

    /// Designs saved for one variant, oldest first.
    #[must_use]
    pub fn for_variant(&self, variant_id: &str) -> Vec<SavedDesign> {
        self.all()
            .into_iter()
            .filter(|d| d.variant_id == variant_id)
            .collect()
    }

    /// Add a named design.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyDesignName`] for a blank name, or a
    /// storage error if the library cannot be written.
    pub fn save(
        &self,
        name: &str,
        variant_id: &str,
        canvas_data: DesignSnapshot,
        now_ms: u64,
    ) -> DesignerResult<SavedDesign> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyDesignName.into());
        }
        let design = SavedDesign {
            name: name.to_string(),
            date: now_ms,
            canvas_data,
            variant_id: variant_id.to_string(),
        };
        let mut designs = self.all();
        designs.push(design.clone());
        self.write(&designs)?;
        Ok(design)
    }

    /// Delete a design identified by name, variant and save time.
    ///
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the library cannot be written.
    pub fn delete(&self, name: &str, variant_id: &str, date: u64) -> DesignerResult<bool> {
        let mut designs = self.all();
        let before = designs.len();
        designs.retain(|d| !(d.name == name && d.variant_id == variant_id && d.date == date));
        if designs.len() == before {
            return Ok(false);
        }
        self.write(&designs)?;
        Ok(true)
    }

    fn write(&self, designs: &[SavedDesign]) -> DesignerResult<()> {
        let json = serde_json::to_string(designs)?;
        self.store.set(SAVED_DESIGNS_KEY, &json)?;
        Ok(())
    }
}
