//! Error types for designer operations.

use thiserror::Error;

/// Result type for designer operations.
pub type DesignerResult<T> = Result<T, DesignerError>;

/// User-correctable input problems.
///
/// The `Display` output of every variant is suitable for showing directly to
/// the person editing the design.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The uploaded file is not one of the accepted image types.
    #[error("Please upload a valid image file (JPEG, PNG, GIF, or WebP); got {mime}")]
    UnsupportedType {
        /// MIME type reported for the file.
        mime: String,
    },

    /// The uploaded file exceeds the configured byte limit.
    #[error("Image file size must be less than {max_mb}MB ({size} bytes given)")]
    TooLarge {
        /// Size of the rejected file in bytes.
        size: usize,
        /// Limit in whole megabytes.
        max_mb: usize,
    },

    /// A template payload could not be interpreted.
    #[error("Template could not be read: {0}")]
    MalformedTemplate(String),

    /// A stored or handed-off design payload could not be interpreted.
    #[error("Saved design could not be read: {0}")]
    MalformedSession(String),

    /// A saved design needs a name.
    #[error("Please enter a name for your design.")]
    EmptyDesignName,

    /// Text objects need visible content.
    #[error("Please enter some text.")]
    EmptyText,
}

/// Errors that can occur in designer operations.
#[derive(Debug, Error)]
pub enum DesignerError {
    /// Input rejected before any state changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An image could not be fetched or decoded.
    #[error("Failed to load asset: {0}")]
    AssetLoad(String),

    /// Every upload stage failed.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// A serialized snapshot was not what it claimed to be.
    #[error("Corrupted design state: {0}")]
    StateCorruption(String),

    /// Object not found in the document.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The background and mask layers cannot be removed or replaced.
    #[error("Fixed layers cannot be modified: {0}")]
    FixedLayer(String),

    /// Another restore-class operation already owns the document.
    #[error("Cannot start {requested} while {active} is in progress")]
    RestoreInProgress {
        /// Operation currently holding the document.
        active: &'static str,
        /// Operation that was rejected.
        requested: &'static str,
    },

    /// A crop operation was requested with no crop active, or on the wrong object.
    #[error("Crop unavailable: {0}")]
    CropUnavailable(String),

    /// The key-value store rejected an explicit save.
    #[error("Storage error: {0}")]
    Storage(#[from] crate::store::StoreError),

    /// No product variant is loaded.
    #[error("No product variant loaded")]
    NoVariant,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DesignerError {
    /// Whether this error should be shown to the user as an actionable message.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
