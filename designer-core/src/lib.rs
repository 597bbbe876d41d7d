//! # Designer Core
//!
//! Document model for a layer-constrained product designer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                designer-core                │
//! ├─────────────────────────────────────────────┤
//! │  Document          │  History               │
//! │  - Fixed layers    │  - JSON snapshots      │
//! │  - User objects    │  - Capped undo/redo    │
//! │  - Clip bounds     │  - Dedup               │
//! ├─────────────────────────────────────────────┤
//! │  Persistence       │  Templates             │
//! │  - TTL sessions    │  - 400x400 scaling     │
//! │  - Saved designs   │  - Placeholders        │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod history;
pub mod object;
pub mod persistence;
pub mod raster;
pub mod resolution;
pub mod snapshot;
pub mod store;
pub mod template;

pub use config::{DesignerConfig, PreviewSettings, DEFAULT_HTTP_TIMEOUT_MS};
pub use document::{Document, LayerSource};
pub use error::{DesignerError, DesignerResult, ValidationError};
pub use event::DocumentEvent;
pub use history::{History, HistoryEntry};
pub use object::{
    CanvasObject, Filter, ObjectId, ObjectKind, OriginX, OriginY, Rect, ShapeKind, Style,
    Transform,
};
pub use persistence::{DesignLibrary, SavedDesign, SessionPersistence, SessionRecord};
pub use raster::RasterImage;
pub use resolution::{Assessment, ResolutionPolicy};
pub use snapshot::DesignSnapshot;
pub use store::{current_timestamp_ms, FileStore, KeyValueStore, MemoryStore, StoreError};
pub use template::{Template, TemplateCatalog};

/// Designer core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
