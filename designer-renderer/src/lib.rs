//! # Designer Renderer
//!
//! Rasterization for the product designer: previews, high-resolution
//! exports and image crop.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Document │──▶│   SVG    │──▶│ resvg/tiny-   │──▶│ JPEG preview │
//! │          │   │ builder  │   │ skia pixmap   │   │ PNG export   │
//! └──────────┘   └──────────┘   └───────────────┘   └──────────────┘
//!                     ▲
//!               ┌─────┴─────┐
//!               │AssetCache │  encoded image sources, filters applied
//!               └───────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod export;
pub mod image;
pub mod svg;

pub use error::{RenderError, RenderResult};
pub use export::{fallback_preview, OutputFormat, PreviewRenderer, RasterExport};
pub use crate::image::{
    crop_encoded, decode_data_uri, decode_image, parse_data_uri, to_data_uri, CropRect,
    DecodedImage, ImageFormat,
};
pub use svg::AssetCache;

/// Renderer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
