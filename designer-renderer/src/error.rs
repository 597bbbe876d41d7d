//! Renderer error types.

use thiserror::Error;

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur during rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Source image bytes could not be decoded.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// The generated SVG could not be parsed.
    #[error("SVG parsing failed: {0}")]
    Svg(String),

    /// Rasterization could not allocate or draw the target.
    #[error("Rasterization failed: {0}")]
    Raster(String),

    /// Encoding the raster into an output format failed.
    #[error("Encoding failed: {0}")]
    Encode(String),
}
