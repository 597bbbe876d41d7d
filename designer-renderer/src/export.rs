//! Preview and export rasterization.
//!
//! Renders a [`Document`] through an SVG intermediate and the
//! resvg/tiny-skia pipeline into compressed JPEG previews or full-quality
//! PNG exports.

use std::sync::{Arc, OnceLock};

use designer_core::{Document, PreviewSettings};
use image::ImageEncoder;
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};
use crate::image::to_data_uri;
use crate::svg::{escape_xml, render_to_svg, AssetCache};

/// Side of the placeholder preview produced when rendering fails.
pub const FALLBACK_SIZE: u32 = 400;

/// JPEG quality of the placeholder preview.
pub const FALLBACK_QUALITY: f32 = 0.8;

/// Caption of the placeholder preview.
pub const FALLBACK_CAPTION: &str = "Custom Design";

const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Encoding of a raster export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    /// Lossy JPEG at a quality in `0.0..=1.0`.
    Jpeg {
        /// Encoder quality.
        quality: f32,
    },
    /// Lossless PNG.
    Png,
}

impl OutputFormat {
    /// MIME type of the encoded bytes.
    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg { .. } => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// An encoded render.
#[derive(Debug, Clone)]
pub struct RasterExport {
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// MIME type of `bytes`.
    pub mime: &'static str,
    /// JPEG quality, if lossy.
    pub quality: Option<f32>,
    /// Canvas to output scale.
    pub scale: f32,
    /// Whether this is the placeholder produced after a rendering failure.
    pub fallback: bool,
}

impl RasterExport {
    /// Encode as a `data:` URI.
    #[must_use]
    pub fn to_data_uri(&self) -> String {
        to_data_uri(&self.bytes, self.mime)
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.bytes.len()
    }
}

/// Renders designs to raster images.
#[derive(Debug, Clone)]
pub struct PreviewRenderer {
    assets: AssetCache,
    background: [u8; 4],
}

impl Default for PreviewRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewRenderer {
    /// Create a renderer with a white background and no cached assets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            assets: AssetCache::new(),
            background: WHITE,
        }
    }

    /// Create a renderer over an existing asset cache.
    #[must_use]
    pub fn with_assets(assets: AssetCache) -> Self {
        Self {
            assets,
            background: WHITE,
        }
    }

    /// Cached image sources.
    #[must_use]
    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    /// Mutable access to cached image sources.
    pub fn assets_mut(&mut self) -> &mut AssetCache {
        &mut self.assets
    }

    /// Build the SVG for a document at the given scale.
    #[must_use]
    pub fn render_to_svg(&self, doc: &Document, scale: f32) -> String {
        let (w, h) = output_dimensions(doc, scale);
        render_to_svg(doc, &self.assets, w, h, self.background)
    }

    /// Render a document at `scale` and encode it.
    ///
    /// # Errors
    ///
    /// Returns an error if the SVG cannot be rasterized or the pixels cannot
    /// be encoded.
    pub fn render(
        &self,
        doc: &Document,
        scale: f32,
        format: OutputFormat,
    ) -> RenderResult<RasterExport> {
        let svg = self.render_to_svg(doc, scale);
        let pixmap = rasterize_svg(&svg)?;
        let (width, height) = (pixmap.width(), pixmap.height());

        let (bytes, quality) = match format {
            OutputFormat::Jpeg { quality } => (
                encode_jpeg(pixmap.data(), width, height, self.background, quality)?,
                Some(quality),
            ),
            OutputFormat::Png => (
                pixmap
                    .encode_png()
                    .map_err(|e| RenderError::Encode(format!("PNG encoding failed: {e}")))?,
                None,
            ),
        };

        Ok(RasterExport {
            bytes,
            width,
            height,
            mime: format.mime(),
            quality,
            scale,
            fallback: false,
        })
    }

    /// Produce a compressed JPEG preview of a design.
    ///
    /// The selection is cleared first so no handles are drawn. Output is
    /// bounded by `settings.max_dimension` and never upscaled. If the first
    /// attempt exceeds `settings.target_max_bytes`, one smaller attempt is
    /// made and the smaller of the two is returned. Never fails: on any
    /// rendering error a placeholder is returned.
    pub fn generate_preview(&self, doc: &mut Document, settings: &PreviewSettings) -> RasterExport {
        doc.deselect();

        let scale = fit_scale(doc, settings.max_dimension, 1.0);
        let first = match self.render(
            doc,
            scale,
            OutputFormat::Jpeg {
                quality: settings.start_quality,
            },
        ) {
            Ok(export) => export,
            Err(e) => {
                warn!(error = %e, "Preview rendering failed, using placeholder");
                return fallback_preview();
            }
        };

        if first.encoded_size() <= settings.target_max_bytes {
            return first;
        }

        debug!(
            size = first.encoded_size(),
            target = settings.target_max_bytes,
            "Preview over target size, reducing"
        );
        match self.render(
            doc,
            scale * settings.reduction_factor,
            OutputFormat::Jpeg {
                quality: settings.reduced_quality,
            },
        ) {
            Ok(second) if second.encoded_size() < first.encoded_size() => second,
            Ok(_) => first,
            Err(e) => {
                warn!(error = %e, "Reduced preview failed, keeping first attempt");
                first
            }
        }
    }

    /// Produce a full-quality PNG of a design whose longer side is at most
    /// `max_dimension`, scaled up by no more than `scale_cap`.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or encoding fails.
    pub fn generate_high_res_export(
        &self,
        doc: &Document,
        max_dimension: f32,
        scale_cap: f32,
    ) -> RenderResult<RasterExport> {
        let scale = fit_scale(doc, max_dimension, scale_cap);
        self.render(doc, scale, OutputFormat::Png)
    }
}

/// Largest scale fitting the canvas into `max_dimension`, capped at `cap`.
#[must_use]
pub fn fit_scale(doc: &Document, max_dimension: f32, cap: f32) -> f32 {
    let w = doc.width().max(1.0);
    let h = doc.height().max(1.0);
    (max_dimension / w).min(max_dimension / h).min(cap)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn output_dimensions(doc: &Document, scale: f32) -> (u32, u32) {
    let w = (doc.width() * scale).round().max(1.0) as u32;
    let h = (doc.height() * scale).round().max(1.0) as u32;
    (w, h)
}

/// Placeholder preview: a white square with a caption.
///
/// Falls back to a plain white JPEG if the caption cannot be rendered, and
/// to empty bytes if even that cannot be encoded.
#[must_use]
pub fn fallback_preview() -> RasterExport {
    let placeholder = |bytes: Vec<u8>| RasterExport {
        bytes,
        width: FALLBACK_SIZE,
        height: FALLBACK_SIZE,
        mime: "image/jpeg",
        quality: Some(FALLBACK_QUALITY),
        scale: 1.0,
        fallback: true,
    };

    match render_placeholder() {
        Ok(bytes) => placeholder(bytes),
        Err(e) => {
            warn!(error = %e, "Placeholder rendering failed, using blank image");
            let blank = vec![255u8; (FALLBACK_SIZE * FALLBACK_SIZE * 4) as usize];
            match encode_jpeg(&blank, FALLBACK_SIZE, FALLBACK_SIZE, WHITE, FALLBACK_QUALITY) {
                Ok(bytes) => placeholder(bytes),
                Err(e) => {
                    warn!(error = %e, "Blank placeholder could not be encoded");
                    placeholder(Vec::new())
                }
            }
        }
    }
}

fn render_placeholder() -> RenderResult<Vec<u8>> {
    let half = FALLBACK_SIZE / 2;
    let svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{FALLBACK_SIZE}\" height=\"{FALLBACK_SIZE}\">\
         <rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>\
         <text x=\"{half}\" y=\"{half}\" font-size=\"24\" font-family=\"Arial, sans-serif\" fill=\"#333333\" text-anchor=\"middle\">{}</text>\
         </svg>",
        escape_xml(FALLBACK_CAPTION),
    );
    let pixmap = rasterize_svg(&svg)?;
    encode_jpeg(
        pixmap.data(),
        pixmap.width(),
        pixmap.height(),
        WHITE,
        FALLBACK_QUALITY,
    )
}

/// System fonts, loaded once per process.
fn font_database() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            debug!(faces = db.len(), "Loaded system fonts");
            Arc::new(db)
        })
        .clone()
}

/// Rasterize an SVG string to a tiny-skia Pixmap.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rasterize_svg(svg_string: &str) -> RenderResult<tiny_skia::Pixmap> {
    let opt = usvg::Options {
        fontdb: font_database(),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(svg_string, &opt)
        .map_err(|e| RenderError::Svg(format!("SVG parsing failed: {e}")))?;

    let px_w = tree.size().width().round() as u32;
    let px_h = tree.size().height().round() as u32;

    let mut pixmap = tiny_skia::Pixmap::new(px_w.max(1), px_h.max(1))
        .ok_or_else(|| RenderError::Raster("Failed to create pixmap".to_string()))?;

    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    Ok(pixmap)
}

/// Composite premultiplied RGBA over `background` and encode as JPEG.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode_jpeg(
    rgba: &[u8],
    width: u32,
    height: u32,
    background: [u8; 4],
    quality: f32,
) -> RenderResult<Vec<u8>> {
    let mut rgb_data = Vec::with_capacity((width * height * 3) as usize);
    for pixel in rgba.chunks_exact(4) {
        // tiny-skia stores premultiplied colour, so only the background is weighted.
        let inv = 1.0 - f32::from(pixel[3]) / 255.0;
        rgb_data.push(f32::from(background[0]).mul_add(inv, f32::from(pixel[0])).min(255.0) as u8);
        rgb_data.push(f32::from(background[1]).mul_add(inv, f32::from(pixel[1])).min(255.0) as u8);
        rgb_data.push(f32::from(background[2]).mul_add(inv, f32::from(pixel[2])).min(255.0) as u8);
    }

    let q = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut buf = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, q);
    encoder
        .write_image(&rgb_data, width, height, image::ColorType::Rgb8.into())
        .map_err(|e| RenderError::Encode(format!("JPEG encoding failed: {e}")))?;

    Ok(buf.into_inner())
}
