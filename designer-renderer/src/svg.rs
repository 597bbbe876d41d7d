//! Document to SVG conversion.
//!
//! Every visible object in paint order becomes a `<g>` carrying its anchor,
//! rotation and scale, with content drawn in the object's unscaled box.
//! Selection affordances are never emitted.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use designer_core::object::{CanvasObject, ObjectKind, OriginX, OriginY, ShapeKind};
use designer_core::Document;
use tracing::warn;

use crate::image::{parse_data_uri, prepare_for_svg, to_data_uri};

/// Line height of multi-line text, in ems.
const LINE_HEIGHT_EM: f32 = 1.16;

/// Encoded bytes of non-inline image sources, keyed by source string.
#[derive(Debug, Clone, Default)]
pub struct AssetCache {
    entries: HashMap<String, Arc<[u8]>>,
}

impl AssetCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the bytes behind a source.
    pub fn insert(&mut self, src: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.entries.insert(src.into(), bytes.into());
    }

    /// Bytes for a source, if cached.
    #[must_use]
    pub fn get(&self, src: &str) -> Option<Arc<[u8]>> {
        self.entries.get(src).cloned()
    }

    /// Whether a source is cached.
    #[must_use]
    pub fn contains(&self, src: &str) -> bool {
        self.entries.contains_key(src)
    }

    /// Number of cached sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a source to encoded bytes: inline `data:` URIs are decoded,
    /// anything else is looked up.
    #[must_use]
    pub fn resolve(&self, src: &str) -> Option<Arc<[u8]>> {
        if src.starts_with("data:") {
            match parse_data_uri(src) {
                Ok((_, bytes)) => Some(bytes.into()),
                Err(e) => {
                    warn!(error = %e, "Unreadable inline image");
                    None
                }
            }
        } else {
            self.get(src)
        }
    }
}

/// Build an SVG document for a design.
///
/// The output is `out_width` by `out_height` pixels with a view box equal to
/// the canvas, so the canvas is scaled uniformly into the output.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn render_to_svg(
    doc: &Document,
    assets: &AssetCache,
    out_width: u32,
    out_height: u32,
    background: [u8; 4],
) -> String {
    let mut svg = String::with_capacity(4096);
    let _ = write!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{out_width}\" height=\"{out_height}\" viewBox=\"0 0 {} {}\">",
        doc.width(),
        doc.height(),
    );

    let bg_alpha = f32::from(background[3]) / 255.0;
    let _ = write!(
        svg,
        "<rect width=\"100%\" height=\"100%\" fill=\"rgb({},{},{})\" fill-opacity=\"{bg_alpha}\"/>",
        background[0], background[1], background[2],
    );

    for obj in doc.paint_order() {
        render_object(&mut svg, obj, assets);
    }

    svg.push_str("</svg>");
    svg
}

fn origin_factors(obj: &CanvasObject) -> (f32, f32) {
    let ox = match obj.transform.origin_x {
        OriginX::Left => 0.0,
        OriginX::Center => 0.5,
        OriginX::Right => 1.0,
    };
    let oy = match obj.transform.origin_y {
        OriginY::Top => 0.0,
        OriginY::Center => 0.5,
        OriginY::Bottom => 1.0,
    };
    (ox, oy)
}

fn open_group(svg: &mut String, obj: &CanvasObject, box_offset: Option<(f32, f32)>) {
    let t = &obj.transform;
    let _ = write!(
        svg,
        "<g transform=\"translate({} {}) rotate({}) scale({} {})",
        t.left, t.top, t.angle, t.scale_x, t.scale_y,
    );
    if let Some((dx, dy)) = box_offset {
        let _ = write!(svg, " translate({} {})", -dx, -dy);
    }
    svg.push('"');
    if obj.style.opacity < 1.0 {
        let _ = write!(svg, " opacity=\"{}\"", obj.style.opacity.clamp(0.0, 1.0));
    }
    svg.push('>');
}

fn stroke_attrs(obj: &CanvasObject) -> String {
    match &obj.style.stroke {
        Some(stroke) if obj.style.stroke_width > 0.0 => format!(
            " stroke=\"{}\" stroke-width=\"{}\"",
            escape_xml(stroke),
            obj.style.stroke_width
        ),
        _ => String::new(),
    }
}

/// Render a single object to SVG.
fn render_object(svg: &mut String, obj: &CanvasObject, assets: &AssetCache) {
    if !obj.visible {
        return;
    }
    let t = &obj.transform;
    let (ox, oy) = origin_factors(obj);

    match &obj.kind {
        ObjectKind::Image { src } => {
            let Some(bytes) = assets.resolve(src) else {
                warn!(id = %obj.id, "Image source not available, skipping");
                return;
            };
            let href = match prepare_for_svg(&bytes, &obj.style.filters) {
                Ok((data, mime)) => to_data_uri(&data, mime),
                Err(e) => {
                    warn!(id = %obj.id, error = %e, "Image could not be prepared, skipping");
                    return;
                }
            };
            open_group(svg, obj, Some((t.width * ox, t.height * oy)));
            let _ = write!(
                svg,
                "<image x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" preserveAspectRatio=\"none\" href=\"{href}\"/>",
                t.width, t.height,
            );
            let stroke = stroke_attrs(obj);
            if !stroke.is_empty() {
                let _ = write!(
                    svg,
                    "<rect x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" fill=\"none\"{stroke}/>",
                    t.width, t.height,
                );
            }
            svg.push_str("</g>");
        }

        ObjectKind::Text {
            text,
            font_size,
            font_family,
            font_weight,
        } => {
            open_group(svg, obj, None);
            let anchor = match t.origin_x {
                OriginX::Left => "start",
                OriginX::Center => "middle",
                OriginX::Right => "end",
            };
            let lines: Vec<&str> = text.split('\n').collect();
            #[allow(clippy::cast_precision_loss)]
            let block_height = font_size * LINE_HEIGHT_EM * (lines.len() - 1) as f32;
            // Baseline of the first line so the anchor lands on the block's top, middle or bottom.
            let first_baseline = match t.origin_y {
                OriginY::Top => font_size * 0.8,
                OriginY::Center => font_size * 0.35 - block_height / 2.0,
                OriginY::Bottom => -font_size * 0.2 - block_height,
            };
            let fill = obj.style.fill.as_deref().unwrap_or("#000000");
            let _ = write!(
                svg,
                "<text x=\"0\" y=\"{first_baseline}\" font-size=\"{font_size}\" font-family=\"{}, sans-serif\" fill=\"{}\" text-anchor=\"{anchor}\"{}",
                escape_xml(font_family),
                escape_xml(fill),
                stroke_attrs(obj),
            );
            if let Some(weight) = font_weight {
                let _ = write!(svg, " font-weight=\"{}\"", escape_xml(weight));
            }
            svg.push('>');
            for (i, line) in lines.iter().enumerate() {
                let dy = if i == 0 { 0.0 } else { LINE_HEIGHT_EM };
                let _ = write!(
                    svg,
                    "<tspan x=\"0\" dy=\"{dy}em\">{}</tspan>",
                    escape_xml(line)
                );
            }
            svg.push_str("</text></g>");
        }

        ObjectKind::Shape {
            shape,
            corner_radius,
        } => {
            open_group(svg, obj, Some((t.width * ox, t.height * oy)));
            let fill = escape_xml(obj.style.fill.as_deref().unwrap_or("#000000"));
            let stroke = stroke_attrs(obj);
            match shape {
                ShapeKind::Rect => {
                    let _ = write!(
                        svg,
                        "<rect x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" rx=\"{corner_radius}\" fill=\"{fill}\"{stroke}/>",
                        t.width, t.height,
                    );
                }
                ShapeKind::Ellipse => {
                    let _ = write!(
                        svg,
                        "<ellipse cx=\"{}\" cy=\"{}\" rx=\"{}\" ry=\"{}\" fill=\"{fill}\"{stroke}/>",
                        t.width / 2.0,
                        t.height / 2.0,
                        t.width / 2.0,
                        t.height / 2.0,
                    );
                }
            }
            svg.push_str("</g>");
        }

        ObjectKind::Group { objects } => {
            // Children are positioned relative to the group's centre.
            open_group(
                svg,
                obj,
                Some((t.width * (ox - 0.5), t.height * (oy - 0.5))),
            );
            for child in objects {
                render_object(svg, child, assets);
            }
            svg.push_str("</g>");
        }
    }
}

/// Escape special XML characters.
#[must_use]
pub fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use designer_core::{LayerSource, RasterImage};

    fn doc() -> Document {
        let mut doc = Document::new(500.0, 400.0);
        doc.load_variant(
            LayerSource::new("bg.png", RasterImage::filled(50, 40, [200, 200, 200, 255])),
            None,
        )
        .expect("load");
        doc
    }

    #[test]
    fn test_svg_header_and_viewbox() {
        let svg = render_to_svg(&doc(), &AssetCache::new(), 250, 200, [255; 4]);
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("width=\"250\""));
        assert!(svg.contains("viewBox=\"0 0 500 400\""));
    }

    #[test]
    fn test_uncached_image_is_skipped() {
        let svg = render_to_svg(&doc(), &AssetCache::new(), 100, 100, [255; 4]);
        assert!(!svg.contains("<image"));
    }

    #[test]
    fn test_cached_image_is_inlined() {
        let png = crate::image::encode_raster_png(&RasterImage::filled(2, 2, [0, 0, 0, 255]))
            .expect("png");
        let mut assets = AssetCache::new();
        assets.insert("bg.png", png);
        let svg = render_to_svg(&doc(), &assets, 100, 100, [255; 4]);
        assert!(svg.contains("href=\"data:image/png;base64,"));
    }

    #[test]
    fn test_text_is_escaped_and_anchored() {
        let mut doc = doc();
        doc.add_object(
            CanvasObject::text("A < B & C\nline two", 20.0, "Comic \"Sans\"").centered_at(250.0, 200.0),
        );
        let svg = render_to_svg(&doc, &AssetCache::new(), 100, 100, [255; 4]);
        assert!(svg.contains("A &lt; B &amp; C"));
        assert!(svg.contains("line two"));
        assert!(svg.contains("text-anchor=\"middle\""));
        assert!(svg.contains("Comic &quot;Sans&quot;"));
    }

    #[test]
    fn test_hidden_objects_are_not_drawn() {
        let mut doc = doc();
        let id = doc.add_object(CanvasObject::text("hidden", 20.0, "Arial"));
        doc.update_object(id, |o| o.visible = false).expect("update");
        let svg = render_to_svg(&doc, &AssetCache::new(), 100, 100, [255; 4]);
        assert!(!svg.contains("hidden"));
    }

    #[test]
    fn test_low_res_stroke_is_drawn() {
        let mut doc = doc();
        let png = crate::image::encode_raster_png(&RasterImage::filled(2, 2, [0, 0, 0, 255]))
            .expect("png");
        let src = to_data_uri(&png, "image/png");
        let mut obj = CanvasObject::image(src, 2, 2);
        obj.style.stroke = Some("#ff9800".to_string());
        obj.style.stroke_width = 3.0;
        doc.add_object(obj);
        let svg = render_to_svg(&doc, &AssetCache::new(), 100, 100, [255; 4]);
        assert!(svg.contains("stroke=\"#ff9800\""));
    }
}
