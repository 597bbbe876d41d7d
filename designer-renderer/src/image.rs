//! Image loading utilities.
//!
//! Decodes uploaded and fetched images, handles `data:` URIs, and crops
//! raster sources for the crop workflow.

use std::io::Cursor;

use base64::Engine;
use designer_core::object::Filter;
use designer_core::RasterImage;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG with alpha support.
    Png,
    /// JPEG (no alpha).
    Jpeg,
    /// GIF (first frame only).
    Gif,
    /// WebP (alpha support).
    WebP,
    /// Unknown/other format.
    Unknown,
}

impl ImageFormat {
    /// Detect format from file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "gif" => Self::Gif,
            "webp" => Self::WebP,
            _ => Self::Unknown,
        }
    }

    /// Detect format from MIME type.
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        match mime.trim().to_lowercase().as_str() {
            "image/png" => Self::Png,
            "image/jpeg" | "image/jpg" => Self::Jpeg,
            "image/gif" => Self::Gif,
            "image/webp" => Self::WebP,
            _ => Self::Unknown,
        }
    }

    /// Detect format from magic bytes.
    #[must_use]
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.len() < 4 {
            return Self::Unknown;
        }

        // PNG: 89 50 4E 47
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            return Self::Png;
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Self::Jpeg;
        }

        // GIF: "GIF8"
        if data.starts_with(b"GIF8") {
            return Self::Gif;
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return Self::WebP;
        }

        Self::Unknown
    }

    /// Canonical MIME type.
    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Whether resvg can embed this format without transcoding.
    #[must_use]
    pub fn is_svg_embeddable(self) -> bool {
        matches!(self, Self::Png | Self::Jpeg)
    }
}

/// A decoded image plus the format it came in.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// RGBA pixels.
    pub raster: RasterImage,
    /// Source format, detected from the bytes.
    pub format: ImageFormat,
}

impl DecodedImage {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.raster.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.raster.height
    }
}

/// Load an image from raw bytes.
///
/// # Errors
///
/// Returns an error if the image cannot be decoded or has no pixels.
pub fn decode_image(data: &[u8]) -> RenderResult<DecodedImage> {
    let format = ImageFormat::from_magic_bytes(data);

    let img = image::load_from_memory(data)
        .map_err(|e| RenderError::Decode(e.to_string()))?;

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(RenderError::Decode("image has no pixels".to_string()));
    }

    let raster = RasterImage::from_rgba(width, height, rgba.into_raw())
        .ok_or_else(|| RenderError::Decode("pixel buffer size mismatch".to_string()))?;
    Ok(DecodedImage { raster, format })
}

/// Split a `data:` URI into its MIME type and decoded bytes.
///
/// Supports formats like: `data:image/png;base64,iVBORw0KGgo...`
///
/// # Errors
///
/// Returns an error if the URI is malformed.
pub fn parse_data_uri(uri: &str) -> RenderResult<(String, Vec<u8>)> {
    let uri_data = uri
        .strip_prefix("data:")
        .ok_or_else(|| RenderError::Decode("Not a data URI".to_string()))?;

    // Find the comma separating metadata from data
    let (metadata, encoded_data) = uri_data
        .split_once(',')
        .ok_or_else(|| RenderError::Decode("Invalid data URI: missing comma".to_string()))?;

    let mime = metadata
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or("text/plain")
        .to_string();

    let bytes = if metadata.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(encoded_data.trim())
            .map_err(|e| RenderError::Decode(format!("Failed to decode base64: {e}")))?
    } else {
        percent_decode(encoded_data)?
    };

    Ok((mime, bytes))
}

/// Load an image from a data URI (base64 encoded).
///
/// # Errors
///
/// Returns an error if the data URI is malformed or the image cannot be decoded.
pub fn decode_data_uri(uri: &str) -> RenderResult<DecodedImage> {
    let (_, bytes) = parse_data_uri(uri)?;
    decode_image(&bytes)
}

/// Encode bytes as a base64 `data:` URI.
#[must_use]
pub fn to_data_uri(bytes: &[u8], mime: &str) -> String {
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Simple URL decoding (percent-encoding).
fn percent_decode(input: &str) -> RenderResult<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = input
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| RenderError::Decode("Invalid URL encoding".to_string()))?;
            result.push(byte);
            i += 3;
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }

    Ok(result)
}

/// A region of a source image, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl CropRect {
    /// Create a crop region.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip the region to an image of the given size.
    #[must_use]
    pub fn clamp_to(self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

/// Cut a region out of an encoded image, returning PNG bytes and the new size.
///
/// The region is clipped to the image bounds.
///
/// # Errors
///
/// Returns an error if the source cannot be decoded, the clipped region is
/// empty, or the result cannot be encoded.
pub fn crop_encoded(data: &[u8], rect: CropRect) -> RenderResult<(Vec<u8>, u32, u32)> {
    let img = image::load_from_memory(data).map_err(|e| RenderError::Decode(e.to_string()))?;
    let rect = rect.clamp_to(img.width(), img.height());
    if rect.width == 0 || rect.height == 0 {
        return Err(RenderError::Raster(format!(
            "crop region {rect:?} lies outside the image"
        )));
    }

    let cropped = img.crop_imm(rect.x, rect.y, rect.width, rect.height).to_rgba8();
    let png = encode_rgba_png(&cropped)?;
    Ok((png, rect.width, rect.height))
}

/// Encode an RGBA buffer as PNG.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_raster_png(raster: &RasterImage) -> RenderResult<Vec<u8>> {
    let img = RgbaImage::from_raw(raster.width, raster.height, raster.pixels.clone())
        .ok_or_else(|| RenderError::Encode("pixel buffer size mismatch".to_string()))?;
    encode_rgba_png(&img)
}

fn encode_rgba_png(img: &RgbaImage) -> RenderResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ColorType::Rgba8.into(),
        )
        .map_err(|e| RenderError::Encode(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

/// Prepare image bytes for embedding in SVG: apply filters and transcode
/// formats resvg cannot read into PNG.
///
/// Returns the bytes and their MIME type.
///
/// # Errors
///
/// Returns an error if the image must be transcoded and cannot be decoded.
pub fn prepare_for_svg(data: &[u8], filters: &[Filter]) -> RenderResult<(Vec<u8>, &'static str)> {
    let format = ImageFormat::from_magic_bytes(data);
    if filters.is_empty() && format.is_svg_embeddable() {
        return Ok((data.to_vec(), format.mime()));
    }

    let img = image::load_from_memory(data).map_err(|e| RenderError::Decode(e.to_string()))?;
    let filtered = apply_filters(img, filters);
    Ok((encode_rgba_png(&filtered)?, "image/png"))
}

/// Apply render-time filters to an image.
#[must_use]
pub fn apply_filters(mut img: DynamicImage, filters: &[Filter]) -> RgbaImage {
    for filter in filters {
        img = match *filter {
            Filter::Grayscale => DynamicImage::ImageRgba8(img.grayscale().to_rgba8()),
            Filter::Sepia => DynamicImage::ImageRgba8(sepia(img.to_rgba8())),
            Filter::Invert => {
                let mut inverted = img;
                inverted.invert();
                inverted
            }
            Filter::Brightness { brightness } => {
                #[allow(clippy::cast_possible_truncation)]
                let delta = (brightness.clamp(-1.0, 1.0) * 255.0) as i32;
                img.brighten(delta)
            }
            Filter::Contrast { contrast } => img.adjust_contrast(contrast.clamp(-1.0, 1.0) * 100.0),
            Filter::Blur { blur } => {
                #[allow(clippy::cast_precision_loss)]
                let sigma = blur.max(0.0) * img.width().max(img.height()) as f32 / 10.0;
                if sigma > 0.0 {
                    img.blur(sigma)
                } else {
                    img
                }
            }
        };
    }
    img.to_rgba8()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sepia(mut img: RgbaImage) -> RgbaImage {
    for px in img.pixels_mut() {
        let [r, g, b, a] = px.0;
        let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
        let nr = (0.393 * r + 0.769 * g + 0.189 * b).min(255.0);
        let ng = (0.349 * r + 0.686 * g + 0.168 * b).min(255.0);
        let nb = (0.272 * r + 0.534 * g + 0.131 * b).min(255.0);
        px.0 = [nr as u8, ng as u8, nb as u8, a];
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        encode_raster_png(&RasterImage::filled(width, height, rgba)).expect("encode")
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ImageFormat::from_mime("image/jpg"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_mime("image/GIF"), ImageFormat::Gif);
        assert_eq!(ImageFormat::from_extension("WEBP"), ImageFormat::WebP);
        assert_eq!(ImageFormat::from_magic_bytes(b"GIF89a.."), ImageFormat::Gif);
        assert_eq!(
            ImageFormat::from_magic_bytes(&png_bytes(1, 1, [0; 4])),
            ImageFormat::Png
        );
        assert_eq!(ImageFormat::from_magic_bytes(&[1, 2]), ImageFormat::Unknown);
    }

    #[test]
    fn test_decode_png() {
        let decoded = decode_image(&png_bytes(3, 2, [10, 20, 30, 255])).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
        assert_eq!(decoded.format, ImageFormat::Png);
        assert_eq!(decoded.raster.pixel(2, 1), Some([10, 20, 30, 255]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(RenderError::Decode(_))
        ));
    }

    #[test]
    fn test_data_uri_roundtrip() {
        let bytes = png_bytes(4, 4, [255, 0, 0, 255]);
        let uri = to_data_uri(&bytes, "image/png");
        assert!(uri.starts_with("data:image/png;base64,"));
        let (mime, decoded) = parse_data_uri(&uri).expect("parse");
        assert_eq!(mime, "image/png");
        assert_eq!(decoded, bytes);
        assert_eq!(decode_data_uri(&uri).expect("decode").width(), 4);
    }

    #[test]
    fn test_percent_encoded_data_uri() {
        let (mime, bytes) = parse_data_uri("data:text/plain,a%20b").expect("parse");
        assert_eq!(mime, "text/plain");
        assert_eq!(bytes, b"a b");
        assert!(parse_data_uri("data:text/plain,%zz").is_err());
        assert!(parse_data_uri("https://example.com/a.png").is_err());
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let (png, w, h) = crop_encoded(&png_bytes(10, 10, [0, 255, 0, 255]), CropRect::new(6, 2, 10, 3))
            .expect("crop");
        assert_eq!((w, h), (4, 3));
        let decoded = decode_image(&png).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_crop_outside_image_fails() {
        let result = crop_encoded(&png_bytes(10, 10, [0; 4]), CropRect::new(10, 10, 5, 5));
        assert!(matches!(result, Err(RenderError::Raster(_))));
    }

    #[test]
    fn test_prepare_passes_png_through() {
        let bytes = png_bytes(2, 2, [1, 2, 3, 255]);
        let (out, mime) = prepare_for_svg(&bytes, &[]).expect("prepare");
        assert_eq!(out, bytes);
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn test_grayscale_and_invert_filters() {
        let img = DynamicImage::ImageRgba8(
            RgbaImage::from_raw(1, 1, vec![255, 0, 0, 255]).expect("raw"),
        );
        let gray = apply_filters(img.clone(), &[Filter::Grayscale]);
        let [r, g, b, _] = gray.get_pixel(0, 0).0;
        assert_eq!(r, g);
        assert_eq!(g, b);

        let inverted = apply_filters(img, &[Filter::Invert]);
        assert_eq!(inverted.get_pixel(0, 0).0, [0, 255, 255, 255]);
    }
}
