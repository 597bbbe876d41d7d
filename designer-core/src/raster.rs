//! Decoded RGBA pixel buffers.

/// An 8-bit RGBA image held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGBA8 pixel data (`width * height * 4` bytes).
    pub pixels: Vec<u8>,
}

/// Inclusive pixel box `(min_x, min_y, max_x, max_y)`.
pub type PixelBox = (u32, u32, u32, u32);

impl RasterImage {
    /// Wrap an RGBA buffer, returning `None` if its length does not match.
    #[must_use]
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    /// A single-colour image.
    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Whether the image has no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// RGBA value at a pixel, if in range.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels
            .get(i..i + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Tightest box around pixels that mark the printable region.
    ///
    /// A pixel counts when its alpha or red channel exceeds 10, so both
    /// translucent overlays and opaque light-on-dark masks are recognised.
    #[must_use]
    pub fn opaque_bounds(&self) -> Option<PixelBox> {
        let mut bounds: Option<PixelBox> = None;
        let width = self.width as usize;
        for (i, px) in self.pixels.chunks_exact(4).enumerate() {
            if px[3] <= 10 && px[0] <= 10 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let (x, y) = ((i % width) as u32, (i / width) as u32);
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((min_x, min_y, max_x, max_y)) => {
                    (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
                }
            });
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_checks_length() {
        assert!(RasterImage::from_rgba(2, 2, vec![0; 16]).is_some());
        assert!(RasterImage::from_rgba(2, 2, vec![0; 15]).is_none());
    }

    #[test]
    fn test_opaque_bounds_finds_tight_box() {
        let mut img = RasterImage::filled(10, 8, [0, 0, 0, 0]);
        for (x, y) in [(2, 3), (6, 5)] {
            let i = (y * 10 + x) * 4;
            img.pixels[i + 3] = 200;
        }
        assert_eq!(img.opaque_bounds(), Some((2, 3, 6, 5)));
    }

    #[test]
    fn test_opaque_bounds_counts_red_channel() {
        let mut img = RasterImage::filled(4, 4, [0, 0, 0, 0]);
        img.pixels[(4 + 1) * 4] = 255;
        assert_eq!(img.opaque_bounds(), Some((1, 1, 1, 1)));
    }

    #[test]
    fn test_transparent_mask_has_no_bounds() {
        let img = RasterImage::filled(4, 4, [5, 0, 0, 5]);
        assert_eq!(img.opaque_bounds(), None);
    }
}
