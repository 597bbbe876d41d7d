//! Print-resolution heuristic for placed images.
//!
//! Effective DPI is the natural pixel count divided by the approximate print
//! size in inches, where print size is the on-canvas size over a fixed
//! pixels-per-inch baseline. The result is advisory only.

use serde::{Deserialize, Serialize};

use crate::config::DesignerConfig;
use crate::object::CanvasObject;

/// Outline colour of the low-resolution indicator.
pub const LOW_RES_STROKE: &str = "#ff9800";

/// Outline width of the low-resolution indicator.
pub const LOW_RES_STROKE_WIDTH: f32 = 3.0;

/// Threshold and baseline used to judge print resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionPolicy {
    /// DPI below which an image is flagged.
    pub threshold: f32,
    /// Canvas units per printed inch.
    pub pixels_per_inch: f32,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            threshold: 72.0,
            pixels_per_inch: 72.0,
        }
    }
}

impl From<&DesignerConfig> for ResolutionPolicy {
    fn from(config: &DesignerConfig) -> Self {
        Self {
            threshold: config.dpi_threshold,
            pixels_per_inch: config.pixels_per_inch,
        }
    }
}

/// Outcome of a resolution check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Effective print DPI (the lower of both axes).
    pub dpi: f32,
    /// Whether the image falls below the threshold.
    pub low_resolution: bool,
}

impl Assessment {
    /// Transient message for the person editing the design, when flagged.
    #[must_use]
    pub fn advisory(&self) -> Option<String> {
        self.low_resolution.then(|| {
            format!(
                "Low resolution image detected ({} DPI). May appear blurry when printed.",
                self.dpi.round()
            )
        })
    }
}

impl ResolutionPolicy {
    /// Compute the effective DPI of an image object given its decoded size.
    ///
    /// Returns `None` when the object has no on-canvas area.
    #[must_use]
    pub fn effective_dpi(&self, natural_width: u32, natural_height: u32, obj: &CanvasObject) -> Option<f32> {
        let effective_w = obj.scaled_width();
        let effective_h = obj.scaled_height();
        if effective_w <= 0.0 || effective_h <= 0.0 {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let dpi_x = natural_width as f32 / (effective_w / self.pixels_per_inch);
        #[allow(clippy::cast_precision_loss)]
        let dpi_y = natural_height as f32 / (effective_h / self.pixels_per_inch);
        Some(dpi_x.min(dpi_y))
    }

    /// Evaluate an image object and set or clear its indicator outline.
    ///
    /// Non-image objects and objects without area are left untouched.
    pub fn check(&self, natural_width: u32, natural_height: u32, obj: &mut CanvasObject) -> Option<Assessment> {
        if !obj.is_image() {
            return None;
        }
        let Some(dpi) = self.effective_dpi(natural_width, natural_height, obj) else {
            clear_indicator(obj);
            return None;
        };

        let low_resolution = dpi < self.threshold;
        if low_resolution {
            obj.style.stroke = Some(LOW_RES_STROKE.to_string());
            obj.style.stroke_width = LOW_RES_STROKE_WIDTH;
        } else {
            clear_indicator(obj);
        }
        Some(Assessment {
            dpi,
            low_resolution,
        })
    }
}

fn clear_indicator(obj: &mut CanvasObject) {
    obj.style.stroke = None;
    obj.style.stroke_width = 0.0;
}

/// Whether an object currently carries the low-resolution indicator.
#[must_use]
pub fn has_indicator(obj: &CanvasObject) -> bool {
    obj.style.stroke.as_deref() == Some(LOW_RES_STROKE) && obj.style.stroke_width > 0.0
}
