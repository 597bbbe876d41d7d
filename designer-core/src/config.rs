//! Policy constants for a designer session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// MIME types accepted for image uploads.
pub const DEFAULT_ALLOWED_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

/// Default limit on one outbound HTTP request (asset fetch or upload stage).
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;

/// Every tunable used by the document, history, persistence, asset and
/// export layers.
///
/// Values deserialize with defaults so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignerConfig {
    /// Canvas width in canvas units.
    pub canvas_width: f32,
    /// Canvas height in canvas units.
    pub canvas_height: f32,
    /// Maximum retained history entries.
    pub history_cap: usize,
    /// Session record time-to-live in milliseconds.
    pub session_ttl_ms: u64,
    /// Auto-save interval in milliseconds.
    pub autosave_interval_ms: u64,
    /// Quiet period before a mutation-triggered save, in milliseconds.
    pub persist_debounce_ms: u64,
    /// Upload size limit in bytes.
    pub max_upload_bytes: usize,
    /// Limit on one outbound HTTP request, in milliseconds.
    pub http_timeout_ms: u64,
    /// Accepted upload MIME types.
    pub allowed_mime_types: Vec<String>,
    /// Largest share of the placement region a new image may cover per axis.
    pub placement_fill_ratio: f32,
    /// Effective DPI below which an image is flagged.
    pub dpi_threshold: f32,
    /// Canvas units per printed inch.
    pub pixels_per_inch: f32,
    /// Side of the square reference space templates are authored in.
    pub template_reference_size: f32,
    /// Preview export settings.
    pub preview: PreviewSettings,
    /// Largest output side of a high-resolution export.
    pub high_res_max_dimension: f32,
    /// Upper bound on the high-resolution scale factor.
    pub high_res_scale_cap: f32,
}

impl Default for DesignerConfig {
    fn default() -> Self {
        Self {
            canvas_width: 500.0,
            canvas_height: 500.0,
            history_cap: 50,
            session_ttl_ms: 2 * 60 * 60 * 1000,
            autosave_interval_ms: 30_000,
            persist_debounce_ms: 1_000,
            max_upload_bytes: 5 * 1024 * 1024,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
            placement_fill_ratio: 0.8,
            dpi_threshold: 72.0,
            pixels_per_inch: 72.0,
            template_reference_size: 400.0,
            preview: PreviewSettings::default(),
            high_res_max_dimension: 1200.0,
            high_res_scale_cap: 1.5,
        }
    }
}

impl DesignerConfig {
    /// Session time-to-live.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    /// Auto-save interval.
    #[must_use]
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms)
    }

    /// Debounce before a mutation-triggered save.
    #[must_use]
    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    /// Limit on one outbound HTTP request.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Upload limit rounded down to whole megabytes, for messages.
    #[must_use]
    pub fn max_upload_mb(&self) -> usize {
        self.max_upload_bytes / (1024 * 1024)
    }

    /// Whether a MIME type is on the allow-list (case-insensitive).
    #[must_use]
    pub fn is_allowed_mime(&self, mime: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime.trim()))
    }
}

/// Preview export tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Largest output side in pixels.
    pub max_dimension: f32,
    /// Encoded size above which the renderer backs off once.
    pub target_max_bytes: usize,
    /// JPEG quality of the first attempt (0.0..=1.0).
    pub start_quality: f32,
    /// JPEG quality of the back-off attempt.
    pub reduced_quality: f32,
    /// Scale multiplier of the back-off attempt.
    pub reduction_factor: f32,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            max_dimension: 600.0,
            target_max_bytes: 150 * 1024,
            start_quality: 0.85,
            reduced_quality: 0.7,
            reduction_factor: 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DesignerConfig::default();
        assert_eq!(config.history_cap, 50);
        assert_eq!(config.session_ttl(), Duration::from_secs(7200));
        assert_eq!(config.autosave_interval(), Duration::from_secs(30));
        assert_eq!(config.max_upload_mb(), 5);
        assert_eq!(config.http_timeout(), Duration::from_secs(15));
        assert_eq!(config.preview.target_max_bytes, 153_600);
    }

    #[test]
    fn test_mime_allow_list() {
        let config = DesignerConfig::default();
        assert!(config.is_allowed_mime("image/png"));
        assert!(config.is_allowed_mime("IMAGE/WEBP"));
        assert!(!config.is_allowed_mime("image/svg+xml"));
        assert!(!config.is_allowed_mime("application/pdf"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DesignerConfig =
            serde_json::from_str(r#"{"canvas_width": 800, "preview": {"max_dimension": 300}}"#)
                .expect("parse");
        assert!((config.canvas_width - 800.0).abs() < f32::EPSILON);
        assert!((config.canvas_height - 500.0).abs() < f32::EPSILON);
        assert!((config.preview.max_dimension - 300.0).abs() < f32::EPSILON);
        assert!((config.preview.start_quality - 0.85).abs() < f32::EPSILON);
    }
}
