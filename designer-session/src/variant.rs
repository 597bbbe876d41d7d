//! External collaborators: variant lookup and image fetching.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use designer_core::{DesignerError, DesignerResult, DEFAULT_HTTP_TIMEOUT_MS};
use designer_renderer::parse_data_uri;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fixed-layer images for one product variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAssets {
    /// Product base illustration.
    pub background_image_url: String,
    /// Printable-area overlay, if the variant has one.
    #[serde(default)]
    pub mask_image_url: Option<String>,
}

/// Looks up the designer assets of a variant.
#[async_trait]
pub trait VariantSource: Send + Sync {
    /// Assets for `variant_id`, or `None` when the variant has no designer
    /// data configured.
    async fn variant_assets(&self, variant_id: &str) -> Option<VariantAssets>;
}

/// In-memory variant table.
#[derive(Debug, Clone, Default)]
pub struct StaticVariantSource {
    variants: HashMap<String, VariantAssets>,
}

impl StaticVariantSource {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variant.
    #[must_use]
    pub fn with_variant(
        mut self,
        variant_id: impl Into<String>,
        background: impl Into<String>,
        mask: Option<String>,
    ) -> Self {
        self.variants.insert(
            variant_id.into(),
            VariantAssets {
                background_image_url: background.into(),
                mask_image_url: mask,
            },
        );
        self
    }
}

#[async_trait]
impl VariantSource for StaticVariantSource {
    async fn variant_assets(&self, variant_id: &str) -> Option<VariantAssets> {
        self.variants.get(variant_id).cloned()
    }
}

/// Fetches encoded image bytes for a source string.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Bytes behind `src`.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::AssetLoad`] if the source cannot be read.
    async fn fetch(&self, src: &str) -> DesignerResult<Vec<u8>>;
}

/// Resolves `data:` URIs inline, `http(s)` URLs over the network and
/// anything else as a local file path (with or without `file://`).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::AssetLoad`] if the HTTP client fails to build.
    pub fn new() -> DesignerResult<Self> {
        Self::with_timeout(Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS))
    }

    /// Create a fetcher whose HTTP requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::AssetLoad`] if the HTTP client fails to build.
    pub fn with_timeout(timeout: Duration) -> DesignerResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("designer-session/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| DesignerError::AssetLoad(format!("HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, src: &str) -> DesignerResult<Vec<u8>> {
        if src.starts_with("data:") {
            return parse_data_uri(src)
                .map(|(_, bytes)| bytes)
                .map_err(|e| DesignerError::AssetLoad(e.to_string()));
        }

        if src.starts_with("http://") || src.starts_with("https://") {
            debug!(src, "Fetching image");
            let response = self
                .http
                .get(src)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| DesignerError::AssetLoad(format!("{src}: {e}")))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| DesignerError::AssetLoad(format!("{src}: {e}")))?;
            return Ok(bytes.to_vec());
        }

        let path = Path::new(src.strip_prefix("file://").unwrap_or(src));
        tokio::fs::read(path)
            .await
            .map_err(|e| DesignerError::AssetLoad(format!("{}: {e}", path.display())))
    }
}
