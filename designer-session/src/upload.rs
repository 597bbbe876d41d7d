//! Upload fallback chain for design images.
//!
//! Each stage is an [`UploadEndpoint`]. [`UploadChain::upload`] tries them in
//! order and, when every stage fails or none is configured, hands back the
//! embedded `data:` representation. It never fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use designer_core::DEFAULT_HTTP_TIMEOUT_MS;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Default Cloudinary API host.
pub const DEFAULT_CLOUDINARY_BASE_URL: &str = "https://api.cloudinary.com";

/// Default Cloudinary folder for design uploads.
pub const DEFAULT_CLOUDINARY_FOLDER: &str = "swpd-designs";

/// Action name expected by the primary endpoint.
pub const PRIMARY_UPLOAD_ACTION: &str = "swpd_upload_design_image";

/// Errors from a single upload stage.
#[derive(Debug, Error)]
pub enum UploadError {
    /// HTTP layer failed (connection, timeout, etc.).
    #[error("upload HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The response body was not valid JSON.
    #[error("failed to parse upload response: {0}")]
    Json(#[from] serde_json::Error),
    /// The endpoint answered but refused the upload.
    #[error("upload rejected: {0}")]
    Rejected(String),
    /// The response did not carry a URL where one was expected.
    #[error("unexpected upload response: {0}")]
    UnexpectedResponse(String),
    /// A required setting for this stage is missing.
    #[error("upload stage not configured: {0}")]
    NotConfigured(&'static str),
    /// A configured URL could not be parsed.
    #[error("invalid upload URL: {0}")]
    InvalidUrl(String),
}

/// One hosting service in the fallback chain.
#[async_trait]
pub trait UploadEndpoint: Send + Sync {
    /// Short name used in logs and outcomes.
    fn name(&self) -> &'static str;

    /// Upload an image given as a `data:` URI, returning its hosted URL.
    async fn upload(&self, data_uri: &str, filename: &str) -> Result<String, UploadError>;
}

/// Where an image ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Stored by a hosting stage.
    Hosted {
        /// Public URL.
        url: String,
        /// Stage that stored it.
        via: &'static str,
    },
    /// No stage succeeded; the inline representation is kept.
    Embedded {
        /// The original `data:` URI.
        data_uri: String,
    },
}

impl UploadOutcome {
    /// URL usable as an image source, hosted or inline.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Hosted { url, .. } => url,
            Self::Embedded { data_uri } => data_uri,
        }
    }

    /// Whether a hosting stage accepted the image.
    #[must_use]
    pub fn is_hosted(&self) -> bool {
        matches!(self, Self::Hosted { .. })
    }
}

/// Ordered upload stages ending in the embedded fallback.
#[derive(Clone, Default)]
pub struct UploadChain {
    stages: Vec<Arc<dyn UploadEndpoint>>,
}

impl std::fmt::Debug for UploadChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadChain")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl UploadChain {
    /// A chain with no hosting stages; every upload stays embedded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl UploadEndpoint + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Number of hosting stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether there are no hosting stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the chain. Sources that are not `data:` URIs are already hosted
    /// and are returned as-is.
    pub async fn upload(&self, source: &str, filename: &str) -> UploadOutcome {
        if !source.starts_with("data:") {
            debug!(filename, "Source already hosted, skipping upload");
            return UploadOutcome::Hosted {
                url: source.to_string(),
                via: "existing",
            };
        }

        for stage in &self.stages {
            match stage.upload(source, filename).await {
                Ok(url) => {
                    info!(stage = stage.name(), filename, url = %url, "Image uploaded");
                    return UploadOutcome::Hosted {
                        url,
                        via: stage.name(),
                    };
                }
                Err(e) => {
                    warn!(stage = stage.name(), filename, error = %e, "Upload stage failed");
                }
            }
        }

        info!(filename, "All upload stages failed, keeping embedded image");
        UploadOutcome::Embedded {
            data_uri: source.to_string(),
        }
    }
}

fn http_client(timeout: Duration) -> Result<Client, UploadError> {
    Ok(Client::builder()
        .user_agent(concat!("designer-session/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?)
}

fn parse_url(raw: &str) -> Result<Url, UploadError> {
    Url::parse(raw).map_err(|e| UploadError::InvalidUrl(format!("{raw}: {e}")))
}

/// The storefront's own upload handler.
///
/// Accepts `{action, nonce, image, filename}` and answers
/// `{success: true, data: {url}}`. A bare `0` body means the action is
/// unknown to the server.
#[derive(Debug, Clone)]
pub struct PrimaryEndpoint {
    http: Client,
    endpoint: Url,
    nonce: String,
}

impl PrimaryEndpoint {
    /// Create the endpoint. A request taking longer than `timeout` fails
    /// the stage.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidUrl`] if the URL is malformed, or
    /// [`UploadError::Http`] if the HTTP client fails to build.
    pub fn new(
        endpoint: &str,
        nonce: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        Ok(Self {
            http: http_client(timeout)?,
            endpoint: parse_url(endpoint)?,
            nonce: nonce.into(),
        })
    }
}

#[async_trait]
impl UploadEndpoint for PrimaryEndpoint {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn upload(&self, data_uri: &str, filename: &str) -> Result<String, UploadError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&json!({
                "action": PRIMARY_UPLOAD_ACTION,
                "nonce": self.nonce,
                "image": data_uri,
                "filename": filename,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::Rejected(format!("HTTP {status}")));
        }
        if body.trim() == "0" {
            return Err(UploadError::Rejected("upload action not available".to_string()));
        }

        let value: Value = serde_json::from_str(&body)?;
        if value.get("success").and_then(Value::as_bool) != Some(true) {
            let reason = value
                .pointer("/data/message")
                .or_else(|| value.get("data"))
                .map_or_else(|| "success flag not set".to_string(), ToString::to_string);
            return Err(UploadError::Rejected(reason));
        }

        value
            .pointer("/data/url")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| UploadError::UnexpectedResponse(format!("missing data.url: {value}")))
    }
}

/// Unsigned Cloudinary upload, used as the secondary stage.
#[derive(Debug, Clone)]
pub struct CloudinaryEndpoint {
    http: Client,
    upload_url: Url,
    preset: String,
    folder: String,
}

impl CloudinaryEndpoint {
    /// Create the endpoint for a cloud and unsigned preset.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidUrl`] if `base_url` is malformed, or
    /// [`UploadError::Http`] if the HTTP client fails to build.
    pub fn new(
        base_url: &str,
        cloud_name: &str,
        preset: impl Into<String>,
        folder: Option<String>,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let base = base_url.trim_end_matches('/');
        let upload_url = parse_url(&format!("{base}/v1_1/{cloud_name}/image/upload"))?;
        Ok(Self {
            http: http_client(timeout)?,
            upload_url,
            preset: preset.into(),
            folder: folder.unwrap_or_else(|| DEFAULT_CLOUDINARY_FOLDER.to_string()),
        })
    }

    /// Upload URL in use.
    #[must_use]
    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }
}

/// Public id for a hosted design image: `design_{ts}_{stem}`.
#[must_use]
pub fn public_id(filename: &str, timestamp_ms: u64) -> String {
    let stem = filename.rsplit_once('.').map_or(filename, |(stem, _)| stem);
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("design_{timestamp_ms}_{stem}")
}

#[async_trait]
impl UploadEndpoint for CloudinaryEndpoint {
    fn name(&self) -> &'static str {
        "cloudinary"
    }

    async fn upload(&self, data_uri: &str, filename: &str) -> Result<String, UploadError> {
        let public_id = public_id(filename, designer_core::current_timestamp_ms());
        let response = self
            .http
            .post(self.upload_url.clone())
            .json(&json!({
                "file": data_uri,
                "upload_preset": self.preset,
                "folder": self.folder,
                "public_id": public_id,
            }))
            .send()
            .await?;

        let status = response.status();
        let value: Value = response.json().await?;
        if !status.is_success() {
            let reason = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map_or_else(|| format!("HTTP {status}"), ToString::to_string);
            return Err(UploadError::Rejected(reason));
        }

        value
            .get("secure_url")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| UploadError::UnexpectedResponse(format!("missing secure_url: {value}")))
    }
}

/// Upload settings, typically read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadConfig {
    /// Primary endpoint URL (`DESIGNER_UPLOAD_URL`).
    pub primary_url: Option<String>,
    /// Nonce sent to the primary endpoint (`DESIGNER_UPLOAD_NONCE`).
    pub nonce: Option<String>,
    /// Cloudinary cloud name (`DESIGNER_CLOUDINARY_CLOUD`).
    pub cloudinary_cloud: Option<String>,
    /// Cloudinary unsigned preset (`DESIGNER_CLOUDINARY_PRESET`).
    pub cloudinary_preset: Option<String>,
    /// Cloudinary folder (`DESIGNER_CLOUDINARY_FOLDER`).
    pub cloudinary_folder: Option<String>,
    /// Cloudinary API host (`DESIGNER_CLOUDINARY_BASE_URL`).
    pub cloudinary_base_url: Option<String>,
    /// Per-request limit in milliseconds (`DESIGNER_HTTP_TIMEOUT_MS`).
    pub timeout_ms: Option<u64>,
}

impl UploadConfig {
    /// Read settings from `DESIGNER_*` environment variables. Empty values
    /// count as missing.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            primary_url: var("DESIGNER_UPLOAD_URL"),
            nonce: var("DESIGNER_UPLOAD_NONCE"),
            cloudinary_cloud: var("DESIGNER_CLOUDINARY_CLOUD"),
            cloudinary_preset: var("DESIGNER_CLOUDINARY_PRESET"),
            cloudinary_folder: var("DESIGNER_CLOUDINARY_FOLDER"),
            cloudinary_base_url: var("DESIGNER_CLOUDINARY_BASE_URL"),
            timeout_ms: var("DESIGNER_HTTP_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()),
        }
    }

    /// Per-request limit for every stage.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS))
    }

    /// Build the primary stage.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::NotConfigured`] when the URL is missing, or the
    /// endpoint's construction error.
    pub fn primary(&self) -> Result<PrimaryEndpoint, UploadError> {
        let url = self
            .primary_url
            .as_deref()
            .ok_or(UploadError::NotConfigured("primary upload URL"))?;
        PrimaryEndpoint::new(url, self.nonce.clone().unwrap_or_default(), self.timeout())
    }

    /// Build the secondary stage.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::NotConfigured`] when the cloud name or preset is
    /// missing, or the endpoint's construction error.
    pub fn cloudinary(&self) -> Result<CloudinaryEndpoint, UploadError> {
        let cloud = self
            .cloudinary_cloud
            .as_deref()
            .ok_or(UploadError::NotConfigured("Cloudinary cloud name"))?;
        let preset = self
            .cloudinary_preset
            .clone()
            .ok_or(UploadError::NotConfigured("Cloudinary upload preset"))?;
        CloudinaryEndpoint::new(
            self.cloudinary_base_url
                .as_deref()
                .unwrap_or(DEFAULT_CLOUDINARY_BASE_URL),
            cloud,
            preset,
            self.cloudinary_folder.clone(),
            self.timeout(),
        )
    }

    /// Assemble every configured stage, primary first. Stages that are not
    /// configured or cannot be built are left out.
    #[must_use]
    pub fn build_chain(&self) -> UploadChain {
        let mut chain = UploadChain::new();
        match self.primary() {
            Ok(stage) => chain = chain.with_stage(stage),
            Err(e) => debug!(error = %e, "Primary upload stage unavailable"),
        }
        match self.cloudinary() {
            Ok(stage) => chain = chain.with_stage(stage),
            Err(e) => debug!(error = %e, "Cloudinary upload stage unavailable"),
        }
        chain
    }
}
