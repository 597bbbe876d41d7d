//! # Designer Session
//!
//! The editing session for the product designer and its collaborators:
//! image ingest and crop, the upload fallback chain, variant loading,
//! auto-save and the cart hand-off.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               EditorSession                  │
//! │  Document + History + restore/crop flags     │
//! ├───────────────┬───────────────┬──────────────┤
//! │ VariantSource │ AssetFetcher  │ UploadChain  │
//! │ (layers)      │ (image bytes) │ primary →    │
//! │               │               │ cloudinary → │
//! │               │               │ embedded     │
//! └───────────────┴───────────────┴──────────────┘
//!        ▲ spawn_autosave (periodic, non-overlapping)
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod autosave;
pub mod session;
pub mod upload;
pub mod variant;

pub use autosave::{spawn_autosave, AutosaveHandle};
pub use session::{
    upload_and_attach, CartAttachment, CropTarget, EditorSession, HandOff, ImageFile, Ingested,
    PendingUpload, RestoreKind, TextStyle,
};
pub use upload::{
    CloudinaryEndpoint, PrimaryEndpoint, UploadChain, UploadConfig, UploadEndpoint, UploadError,
    UploadOutcome,
};
pub use variant::{AssetFetcher, HttpFetcher, StaticVariantSource, VariantAssets, VariantSource};

#[cfg(test)]
pub(crate) mod testing {
    use designer_core::RasterImage;
    use designer_renderer::image::encode_raster_png;
    use designer_renderer::to_data_uri;

    use crate::{EditorSession, HttpFetcher, StaticVariantSource};

    /// Inline PNG of a solid colour.
    pub(crate) fn png_data_uri(width: u32, height: u32, rgba: [u8; 4]) -> String {
        let png = encode_raster_png(&RasterImage::filled(width, height, rgba)).expect("png");
        to_data_uri(&png, "image/png")
    }

    /// Load a background-only variant from inline data.
    pub(crate) async fn load_plain_variant(session: &mut EditorSession, variant_id: &str) {
        let source = StaticVariantSource::new().with_variant(
            variant_id,
            png_data_uri(50, 50, [240, 240, 240, 255]),
            None,
        );
        let fetcher = HttpFetcher::new().expect("fetcher");
        session
            .load_variant(variant_id, &source, &fetcher)
            .await
            .expect("variant loads");
    }
}
