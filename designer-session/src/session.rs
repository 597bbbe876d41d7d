//! The editing session: one document, its history and the cooperative
//! flags that keep restore-class operations from interleaving.
//!
//! A session is created when the designer opens and dropped (after
//! [`EditorSession::close`]) when it closes. Operations that rewrite the
//! whole design (undo, redo, template load, variant load, saved-design
//! restore, crop apply) are restore-class: at most one runs at a time, and
//! history recording is suspended while it does.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use designer_core::{
    current_timestamp_ms, Assessment, CanvasObject, DesignLibrary, DesignSnapshot,
    DesignerConfig, DesignerError, DesignerResult, Document, DocumentEvent, History,
    KeyValueStore, LayerSource, ObjectId, ObjectKind, ResolutionPolicy, SavedDesign,
    SessionPersistence, Template, Transform, ValidationError,
};
use designer_renderer::{
    crop_encoded, decode_image, to_data_uri, CropRect, PreviewRenderer, RasterExport,
    RenderResult,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::upload::{UploadChain, UploadOutcome};
use crate::variant::{AssetFetcher, VariantSource};

/// Shown when a crop is requested without a suitable image.
pub const CROP_SELECT_NOTICE: &str = "Please select an image to crop";

/// Operations that rewrite the design wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreKind {
    /// Loading a product variant (and its saved session).
    VariantLoad,
    /// Stepping back in history.
    Undo,
    /// Stepping forward in history.
    Redo,
    /// Applying a template.
    Template,
    /// Loading a named saved design.
    SavedDesign,
    /// Loading a handed-off design payload.
    DesignJson,
    /// Replacing an image with its cropped version.
    CropApply,
}

impl RestoreKind {
    /// Name used in logs and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VariantLoad => "variant load",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Template => "template load",
            Self::SavedDesign => "saved design load",
            Self::DesignJson => "design restore",
            Self::CropApply => "crop",
        }
    }
}

/// A file chosen by the person editing the design.
#[derive(Debug, Clone)]
pub struct ImageFile {
    /// Original file name.
    pub name: String,
    /// Reported MIME type.
    pub mime: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// An upload still to be run for a freshly ingested image.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    /// Object whose source the upload result replaces.
    pub object_id: ObjectId,
    /// File name sent to the hosting stages.
    pub filename: String,
    /// Embedded representation of the image.
    pub data_uri: String,
}

/// Result of [`EditorSession::ingest`].
#[derive(Debug, Clone)]
pub struct Ingested {
    /// The new image object.
    pub id: ObjectId,
    /// Resolution check of the placed image.
    pub assessment: Option<Assessment>,
    /// Upload to run outside the session lock.
    pub upload: PendingUpload,
}

/// The image currently being cropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropTarget {
    /// Object being cropped (hidden until the crop ends).
    pub object_id: ObjectId,
    /// Source to show on the crop surface.
    pub src: String,
    /// Natural width of the source, in pixels.
    pub width: u32,
    /// Natural height of the source, in pixels.
    pub height: u32,
}

/// Appearance of new text objects.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    /// Font size in canvas units.
    pub font_size: f32,
    /// Font family.
    pub font_family: String,
    /// Fill colour.
    pub fill: String,
    /// Optional font weight.
    pub font_weight: Option<String>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 40.0,
            font_family: "Arial".to_string(),
            fill: "#000000".to_string(),
            font_weight: None,
        }
    }
}

/// What the cart receives when a design is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartAttachment {
    /// Hosted or embedded preview image.
    pub preview_url: String,
    /// `{ "objects": [...] }` payload of the user objects.
    pub serialized_user_objects: String,
    /// Number of user objects.
    pub element_count: usize,
}

/// A rendered design waiting for its preview upload.
#[derive(Debug, Clone)]
pub struct HandOff {
    /// Preview raster.
    pub preview: RasterExport,
    /// Upload file name.
    pub filename: String,
    /// `{ "objects": [...] }` payload of the user objects.
    pub serialized_user_objects: String,
    /// Number of user objects.
    pub element_count: usize,
}

impl HandOff {
    /// Upload the preview and produce the cart attachment. Never fails: an
    /// upload that cannot be hosted leaves the preview embedded.
    pub async fn attach(self, chain: &UploadChain) -> CartAttachment {
        let outcome = chain
            .upload(&self.preview.to_data_uri(), &self.filename)
            .await;
        CartAttachment {
            preview_url: outcome.url().to_string(),
            serialized_user_objects: self.serialized_user_objects,
            element_count: self.element_count,
        }
    }
}

/// One open designer.
pub struct EditorSession {
    id: Uuid,
    config: DesignerConfig,
    policy: ResolutionPolicy,
    variant_id: Option<String>,
    document: Document,
    history: History,
    persistence: SessionPersistence,
    library: DesignLibrary,
    renderer: PreviewRenderer,
    /// Natural pixel size of every image source seen, keyed by source.
    image_sizes: HashMap<String, (u32, u32)>,
    restoring: Option<RestoreKind>,
    crop: Option<CropTarget>,
    notices: Vec<String>,
    /// When user content last changed without being saved, on the tokio clock.
    dirty_since: Option<Instant>,
    closed: bool,
}

impl std::fmt::Debug for EditorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorSession")
            .field("id", &self.id)
            .field("variant_id", &self.variant_id)
            .field("restoring", &self.restoring)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl EditorSession {
    /// Open a session backed by `store` for sessions and saved designs.
    #[must_use]
    pub fn new(config: DesignerConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let id = Uuid::new_v4();
        debug!(session_id = %id, "Editing session opened");
        Self {
            id,
            policy: ResolutionPolicy::from(&config),
            document: Document::new(config.canvas_width, config.canvas_height),
            history: History::new(config.history_cap),
            persistence: SessionPersistence::new(Arc::clone(&store), config.session_ttl_ms),
            library: DesignLibrary::new(store),
            renderer: PreviewRenderer::new(),
            config,
            variant_id: None,
            image_sizes: HashMap::new(),
            restoring: None,
            crop: None,
            notices: Vec::new(),
            dirty_since: None,
            closed: false,
        }
    }

    /// Session identifier, for logs.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &DesignerConfig {
        &self.config
    }

    /// Variant being edited.
    #[must_use]
    pub fn variant_id(&self) -> Option<&str> {
        self.variant_id.as_deref()
    }

    /// The live document.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Undo/redo history.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Renderer and its asset cache.
    #[must_use]
    pub fn renderer(&self) -> &PreviewRenderer {
        &self.renderer
    }

    /// Restore-class operation in progress, if any.
    #[must_use]
    pub fn restoring(&self) -> Option<RestoreKind> {
        self.restoring
    }

    /// Whether [`EditorSession::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Transient messages for the person editing (advisories, notices),
    /// oldest first.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    // ---------------------------------------------------------------------
    // Restore-class guard
    // ---------------------------------------------------------------------

    fn begin_restore(&mut self, kind: RestoreKind) -> DesignerResult<()> {
        let active = self.restoring.map(RestoreKind::as_str).or_else(|| {
            (self.crop.is_some() && kind != RestoreKind::CropApply).then_some("crop")
        });
        if let Some(active) = active {
            warn!(
                session_id = %self.id,
                active,
                requested = kind.as_str(),
                "Rejected overlapping restore"
            );
            return Err(DesignerError::RestoreInProgress {
                active,
                requested: kind.as_str(),
            });
        }
        self.restoring = Some(kind);
        self.history.set_suspended(true);
        Ok(())
    }

    fn end_restore(&mut self) {
        self.restoring = None;
        self.history.set_suspended(false);
    }

    /// Drain document events, noting when user content changed.
    fn settle(&mut self) {
        let events = self.document.drain_events();
        if events.iter().any(DocumentEvent::is_content_change) {
            self.dirty_since = Some(Instant::now());
        }
        for event in &events {
            debug!(session_id = %self.id, ?event, "Document event");
        }
    }

    fn record(&mut self) {
        if self.document.is_reordering() {
            return;
        }
        let snapshot = DesignSnapshot {
            objects: self.settled_user_objects(),
        };
        if let Err(e) = self.history.record_snapshot(&snapshot) {
            warn!(session_id = %self.id, error = %e, "History snapshot failed");
        }
    }

    /// User objects as they will look once any open crop closes: the image
    /// being cropped is stored visible.
    fn settled_user_objects(&self) -> Vec<CanvasObject> {
        let mut objects = self.document.snapshot_user_objects();
        if let Some(crop) = &self.crop {
            for obj in objects.iter_mut().filter(|o| o.id == crop.object_id) {
                obj.visible = true;
            }
        }
        objects
    }

    // ---------------------------------------------------------------------
    // Variant
    // ---------------------------------------------------------------------

    /// Load a variant's fixed layers, then restore its unexpired saved
    /// session if one exists. History is reset to a single entry.
    ///
    /// Returns the number of restored user objects.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::NoVariant`] if the variant has no designer
    /// data, [`DesignerError::AssetLoad`] if a layer cannot be fetched or
    /// decoded (the document is left empty), or
    /// [`DesignerError::RestoreInProgress`].
    pub async fn load_variant(
        &mut self,
        variant_id: &str,
        source: &dyn VariantSource,
        fetcher: &dyn AssetFetcher,
    ) -> DesignerResult<usize> {
        self.begin_restore(RestoreKind::VariantLoad)?;

        if let Err(e) = self.load_layers(variant_id, source, fetcher).await {
            self.document.clear();
            self.variant_id = None;
            self.end_restore();
            self.settle();
            self.history.reset();
            self.dirty_since = None;
            warn!(session_id = %self.id, variant_id, error = %e, "Variant failed to load");
            return Err(e);
        }

        self.variant_id = Some(variant_id.to_string());
        let restored = self.restore_saved_session(fetcher).await;

        self.end_restore();
        self.settle();
        self.dirty_since = None;
        self.history.reset();
        self.record();
        info!(session_id = %self.id, variant_id, restored, "Variant loaded");
        Ok(restored)
    }

    async fn load_layers(
        &mut self,
        variant_id: &str,
        source: &dyn VariantSource,
        fetcher: &dyn AssetFetcher,
    ) -> DesignerResult<()> {
        let assets = source
            .variant_assets(variant_id)
            .await
            .ok_or(DesignerError::NoVariant)?;

        let mask_fetch = async {
            match &assets.mask_image_url {
                Some(url) => Some(fetcher.fetch(url).await),
                None => None,
            }
        };
        let (background, mask) =
            futures::future::join(fetcher.fetch(&assets.background_image_url), mask_fetch).await;

        let background = self.decode_layer(&assets.background_image_url, &background?)?;
        let mask = match (&assets.mask_image_url, mask) {
            (Some(url), Some(fetched)) => Some(self.decode_layer(url, &fetched?)?),
            _ => None,
        };
        self.document.load_variant(background, mask)
    }

    fn decode_layer(&mut self, src: &str, bytes: &[u8]) -> DesignerResult<LayerSource> {
        let decoded =
            decode_image(bytes).map_err(|e| DesignerError::AssetLoad(format!("{src}: {e}")))?;
        self.renderer.assets_mut().insert(src, bytes.to_vec());
        Ok(LayerSource::new(src, decoded.raster))
    }

    async fn restore_saved_session(&mut self, fetcher: &dyn AssetFetcher) -> usize {
        let Some(variant_id) = self.variant_id.clone() else {
            return 0;
        };
        let Some(record) = self.persistence.load(&variant_id, current_timestamp_ms()) else {
            return 0;
        };
        if record.user_objects.is_empty() {
            return 0;
        }

        let objects = self.resolve_images(record.user_objects, fetcher).await;
        let count = self.document.restore_user_objects(objects);
        info!(session_id = %self.id, variant_id = %variant_id, count, "Saved session restored");
        count
    }

    /// Fetch and register every image source, dropping images that fail.
    async fn resolve_images(
        &mut self,
        objects: Vec<CanvasObject>,
        fetcher: &dyn AssetFetcher,
    ) -> Vec<CanvasObject> {
        let fetched = fetch_image_sources(&objects, fetcher).await;

        let mut kept = Vec::with_capacity(objects.len());
        for (obj, fetched) in objects.into_iter().zip(fetched) {
            let Some(result) = fetched else {
                kept.push(obj);
                continue;
            };
            let registered = result.and_then(|bytes| {
                let src = obj.image_src().unwrap_or_default().to_string();
                self.register_image(&src, &bytes)
            });
            match registered {
                Ok(_) => kept.push(obj),
                Err(e) => warn!(session_id = %self.id, id = %obj.id, error = %e, "Skipping image that failed to load"),
            }
        }
        kept
    }

    /// Decode an image source, remember its natural size and cache its
    /// bytes for rendering.
    fn register_image(&mut self, src: &str, bytes: &[u8]) -> DesignerResult<(u32, u32)> {
        let decoded = decode_image(bytes).map_err(|e| DesignerError::AssetLoad(e.to_string()))?;
        let size = (decoded.width(), decoded.height());
        if !src.starts_with("data:") {
            self.renderer.assets_mut().insert(src, bytes.to_vec());
        }
        self.image_sizes.insert(src.to_string(), size);
        Ok(size)
    }

    // ---------------------------------------------------------------------
    // Editing
    // ---------------------------------------------------------------------

    /// Add a user object.
    pub fn add_object(&mut self, obj: CanvasObject) -> ObjectId {
        let id = self.document.add_object(obj);
        self.settle();
        self.record();
        id
    }

    /// Add a text object centred in the placement region and select it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyText`] for blank content.
    pub fn add_text(&mut self, content: &str, style: &TextStyle) -> DesignerResult<ObjectId> {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        let (cx, cy) = self.document.placement_region().center();
        let mut obj = CanvasObject::text(content, style.font_size, style.font_family.clone())
            .with_fill(style.fill.clone())
            .centered_at(cx, cy);
        if let ObjectKind::Text { font_weight, .. } = &mut obj.kind {
            font_weight.clone_from(&style.font_weight);
        }

        let id = self.document.add_object(obj);
        self.document.select(id)?;
        self.settle();
        self.record();
        Ok(id)
    }

    /// Remove a user object.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::ObjectNotFound`] or
    /// [`DesignerError::FixedLayer`].
    pub fn remove_object(&mut self, id: ObjectId) -> DesignerResult<CanvasObject> {
        let removed = self.document.remove_object(id)?;
        if self.crop.as_ref().is_some_and(|c| c.object_id == id) {
            self.crop = None;
        }
        self.settle();
        self.record();
        Ok(removed)
    }

    /// Modify a user object (move, scale, restyle). Images are re-checked
    /// for print resolution afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::ObjectNotFound`] or
    /// [`DesignerError::FixedLayer`].
    pub fn update_object<F>(&mut self, id: ObjectId, f: F) -> DesignerResult<Option<Assessment>>
    where
        F: FnOnce(&mut CanvasObject),
    {
        self.document.update_object(id, f)?;
        let assessment = self.assess(id);
        self.settle();
        self.record();
        Ok(assessment)
    }

    /// Select a user object.
    ///
    /// # Errors
    ///
    /// Same as [`Document::select`].
    pub fn select(&mut self, id: ObjectId) -> DesignerResult<()> {
        self.document.select(id)?;
        self.settle();
        Ok(())
    }

    /// Clear the selection.
    pub fn deselect(&mut self) -> Option<ObjectId> {
        let previous = self.document.deselect();
        self.settle();
        previous
    }

    /// Run the resolution check on an image object, updating its indicator
    /// and queueing the advisory when it is flagged.
    fn assess(&mut self, id: ObjectId) -> Option<Assessment> {
        let (width, height) = {
            let src = self.document.get(id)?.image_src()?;
            *self.image_sizes.get(src)?
        };

        let policy = self.policy;
        let mut assessment = None;
        if let Err(e) = self
            .document
            .update_object(id, |obj| assessment = policy.check(width, height, obj))
        {
            warn!(session_id = %self.id, id = %id, error = %e, "Resolution check failed");
            return None;
        }
        if let Some(advisory) = assessment.as_ref().and_then(Assessment::advisory) {
            self.notices.push(advisory);
        }
        assessment
    }

    // ---------------------------------------------------------------------
    // History
    // ---------------------------------------------------------------------

    /// Step back one recorded state.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::RestoreInProgress`] while another restore
    /// runs, or [`DesignerError::StateCorruption`] if the entry was
    /// unreadable (the design is left empty).
    pub fn undo(&mut self) -> DesignerResult<bool> {
        self.begin_restore(RestoreKind::Undo)?;
        let result = self.history.undo(&mut self.document);
        self.end_restore();
        self.settle();
        result
    }

    /// Step forward one recorded state.
    ///
    /// # Errors
    ///
    /// Same as [`EditorSession::undo`].
    pub fn redo(&mut self) -> DesignerResult<bool> {
        self.begin_restore(RestoreKind::Redo)?;
        let result = self.history.redo(&mut self.document);
        self.end_restore();
        self.settle();
        result
    }

    /// Whether undo would restore a state with content.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Whether there is a state to redo.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ---------------------------------------------------------------------
    // Image ingest
    // ---------------------------------------------------------------------

    /// Validate a chosen file and place it on the canvas straight away.
    ///
    /// The image is scaled to at most the configured share of the placement
    /// region on both axes (never enlarged), centred in it, selected and
    /// checked for print resolution. Its source is the embedded `data:` URI
    /// until [`EditorSession::apply_upload`] swaps in a hosted URL.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedType`] or
    /// [`ValidationError::TooLarge`] before anything changes, or
    /// [`DesignerError::AssetLoad`] if the file cannot be decoded.
    #[allow(clippy::cast_precision_loss)]
    pub fn ingest(&mut self, file: ImageFile) -> DesignerResult<Ingested> {
        if !self.config.is_allowed_mime(&file.mime) {
            return Err(ValidationError::UnsupportedType { mime: file.mime }.into());
        }
        if file.bytes.len() > self.config.max_upload_bytes {
            return Err(ValidationError::TooLarge {
                size: file.bytes.len(),
                max_mb: self.config.max_upload_mb(),
            }
            .into());
        }

        let data_uri = to_data_uri(&file.bytes, &file.mime);
        let (width, height) = self.register_image(&data_uri, &file.bytes)?;

        let region = self.document.placement_region();
        let ratio = self.config.placement_fill_ratio;
        let scale = (region.width * ratio / width as f32)
            .min(region.height * ratio / height as f32)
            .min(1.0);
        let (cx, cy) = region.center();
        let obj = CanvasObject::image(data_uri.clone(), width, height)
            .with_scale(scale)
            .centered_at(cx, cy);

        let id = self.document.add_object(obj);
        let assessment = self.assess(id);
        self.document.select(id)?;
        self.settle();
        self.record();
        info!(session_id = %self.id, id = %id, width, height, scale, "Image added");

        Ok(Ingested {
            id,
            assessment,
            upload: PendingUpload {
                object_id: id,
                filename: file.name,
                data_uri,
            },
        })
    }

    /// Swap a hosted URL into an image placed by [`EditorSession::ingest`].
    ///
    /// Returns `false` (discarding the result) if the session is closed, the
    /// upload stayed embedded, or the object no longer exists.
    pub fn apply_upload(&mut self, id: ObjectId, outcome: &UploadOutcome) -> bool {
        if self.closed {
            debug!(session_id = %self.id, id = %id, "Upload finished after close, discarded");
            return false;
        }
        let UploadOutcome::Hosted { url, .. } = outcome else {
            return false;
        };
        let Some(old_src) = self
            .document
            .get(id)
            .and_then(CanvasObject::image_src)
            .map(ToString::to_string)
        else {
            debug!(session_id = %self.id, id = %id, "Uploaded image no longer on canvas");
            return false;
        };
        if old_src == *url {
            return false;
        }

        if let Some(size) = self.image_sizes.get(&old_src).copied() {
            self.image_sizes.insert(url.clone(), size);
        }
        if let Some(bytes) = self.renderer.assets().resolve(&old_src) {
            self.renderer.assets_mut().insert(url.clone(), bytes);
        }
        let swapped = self
            .document
            .update_object(id, |obj| {
                if let ObjectKind::Image { src } = &mut obj.kind {
                    src.clone_from(url);
                }
            })
            .is_ok();
        self.settle();
        swapped
    }

    // ---------------------------------------------------------------------
    // Crop
    // ---------------------------------------------------------------------

    /// Begin cropping `target`, or the selected object when `None`.
    ///
    /// The image is hidden until the crop is applied or cancelled. Returns
    /// `Ok(None)` if a crop is already open (the request is ignored).
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::CropUnavailable`] when the target is not a
    /// selectable image; a notice is queued as well.
    pub fn start_crop(&mut self, target: Option<ObjectId>) -> DesignerResult<Option<CropTarget>> {
        if let Some(active) = &self.crop {
            debug!(session_id = %self.id, active = %active.object_id, "Crop already open, ignoring");
            return Ok(None);
        }

        let candidate = target
            .or_else(|| self.document.selected())
            .and_then(|id| self.document.get(id))
            .filter(|obj| obj.is_image() && obj.selectable);
        let Some(obj) = candidate else {
            self.notices.push(CROP_SELECT_NOTICE.to_string());
            return Err(DesignerError::CropUnavailable(
                "no selectable image".to_string(),
            ));
        };

        let object_id = obj.id;
        let src = obj.image_src().unwrap_or_default().to_string();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (width, height) = self.image_sizes.get(&src).copied().unwrap_or((
            obj.transform.width.round() as u32,
            obj.transform.height.round() as u32,
        ));

        self.document.update_object(object_id, |o| o.visible = false)?;
        self.document.deselect();
        self.settle();

        let crop = CropTarget {
            object_id,
            src,
            width,
            height,
        };
        self.crop = Some(crop.clone());
        Ok(Some(crop))
    }

    /// The crop in progress, if any.
    #[must_use]
    pub fn crop_target(&self) -> Option<&CropTarget> {
        self.crop.as_ref()
    }

    /// Replace the image being cropped with the region `rect` (in source
    /// pixels) of its source. The new image keeps the old position,
    /// rotation, scale, opacity and filters, and becomes selected.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::CropUnavailable`] when no crop is open, or
    /// [`DesignerError::AssetLoad`] if the source cannot be cropped; the
    /// original is shown again in that case.
    pub fn apply_crop(&mut self, rect: CropRect) -> DesignerResult<ObjectId> {
        let Some(target) = self.crop.clone() else {
            return Err(DesignerError::CropUnavailable(
                "no crop in progress".to_string(),
            ));
        };
        self.begin_restore(RestoreKind::CropApply)?;
        let result = self.replace_with_crop(&target, rect);
        self.end_restore();
        self.crop = None;

        match result {
            Ok(new_id) => {
                self.settle();
                self.record();
                info!(session_id = %self.id, old = %target.object_id, new = %new_id, "Crop applied");
                Ok(new_id)
            }
            Err(e) => {
                if let Err(shown) = self
                    .document
                    .update_object(target.object_id, |o| o.visible = true)
                {
                    warn!(session_id = %self.id, error = %shown, "Cropped image vanished before crop failed");
                }
                self.settle();
                warn!(session_id = %self.id, error = %e, "Crop failed");
                Err(e)
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn replace_with_crop(&mut self, target: &CropTarget, rect: CropRect) -> DesignerResult<ObjectId> {
        let bytes = self
            .renderer
            .assets()
            .resolve(&target.src)
            .ok_or_else(|| DesignerError::AssetLoad(format!("crop source unavailable: {}", target.object_id)))?;
        let (png, width, height) =
            crop_encoded(&bytes, rect).map_err(|e| DesignerError::AssetLoad(e.to_string()))?;

        let src = to_data_uri(&png, "image/png");
        self.image_sizes.insert(src.clone(), (width, height));

        let old = self
            .document
            .get(target.object_id)
            .ok_or_else(|| DesignerError::ObjectNotFound(target.object_id.to_string()))?;
        let mut cropped = CanvasObject::image(src, width, height).with_transform(Transform {
            width: width as f32,
            height: height as f32,
            ..old.transform
        });
        cropped.style.opacity = old.style.opacity;
        cropped.style.filters.clone_from(&old.style.filters);

        let new_id = self.document.replace_object(target.object_id, cropped)?;
        self.document.select(new_id)?;
        self.assess(new_id);
        Ok(new_id)
    }

    /// Close the crop without changes. Returns whether one was open.
    pub fn cancel_crop(&mut self) -> bool {
        let Some(target) = self.crop.take() else {
            return false;
        };
        if let Err(e) = self
            .document
            .update_object(target.object_id, |o| o.visible = true)
        {
            warn!(session_id = %self.id, error = %e, "Cropped image vanished before cancel");
        }
        self.settle();
        true
    }

    // ---------------------------------------------------------------------
    // Templates and restores
    // ---------------------------------------------------------------------

    /// Add a template's objects, scaled to the canvas, on top of the
    /// current design. Recorded as a single history entry.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedTemplate`] if an object cannot
    /// be placed (nothing is added), or
    /// [`DesignerError::RestoreInProgress`].
    pub fn apply_template(
        &mut self,
        template: &Template,
        replacements: Option<&BTreeMap<String, String>>,
    ) -> DesignerResult<Vec<ObjectId>> {
        self.begin_restore(RestoreKind::Template)?;
        let placed = template.apply_from_reference(
            self.config.template_reference_size,
            self.document.width(),
            self.document.height(),
            replacements,
        );
        let ids = placed.map(|objects| {
            objects
                .into_iter()
                .map(|obj| self.document.add_object(obj))
                .collect::<Vec<_>>()
        });
        self.end_restore();
        self.settle();

        let ids = ids?;
        self.record();
        info!(session_id = %self.id, template = %template.id, objects = ids.len(), "Template applied");
        Ok(ids)
    }

    /// Replace the design with a handed-off `{ "objects": [...] }` payload.
    /// Fixed-layer entries are ignored and images that fail to load are
    /// skipped. History is reset to a single entry.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedSession`] for an unreadable
    /// payload (nothing changes), or [`DesignerError::RestoreInProgress`].
    pub async fn restore_design_json(
        &mut self,
        json: &str,
        fetcher: &dyn AssetFetcher,
    ) -> DesignerResult<usize> {
        let snapshot = DesignSnapshot::from_json(json)?;
        self.restore_objects(RestoreKind::DesignJson, snapshot.objects, fetcher)
            .await
    }

    async fn restore_objects(
        &mut self,
        kind: RestoreKind,
        objects: Vec<CanvasObject>,
        fetcher: &dyn AssetFetcher,
    ) -> DesignerResult<usize> {
        self.begin_restore(kind)?;
        self.document.deselect();
        self.document.clear_user_objects();
        let objects = self.resolve_images(objects, fetcher).await;
        let count = self.document.restore_user_objects(objects);
        self.end_restore();
        self.settle();
        self.history.reset();
        self.record();
        info!(session_id = %self.id, restore = kind.as_str(), count, "Design restored");
        Ok(count)
    }

    // ---------------------------------------------------------------------
    // Saved designs
    // ---------------------------------------------------------------------

    /// Save the current design under a name.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::NoVariant`] before a variant is loaded,
    /// [`ValidationError::EmptyDesignName`], or a storage error.
    pub fn save_design(&mut self, name: &str) -> DesignerResult<SavedDesign> {
        let variant_id = self.variant_id.as_deref().ok_or(DesignerError::NoVariant)?;
        let design = self.library.save(
            name,
            variant_id,
            DesignSnapshot::capture(&self.document),
            current_timestamp_ms(),
        )?;
        info!(session_id = %self.id, name = %design.name, "Design saved");
        Ok(design)
    }

    /// Saved designs for the current variant.
    #[must_use]
    pub fn saved_designs(&self) -> Vec<SavedDesign> {
        self.variant_id
            .as_deref()
            .map_or_else(Vec::new, |v| self.library.for_variant(v))
    }

    /// Delete a saved design of the current variant.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::NoVariant`] or a storage error.
    pub fn delete_design(&mut self, name: &str, date: u64) -> DesignerResult<bool> {
        let variant_id = self.variant_id.as_deref().ok_or(DesignerError::NoVariant)?;
        self.library.delete(name, variant_id, date)
    }

    /// Replace the design with a saved one.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::RestoreInProgress`].
    pub async fn load_saved_design(
        &mut self,
        design: &SavedDesign,
        fetcher: &dyn AssetFetcher,
    ) -> DesignerResult<usize> {
        if self.variant_id.as_deref() != Some(design.variant_id.as_str()) {
            warn!(
                session_id = %self.id,
                design_variant = %design.variant_id,
                "Loading a design saved for another variant"
            );
        }
        self.restore_objects(
            RestoreKind::SavedDesign,
            design.canvas_data.objects.clone(),
            fetcher,
        )
        .await
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Save the session record now. Skipped before a variant is loaded and
    /// while a restore runs. Returns whether a record was written.
    pub fn autosave(&mut self, now_ms: u64) -> bool {
        if self.closed || self.restoring.is_some() {
            return false;
        }
        let Some(variant_id) = self.variant_id.as_deref() else {
            return false;
        };

        let objects = self.settled_user_objects();
        let saved = self.persistence.save(variant_id, &objects, now_ms);
        if saved {
            self.dirty_since = None;
        }
        saved
    }

    /// Save if user content changed and has been quiet for the debounce
    /// period.
    pub fn persist_if_due(&mut self, now_ms: u64) -> bool {
        match self.dirty_since {
            Some(changed) if changed.elapsed() >= self.config.persist_debounce() => {
                self.autosave(now_ms)
            }
            _ => false,
        }
    }

    /// Whether content changed since the last save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    // ---------------------------------------------------------------------
    // Export
    // ---------------------------------------------------------------------

    /// Compressed preview of the design. Clears the selection. Never fails.
    pub fn generate_preview(&mut self) -> RasterExport {
        let preview = self
            .renderer
            .generate_preview(&mut self.document, &self.config.preview);
        self.settle();
        preview
    }

    /// Full-quality export for final hand-off.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or encoding fails.
    pub fn generate_high_res_export(&self) -> RenderResult<RasterExport> {
        self.renderer.generate_high_res_export(
            &self.document,
            self.config.high_res_max_dimension,
            self.config.high_res_scale_cap,
        )
    }

    /// Render the preview and serialize the user objects for the cart.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::NoVariant`] before a variant is loaded, or a
    /// serialization error.
    pub fn prepare_hand_off(&mut self) -> DesignerResult<HandOff> {
        let variant_id = self.variant_id.clone().ok_or(DesignerError::NoVariant)?;
        let preview = self.generate_preview();
        let serialized_user_objects = DesignSnapshot::capture(&self.document).to_json()?;
        Ok(HandOff {
            preview,
            filename: format!(
                "design-preview-{variant_id}-{}.jpg",
                current_timestamp_ms()
            ),
            serialized_user_objects,
            element_count: self.document.user_objects().count(),
        })
    }

    /// Render, upload and package the design for the cart.
    ///
    /// The upload runs while `self` is borrowed; callers sharing the session
    /// behind a lock should use [`EditorSession::prepare_hand_off`] and
    /// [`HandOff::attach`] instead.
    ///
    /// # Errors
    ///
    /// Same as [`EditorSession::prepare_hand_off`].
    pub async fn apply_design(&mut self, chain: &UploadChain) -> DesignerResult<CartAttachment> {
        let hand_off = self.prepare_hand_off()?;
        Ok(hand_off.attach(chain).await)
    }

    /// Render a design against another variant's layers without touching
    /// the live document. Returns `None` if anything fails.
    pub async fn regenerate_preview(
        &self,
        variant_id: &str,
        objects_json: &str,
        source: &dyn VariantSource,
        fetcher: &dyn AssetFetcher,
    ) -> Option<RasterExport> {
        match self
            .render_for_variant(variant_id, objects_json, source, fetcher)
            .await
        {
            Ok(export) => Some(export),
            Err(e) => {
                warn!(session_id = %self.id, variant_id, error = %e, "Preview regeneration failed");
                None
            }
        }
    }

    async fn render_for_variant(
        &self,
        variant_id: &str,
        objects_json: &str,
        source: &dyn VariantSource,
        fetcher: &dyn AssetFetcher,
    ) -> anyhow::Result<RasterExport> {
        let snapshot = DesignSnapshot::from_json(objects_json).context("design payload")?;
        let assets = source
            .variant_assets(variant_id)
            .await
            .ok_or(DesignerError::NoVariant)?;

        let mut renderer = self.renderer.clone();
        let mut layer = |src: &str, bytes: Vec<u8>| -> anyhow::Result<LayerSource> {
            let decoded = decode_image(&bytes).with_context(|| format!("decoding {src}"))?;
            renderer.assets_mut().insert(src, bytes);
            Ok(LayerSource::new(src, decoded.raster))
        };

        let background = layer(
            &assets.background_image_url,
            fetcher.fetch(&assets.background_image_url).await?,
        )?;
        let mask = match &assets.mask_image_url {
            Some(url) => Some(layer(url, fetcher.fetch(url).await?)?),
            None => None,
        };

        let mut doc = Document::new(self.config.canvas_width, self.config.canvas_height);
        doc.load_variant(background, mask)?;

        let fetched = fetch_image_sources(&snapshot.objects, fetcher).await;
        let mut objects = Vec::with_capacity(snapshot.objects.len());
        for (obj, fetched) in snapshot.objects.into_iter().zip(fetched) {
            match fetched {
                None => objects.push(obj),
                Some(Ok(bytes)) => {
                    if let Some(src) = obj.image_src() {
                        if !src.starts_with("data:") {
                            renderer.assets_mut().insert(src, bytes);
                        }
                    }
                    objects.push(obj);
                }
                Some(Err(e)) => {
                    warn!(id = %obj.id, error = %e, "Skipping image that failed to load");
                }
            }
        }
        doc.restore_user_objects(objects);

        Ok(renderer.generate_high_res_export(
            &doc,
            self.config.high_res_max_dimension,
            self.config.high_res_scale_cap,
        )?)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Close the session: any open crop is cancelled and the design is
    /// saved one last time. Later upload results are discarded.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.cancel_crop();
        self.autosave(current_timestamp_ms());
        self.closed = true;
        info!(session_id = %self.id, variant_id = ?self.variant_id, "Editing session closed");
    }
}

/// Fetch every top-level image source concurrently. Non-image objects map
/// to `None`.
async fn fetch_image_sources(
    objects: &[CanvasObject],
    fetcher: &dyn AssetFetcher,
) -> Vec<Option<DesignerResult<Vec<u8>>>> {
    let fetches = objects.iter().map(|obj| async move {
        match obj.image_src() {
            Some(src) => Some(fetcher.fetch(src).await),
            None => None,
        }
    });
    futures::future::join_all(fetches).await
}

/// Run a pending upload outside the session lock and attach the result.
///
/// The outcome is returned even when the session discards it (closed, or
/// the image was removed meanwhile).
pub async fn upload_and_attach(
    session: &tokio::sync::Mutex<EditorSession>,
    chain: &UploadChain,
    pending: PendingUpload,
) -> UploadOutcome {
    let outcome = chain.upload(&pending.data_uri, &pending.filename).await;
    let attached = session
        .lock()
        .await
        .apply_upload(pending.object_id, &outcome);
    if !attached {
        debug!(id = %pending.object_id, "Upload result not attached");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{HttpFetcher, StaticVariantSource};
    use designer_core::{MemoryStore, ShapeKind};

    fn session() -> EditorSession {
        EditorSession::new(DesignerConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        designer_renderer::image::encode_raster_png(&designer_core::RasterImage::filled(
            width,
            height,
            [10, 20, 30, 255],
        ))
        .expect("png")
    }

    fn file(mime: &str, bytes: Vec<u8>) -> ImageFile {
        ImageFile {
            name: "photo.png".to_string(),
            mime: mime.to_string(),
            bytes,
        }
    }

    #[test]
    fn test_ingest_rejects_type_and_size() {
        let mut s = session();
        let err = s.ingest(file("application/pdf", vec![1, 2, 3])).expect_err("type");
        assert!(matches!(
            err,
            DesignerError::Validation(ValidationError::UnsupportedType { .. })
        ));

        let err = s
            .ingest(file("image/png", vec![0; 5 * 1024 * 1024 + 1]))
            .expect_err("size");
        assert!(matches!(
            err,
            DesignerError::Validation(ValidationError::TooLarge { max_mb: 5, .. })
        ));
        assert_eq!(s.document().user_objects().count(), 0);
    }

    #[test]
    fn test_ingest_places_within_eighty_percent_and_flags_low_res() {
        let mut s = session();
        let ingested = s.ingest(file("image/png", png(1000, 500))).expect("ingest");
        let obj = s.document().get(ingested.id).expect("placed");

        // 500x500 canvas, no mask: 400 wide at most.
        assert!((obj.scaled_width() - 400.0).abs() < 0.01);
        assert!((obj.scaled_height() - 200.0).abs() < 0.01);
        assert!((obj.transform.left - 250.0).abs() < 0.01);
        assert!((obj.transform.top - 250.0).abs() < 0.01);
        assert_eq!(s.document().selected(), Some(ingested.id));
        assert!(ingested.upload.data_uri.starts_with("data:image/png;base64,"));

        // 500 natural px over 200 units (2.78 in) is 180 DPI.
        assert!(!ingested.assessment.expect("assessed").low_resolution);
        assert!(s.take_notices().is_empty());
    }

    #[test]
    fn test_small_image_is_not_enlarged_and_rescale_rechecks() {
        let mut s = session();
        let ingested = s.ingest(file("image/png", png(100, 100))).expect("ingest");
        let obj = s.document().get(ingested.id).expect("placed");
        assert!((obj.transform.scale_x - 1.0).abs() < f32::EPSILON);
        s.take_notices();

        let assessment = s
            .update_object(ingested.id, |o| {
                o.transform.scale_x = 3.0;
                o.transform.scale_y = 3.0;
            })
            .expect("update")
            .expect("image assessed");
        assert!(assessment.low_resolution);
        let notices = s.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("Low resolution image detected"));
        assert!(designer_core::resolution::has_indicator(
            s.document().get(ingested.id).expect("present")
        ));
    }

    #[test]
    fn test_add_text_rejects_blank() {
        let mut s = session();
        let err = s.add_text("   ", &TextStyle::default()).expect_err("blank");
        assert!(matches!(
            err,
            DesignerError::Validation(ValidationError::EmptyText)
        ));
        let id = s.add_text("Hello", &TextStyle::default()).expect("text");
        assert_eq!(s.document().get(id).expect("present").kind_name(), "text");
    }

    #[test]
    fn test_undo_redo_inverse() {
        let mut s = session();
        s.add_object(CanvasObject::shape(ShapeKind::Rect, 10.0, 10.0));
        let before = DesignSnapshot::capture(s.document());
        s.add_object(CanvasObject::shape(ShapeKind::Ellipse, 20.0, 20.0));
        let after = DesignSnapshot::capture(s.document());

        assert!(s.undo().expect("undo"));
        assert_eq!(DesignSnapshot::capture(s.document()), before);
        assert!(s.redo().expect("redo"));
        assert_eq!(DesignSnapshot::capture(s.document()), after);
    }

    #[test]
    fn test_crop_workflow() {
        let mut s = session();
        let ingested = s.ingest(file("image/png", png(40, 20))).expect("ingest");
        s.update_object(ingested.id, |o| o.transform.angle = 15.0)
            .expect("rotate");

        let target = s.start_crop(None).expect("start").expect("opened");
        assert_eq!((target.width, target.height), (40, 20));
        assert!(!s.document().get(ingested.id).expect("hidden").visible);

        // A second crop request is ignored.
        assert!(s.start_crop(Some(ingested.id)).expect("ignored").is_none());
        // Restores wait for the crop.
        assert!(matches!(
            s.undo(),
            Err(DesignerError::RestoreInProgress { active: "crop", .. })
        ));

        let new_id = s.apply_crop(CropRect::new(0, 0, 10, 20)).expect("apply");
        assert!(s.document().get(ingested.id).is_none());
        let cropped = s.document().get(new_id).expect("replaced");
        assert!(cropped.visible);
        assert!((cropped.transform.angle - 15.0).abs() < f32::EPSILON);
        assert!((cropped.transform.width - 10.0).abs() < f32::EPSILON);
        assert_eq!(s.document().selected(), Some(new_id));
        assert!(s.crop_target().is_none());
    }

    #[test]
    fn test_crop_requires_selectable_image() {
        let mut s = session();
        let id = s.add_object(CanvasObject::shape(ShapeKind::Rect, 10.0, 10.0));
        let err = s.start_crop(Some(id)).expect_err("not an image");
        assert!(matches!(err, DesignerError::CropUnavailable(_)));
        assert_eq!(s.take_notices(), vec![CROP_SELECT_NOTICE.to_string()]);
    }

    #[test]
    fn test_cancel_crop_restores_visibility() {
        let mut s = session();
        let ingested = s.ingest(file("image/png", png(10, 10))).expect("ingest");
        s.start_crop(Some(ingested.id)).expect("start");
        assert!(s.cancel_crop());
        assert!(s.document().get(ingested.id).expect("present").visible);
        assert!(!s.cancel_crop());
    }

    #[test]
    fn test_edits_during_crop_record_image_visible() {
        let mut s = session();
        let ingested = s.ingest(file("image/png", png(10, 10))).expect("ingest");
        s.start_crop(Some(ingested.id)).expect("start");
        s.add_text("Caption", &TextStyle::default()).expect("text");
        assert!(s.cancel_crop());

        assert!(s.undo().expect("undo"));
        assert!(s.document().get(ingested.id).expect("present").visible);
        assert!(s.redo().expect("redo"));
        assert!(s.document().get(ingested.id).expect("present").visible);
        assert_eq!(s.document().user_objects().count(), 2);
        assert!(s.crop_target().is_none());
    }

    #[test]
    fn test_failed_crop_shows_image_again() {
        let mut s = session();
        let ingested = s.ingest(file("image/png", png(10, 10))).expect("ingest");
        s.start_crop(Some(ingested.id)).expect("start");

        let err = s
            .apply_crop(CropRect::new(100, 100, 5, 5))
            .expect_err("outside the image");
        assert!(matches!(err, DesignerError::AssetLoad(_)));
        assert!(s.document().get(ingested.id).expect("kept").visible);
        assert!(s.crop_target().is_none());
    }

    #[tokio::test]
    async fn test_failed_variant_load_clears_history() {
        let mut s = session();
        crate::testing::load_plain_variant(&mut s, "1").await;
        s.add_object(CanvasObject::shape(ShapeKind::Rect, 10.0, 10.0));
        s.add_object(CanvasObject::shape(ShapeKind::Ellipse, 10.0, 10.0));
        assert!(s.can_undo());

        let broken =
            StaticVariantSource::new().with_variant("2", "data:image/png;base64,AAAA", None);
        let fetcher = HttpFetcher::new().expect("fetcher");
        s.load_variant("2", &broken, &fetcher)
            .await
            .expect_err("undecodable");

        assert!(!s.can_undo());
        assert!(!s.undo().expect("undo"));
        assert!(s.document().paint_order().is_empty());
        assert!(!s.is_dirty());
    }

    #[test]
    fn test_upload_result_discarded_after_close_or_removal() {
        let mut s = session();
        let ingested = s.ingest(file("image/png", png(10, 10))).expect("ingest");
        let hosted = UploadOutcome::Hosted {
            url: "https://cdn.example.com/a.png".to_string(),
            via: "primary",
        };

        let removed = s.ingest(file("image/png", png(10, 10))).expect("ingest");
        s.remove_object(removed.id).expect("remove");
        assert!(!s.apply_upload(removed.id, &hosted));

        assert!(s.apply_upload(ingested.id, &hosted));
        assert_eq!(
            s.document().get(ingested.id).and_then(CanvasObject::image_src),
            Some("https://cdn.example.com/a.png")
        );
        assert!(s.renderer().assets().contains("https://cdn.example.com/a.png"));

        s.close();
        assert!(!s.apply_upload(ingested.id, &hosted));
    }

    #[test]
    fn test_save_design_requires_variant() {
        let mut s = session();
        assert!(matches!(s.save_design("Mine"), Err(DesignerError::NoVariant)));
        assert!(s.saved_designs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_persist_waits_for_quiet_period() {
        let mut s = session();
        s.variant_id = Some("7".to_string());
        s.add_object(CanvasObject::shape(ShapeKind::Rect, 10.0, 10.0));
        assert!(s.is_dirty());

        tokio::time::advance(std::time::Duration::from_millis(10)).await;
        assert!(!s.persist_if_due(current_timestamp_ms()));
        tokio::time::advance(std::time::Duration::from_millis(1_000)).await;
        assert!(s.persist_if_due(current_timestamp_ms()));
        assert!(!s.is_dirty());
    }
}
