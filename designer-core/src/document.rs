//! The layered document for one product variant.
//!
//! Paint order is always `[background, user objects..., mask]`. Every
//! mutation finishes with [`Document::ensure_layering`], which rebuilds the
//! list in a single pass.

use tracing::{debug, warn};

use crate::event::DocumentEvent;
use crate::object::{CanvasObject, ObjectId, Rect};
use crate::raster::RasterImage;
use crate::{DesignerError, DesignerResult};

/// A decoded image destined for one of the fixed layers.
#[derive(Debug, Clone)]
pub struct LayerSource {
    /// Source the renderer will load the layer from.
    pub src: String,
    /// Decoded pixels.
    pub image: RasterImage,
}

impl LayerSource {
    /// Create a layer source.
    #[must_use]
    pub fn new(src: impl Into<String>, image: RasterImage) -> Self {
        Self {
            src: src.into(),
            image,
        }
    }
}

/// Live canvas state for one product variant.
#[derive(Debug, Clone)]
pub struct Document {
    width: f32,
    height: f32,
    /// Every object in paint order.
    objects: Vec<CanvasObject>,
    background: Option<ObjectId>,
    mask: Option<ObjectId>,
    /// Retained so clip bounds can be recomputed after a resize.
    mask_raster: Option<RasterImage>,
    clip_bounds: Option<Rect>,
    selected: Option<ObjectId>,
    reordering: bool,
    events: Vec<DocumentEvent>,
}

impl Document {
    /// Create an empty document with the given canvas size.
    #[must_use]
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            objects: Vec::new(),
            background: None,
            mask: None,
            mask_raster: None,
            clip_bounds: None,
            selected: None,
            reordering: false,
            events: Vec::new(),
        }
    }

    /// Canvas width.
    #[must_use]
    pub fn width(&self) -> f32 {
        self.width
    }

    /// Canvas height.
    #[must_use]
    pub fn height(&self) -> f32 {
        self.height
    }

    /// Replace the document's content with a new background and optional mask.
    ///
    /// Both layers are scaled to fit the canvas, centred, and marked
    /// non-selectable. Clip bounds are recomputed from the mask.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::AssetLoad`] if either image has no pixels;
    /// the document is left empty.
    pub fn load_variant(&mut self, background: LayerSource, mask: Option<LayerSource>) -> DesignerResult<()> {
        self.clear();

        if background.image.is_empty() {
            return Err(DesignerError::AssetLoad(format!(
                "background image has no pixels: {}",
                background.src
            )));
        }
        if let Some(mask) = &mask {
            if mask.image.is_empty() {
                return Err(DesignerError::AssetLoad(format!(
                    "mask image has no pixels: {}",
                    mask.src
                )));
            }
        }

        let bg = self.fit_layer(&background);
        self.background = Some(bg.id);
        self.objects.push(bg);

        if let Some(mask) = mask {
            let layer = self.fit_layer(&mask);
            self.mask = Some(layer.id);
            self.objects.push(layer);
            self.mask_raster = Some(mask.image);
        }

        self.recompute_clip_bounds();
        self.events.push(DocumentEvent::VariantLoaded {
            has_mask: self.mask.is_some(),
        });
        debug!(
            has_mask = self.mask.is_some(),
            clip = ?self.clip_bounds,
            "Variant layers loaded"
        );
        Ok(())
    }

    fn fit_layer(&self, source: &LayerSource) -> CanvasObject {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (source.image.width as f32, source.image.height as f32);
        let scale = (self.width / w).min(self.height / h);
        CanvasObject::image(source.src.clone(), source.image.width, source.image.height)
            .with_scale(scale)
            .centered_at(self.width / 2.0, self.height / 2.0)
            .with_selectable(false)
    }

    /// Whether a variant's background is loaded.
    #[must_use]
    pub fn has_variant(&self) -> bool {
        self.background.is_some()
    }

    /// The background layer.
    #[must_use]
    pub fn background(&self) -> Option<&CanvasObject> {
        self.background.and_then(|id| self.get(id))
    }

    /// The mask layer.
    #[must_use]
    pub fn mask(&self) -> Option<&CanvasObject> {
        self.mask.and_then(|id| self.get(id))
    }

    fn is_fixed(&self, id: ObjectId) -> bool {
        self.background == Some(id) || self.mask == Some(id)
    }

    /// Add a user object on top of the existing user content.
    pub fn add_object(&mut self, mut obj: CanvasObject) -> ObjectId {
        obj.selectable = true;
        if self.get(obj.id).is_some() {
            obj.regenerate_ids();
        }
        let id = obj.id;
        self.objects.push(obj);
        self.ensure_layering();
        self.events.push(DocumentEvent::Added { id });
        id
    }

    /// Remove a user object.
    ///
    /// # Errors
    ///
    /// Returns [`DesignerError::FixedLayer`] for the background or mask and
    /// [`DesignerError::ObjectNotFound`] for unknown IDs. The document is
    /// unchanged in both cases.
    pub fn remove_object(&mut self, id: ObjectId) -> DesignerResult<CanvasObject> {
        if self.is_fixed(id) {
            return Err(DesignerError::FixedLayer(id.to_string()));
        }
        let index = self.index_of(id)?;
        let removed = self.objects.remove(index);
        if self.selected == Some(id) {
            self.selected = None;
            self.events
                .push(DocumentEvent::SelectionChanged { selected: None });
        }
        self.ensure_layering();
        self.events.push(DocumentEvent::Removed { id });
        Ok(removed)
    }

    /// Swap a user object for another, keeping its slot in the paint order.
    ///
    /// # Errors
    ///
    /// Same as [`Document::remove_object`].
    pub fn replace_object(&mut self, old: ObjectId, mut new: CanvasObject) -> DesignerResult<ObjectId> {
        if self.is_fixed(old) {
            return Err(DesignerError::FixedLayer(old.to_string()));
        }
        let index = self.index_of(old)?;
        new.selectable = true;
        if new.id != old && self.get(new.id).is_some() {
            new.regenerate_ids();
        }
        let new_id = new.id;
        self.objects[index] = new;
        if self.selected == Some(old) {
            self.selected = Some(new_id);
        }
        self.ensure_layering();
        self.events.push(DocumentEvent::Replaced { old, new: new_id });
        Ok(new_id)
    }

    /// Apply a change to a user object.
    ///
    /// The object stays selectable whatever the closure does.
    ///
    /// # Errors
    ///
    /// Same as [`Document::remove_object`].
    pub fn update_object<F>(&mut self, id: ObjectId, f: F) -> DesignerResult<()>
    where
        F: FnOnce(&mut CanvasObject),
    {
        if self.is_fixed(id) {
            return Err(DesignerError::FixedLayer(id.to_string()));
        }
        let index = self.index_of(id)?;
        let obj = &mut self.objects[index];
        f(obj);
        obj.id = id;
        obj.selectable = true;
        self.ensure_layering();
        self.events.push(DocumentEvent::Modified { id });
        Ok(())
    }

    fn index_of(&self, id: ObjectId) -> DesignerResult<usize> {
        self.objects
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| DesignerError::ObjectNotFound(id.to_string()))
    }

    /// Rebuild the paint order as `[background, user..., mask]`.
    ///
    /// Individual transforms are untouched. Non-selectable objects that are
    /// not one of the fixed layers are dropped. Calls made while a rebuild
    /// is running return immediately.
    pub fn ensure_layering(&mut self) {
        if self.reordering {
            return;
        }
        self.reordering = true;

        let before: Vec<ObjectId> = self.objects.iter().map(|o| o.id).collect();
        let mut background = None;
        let mut mask = None;
        let mut user = Vec::with_capacity(self.objects.len());
        for obj in self.objects.drain(..) {
            if Some(obj.id) == self.background {
                background = Some(obj);
            } else if Some(obj.id) == self.mask {
                mask = Some(obj);
            } else if obj.selectable {
                user.push(obj);
            } else {
                warn!(id = %obj.id, kind = obj.kind_name(), "Dropping stray non-selectable object");
            }
        }

        self.objects.extend(background);
        self.objects.append(&mut user);
        self.objects.extend(mask);

        if !self.objects.iter().map(|o| o.id).eq(before.iter().copied()) {
            self.events.push(DocumentEvent::Reordered);
        }
        self.reordering = false;
    }

    /// Whether a layering pass is running.
    #[must_use]
    pub fn is_reordering(&self) -> bool {
        self.reordering
    }

    /// Replace all user objects at once, keeping the fixed layers.
    ///
    /// Non-selectable entries are skipped. Returns the number of objects restored.
    pub fn restore_user_objects(&mut self, objects: Vec<CanvasObject>) -> usize {
        self.remove_user_objects();
        for obj in objects.into_iter().filter(|o| o.selectable) {
            let mut obj = obj;
            if self.get(obj.id).is_some() {
                obj.regenerate_ids();
            }
            self.objects.push(obj);
        }
        self.ensure_layering();
        let count = self.user_objects().count();
        self.events.push(DocumentEvent::Restored { count });
        count
    }

    /// Remove every user object, keeping the fixed layers.
    pub fn clear_user_objects(&mut self) {
        self.remove_user_objects();
        self.events.push(DocumentEvent::Restored { count: 0 });
    }

    fn remove_user_objects(&mut self) {
        let background = self.background;
        let mask = self.mask;
        self.objects
            .retain(|o| Some(o.id) == background || Some(o.id) == mask);
        if self.selected.take().is_some() {
            self.events
                .push(DocumentEvent::SelectionChanged { selected: None });
        }
    }

    /// Remove everything, including the fixed layers.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.background = None;
        self.mask = None;
        self.mask_raster = None;
        self.clip_bounds = None;
        self.selected = None;
        self.events.push(DocumentEvent::Cleared);
    }

    /// Get an object by ID.
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&CanvasObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// All objects in paint order.
    #[must_use]
    pub fn paint_order(&self) -> &[CanvasObject] {
        &self.objects
    }

    /// User objects in paint order.
    pub fn user_objects(&self) -> impl Iterator<Item = &CanvasObject> {
        self.objects.iter().filter(move |o| !self.is_fixed(o.id))
    }

    /// Owned copies of the user objects, for snapshots and persistence.
    #[must_use]
    pub fn snapshot_user_objects(&self) -> Vec<CanvasObject> {
        self.user_objects().cloned().collect()
    }

    /// Topmost visible user object under a canvas point.
    #[must_use]
    pub fn object_at(&self, x: f32, y: f32) -> Option<ObjectId> {
        self.objects
            .iter()
            .rev()
            .filter(|o| !self.is_fixed(o.id))
            .find(|o| o.visible && o.contains_point(x, y))
            .map(|o| o.id)
    }

    /// Printable region derived from the mask, if one was found.
    #[must_use]
    pub fn clip_bounds(&self) -> Option<Rect> {
        self.clip_bounds
    }

    /// Region new content is placed into: the clip bounds, or the full canvas.
    #[must_use]
    pub fn placement_region(&self) -> Rect {
        self.clip_bounds
            .unwrap_or_else(|| Rect::new(0.0, 0.0, self.width, self.height))
    }

    fn recompute_clip_bounds(&mut self) {
        self.clip_bounds = None;
        let (Some(raster), Some(mask)) = (&self.mask_raster, self.mask()) else {
            return;
        };
        let Some((min_x, min_y, max_x, max_y)) = raster.opaque_bounds() else {
            warn!("No non-transparent area found in mask");
            return;
        };

        #[allow(clippy::cast_precision_loss)]
        let (natural_w, natural_h) = (raster.width as f32, raster.height as f32);
        let scaled_w = mask.scaled_width();
        let scaled_h = mask.scaled_height();
        let scale = (scaled_w / natural_w).min(scaled_h / natural_h);
        let offset_x = (self.width - scaled_w) / 2.0;
        let offset_y = (self.height - scaled_h) / 2.0;

        #[allow(clippy::cast_precision_loss)]
        let rect = Rect::new(
            offset_x + min_x as f32 * scale,
            offset_y + min_y as f32 * scale,
            (max_x - min_x + 1) as f32 * scale,
            (max_y - min_y + 1) as f32 * scale,
        );
        self.clip_bounds = Some(rect);
    }

    /// Change the canvas size, re-fitting the fixed layers and clip bounds.
    ///
    /// User objects keep their coordinates.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
        for id in [self.background, self.mask].into_iter().flatten() {
            if let Some(layer) = self.objects.iter_mut().find(|o| o.id == id) {
                let scale = (width / layer.transform.width).min(height / layer.transform.height);
                layer.transform.scale_x = scale;
                layer.transform.scale_y = scale;
                layer.transform.left = width / 2.0;
                layer.transform.top = height / 2.0;
            }
        }
        self.recompute_clip_bounds();
        self.events.push(DocumentEvent::Resized { width, height });
    }

    /// Select a user object.
    ///
    /// # Errors
    ///
    /// Returns an error for fixed layers and unknown IDs.
    pub fn select(&mut self, id: ObjectId) -> DesignerResult<()> {
        if self.is_fixed(id) {
            return Err(DesignerError::FixedLayer(id.to_string()));
        }
        self.index_of(id)?;
        if self.selected != Some(id) {
            self.selected = Some(id);
            self.events
                .push(DocumentEvent::SelectionChanged { selected: Some(id) });
        }
        Ok(())
    }

    /// Clear the selection, returning what was selected.
    pub fn deselect(&mut self) -> Option<ObjectId> {
        let previous = self.selected.take();
        if previous.is_some() {
            self.events
                .push(DocumentEvent::SelectionChanged { selected: None });
        }
        previous
    }

    /// Currently selected object.
    #[must_use]
    pub fn selected(&self) -> Option<ObjectId> {
        self.selected
    }

    /// Take all pending change events.
    pub fn drain_events(&mut self) -> Vec<DocumentEvent> {
        std::mem::take(&mut self.events)
    }
}
