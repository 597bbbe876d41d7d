//! Canvas objects - the building blocks of a design.
//!
//! Objects serialize to a flat JSON shape (`{"type": "text", "left": 200,
//! "fontSize": 48, ...}`) so that templates, history snapshots and session
//! records all share one format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Create a new unique object ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse an object ID from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Horizontal anchor of an object's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginX {
    /// `left` is the left edge.
    #[default]
    Left,
    /// `left` is the horizontal centre.
    Center,
    /// `left` is the right edge.
    Right,
}

/// Vertical anchor of an object's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginY {
    /// `top` is the top edge.
    #[default]
    Top,
    /// `top` is the vertical centre.
    Center,
    /// `top` is the bottom edge.
    Bottom,
}

impl OriginX {
    fn offset(self) -> f32 {
        match self {
            Self::Left => 0.0,
            Self::Center => 0.5,
            Self::Right => 1.0,
        }
    }
}

impl OriginY {
    fn offset(self) -> f32 {
        match self {
            Self::Top => 0.0,
            Self::Center => 0.5,
            Self::Bottom => 1.0,
        }
    }
}

/// Position, intrinsic size and scale of an object.
///
/// `width`/`height` are the unscaled dimensions (the natural pixel size for
/// images); the on-canvas size is `width * scale_x` by `height * scale_y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transform {
    /// Anchor X position in canvas units.
    pub left: f32,
    /// Anchor Y position in canvas units.
    pub top: f32,
    /// Intrinsic width.
    pub width: f32,
    /// Intrinsic height.
    pub height: f32,
    /// Horizontal scale factor.
    pub scale_x: f32,
    /// Vertical scale factor.
    pub scale_y: f32,
    /// Rotation in degrees, clockwise, about the anchor.
    pub angle: f32,
    /// Horizontal anchor.
    pub origin_x: OriginX,
    /// Vertical anchor.
    pub origin_y: OriginY,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: 0.0,
            height: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            angle: 0.0,
            origin_x: OriginX::Left,
            origin_y: OriginY::Top,
        }
    }
}

/// Image filters applied at render time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Filter {
    /// Remove all saturation.
    Grayscale,
    /// Warm brown tone.
    Sepia,
    /// Invert colour channels.
    Invert,
    /// Shift brightness by -1.0..=1.0.
    Brightness {
        /// Brightness delta.
        brightness: f32,
    },
    /// Scale contrast by -1.0..=1.0.
    Contrast {
        /// Contrast delta.
        contrast: f32,
    },
    /// Gaussian blur, as a fraction of the object's size.
    Blur {
        /// Blur amount.
        blur: f32,
    },
}

/// Visual properties shared by every object kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Style {
    /// Fill colour (CSS colour string).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    /// Outline colour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    /// Outline width in unscaled units.
    pub stroke_width: f32,
    /// Opacity 0.0..=1.0.
    pub opacity: f32,
    /// Render-time filters.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            fill: None,
            stroke: None,
            stroke_width: 0.0,
            opacity: 1.0,
            filters: Vec::new(),
        }
    }
}

/// Primitive shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Axis-aligned rectangle (before rotation).
    Rect,
    /// Ellipse inscribed in the object's box.
    Ellipse,
}

/// The content an object carries. A closed set: every consumer matches exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectKind {
    /// A run of text.
    #[serde(alias = "i-text", alias = "textbox")]
    #[serde(rename_all = "camelCase")]
    Text {
        /// Text content.
        text: String,
        /// Font size in unscaled units.
        #[serde(default = "default_font_size")]
        font_size: f32,
        /// Font family.
        #[serde(default = "default_font_family")]
        font_family: String,
        /// CSS font weight.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font_weight: Option<String>,
    },

    /// A raster image.
    Image {
        /// Image source: a hosted URL or a `data:` URI.
        src: String,
    },

    /// A primitive shape.
    #[serde(rename_all = "camelCase")]
    Shape {
        /// Which primitive.
        shape: ShapeKind,
        /// Corner radius for rectangles.
        #[serde(default)]
        corner_radius: f32,
    },

    /// A group of child objects positioned relative to the group.
    Group {
        /// Children in paint order.
        objects: Vec<CanvasObject>,
    },
}

fn default_font_size() -> f32 {
    40.0
}

fn default_font_family() -> String {
    "Arial".to_string()
}

const fn default_true() -> bool {
    true
}

/// An axis-aligned rectangle in canvas units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub left: f32,
    /// Top edge.
    pub top: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

impl Rect {
    /// Create a rectangle.
    #[must_use]
    pub const fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Centre point.
    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    /// Check whether a point lies inside the rectangle (edges inclusive).
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.left + self.width && y >= self.top && y <= self.top + self.height
    }
}

/// A positioned visual element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasObject {
    /// Unique identifier. Template and legacy payloads without one get a fresh ID.
    #[serde(default)]
    pub id: ObjectId,
    /// Content.
    #[serde(flatten)]
    pub kind: ObjectKind,
    /// Position and size.
    #[serde(flatten)]
    pub transform: Transform,
    /// Colours, opacity and filters.
    #[serde(flatten)]
    pub style: Style,
    /// User objects are selectable; the background and mask layers are not.
    #[serde(default = "default_true")]
    pub selectable: bool,
    /// Hidden objects are skipped when rendering (used while cropping).
    #[serde(default = "default_true")]
    pub visible: bool,
}

impl CanvasObject {
    /// Create a new object with the given kind.
    #[must_use]
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            id: ObjectId::new(),
            kind,
            transform: Transform::default(),
            style: Style::default(),
            selectable: true,
            visible: true,
        }
    }

    /// Create a text object.
    #[must_use]
    pub fn text(content: impl Into<String>, font_size: f32, font_family: impl Into<String>) -> Self {
        Self::new(ObjectKind::Text {
            text: content.into(),
            font_size,
            font_family: font_family.into(),
            font_weight: None,
        })
    }

    /// Create an image object whose intrinsic size is the image's natural size.
    #[must_use]
    pub fn image(src: impl Into<String>, natural_width: u32, natural_height: u32) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let transform = Transform {
            width: natural_width as f32,
            height: natural_height as f32,
            ..Transform::default()
        };
        Self::new(ObjectKind::Image { src: src.into() }).with_transform(transform)
    }

    /// Create a primitive shape.
    #[must_use]
    pub fn shape(shape: ShapeKind, width: f32, height: f32) -> Self {
        Self::new(ObjectKind::Shape {
            shape,
            corner_radius: 0.0,
        })
        .with_transform(Transform {
            width,
            height,
            ..Transform::default()
        })
    }

    /// Set the transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Set the style.
    #[must_use]
    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    /// Set the fill colour.
    #[must_use]
    pub fn with_fill(mut self, fill: impl Into<String>) -> Self {
        self.style.fill = Some(fill.into());
        self
    }

    /// Anchor the object by its centre at the given point.
    #[must_use]
    pub fn centered_at(mut self, x: f32, y: f32) -> Self {
        self.transform.left = x;
        self.transform.top = y;
        self.transform.origin_x = OriginX::Center;
        self.transform.origin_y = OriginY::Center;
        self
    }

    /// Set a uniform scale.
    #[must_use]
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.transform.scale_x = scale;
        self.transform.scale_y = scale;
        self
    }

    /// Set whether the object is selectable.
    #[must_use]
    pub fn with_selectable(mut self, selectable: bool) -> Self {
        self.selectable = selectable;
        self
    }

    /// Short kind name as used in the serialized `type` field.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ObjectKind::Text { .. } => "text",
            ObjectKind::Image { .. } => "image",
            ObjectKind::Shape { .. } => "shape",
            ObjectKind::Group { .. } => "group",
        }
    }

    /// Whether this is an image object.
    #[must_use]
    pub fn is_image(&self) -> bool {
        matches!(self.kind, ObjectKind::Image { .. })
    }

    /// The image source, for image objects.
    #[must_use]
    pub fn image_src(&self) -> Option<&str> {
        match &self.kind {
            ObjectKind::Image { src } => Some(src),
            _ => None,
        }
    }

    /// On-canvas width.
    #[must_use]
    pub fn scaled_width(&self) -> f32 {
        self.transform.width * self.transform.scale_x.abs()
    }

    /// On-canvas height.
    #[must_use]
    pub fn scaled_height(&self) -> f32 {
        self.transform.height * self.transform.scale_y.abs()
    }

    /// Top-left corner of the unrotated, scaled box.
    #[must_use]
    pub fn top_left(&self) -> (f32, f32) {
        let t = &self.transform;
        (
            t.left - self.scaled_width() * t.origin_x.offset(),
            t.top - self.scaled_height() * t.origin_y.offset(),
        )
    }

    /// Axis-aligned bounding box after scaling and rotation about the anchor.
    #[must_use]
    pub fn bounding_rect(&self) -> Rect {
        let t = &self.transform;
        let (x0, y0) = self.top_left();
        let (w, h) = (self.scaled_width(), self.scaled_height());
        if t.angle == 0.0 {
            return Rect::new(x0, y0, w, h);
        }

        let (sin, cos) = t.angle.to_radians().sin_cos();
        let corners = [(x0, y0), (x0 + w, y0), (x0, y0 + h), (x0 + w, y0 + h)];
        let mut min = (f32::MAX, f32::MAX);
        let mut max = (f32::MIN, f32::MIN);
        for (cx, cy) in corners {
            let dx = cx - t.left;
            let dy = cy - t.top;
            let rx = t.left + dx * cos - dy * sin;
            let ry = t.top + dx * sin + dy * cos;
            min = (min.0.min(rx), min.1.min(ry));
            max = (max.0.max(rx), max.1.max(ry));
        }
        Rect::new(min.0, min.1, max.0 - min.0, max.1 - min.1)
    }

    /// Check if a point (in canvas coordinates) is within this object's bounds.
    #[must_use]
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.bounding_rect().contains(x, y)
    }

    /// Assign fresh IDs to this object and, for groups, every descendant.
    pub fn regenerate_ids(&mut self) {
        self.id = ObjectId::new();
        if let ObjectKind::Group { objects } = &mut self.kind {
            for child in objects {
                child.regenerate_ids();
            }
        }
    }
}
