//! Typed annotation representation shared by the DVID and Clio backends.
//!
//! An [`Annotation`] is either a point or a line segment, tagged with a
//! free-form `kind` (`"Note"`, `"PreSyn"`, `"PostSyn"`, a user label, ...)
//! and carrying an optional property bag.

use serde::Serialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Kind used by bookmark annotations.
pub const KIND_NOTE: &str = "Note";

/// Property key holding a free-text comment.
pub const PROP_COMMENT: &str = "comment";
/// Property key holding the authoring user.
pub const PROP_USER: &str = "user";
/// Property key holding a short title.
pub const PROP_TITLE: &str = "title";
/// Property key holding a longer description.
pub const PROP_DESCRIPTION: &str = "description";
/// Property key holding the bookmark type (`"False Merge"`, ...).
pub const PROP_TYPE: &str = "type";
/// Property key holding the segment body the bookmark refers to.
pub const PROP_BODY_ID: &str = "bodyId";
/// Property key holding DVID element relationships, kept verbatim.
pub const PROP_RELS: &str = "rels";

/// A 3-D coordinate in voxel space.
pub type Vec3 = [f64; 3];

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Spatial extent of an annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point { point: Vec3 },
    Line { a: Vec3, b: Vec3 },
}

impl Geometry {
    /// All coordinates, in order, as a flat list.
    pub fn coordinates(&self) -> Vec<f64> {
        match self {
            Self::Point { point } => point.to_vec(),
            Self::Line { a, b } => a.iter().chain(b.iter()).copied().collect(),
        }
    }

    /// Build a geometry from a flat coordinate list of length 3 or 6.
    pub fn from_coordinates(coords: &[f64]) -> Option<Self> {
        match coords {
            [x, y, z] => Some(Self::Point { point: [*x, *y, *z] }),
            [x1, y1, z1, x2, y2, z2] => Some(Self::Line {
                a: [*x1, *y1, *z1],
                b: [*x2, *y2, *z2],
            }),
            _ => None,
        }
    }

    /// Coordinates rounded to integers, as embedded in ids.
    pub fn rounded(&self) -> Vec<i64> {
        self.coordinates().into_iter().map(round_coord).collect()
    }
}

/// Round a coordinate to the integer grid used by ids and DVID keys.
pub fn round_coord(v: f64) -> i64 {
    v.round() as i64
}

// ---------------------------------------------------------------------------
// Annotation
// ---------------------------------------------------------------------------

/// A single point or line annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    /// Explicit stored key. `None` for freshly created annotations, whose
    /// id is derived from their coordinates.
    pub id: Option<String>,
    pub geometry: Geometry,
    pub kind: String,
    /// Free-form attributes. Values are strings or JSON primitives.
    pub properties: Map<String, Value>,
    /// Human-readable description shown by the viewer.
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Opaque per-item value forwarded to the renderer.
    pub render_attribute: u32,
}

impl Annotation {
    /// Create a point annotation with no explicit id.
    pub fn point(point: Vec3, kind: impl Into<String>) -> Self {
        Self::new(Geometry::Point { point }, kind)
    }

    /// Create a line annotation with no explicit id.
    pub fn line(a: Vec3, b: Vec3, kind: impl Into<String>) -> Self {
        Self::new(Geometry::Line { a, b }, kind)
    }

    fn new(geometry: Geometry, kind: impl Into<String>) -> Self {
        Self {
            id: None,
            geometry,
            kind: kind.into(),
            properties: Map::new(),
            description: None,
            tags: Vec::new(),
            render_attribute: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_point(&self) -> bool {
        matches!(self.geometry, Geometry::Point { .. })
    }

    /// String value of a property. Numbers and booleans are rendered as
    /// text; other JSON values yield `None`.
    pub fn property_str(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<String> {
        self.property_str(PROP_TITLE).filter(|s| !s.is_empty())
    }

    pub fn user(&self) -> Option<String> {
        self.property_str(PROP_USER).filter(|s| !s.is_empty())
    }

    pub fn comment(&self) -> Option<String> {
        self.property_str(PROP_COMMENT).filter(|s| !s.is_empty())
    }

    /// Description as shown to the user: the stored description, or the
    /// title when no description exists.
    pub fn rendered_description(&self) -> Option<String> {
        self.description
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| self.title())
    }
}

/// Combine a title and a description into a single display string.
///
/// Both present yields `"title: description"`; otherwise whichever one
/// exists is returned.
pub fn compose_description(title: Option<&str>, description: Option<&str>) -> Option<String> {
    let title = title.filter(|s| !s.is_empty());
    let description = description.filter(|s| !s.is_empty());
    match (title, description) {
        (Some(t), Some(d)) => Some(format!("{t}: {d}")),
        (Some(t), None) => Some(t.to_string()),
        (None, Some(d)) => Some(d.to_string()),
        (None, None) => None,
    }
}
