//! Geometry batch handed to the rendering layer.
//!
//! Items are grouped by geometry type. Each item is written as its
//! coordinates (`f32`, little-endian; 3 for points, 6 for lines) followed
//! by its `u32` rendering attribute. Ids travel beside the buffer in item
//! order.
//!
//! Serialized layout:
//!
//! ```text
//! [u32 point_count][u32 line_count][point items...][line items...]
//! ```

use crate::annotation::{Annotation, Geometry};

/// Bytes per serialized point item.
pub const POINT_ITEM_BYTES: usize = 3 * 4 + 4;
/// Bytes per serialized line item.
pub const LINE_ITEM_BYTES: usize = 6 * 4 + 4;

/// Items of one geometry type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedBatch {
    pub ids: Vec<String>,
    pub data: Vec<u8>,
}

impl TypedBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn push(&mut self, id: String, geometry: &Geometry, attribute: u32) {
        self.ids.push(id);
        for c in geometry.coordinates() {
            self.data.extend_from_slice(&(c as f32).to_le_bytes());
        }
        self.data.extend_from_slice(&attribute.to_le_bytes());
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationGeometryBatch {
    pub points: TypedBatch,
    pub lines: TypedBatch,
}

impl AnnotationGeometryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an annotation under the given id.
    pub fn push(&mut self, id: String, annotation: &Annotation) {
        let target = match annotation.geometry {
            Geometry::Point { .. } => &mut self.points,
            Geometry::Line { .. } => &mut self.lines,
        };
        target.push(id, &annotation.geometry, annotation.render_attribute);
    }

    pub fn len(&self) -> usize {
        self.points.len() + self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids, points first, in serialized order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.points
            .ids
            .iter()
            .chain(self.lines.ids.iter())
            .map(String::as_str)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.points.data.len() + self.lines.data.len());
        out.extend_from_slice(&(self.points.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.lines.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.points.data);
        out.extend_from_slice(&self.lines.data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_f32(buf: &[u8], at: usize) -> f32 {
        f32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }

    fn read_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn serialize_layout() {
        let mut batch = AnnotationGeometryBatch::new();
        let mut p = Annotation::point([1.0, 2.0, 3.0], "Note");
        p.render_attribute = 7;
        batch.push("1_2_3".into(), &p);
        batch.push(
            "1_1_1-2_2_2-Line".into(),
            &Annotation::line([1.0; 3], [2.0; 3], "Note"),
        );

        let buf = batch.serialize();
        assert_eq!(buf.len(), 8 + POINT_ITEM_BYTES + LINE_ITEM_BYTES);
        assert_eq!(read_u32(&buf, 0), 1);
        assert_eq!(read_u32(&buf, 4), 1);
        assert_eq!(read_f32(&buf, 8), 1.0);
        assert_eq!(read_f32(&buf, 16), 3.0);
        assert_eq!(read_u32(&buf, 20), 7);
        assert_eq!(read_f32(&buf, 24), 1.0);
        assert_eq!(read_f32(&buf, 24 + 5 * 4), 2.0);
        assert_eq!(read_u32(&buf, 24 + 6 * 4), 0);
    }

    #[test]
    fn ids_points_first() {
        let mut batch = AnnotationGeometryBatch::new();
        batch.push("l".into(), &Annotation::line([0.0; 3], [1.0; 3], "x"));
        batch.push("p".into(), &Annotation::point([0.0; 3], "x"));
        assert_eq!(batch.ids().collect::<Vec<_>>(), vec!["p", "l"]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn empty_batch_serializes_header_only() {
        let batch = AnnotationGeometryBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.serialize(), vec![0u8; 8]);
    }
}
