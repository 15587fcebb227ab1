//! Annotation identity codec.
//!
//! Maps annotations to deterministic string ids and classifies arbitrary
//! id strings by shape. Four grammars are recognized:
//!
//! | Shape                          | Type  | Scheme     |
//! |--------------------------------|-------|------------|
//! | `x_y_z`                        | Point | Plain      |
//! | `Ptx_y_z`                      | Point | Prefixed   |
//! | `x1_y1_z1-x2_y2_z2-Line`       | Line  | Plain      |
//! | `Lnx1_y1_z1_x2_y2_z2`          | Line  | Prefixed   |
//!
//! Coordinates are rounded to integers before being embedded.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::annotation::{Annotation, Geometry};
use crate::error::{CoreError, CoreResult};

static POINT_PLAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+)_(-?\d+)_(-?\d+)$").expect("valid regex"));

static POINT_PREFIXED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Pt(-?\d+)_(-?\d+)_(-?\d+)$").expect("valid regex"));

static LINE_PLAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?\d+)_(-?\d+)_(-?\d+)-(-?\d+)_(-?\d+)_(-?\d+)-Line$").expect("valid regex")
});

static LINE_PREFIXED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Ln(-?\d+)_(-?\d+)_(-?\d+)_(-?\d+)_(-?\d+)_(-?\d+)$").expect("valid regex")
});

/// Prefix marking a point id in the prefixed scheme.
const POINT_PREFIX: &str = "Pt";
/// Prefix marking a line id in the prefixed scheme.
const LINE_PREFIX: &str = "Ln";
/// Suffix marking a line id in the plain scheme.
const LINE_SUFFIX: &str = "-Line";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Result of classifying an id string by shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdClass {
    Point,
    Line,
    /// The id matches no known grammar (legacy or foreign id).
    Invalid,
}

/// Naming scheme used when deriving ids from coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdScheme {
    /// `x_y_z` and `x1_y1_z1-x2_y2_z2-Line` (DVID, Clio v1).
    #[default]
    Plain,
    /// `Ptx_y_z` and `Lnx1_y1_z1_x2_y2_z2` (Clio v2).
    Prefixed,
}

/// An id decomposed into its scheme and integer coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub class: IdClass,
    pub scheme: IdScheme,
    /// 3 coordinates for points, 6 for lines.
    pub coords: Vec<i64>,
}

impl ParsedId {
    /// Geometry described by the id's coordinates.
    pub fn geometry(&self) -> Option<Geometry> {
        let coords: Vec<f64> = self.coords.iter().map(|&c| c as f64).collect();
        Geometry::from_coordinates(&coords)
    }

    /// `x_y_z` form of the first three coordinates.
    pub fn position_key(&self) -> String {
        join_coords(&self.coords[..3.min(self.coords.len())])
    }
}

/// Match an id against the four grammars without interpreting its digits.
fn match_grammar(id: &str) -> Option<(IdClass, IdScheme, Captures<'_>)> {
    let table: [(&Regex, IdClass, IdScheme); 4] = [
        (&*POINT_PLAIN_RE, IdClass::Point, IdScheme::Plain),
        (&*POINT_PREFIXED_RE, IdClass::Point, IdScheme::Prefixed),
        (&*LINE_PLAIN_RE, IdClass::Line, IdScheme::Plain),
        (&*LINE_PREFIXED_RE, IdClass::Line, IdScheme::Prefixed),
    ];

    table
        .into_iter()
        .find_map(|(re, class, scheme)| re.captures(id).map(|caps| (class, scheme, caps)))
}

/// Decompose an id into scheme and coordinates, if it matches a grammar.
///
/// Returns `None` when the shape is unknown or a coordinate does not fit
/// in an `i64`.
pub fn parse_id(id: &str) -> Option<ParsedId> {
    let (class, scheme, caps) = match_grammar(id)?;
    let coords = caps
        .iter()
        .skip(1)
        .map(|m| m.and_then(|m| m.as_str().parse::<i64>().ok()))
        .collect::<Option<Vec<_>>>()?;
    Some(ParsedId {
        class,
        scheme,
        coords,
    })
}

/// Like [`parse_id`], but an unrecognized id is an error.
pub fn require_id(id: &str) -> CoreResult<ParsedId> {
    parse_id(id).ok_or_else(|| CoreError::InvalidId(id.to_string()))
}

/// Classify an id by shape.
///
/// Unrecognized shapes yield [`IdClass::Invalid`] and are reported at
/// `warn` level; this never fails.
pub fn classify(id: &str) -> IdClass {
    match match_grammar(id) {
        Some((class, _, _)) => class,
        None => {
            tracing::warn!(id, "Unrecognized annotation id shape");
            IdClass::Invalid
        }
    }
}

/// Whether the id matches any known grammar. Does not log.
pub fn is_valid(id: &str) -> bool {
    match_grammar(id).is_some()
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

impl IdScheme {
    /// Derive an id from rounded coordinates, ignoring any stored key.
    pub fn derive(&self, geometry: &Geometry) -> String {
        let rounded = geometry.rounded();
        match (self, geometry) {
            (Self::Plain, Geometry::Point { .. }) => join_coords(&rounded),
            (Self::Plain, Geometry::Line { .. }) => format!(
                "{}-{}{LINE_SUFFIX}",
                join_coords(&rounded[..3]),
                join_coords(&rounded[3..])
            ),
            (Self::Prefixed, Geometry::Point { .. }) => {
                format!("{POINT_PREFIX}{}", join_coords(&rounded))
            }
            (Self::Prefixed, Geometry::Line { .. }) => {
                format!("{LINE_PREFIX}{}", join_coords(&rounded))
            }
        }
    }

    /// Id of an annotation: its stored key when present, otherwise the id
    /// derived from its coordinates.
    pub fn id_of(&self, annotation: &Annotation) -> String {
        match &annotation.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.derive(&annotation.geometry),
        }
    }
}

fn join_coords(coords: &[i64]) -> String {
    coords
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_all_grammars() {
        assert_eq!(classify("10_20_30"), IdClass::Point);
        assert_eq!(classify("-1_0_-7"), IdClass::Point);
        assert_eq!(classify("Pt10_20_30"), IdClass::Point);
        assert_eq!(classify("1_2_3-4_5_6-Line"), IdClass::Line);
        assert_eq!(classify("-1_2_3--4_5_6-Line"), IdClass::Line);
        assert_eq!(classify("Ln1_2_3_4_5_6"), IdClass::Line);
    }

    #[test]
    fn classify_rejects_foreign_shapes() {
        for id in [
            "",
            "abc",
            "1_2",
            "1_2_3_4",
            "Pt1_2",
            "Ln1_2_3",
            "1_2_3-4_5_6",
            "1.5_2_3",
            "local-1234",
            "pt1_2_3",
        ] {
            assert_eq!(classify(id), IdClass::Invalid, "id {id:?}");
            assert!(!is_valid(id));
        }
    }

    #[test]
    fn point_and_line_grammars_are_disjoint() {
        for id in ["1_2_3", "Pt1_2_3"] {
            assert_eq!(parse_id(id).unwrap().class, IdClass::Point);
        }
        for id in ["1_2_3-4_5_6-Line", "Ln1_2_3_4_5_6"] {
            assert_eq!(parse_id(id).unwrap().class, IdClass::Line);
        }
    }

    #[test]
    fn point_ids_round_trip() {
        for (x, y, z) in [(0, 0, 0), (10, 20, 30), (-5, 7, -123456), (99999, -1, 2)] {
            let a = Annotation::point([x as f64, y as f64, z as f64], "PreSyn");
            for scheme in [IdScheme::Plain, IdScheme::Prefixed] {
                let id = scheme.id_of(&a);
                let parsed = parse_id(&id).unwrap();
                assert_eq!(parsed.class, IdClass::Point);
                assert_eq!(parsed.scheme, scheme);
                assert_eq!(parsed.coords, vec![x, y, z]);
            }
        }
    }

    #[test]
    fn line_ids_round_trip_both_orderings() {
        let p = [1.0, -2.0, 3.0];
        let q = [-40.0, 50.0, 60.0];
        for (a, b) in [(p, q), (q, p)] {
            let ann = Annotation::line(a, b, "Line");
            for scheme in [IdScheme::Plain, IdScheme::Prefixed] {
                let id = scheme.id_of(&ann);
                let parsed = parse_id(&id).unwrap();
                assert_eq!(parsed.class, IdClass::Line);
                assert_eq!(parsed.geometry(), Some(ann.geometry.clone()));
            }
        }
    }

    #[test]
    fn derived_ids_use_rounded_coordinates() {
        let a = Annotation::point([10.4, 19.6, -0.4], "Note");
        assert_eq!(IdScheme::Plain.id_of(&a), "10_20_0");
        assert_eq!(IdScheme::Prefixed.id_of(&a), "Pt10_20_0");

        let l = Annotation::line([1.0, 2.0, 3.0], [4.0, 5.0, 6.0], "Note");
        assert_eq!(IdScheme::Plain.id_of(&l), "1_2_3-4_5_6-Line");
        assert_eq!(IdScheme::Prefixed.id_of(&l), "Ln1_2_3_4_5_6");
    }

    #[test]
    fn explicit_id_is_returned_unchanged() {
        let a = Annotation::point([1.0, 2.0, 3.0], "Note").with_id("server-key-7");
        assert_eq!(IdScheme::Plain.id_of(&a), "server-key-7");
        assert_eq!(IdScheme::Prefixed.derive(&a.geometry), "Pt1_2_3");
    }

    #[test]
    fn require_id_rejects_invalid() {
        assert!(matches!(require_id("nope"), Err(CoreError::InvalidId(id)) if id == "nope"));
        assert_eq!(require_id("Ln1_2_3_4_5_6").unwrap().class, IdClass::Line);
    }

    #[test]
    fn oversized_coordinates_keep_their_shape() {
        let id = "99999999999999999999_0_0";
        assert_eq!(classify(id), IdClass::Point);
        assert!(is_valid(id));
        assert_eq!(parse_id(id), None);
        assert!(matches!(require_id(id), Err(CoreError::InvalidId(_))));

        let line = "Ln0_0_0_0_0_-99999999999999999999";
        assert_eq!(classify(line), IdClass::Line);
        assert_eq!(parse_id(line), None);
    }

    #[test]
    fn position_key_of_prefixed_id() {
        let parsed = parse_id("Pt-1_2_3").unwrap();
        assert_eq!(parsed.position_key(), "-1_2_3");
    }
}
