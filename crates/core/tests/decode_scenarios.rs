//! Decoding scenarios that cross the identity codec, the record parser
//! and the geometry batch.

use serde_json::json;

use annolink_core::id::{classify, parse_id};
use annolink_core::wire::{decode_bulk, parse_record, to_wire};
use annolink_core::{Annotation, AnnotationGeometryBatch, Geometry, IdClass, IdScheme, WireDialect};

/// A keyed bulk payload yields a point whose id is the key.
#[test]
fn keyed_bulk_record_becomes_point() {
    let decoded = decode_bulk(&json!({"10_20_30": {"Kind": "PreSyn"}}), "Note");

    assert_eq!(decoded.len(), 1);
    let annotation = &decoded[0].annotation;
    assert_eq!(IdScheme::Plain.id_of(annotation), "10_20_30");
    assert_eq!(classify("10_20_30"), IdClass::Point);
    assert!(annotation.is_point());
    assert_eq!(annotation.kind, "PreSyn");
}

/// One good record and one without a position: only the good one
/// survives.
#[test]
fn bulk_array_tolerates_bad_records() {
    let payload = json!([
        {"pos": [1, 2, 3], "kind": "Atlas"},
        {"kind": "Atlas"},
    ]);
    let decoded = decode_bulk(&payload, "Note");
    assert_eq!(decoded.len(), 1);
    assert_eq!(
        decoded[0].annotation.geometry,
        Geometry::Point {
            point: [1.0, 2.0, 3.0]
        }
    );
}

/// Derived ids parse back to the coordinates they were built from, for
/// both schemes and both geometries.
#[test]
fn derived_ids_parse_back() {
    let samples = [
        Annotation::point([-4.0, 0.0, 17.0], "Note"),
        Annotation::line([1.0, 2.0, 3.0], [-4.0, -5.0, -6.0], "Note"),
        Annotation::line([-4.0, -5.0, -6.0], [1.0, 2.0, 3.0], "Note"),
    ];
    for scheme in [IdScheme::Plain, IdScheme::Prefixed] {
        for annotation in &samples {
            let id = scheme.id_of(annotation);
            let parsed = parse_id(&id).unwrap_or_else(|| panic!("unparsable id {id}"));
            assert_eq!(parsed.scheme, scheme);
            assert_eq!(parsed.coords, annotation.geometry.rounded());
            assert_eq!(parsed.geometry().as_ref(), Some(&annotation.geometry));
        }
    }
}

/// An encoded Note decodes back to the same user-facing fields.
#[test]
fn encoded_note_decodes_to_same_bookmark() {
    let mut note = Annotation::point([7.0, 8.0, 9.0], "Note")
        .with_property("type", "False Merge")
        .with_property("bodyId", "1234")
        .with_description("merge here");
    note.render_attribute = 1;

    for dialect in [WireDialect::Dvid, WireDialect::Clio] {
        let record = to_wire(&note, Some("alice"), dialect);
        let back = parse_record(Some("7_8_9"), &record, "Note").unwrap().unwrap();

        assert_eq!(back.property_str("type").as_deref(), Some("False Merge"));
        assert_eq!(back.property_str("bodyId").as_deref(), Some("1234"));
        assert_eq!(back.description.as_deref(), Some("merge here"));
        assert_eq!(back.render_attribute, 1, "dialect {dialect:?}");
        assert_eq!(back.user().as_deref(), Some("alice"));
    }
}

/// The batch serializer sees decoded records in points-then-lines order.
#[test]
fn decoded_records_fill_batch() {
    let decoded = decode_bulk(
        &json!({
            "1_2_3-4_5_6-Line": {"Kind": "Edge"},
            "Pt7_8_9": {"kind": "Atlas"},
        }),
        "Note",
    );
    let mut batch = AnnotationGeometryBatch::new();
    for record in &decoded {
        batch.push(IdScheme::Prefixed.id_of(&record.annotation), &record.annotation);
    }

    assert_eq!(batch.points.len(), 1);
    assert_eq!(batch.lines.len(), 1);
    assert_eq!(
        batch.ids().collect::<Vec<_>>(),
        vec!["Pt7_8_9", "1_2_3-4_5_6-Line"]
    );
    let bytes = batch.serialize();
    assert_eq!(&bytes[..8], &[1, 0, 0, 0, 1, 0, 0, 0]);
}
