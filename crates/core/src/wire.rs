//! Server record parser and encoder.
//!
//! DVID and Clio serve annotations as loosely-schemed JSON records whose
//! field names vary by backend and by annotation kind. Decoding accepts
//! every known spelling; encoding writes the spelling of the selected
//! [`WireDialect`].
//!
//! DVID element:
//!
//! ```json
//! {"Pos": [10, 20, 30], "Kind": "Note", "Tags": ["user:alice"],
//!  "Prop": {"comment": "check", "type": "Merge", "body ID": "42"}, "Rels": []}
//! ```
//!
//! Clio record:
//!
//! ```json
//! {"pos": [10, 20, 30], "kind": "Atlas", "title": "soma", "description": "...",
//!  "user": "alice", "tags": [], "prop": {"certainty": "high"}}
//! ```

use serde_json::{json, Map, Value};

use crate::annotation::{
    compose_description, Annotation, Geometry, KIND_NOTE, PROP_BODY_ID, PROP_COMMENT,
    PROP_DESCRIPTION, PROP_RELS, PROP_TITLE, PROP_TYPE, PROP_USER,
};
use crate::error::{CoreError, CoreResult};
use crate::id::parse_id;

/// Field spellings accepted for the position.
const POSITION_FIELDS: &[&str] = &["Pos", "pos", "location", "Pod"];
/// Field spellings accepted for the kind.
const KIND_FIELDS: &[&str] = &["Kind", "kind"];
/// Field spellings accepted for the property bag.
const PROP_FIELDS: &[&str] = &["Prop", "prop", "properties"];
/// Field spellings accepted for the tag list.
const TAG_FIELDS: &[&str] = &["Tags", "tags"];

/// Clio geometry words that may appear in the `kind` field.
const GEOMETRY_POINT: &str = "point";
const GEOMETRY_LINE: &str = "lineseg";

/// Bookmark property names as stored on the wire.
const WIRE_BODY_ID: &str = "body ID";
const WIRE_CHECKED: &str = "checked";

/// Tag prefix used by DVID to record the authoring user.
const USER_TAG_PREFIX: &str = "user:";

/// Bookmark type vocabulary: (wire, store).
const TYPE_VOCABULARY: &[(&str, &str)] = &[("Merge", "False Merge"), ("Split", "False Split")];

// ---------------------------------------------------------------------------
// Dialect
// ---------------------------------------------------------------------------

/// Field naming used when writing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDialect {
    /// Capitalized element fields (`Pos`, `Kind`, `Tags`, `Prop`, `Rels`).
    Dvid,
    /// Lower-case record fields with top-level `title`/`description`/`user`.
    Clio,
}

// ---------------------------------------------------------------------------
// Bookmark type vocabulary
// ---------------------------------------------------------------------------

/// Translate a wire bookmark type (`"Merge"`) to its stored form
/// (`"False Merge"`). Other values pass through unchanged.
pub fn store_type(wire: &str) -> String {
    TYPE_VOCABULARY
        .iter()
        .find(|(w, _)| *w == wire)
        .map(|(_, s)| (*s).to_string())
        .unwrap_or_else(|| wire.to_string())
}

/// Translate a stored bookmark type (`"False Split"`) to its wire form
/// (`"Split"`). Other values pass through unchanged.
pub fn wire_type(store: &str) -> String {
    TYPE_VOCABULARY
        .iter()
        .find(|(_, s)| *s == store)
        .map(|(w, _)| (*w).to_string())
        .unwrap_or_else(|| store.to_string())
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// A successfully decoded record together with the raw payload it came
/// from.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub annotation: Annotation,
    pub raw: Value,
}

/// Decode one server record.
///
/// `key` is the object key the record was served under, if any. When it
/// matches an id grammar it supplies the geometry and becomes the
/// annotation id. `default_kind` is used when the record carries no kind.
///
/// Returns `Ok(None)` for falsy records (`null`, `false`, `""`), which
/// callers treat as "not found".
pub fn parse_record(
    key: Option<&str>,
    record: &Value,
    default_kind: &str,
) -> CoreResult<Option<Annotation>> {
    if is_falsy(record) {
        return Ok(None);
    }
    let obj = record.as_object().ok_or_else(|| {
        CoreError::MalformedRecord(format!("record for {key:?} is not a JSON object"))
    })?;

    let (kind, geometry_hint) = resolve_kind(obj, default_kind);
    let geometry = resolve_geometry(key, obj, geometry_hint)?;

    let mut annotation = Annotation {
        id: key.filter(|k| !k.is_empty()).map(str::to_string),
        geometry,
        kind,
        properties: Map::new(),
        description: None,
        tags: read_tags(obj),
        render_attribute: 0,
    };

    let props = read_props(obj)?;
    if annotation.kind == KIND_NOTE {
        apply_bookmark_props(&mut annotation, props);
    } else {
        annotation.properties = props;
    }
    lift_convenience_fields(&mut annotation, obj);

    if let Some(rels) = obj.get("Rels").filter(|r| r.as_array().is_some_and(|a| !a.is_empty())) {
        annotation.properties.insert(PROP_RELS.to_string(), rels.clone());
    }

    Ok(Some(annotation))
}

/// Decode a bulk payload: a keyed object (`{key: record}`) or an array of
/// records.
///
/// Records that fail to decode are logged and skipped; one bad record
/// never aborts the batch.
pub fn decode_bulk(payload: &Value, default_kind: &str) -> Vec<DecodedRecord> {
    let entries: Vec<(Option<&str>, &Value)> = match payload {
        Value::Object(map) => map.iter().map(|(k, v)| (Some(k.as_str()), v)).collect(),
        Value::Array(items) => items.iter().map(|v| (None, v)).collect(),
        Value::Null => Vec::new(),
        other => {
            tracing::warn!(payload = %other, "Unexpected bulk annotation payload shape");
            Vec::new()
        }
    };

    entries
        .into_iter()
        .filter_map(|(key, record)| match parse_record(key, record, default_kind) {
            Ok(Some(annotation)) => Some(DecodedRecord {
                annotation,
                raw: record.clone(),
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = ?key, error = %e, "Skipping malformed annotation record");
                None
            }
        })
        .collect()
}

/// Decode a per-id response: a record, or an array whose first element is
/// the record. Empty and null payloads yield `Ok(None)`.
pub fn decode_single(
    key: &str,
    payload: &Value,
    default_kind: &str,
) -> CoreResult<Option<DecodedRecord>> {
    let record = match payload {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return Ok(None),
        },
        other => other,
    };
    Ok(parse_record(Some(key), record, default_kind)?.map(|annotation| DecodedRecord {
        annotation,
        raw: record.clone(),
    }))
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn first_field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name))
}

/// Kind from the record, and the Clio geometry word if one was used in
/// place of a kind.
fn resolve_kind(obj: &Map<String, Value>, default_kind: &str) -> (String, Option<&'static str>) {
    match first_field(obj, KIND_FIELDS).and_then(Value::as_str) {
        Some(GEOMETRY_POINT) => (default_kind.to_string(), Some(GEOMETRY_POINT)),
        Some(GEOMETRY_LINE) => (default_kind.to_string(), Some(GEOMETRY_LINE)),
        Some(kind) if !kind.is_empty() => (kind.to_string(), None),
        _ => (default_kind.to_string(), None),
    }
}

fn resolve_geometry(
    key: Option<&str>,
    obj: &Map<String, Value>,
    hint: Option<&str>,
) -> CoreResult<Geometry> {
    if let Some(geometry) = key.and_then(parse_id).and_then(|p| p.geometry()) {
        return Ok(geometry);
    }

    let raw = first_field(obj, POSITION_FIELDS).ok_or_else(|| {
        CoreError::MalformedRecord(format!("record for {key:?} has no position"))
    })?;
    let coords = read_coordinates(raw).ok_or_else(|| {
        CoreError::MalformedRecord(format!("record for {key:?} has unparsable position {raw}"))
    })?;
    let geometry = Geometry::from_coordinates(&coords).ok_or_else(|| {
        CoreError::MalformedRecord(format!(
            "record for {key:?} has {} coordinates, expected 3 or 6",
            coords.len()
        ))
    })?;

    match (hint, &geometry) {
        (Some(GEOMETRY_LINE), Geometry::Point { .. }) | (Some(GEOMETRY_POINT), Geometry::Line { .. }) => {
            Err(CoreError::MalformedRecord(format!(
                "record for {key:?} declares {} but has {} coordinates",
                hint.unwrap_or_default(),
                coords.len()
            )))
        }
        _ => Ok(geometry),
    }
}

/// Coordinates from a JSON array of numbers or numeric strings.
fn read_coordinates(value: &Value) -> Option<Vec<f64>> {
    value
        .as_array()?
        .iter()
        .map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect()
}

fn read_tags(obj: &Map<String, Value>) -> Vec<String> {
    first_field(obj, TAG_FIELDS)
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn read_props(obj: &Map<String, Value>) -> CoreResult<Map<String, Value>> {
    match first_field(obj, PROP_FIELDS) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(props)) => Ok(props.clone()),
        Some(other) => Err(CoreError::MalformedRecord(format!(
            "property bag is not an object: {other}"
        ))),
    }
}

/// Map bookmark wire properties onto the internal property bag.
fn apply_bookmark_props(annotation: &mut Annotation, props: Map<String, Value>) {
    for (key, value) in props {
        match key.as_str() {
            PROP_TYPE => {
                let value = match value.as_str() {
                    Some(s) => Value::String(store_type(s)),
                    None => value,
                };
                annotation.properties.insert(PROP_TYPE.to_string(), value);
            }
            WIRE_BODY_ID => {
                annotation.properties.insert(PROP_BODY_ID.to_string(), value);
            }
            WIRE_CHECKED => {
                let checked = matches!(&value, Value::Bool(true))
                    || value.as_str() == Some("1")
                    || value.as_u64() == Some(1);
                annotation.render_attribute = u32::from(checked);
            }
            _ => {
                annotation.properties.insert(key, value);
            }
        }
    }
    if annotation.description.is_none() {
        annotation.description = annotation.comment();
    }
}

/// Lift `title`, `user` and `description` into their dedicated places.
///
/// Top-level fields win over bag entries. A raw top-level description is
/// used verbatim; otherwise the description is composed from the title
/// and the bag's description.
fn lift_convenience_fields(annotation: &mut Annotation, obj: &Map<String, Value>) {
    for field in [PROP_TITLE, PROP_USER] {
        if let Some(value) = obj.get(field).and_then(Value::as_str) {
            annotation
                .properties
                .insert(field.to_string(), Value::String(value.to_string()));
        }
    }

    let bag_description = match annotation.properties.remove(PROP_DESCRIPTION) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };

    match obj.get(PROP_DESCRIPTION).and_then(Value::as_str) {
        Some(raw) => annotation.description = Some(raw.to_string()),
        None => {
            let title = annotation.title();
            let body = bag_description.or_else(|| annotation.description.take());
            annotation.description = if annotation.kind == KIND_NOTE {
                body
            } else {
                compose_description(title.as_deref(), body.as_deref())
            };
        }
    }

    // Clio carries a note's comment only as its top-level description.
    if annotation.kind == KIND_NOTE && !annotation.properties.contains_key(PROP_COMMENT) {
        if let Some(description) = annotation.description.clone().filter(|d| !d.is_empty()) {
            annotation
                .properties
                .insert(PROP_COMMENT.to_string(), Value::String(description));
        }
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode an annotation as a server record.
///
/// `user`, when given, is stamped onto the record: as a `user:<name>` tag
/// and `Prop.user` for DVID, as the top-level `user` field for Clio.
pub fn to_wire(annotation: &Annotation, user: Option<&str>, dialect: WireDialect) -> Value {
    let pos: Vec<i64> = annotation.geometry.rounded();
    let user = user
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .or_else(|| annotation.user());

    match dialect {
        WireDialect::Dvid => encode_dvid(annotation, pos, user),
        WireDialect::Clio => encode_clio(annotation, pos, user),
    }
}

fn encode_dvid(annotation: &Annotation, pos: Vec<i64>, user: Option<String>) -> Value {
    let mut prop = Map::new();
    let mut rels = Value::Array(Vec::new());

    for (key, value) in &annotation.properties {
        match key.as_str() {
            PROP_RELS => rels = value.clone(),
            _ => {
                let (key, value) = bookmark_wire_entry(annotation, key, value);
                prop.insert(key, Value::String(stringify(&value)));
            }
        }
    }

    if let Some(description) = description_body(annotation) {
        let field = if annotation.kind == KIND_NOTE {
            PROP_COMMENT
        } else {
            PROP_DESCRIPTION
        };
        prop.entry(field.to_string())
            .or_insert_with(|| Value::String(description));
    }
    if annotation.kind == KIND_NOTE && annotation.render_attribute == 1 {
        prop.insert(WIRE_CHECKED.to_string(), Value::String("1".to_string()));
    }

    let mut tags = annotation.tags.clone();
    if let Some(user) = &user {
        prop.insert(PROP_USER.to_string(), Value::String(user.clone()));
        let tag = format!("{USER_TAG_PREFIX}{user}");
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    json!({
        "Pos": pos,
        "Kind": annotation.kind,
        "Tags": tags,
        "Prop": prop,
        "Rels": rels,
    })
}

fn encode_clio(annotation: &Annotation, pos: Vec<i64>, user: Option<String>) -> Value {
    let mut prop = Map::new();
    for (key, value) in &annotation.properties {
        match key.as_str() {
            PROP_COMMENT | PROP_USER | PROP_TITLE | PROP_DESCRIPTION | PROP_RELS => {}
            _ => {
                let (key, value) = bookmark_wire_entry(annotation, key, value);
                prop.insert(key, value);
            }
        }
    }
    if annotation.kind == KIND_NOTE && annotation.render_attribute == 1 {
        prop.insert(WIRE_CHECKED.to_string(), Value::String("1".to_string()));
    }

    let mut record = Map::new();
    record.insert("pos".to_string(), json!(pos));
    record.insert("kind".to_string(), Value::String(annotation.kind.clone()));
    let description = annotation
        .description
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| annotation.comment());
    if let Some(description) = description {
        record.insert(PROP_DESCRIPTION.to_string(), Value::String(description));
    }
    if let Some(title) = annotation.title() {
        record.insert(PROP_TITLE.to_string(), Value::String(title));
    }
    if let Some(user) = user {
        record.insert(PROP_USER.to_string(), Value::String(user));
    }
    record.insert("tags".to_string(), json!(annotation.tags));
    record.insert("prop".to_string(), Value::Object(prop));
    Value::Object(record)
}

/// The description as DVID stores it.
///
/// Decoding composes `"{title}: {body}"` for titled non-note records, so
/// only the body goes back on the wire.
fn description_body(annotation: &Annotation) -> Option<String> {
    let description = annotation.description.as_deref().filter(|d| !d.is_empty())?;
    if annotation.kind == KIND_NOTE {
        return Some(description.to_string());
    }
    match annotation.title() {
        Some(title) if description == title => None,
        Some(title) => {
            let body = description
                .strip_prefix(title.as_str())
                .and_then(|rest| rest.strip_prefix(": "))
                .unwrap_or(description);
            Some(body.to_string())
        }
        None => Some(description.to_string()),
    }
}

/// Rename a property to its wire spelling, translating the bookmark type
/// vocabulary for notes.
fn bookmark_wire_entry(annotation: &Annotation, key: &str, value: &Value) -> (String, Value) {
    if annotation.kind != KIND_NOTE {
        return (key.to_string(), value.clone());
    }
    match (key, value) {
        (PROP_TYPE, Value::String(s)) => (PROP_TYPE.to_string(), Value::String(wire_type(s))),
        (PROP_BODY_ID, v) => (WIRE_BODY_ID.to_string(), v.clone()),
        (k, v) => (k.to_string(), v.clone()),
    }
}

/// DVID property values are strings.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
