//! DVID annotation endpoints.
//!
//! All paths hang off `{base}/api/node/{node}/{instance}`. DVID keys its
//! elements by position, so per-id reads and deletes address the element
//! by its `x_y_z` key. DVID stores points only.

use annolink_core::{IdClass, ParsedId};

use crate::config::{endpoint, ChunkBounds};
use crate::error::{SourceError, SourceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DvidParameters {
    pub base_url: String,
    pub node: String,
    pub instance: String,
}

impl DvidParameters {
    fn url(&self, tail: &[&str], query: &[(&str, &str)]) -> SourceResult<String> {
        let mut segments = vec!["api", "node", self.node.as_str(), self.instance.as_str()];
        segments.extend_from_slice(tail);
        endpoint(&self.base_url, &segments, query)
    }

    /// `GET …/elements/{sx}_{sy}_{sz}/{ox}_{oy}_{oz}`
    pub fn range_url(&self, bounds: &ChunkBounds) -> SourceResult<String> {
        let size = join(&bounds.size);
        let offset = join(&bounds.offset);
        self.url(&["elements", &size, &offset], &[])
    }

    /// `GET …/tag/{tag}`
    pub fn tag_url(&self, tag: &str) -> SourceResult<String> {
        self.url(&["tag", tag], &[])
    }

    /// `GET …/elements/1_1_1/{x}_{y}_{z}`
    pub fn element_url(&self, id: &ParsedId) -> SourceResult<String> {
        let key = point_key(id)?;
        self.url(&["elements", "1_1_1", &key], &[])
    }

    /// `POST …/elements`
    pub fn write_url(&self, user: Option<&str>) -> SourceResult<String> {
        self.url(&["elements"], &user_query(user))
    }

    /// `DELETE …/element/{x}_{y}_{z}`
    pub fn delete_url(&self, id: &ParsedId, user: Option<&str>) -> SourceResult<String> {
        let key = point_key(id)?;
        self.url(&["element", &key], &user_query(user))
    }
}

fn point_key(id: &ParsedId) -> SourceResult<String> {
    match id.class {
        IdClass::Point => Ok(id.position_key()),
        _ => Err(SourceError::Unsupported(
            "DVID annotation instances store points only".to_string(),
        )),
    }
}

fn user_query(user: Option<&str>) -> Vec<(&str, &str)> {
    user.map(|u| vec![("u", u)]).unwrap_or_default()
}

fn join(values: &[i64; 3]) -> String {
    format!("{}_{}_{}", values[0], values[1], values[2])
}
