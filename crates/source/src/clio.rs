//! Clio annotation endpoints.
//!
//! Everything lives under `{base}/{api}/annotations/{dataset}`; single
//! annotations are selected with an `id` query parameter.

use annolink_core::IdScheme;

use crate::config::endpoint;
use crate::error::SourceResult;

/// Clio store API version. v1 uses the plain id scheme, v2 the prefixed
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClioApiVersion {
    V1,
    #[default]
    V2,
}

impl ClioApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }

    pub fn id_scheme(&self) -> IdScheme {
        match self {
            Self::V1 => IdScheme::Plain,
            Self::V2 => IdScheme::Prefixed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClioParameters {
    pub base_url: String,
    pub dataset: String,
    pub api: ClioApiVersion,
}

impl ClioParameters {
    fn url(&self, query: &[(&str, &str)]) -> SourceResult<String> {
        endpoint(
            &self.base_url,
            &[self.api.as_str(), "annotations", &self.dataset],
            query,
        )
    }

    /// Bulk download. In tag mode only annotations by `tag` are returned.
    pub fn bulk_url(&self, tag: Option<&str>) -> SourceResult<String> {
        match tag {
            Some(tag) => self.url(&[("user", tag)]),
            None => self.url(&[]),
        }
    }

    pub fn element_url(&self, id: &str) -> SourceResult<String> {
        self.url(&[("id", id)])
    }

    pub fn write_url(&self, user: Option<&str>) -> SourceResult<String> {
        let mut query = Vec::new();
        if let Some(user) = user {
            query.push(("user", user));
        }
        self.url(&query)
    }

    pub fn delete_url(&self, id: &str, user: Option<&str>) -> SourceResult<String> {
        let mut query = vec![("id", id)];
        if let Some(user) = user {
            query.push(("user", user));
        }
        self.url(&query)
    }
}
