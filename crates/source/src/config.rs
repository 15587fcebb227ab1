//! Source configuration and locator parsing.
//!
//! A source is described by a locator string:
//!
//! | Locator                                                    | Backend |
//! |------------------------------------------------------------|---------|
//! | `dvid://https://host:8000/<node>/<instance>[?params]`      | DVID    |
//! | `clio://https://clio-store.example/<dataset>[?params]`     | Clio    |
//!
//! | Param    | Meaning                                              |
//! |----------|------------------------------------------------------|
//! | `user`   | user identity stamped on writes; enables uploads     |
//! | `tag`    | bulk downloads use the tag/user endpoint             |
//! | `auth`   | auth server URL handing out bearer tokens            |
//! | `notify` | `1`/`true` to emit change notifications              |
//! | `kind`   | default kind for records that carry none             |
//! | `api`    | Clio API version, `v1` or `v2` (default `v2`)        |
//! | `title`  | `required` to refuse uploads without a title         |

use std::collections::HashMap;

use annolink_core::{IdScheme, WireDialect};
use url::Url;

pub use crate::clio::{ClioApiVersion, ClioParameters};
pub use crate::dvid::DvidParameters;
use crate::error::{SourceError, SourceResult};

/// Kind assumed for records that carry none.
pub const DEFAULT_KIND: &str = "Note";

/// Which remote service backs a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Dvid(DvidParameters),
    Clio(ClioParameters),
}

/// How bulk downloads select annotations. The two modes are mutually
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BulkMode {
    /// Download by spatial range (the chunk bounds).
    #[default]
    Spatial,
    /// Download everything carrying this tag or user label.
    Tagged(String),
}

/// Voxel-space bounds of the chunk being downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub offset: [i64; 3],
    pub size: [i64; 3],
}

impl ChunkBounds {
    pub fn new(offset: [i64; 3], size: [i64; 3]) -> Self {
        Self { offset, size }
    }
}

/// Everything needed to construct an
/// [`AnnotationSource`](crate::AnnotationSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceParameters {
    pub backend: Backend,
    pub user: Option<String>,
    pub bulk_mode: BulkMode,
    pub default_kind: String,
    /// Uploads additionally require a non-empty title.
    pub require_title: bool,
    pub auth_server: Option<String>,
    /// Emit [`AnnotationChange`](crate::AnnotationChange) notifications.
    pub notify: bool,
}

impl SourceParameters {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            user: None,
            bulk_mode: BulkMode::default(),
            default_kind: DEFAULT_KIND.to_string(),
            require_title: false,
            auth_server: None,
            notify: false,
        }
    }

    pub fn dvid(
        base_url: impl Into<String>,
        node: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self::new(Backend::Dvid(DvidParameters {
            base_url: base_url.into(),
            node: node.into(),
            instance: instance.into(),
        }))
    }

    pub fn clio(base_url: impl Into<String>, dataset: impl Into<String>, api: ClioApiVersion) -> Self {
        Self::new(Backend::Clio(ClioParameters {
            base_url: base_url.into(),
            dataset: dataset.into(),
            api,
        }))
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_bulk_mode(mut self, mode: BulkMode) -> Self {
        self.bulk_mode = mode;
        self
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    pub fn with_require_title(mut self, require: bool) -> Self {
        self.require_title = require;
        self
    }

    /// Configured user, ignoring empty strings.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref().filter(|u| !u.is_empty())
    }

    /// Scheme used when deriving ids for new annotations.
    pub fn id_scheme(&self) -> IdScheme {
        match &self.backend {
            Backend::Dvid(_) => IdScheme::Plain,
            Backend::Clio(clio) => clio.api.id_scheme(),
        }
    }

    /// Record format written by this source.
    pub fn dialect(&self) -> WireDialect {
        match &self.backend {
            Backend::Dvid(_) => WireDialect::Dvid,
            Backend::Clio(_) => WireDialect::Clio,
        }
    }

    /// Parse a `dvid://` or `clio://` locator.
    pub fn from_locator(locator: &str) -> SourceResult<Self> {
        let (scheme, rest) = locator
            .split_once("://")
            .ok_or_else(|| SourceError::InvalidLocator(format!("missing scheme in {locator}")))?;
        let url = Url::parse(rest)
            .map_err(|e| SourceError::InvalidLocator(format!("{rest}: {e}")))?;

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let mut segments: Vec<String> = url
            .path_segments()
            .map(|parts| {
                parts
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut parameters = match scheme {
            "dvid" => {
                if segments.len() < 2 {
                    return Err(SourceError::InvalidLocator(format!(
                        "DVID locator needs <node>/<instance>: {locator}"
                    )));
                }
                let instance = segments.pop().unwrap_or_default();
                let node = segments.pop().unwrap_or_default();
                Self::dvid(base_url(&url, &segments), node, instance)
            }
            "clio" => {
                let dataset = segments.pop().ok_or_else(|| {
                    SourceError::InvalidLocator(format!("Clio locator needs <dataset>: {locator}"))
                })?;
                let api = match query.get("api").map(String::as_str) {
                    None | Some("v2") => ClioApiVersion::V2,
                    Some("v1") => ClioApiVersion::V1,
                    Some(other) => {
                        return Err(SourceError::InvalidLocator(format!(
                            "unknown Clio api version {other}"
                        )))
                    }
                };
                Self::clio(base_url(&url, &segments), dataset, api)
            }
            other => {
                return Err(SourceError::InvalidLocator(format!(
                    "unsupported scheme {other}"
                )))
            }
        };

        parameters.user = query.get("user").filter(|u| !u.is_empty()).cloned();
        if let Some(tag) = query.get("tag").filter(|t| !t.is_empty()) {
            parameters.bulk_mode = BulkMode::Tagged(tag.clone());
        }
        if let Some(kind) = query.get("kind").filter(|k| !k.is_empty()) {
            parameters.default_kind = kind.clone();
        }
        parameters.auth_server = query.get("auth").filter(|a| !a.is_empty()).cloned();
        parameters.notify = query
            .get("notify")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        parameters.require_title = query.get("title").is_some_and(|v| v == "required");

        Ok(parameters)
    }
}

/// Scheme, authority and leading path segments of `url`, without a
/// trailing slash.
fn base_url(url: &Url, prefix: &[String]) -> String {
    let mut base = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        base.push_str(&format!(":{port}"));
    }
    for segment in prefix {
        base.push('/');
        base.push_str(segment);
    }
    base
}

/// Join `base` with percent-encoded path segments and query pairs.
pub(crate) fn endpoint(base: &str, segments: &[&str], query: &[(&str, &str)]) -> SourceResult<String> {
    let mut url = Url::parse(base)
        .map_err(|e| SourceError::InvalidLocator(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| SourceError::InvalidLocator(format!("{base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url.into())
}
