//! Change notifications emitted by an annotation source.
//!
//! Delivered on a [`tokio::sync::broadcast`] channel when the source is
//! configured to notify. Sending is fire-and-forget: a missing or lagging
//! receiver never blocks a download or write.

use annolink_core::Annotation;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub enum AnnotationChange {
    /// An annotation was decoded from a bulk download.
    Loaded {
        id: String,
        annotation: Annotation,
        /// Description as the viewer should display it.
        description: Option<String>,
    },

    /// An annotation was written to the server.
    Added { id: String },

    /// An annotation was rewritten, possibly under a new id.
    Updated { old_id: String, new_id: String },

    /// An annotation was deleted from the server.
    Deleted { id: String },
}
