//! DVID and Clio annotation sources.
//!
//! [`AnnotationSource`] is what the chunked geometry layer calls to
//! download and mutate annotations. It composes the credentialed fetch
//! protocol, the identity codec, the wire parser/encoder and a per-source
//! write-through [`AnnotationStore`](annolink_core::AnnotationStore).

pub mod clio;
pub mod config;
pub mod dvid;
pub mod error;
pub mod events;
pub mod source;

pub use config::{Backend, BulkMode, ChunkBounds, ClioApiVersion, SourceParameters};
pub use error::{SourceError, SourceResult};
pub use events::AnnotationChange;
pub use source::AnnotationSource;
