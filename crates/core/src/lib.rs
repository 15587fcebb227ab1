//! Annotation model and codecs for DVID and Clio annotation backends.
//!
//! Provides the typed annotation representation, the string identity
//! codec, the server-record parser/encoder, the per-source write-through
//! annotation store, and the geometry batch serializer consumed by the
//! rendering layer. Nothing in this crate performs I/O.

pub mod annotation;
pub mod batch;
pub mod error;
pub mod id;
pub mod store;
pub mod wire;

pub use annotation::{Annotation, Geometry, Vec3};
pub use batch::AnnotationGeometryBatch;
pub use error::{CoreError, CoreResult};
pub use id::{IdClass, IdScheme, ParsedId};
pub use store::AnnotationStore;
pub use wire::WireDialect;
