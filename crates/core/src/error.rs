//! Error type shared by the annotation model, codec and wire layers.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A server record is missing a required field or carries an
    /// unparsable value. Isolated to that single record.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// An identifier does not match any known id grammar.
    #[error("Invalid annotation id: {0}")]
    InvalidId(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for fallible core operations.
pub type CoreResult<T> = Result<T, CoreError>;
