//! Errors surfaced by annotation sources.

use annolink_core::CoreError;
use annolink_fetch::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A codec or record-level error from `annolink_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A network error from the credentialed fetch layer.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A write was attempted without the required user identity (or
    /// title). No network call was made.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The source locator string could not be parsed.
    #[error("Invalid source locator: {0}")]
    InvalidLocator(String),

    /// The backend cannot perform the requested operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Convenience alias for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

impl SourceError {
    /// Whether the error came from a cancelled request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Cancelled))
    }
}
