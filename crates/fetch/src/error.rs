//! Errors from the credentialed fetch layer.

/// Errors that can occur while performing a credentialed request.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The credential provider produced no token.
    #[error("No credentials available")]
    NoCredentials,

    /// The credential provider itself failed (e.g. auth server down).
    #[error("Credential provider failed: {0}")]
    Credentials(String),

    /// The server returned a non-2xx status code that was not retried,
    /// or whose retries were exhausted.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        url: String,
        /// Raw response body for debugging.
        body: String,
    },

    /// The request could not be sent (network, DNS, TLS, timeout, ...).
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The response body could not be decoded into the expected type.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The cancellation token fired before the request completed.
    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// HTTP status code, for [`FetchError::Http`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
