//! Credentialed HTTP fetch for annotation backends.
//!
//! Wraps HTTP calls with a pluggable bearer-credential provider and
//! transparently retries on authentication failure (credential refresh)
//! and gateway timeout (bounded backoff). Every call honors a
//! [`CancellationToken`](tokio_util::sync::CancellationToken).

pub mod credentials;
pub mod error;
pub mod fetch;
pub mod transport;

pub use credentials::{
    AuthServerProvider, CredentialProvider, Credentials, NoCredentialsProvider,
    StaticTokenProvider,
};
pub use error::FetchError;
pub use fetch::{
    classify_status, fetch_plain, fetch_with_credentials, response_bytes, response_json,
    response_text, FetchConfig, RetryClass,
};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
