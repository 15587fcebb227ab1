//! Credentialed fetch with retry classification.
//!
//! Status handling:
//!
//! | Status      | Class     | Action                                        |
//! |-------------|-----------|-----------------------------------------------|
//! | 2xx         | `Success` | apply the response transform                  |
//! | 401, 403    | `Refresh` | refresh credentials, retry once               |
//! | 504         | `Retry`   | back off, retry up to `max_gateway_retries`   |
//! | anything    | `Fail`    | return [`FetchError::Http`]                   |

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::credentials::{CredentialProvider, Credentials};
use crate::error::FetchError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Maximum number of response-body bytes kept in an error message.
const ERROR_BODY_LIMIT: usize = 512;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable retry and timeout parameters.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Retries allowed after a 504 before the failure propagates.
    pub max_gateway_retries: u32,
    /// Delay before the first gateway retry.
    pub initial_retry_delay: Duration,
    /// Upper bound on the delay between gateway retries.
    pub max_retry_delay: Duration,
    /// Factor by which the delay grows after each gateway retry.
    pub multiplier: f64,
    /// Per-request timeout applied by the transport.
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_gateway_retries: 2,
            initial_retry_delay: Duration::from_millis(250),
            max_retry_delay: Duration::from_secs(2),
            multiplier: 2.0,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Calculate the next backoff delay, clamped to
/// [`FetchConfig::max_retry_delay`].
pub fn next_delay(current: Duration, config: &FetchConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_retry_delay)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What to do with a response, by status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Success,
    /// Authentication failed: refresh credentials and retry.
    Refresh,
    /// Gateway timeout: retry as-is.
    Retry,
    /// Terminal failure.
    Fail,
}

pub fn classify_status(status: u16) -> RetryClass {
    match status {
        200..=299 => RetryClass::Success,
        401 | 403 => RetryClass::Refresh,
        504 => RetryClass::Retry,
        _ => RetryClass::Fail,
    }
}

// ---------------------------------------------------------------------------
// Response transforms
// ---------------------------------------------------------------------------

/// Decode the body as JSON.
pub fn response_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, FetchError> {
    serde_json::from_slice(&response.body).map_err(|e| FetchError::Decode(e.to_string()))
}

/// Decode the body as UTF-8 text.
pub fn response_text(response: HttpResponse) -> Result<String, FetchError> {
    String::from_utf8(response.body).map_err(|e| FetchError::Decode(e.to_string()))
}

/// Return the raw body.
pub fn response_bytes(response: HttpResponse) -> Result<Vec<u8>, FetchError> {
    Ok(response.body)
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

/// Perform `request` with bearer credentials from `provider`.
///
/// A 401/403 refreshes the credentials and retries exactly once; a second
/// auth failure propagates. A 504 is retried with backoff up to
/// [`FetchConfig::max_gateway_retries`] times. Cancellation abandons the
/// in-flight request or retry wait and returns [`FetchError::Cancelled`].
pub async fn fetch_with_credentials<T, F>(
    provider: &dyn CredentialProvider,
    transport: &dyn HttpTransport,
    request: HttpRequest,
    transform: F,
    config: &FetchConfig,
    cancel: &CancellationToken,
) -> Result<T, FetchError>
where
    F: FnOnce(HttpResponse) -> Result<T, FetchError>,
{
    run(Some(provider), transport, request, transform, config, cancel).await
}

/// Perform `request` without credentials. Gateway timeouts are retried
/// as in [`fetch_with_credentials`]; auth failures are terminal.
pub async fn fetch_plain<T, F>(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    transform: F,
    config: &FetchConfig,
    cancel: &CancellationToken,
) -> Result<T, FetchError>
where
    F: FnOnce(HttpResponse) -> Result<T, FetchError>,
{
    run(None, transport, request, transform, config, cancel).await
}

async fn run<T, F>(
    provider: Option<&dyn CredentialProvider>,
    transport: &dyn HttpTransport,
    request: HttpRequest,
    transform: F,
    config: &FetchConfig,
    cancel: &CancellationToken,
) -> Result<T, FetchError>
where
    F: FnOnce(HttpResponse) -> Result<T, FetchError>,
{
    let mut credentials: Option<Credentials> = match provider {
        Some(p) => Some(p.get(None, cancel).await?),
        None => None,
    };
    let mut refreshed = false;
    let mut gateway_retries = 0u32;
    let mut delay = config.initial_retry_delay;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let attempt = match &credentials {
            Some(c) => {
                let token = c.token.as_deref().ok_or(FetchError::NoCredentials)?;
                request.with_bearer(token)
            }
            None => request.clone(),
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = transport.send(attempt) => result?,
        };

        match classify_status(response.status) {
            RetryClass::Success => return transform(response),
            RetryClass::Refresh if !refreshed => {
                if let (Some(p), Some(stale)) = (provider, credentials.as_ref()) {
                    refreshed = true;
                    tracing::warn!(
                        status = response.status,
                        url = %request.url,
                        generation = stale.generation,
                        "Authentication failed, refreshing credentials",
                    );
                    credentials = Some(p.get(Some(stale), cancel).await?);
                    continue;
                }
                return Err(http_error(&request.url, response));
            }
            RetryClass::Retry if gateway_retries < config.max_gateway_retries => {
                gateway_retries += 1;
                tracing::warn!(
                    status = response.status,
                    url = %request.url,
                    attempt = gateway_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Gateway timeout, retrying",
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = next_delay(delay, config);
            }
            _ => return Err(http_error(&request.url, response)),
        }
    }
}

fn http_error(url: &str, response: HttpResponse) -> FetchError {
    let mut body = response.text();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    FetchError::Http {
        status: response.status,
        url: url.to_string(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(classify_status(200), RetryClass::Success);
        assert_eq!(classify_status(204), RetryClass::Success);
        assert_eq!(classify_status(401), RetryClass::Refresh);
        assert_eq!(classify_status(403), RetryClass::Refresh);
        assert_eq!(classify_status(504), RetryClass::Retry);
        assert_eq!(classify_status(500), RetryClass::Fail);
        assert_eq!(classify_status(502), RetryClass::Fail);
        assert_eq!(classify_status(404), RetryClass::Fail);
    }

    #[test]
    fn next_delay_doubles_and_clamps() {
        let config = FetchConfig::default();
        assert_eq!(
            next_delay(Duration::from_millis(250), &config),
            Duration::from_millis(500)
        );
        assert_eq!(
            next_delay(Duration::from_millis(1500), &config),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn http_error_truncates_long_bodies() {
        let err = http_error("http://h", HttpResponse::new(500, "é".repeat(400)));
        match err {
            FetchError::Http { status, body, .. } => {
                assert_eq!(status, 500);
                assert!(body.len() <= ERROR_BODY_LIMIT);
            }
            other => panic!("Expected Http, got {other:?}"),
        }
    }

    #[test]
    fn transforms_decode_bodies() {
        let v: serde_json::Value = response_json(HttpResponse::new(200, "[1]")).unwrap();
        assert_eq!(v, serde_json::json!([1]));
        assert!(response_json::<serde_json::Value>(HttpResponse::new(200, "")).is_err());
        assert_eq!(
            response_text(HttpResponse::new(200, "hi")).unwrap(),
            "hi".to_string()
        );
        assert_eq!(response_bytes(HttpResponse::new(200, "x")).unwrap(), b"x");
    }
}
