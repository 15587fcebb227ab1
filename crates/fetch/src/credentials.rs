//! Credential providers.
//!
//! A provider hands out [`Credentials`] (an optional bearer token plus a
//! generation counter). Passing the credentials that just failed back to
//! [`CredentialProvider::get`] asks the provider to fetch fresh ones; the
//! generation lets it tell a stale complaint from a current one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::transport::{HttpRequest, HttpTransport};

/// A bearer token and the generation it was issued in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    /// Incremented each time the provider fetches a fresh token.
    pub generation: u64,
}

/// Source of bearer credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return current credentials.
    ///
    /// When `invalid` is the provider's current generation, the cached
    /// token is discarded and a fresh one fetched. Credentials from an
    /// older generation are ignored (someone already refreshed).
    async fn get(
        &self,
        invalid: Option<&Credentials>,
        cancel: &CancellationToken,
    ) -> Result<Credentials, FetchError>;
}

// ---------------------------------------------------------------------------
// Static token
// ---------------------------------------------------------------------------

/// A literal bearer token. Refreshing cannot produce a different token,
/// so the generation never changes.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn get(
        &self,
        _invalid: Option<&Credentials>,
        _cancel: &CancellationToken,
    ) -> Result<Credentials, FetchError> {
        Ok(Credentials {
            token: Some(self.token.clone()).filter(|t| !t.is_empty()),
            generation: 0,
        })
    }
}

/// Provider that never has a token.
#[derive(Debug, Clone, Default)]
pub struct NoCredentialsProvider;

#[async_trait]
impl CredentialProvider for NoCredentialsProvider {
    async fn get(
        &self,
        _invalid: Option<&Credentials>,
        _cancel: &CancellationToken,
    ) -> Result<Credentials, FetchError> {
        Ok(Credentials {
            token: None,
            generation: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Auth server
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TokenState {
    current: Option<Credentials>,
    generation: u64,
}

/// Fetches tokens from an auth server and caches them.
///
/// The token endpoint may answer with a raw token, a JSON string, or a
/// JSON object with a `token` field. Concurrent refreshes are coalesced:
/// the state lock is held across the fetch, so waiters see the new token.
pub struct AuthServerProvider {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    state: Mutex<TokenState>,
}

impl AuthServerProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, token_url: impl Into<String>) -> Self {
        Self {
            transport,
            token_url: token_url.into(),
            state: Mutex::new(TokenState::default()),
        }
    }

    async fn fetch_token(&self, cancel: &CancellationToken) -> Result<Option<String>, FetchError> {
        let request = HttpRequest::get(&self.token_url);
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = self.transport.send(request) => result,
        };
        let response = result.map_err(|e| FetchError::Credentials(e.to_string()))?;

        if !response.is_success() {
            return Err(FetchError::Credentials(format!(
                "auth server {} returned HTTP {}",
                self.token_url, response.status
            )));
        }
        Ok(parse_token(&response.text()))
    }
}

#[async_trait]
impl CredentialProvider for AuthServerProvider {
    async fn get(
        &self,
        invalid: Option<&Credentials>,
        cancel: &CancellationToken,
    ) -> Result<Credentials, FetchError> {
        let mut state = self.state.lock().await;

        if let Some(current) = &state.current {
            let stale = invalid.is_some_and(|bad| bad.generation == current.generation);
            if !stale {
                return Ok(current.clone());
            }
            tracing::info!(
                generation = current.generation,
                url = %self.token_url,
                "Refreshing credentials",
            );
        }

        let token = self.fetch_token(cancel).await?;
        state.generation += 1;
        let credentials = Credentials {
            token,
            generation: state.generation,
        };
        state.current = Some(credentials.clone());
        Ok(credentials)
    }
}

/// Extract a token from an auth server response body.
fn parse_token(body: &str) -> Option<String> {
    let trimmed = body.trim();
    let token = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(obj)) => obj
            .get("token")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_default(),
        _ => trimmed.to_string(),
    };
    Some(token).filter(|t| !t.is_empty())
}
