//! Retry-classification tests for the credentialed fetch protocol.
//!
//! Uses a scripted transport that replays a fixed sequence of responses
//! and records every request it receives.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use annolink_fetch::{
    fetch_plain, fetch_with_credentials, response_json, response_text, AuthServerProvider,
    CredentialProvider, Credentials, FetchConfig, FetchError, HttpRequest, HttpResponse,
    HttpTransport, NoCredentialsProvider, StaticTokenProvider,
};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn authorization(&self, index: usize) -> Option<String> {
        self.requests.lock().unwrap()[index]
            .header("Authorization")
            .map(str::to_string)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        self.requests.lock().unwrap().push(request);
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| HttpResponse::new(599, "script exhausted")))
    }
}

/// Hands out `token-<generation>`, bumping the generation on refresh.
#[derive(Default)]
struct CountingProvider {
    generation: AtomicU64,
    refreshes: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn get(
        &self,
        invalid: Option<&Credentials>,
        _cancel: &CancellationToken,
    ) -> Result<Credentials, FetchError> {
        if invalid.is_some() {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        let generation = self.generation.load(Ordering::SeqCst);
        Ok(Credentials {
            token: Some(format!("token-{generation}")),
            generation,
        })
    }
}

fn ok_json(body: &str) -> HttpResponse {
    HttpResponse::new(200, body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// A 401 triggers exactly one refresh-and-retry cycle, and the retry
/// carries the fresh token.
#[tokio::test]
async fn unauthorized_refreshes_once_then_succeeds() {
    let transport = ScriptedTransport::new(vec![HttpResponse::new(401, ""), ok_json("[1]")]);
    let provider = CountingProvider::default();

    let value: serde_json::Value = fetch_with_credentials(
        &provider,
        &transport,
        HttpRequest::get("http://dvid/api"),
        response_json,
        &FetchConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(value, serde_json::json!([1]));
    assert_eq!(transport.calls(), 2);
    assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(transport.authorization(0).as_deref(), Some("Bearer token-0"));
    assert_eq!(transport.authorization(1).as_deref(), Some("Bearer token-1"));
}

/// Persistent auth failure does not loop: the second failure propagates.
#[tokio::test]
async fn persistent_forbidden_propagates_after_one_refresh() {
    let transport = ScriptedTransport::new(vec![
        HttpResponse::new(403, ""),
        HttpResponse::new(403, "denied"),
        ok_json("{}"),
    ]);
    let provider = CountingProvider::default();

    let result = fetch_with_credentials(
        &provider,
        &transport,
        HttpRequest::get("http://dvid/api"),
        response_text,
        &FetchConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_matches!(result, Err(FetchError::Http { status: 403, .. }));
    assert_eq!(transport.calls(), 2);
    assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
}

/// A 504 is retried without touching the credentials.
#[tokio::test(start_paused = true)]
async fn gateway_timeout_retries_without_refresh() {
    let transport = ScriptedTransport::new(vec![HttpResponse::new(504, ""), ok_json("\"ok\"")]);
    let provider = CountingProvider::default();

    let value: String = fetch_with_credentials(
        &provider,
        &transport,
        HttpRequest::get("http://dvid/api"),
        response_json,
        &FetchConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(value, "ok");
    assert_eq!(transport.calls(), 2);
    assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(transport.authorization(1).as_deref(), Some("Bearer token-0"));
}

/// Gateway retries are bounded by the configured ceiling.
#[tokio::test(start_paused = true)]
async fn gateway_retries_are_bounded() {
    let transport = ScriptedTransport::new(vec![HttpResponse::new(504, ""); 10]);
    let config = FetchConfig {
        max_gateway_retries: 3,
        ..Default::default()
    };

    let result = fetch_plain(
        &transport,
        HttpRequest::get("http://clio/api"),
        response_text,
        &config,
        &CancellationToken::new(),
    )
    .await;

    assert_matches!(result, Err(FetchError::Http { status: 504, .. }));
    assert_eq!(transport.calls(), 4);
}

/// A 500 fails immediately with no retry.
#[tokio::test]
async fn server_error_fails_immediately() {
    let transport = ScriptedTransport::new(vec![HttpResponse::new(500, "boom"), ok_json("{}")]);
    let provider = CountingProvider::default();

    let result = fetch_with_credentials(
        &provider,
        &transport,
        HttpRequest::get("http://dvid/api"),
        response_text,
        &FetchConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    match result {
        Err(FetchError::Http { status, body, url }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
            assert_eq!(url, "http://dvid/api");
        }
        other => panic!("Expected Http error, got {other:?}"),
    }
    assert_eq!(transport.calls(), 1);
    assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
}

/// A provider with no token fails before any request is sent.
#[tokio::test]
async fn missing_token_fails_without_network() {
    let transport = ScriptedTransport::new(vec![ok_json("{}")]);

    let result = fetch_with_credentials(
        &NoCredentialsProvider,
        &transport,
        HttpRequest::get("http://dvid/api"),
        response_text,
        &FetchConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_matches!(result, Err(FetchError::NoCredentials));
    assert_eq!(transport.calls(), 0);
}

/// Without credentials an auth failure is terminal.
#[tokio::test]
async fn plain_fetch_does_not_refresh() {
    let transport = ScriptedTransport::new(vec![HttpResponse::new(401, ""), ok_json("{}")]);

    let result = fetch_plain(
        &transport,
        HttpRequest::get("http://dvid/api"),
        response_text,
        &FetchConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_matches!(result, Err(FetchError::Http { status: 401, .. }));
    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.authorization(0), None);
}

/// Cancelling before the call issues nothing.
#[tokio::test]
async fn cancelled_token_short_circuits() {
    let transport = ScriptedTransport::new(vec![ok_json("{}")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = fetch_with_credentials(
        &StaticTokenProvider::new("t"),
        &transport,
        HttpRequest::get("http://dvid/api"),
        response_text,
        &FetchConfig::default(),
        &cancel,
    )
    .await;

    assert_matches!(result, Err(FetchError::Cancelled));
    assert_eq!(transport.calls(), 0);
}

/// Cancelling during a gateway backoff abandons the retry.
#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_abandons_retry() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        HttpResponse::new(504, ""),
        ok_json("{}"),
    ]));
    let cancel = CancellationToken::new();
    let config = FetchConfig {
        initial_retry_delay: std::time::Duration::from_secs(60),
        ..Default::default()
    };

    let task = {
        let transport = Arc::clone(&transport);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            fetch_plain(
                transport.as_ref(),
                HttpRequest::get("http://dvid/api"),
                response_text,
                &config,
                &cancel,
            )
            .await
        })
    };

    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    cancel.cancel();

    let result = task.await.unwrap();
    assert_matches!(result, Err(FetchError::Cancelled));
    assert_eq!(transport.calls(), 1);
}

/// The auth-server provider caches its token and bumps the generation
/// only when the current generation is reported invalid.
#[tokio::test]
async fn auth_server_provider_refreshes_on_current_generation_only() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        HttpResponse::new(200, "first"),
        HttpResponse::new(200, r#"{"token":"second"}"#),
    ]));
    let provider = AuthServerProvider::new(transport.clone(), "http://auth/token");
    let cancel = CancellationToken::new();

    let first = provider.get(None, &cancel).await.unwrap();
    assert_eq!(first.token.as_deref(), Some("first"));
    assert_eq!(first.generation, 1);

    let cached = provider.get(None, &cancel).await.unwrap();
    assert_eq!(cached, first);
    assert_eq!(transport.calls(), 1);

    let second = provider.get(Some(&first), &cancel).await.unwrap();
    assert_eq!(second.token.as_deref(), Some("second"));
    assert_eq!(second.generation, 2);

    // A complaint about an older generation does not refetch.
    let again = provider.get(Some(&first), &cancel).await.unwrap();
    assert_eq!(again, second);
    assert_eq!(transport.calls(), 2);
}

/// Auth-server failures surface as credential errors.
#[tokio::test]
async fn auth_server_failure_is_credentials_error() {
    let transport = Arc::new(ScriptedTransport::new(vec![HttpResponse::new(500, "")]));
    let provider = AuthServerProvider::new(transport, "http://auth/token");

    let result = provider.get(None, &CancellationToken::new()).await;
    assert_matches!(result, Err(FetchError::Credentials(_)));
}
