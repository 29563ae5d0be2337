use crate::auth::Credential;
use crate::config::RuntimeConfig;
use crate::error::ProxyError;
use crate::normalize::ChatRequest;
use axum::http::StatusCode;
use serde_json::value::RawValue;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Shared outbound client. Only the connect phase is bounded here; overall
/// deadlines are set per request because streams may run indefinitely.
pub fn build_client(config: &RuntimeConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(config.connect_timeout())
        .build()
}

fn chat_request(
    client: &reqwest::Client,
    config: &RuntimeConfig,
    req: &ChatRequest,
    credential: &Credential,
) -> reqwest::RequestBuilder {
    // `.json` also sets `Content-Type: application/json`.
    client
        .post(join_url(&config.upstream_base_url, CHAT_COMPLETIONS_PATH))
        .bearer_auth(credential.expose())
        .json(req)
}

/// Buffered dispatch: waits for the whole upstream body.
///
/// The body is only checked to be JSON; its text is kept as sent so key
/// order and number formatting reach the client untouched.
pub async fn call_chat_completions(
    client: &reqwest::Client,
    config: &RuntimeConfig,
    req: &ChatRequest,
    credential: &Credential,
) -> Result<Box<RawValue>, ProxyError> {
    let resp = chat_request(client, config, req, credential)
        .timeout(config.request_timeout())
        .send()
        .await
        .map_err(transport_error)?;
    let status = resp.status();
    let text = resp.text().await.map_err(transport_error)?;
    if status != StatusCode::OK {
        tracing::warn!(status = %status, "upstream rejected chat completion");
        metrics::counter!("chatrelay_upstream_failures_total", "kind" => "http").increment(1);
        return Err(ProxyError::UpstreamError { status, body: text });
    }
    RawValue::from_string(text).map_err(|err| {
        metrics::counter!("chatrelay_upstream_failures_total", "kind" => "malformed").increment(1);
        ProxyError::MalformedUpstreamBody(err.to_string())
    })
}

/// Streaming dispatch: returns as soon as response headers arrive, leaving the
/// body unread for the relay. The status is not checked here.
pub async fn open_chat_stream(
    client: &reqwest::Client,
    config: &RuntimeConfig,
    req: &ChatRequest,
    credential: &Credential,
) -> Result<reqwest::Response, ProxyError> {
    chat_request(client, config, req, credential)
        .send()
        .await
        .map_err(transport_error)
}

fn transport_error(err: reqwest::Error) -> ProxyError {
    tracing::warn!(
        timeout = err.is_timeout(),
        connect = err.is_connect(),
        "upstream transport failure: {err}"
    );
    metrics::counter!("chatrelay_upstream_failures_total", "kind" => "transport").increment(1);
    ProxyError::TransportError(err.to_string())
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1") {
        if path == "v1" {
            path = "";
        } else if let Some(stripped) = path.strip_prefix("v1/") {
            path = stripped;
        }
    }
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}
