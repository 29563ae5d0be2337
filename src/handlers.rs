use crate::app::AppState;
use crate::auth::extract_credential;
use crate::error::{AppError, AppResult, ProxyError};
use crate::normalize::normalize;
use crate::{relay, upstream};
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `POST /v1/chat/completions`
///
/// Everything up to the upstream call is validated locally, so a rejected
/// request never reaches the network.
pub async fn create_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<Response> {
    let credential = extract_credential(&headers)?;
    let body = body.map_err(|rejection| {
        AppError::new(rejection.status(), "invalid_body", rejection.body_text())
    })?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| ProxyError::InvalidBody(format!("Invalid JSON body: {err}")))?;
    let req = normalize(payload)?;

    let mode = if req.stream { "stream" } else { "buffered" };
    metrics::counter!("chatrelay_requests_total", "mode" => mode).increment(1);
    tracing::info!(
        model = %req.model,
        messages = req.messages.len(),
        stream = req.stream,
        "forwarding chat completion"
    );

    if req.stream {
        let http = state.http.clone();
        let runtime = state.runtime.clone();
        let connect = async move {
            upstream::open_chat_stream(&http, &runtime, &req, &credential).await
        };
        let body = Body::from_stream(relay::relay(connect));
        return Ok((
            [
                (CONTENT_TYPE, mime::TEXT_EVENT_STREAM.as_ref()),
                (CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response());
    }

    let raw =
        upstream::call_chat_completions(&state.http, &state.runtime, &req, &credential).await?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())],
        raw.get().to_owned(),
    )
        .into_response())
}
