use crate::config::RuntimeConfig;
use crate::error::StartupError;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Once, OnceLock};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Per-process handles shared by every request. Nothing here is mutated
/// after startup.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub http: reqwest::Client,
    pub metrics: PrometheusHandle,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<String> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

pub fn load_state() -> Result<AppState, StartupError> {
    load_state_with_runtime(RuntimeConfig::from_env()?)
}

pub fn load_state_with_runtime(runtime: RuntimeConfig) -> Result<AppState, StartupError> {
    let http = crate::upstream::build_client(&runtime)?;
    let metrics = init_metrics()?;
    tracing::debug!(
        upstream = %runtime.upstream_base_url,
        connect_timeout_ms = runtime.connect_timeout_ms,
        request_timeout_ms = runtime.request_timeout_ms,
        max_body_bytes = ?runtime.max_body_bytes,
        "runtime configured"
    );
    Ok(AppState {
        runtime: Arc::new(runtime),
        http,
        metrics,
    })
}

fn init_metrics() -> Result<PrometheusHandle, StartupError> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(err.to_string());
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(StartupError::Metrics(err.clone()));
    }
    METRICS_HANDLE
        .get()
        .cloned()
        .ok_or_else(|| StartupError::Metrics("recorder not available".to_string()))
}

fn body_limit(runtime: &RuntimeConfig) -> DefaultBodyLimit {
    match runtime.max_body_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    }
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    let body_limit = body_limit(&state.runtime);
    Router::<AppState>::new()
        .route(
            "/v1/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
        .route("/healthz", get(crate::handlers::healthz))
        .route(&metrics_path, get(crate::handlers::metrics))
        .layer(body_limit)
        .with_state(state)
        .layer(SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(TraceLayer::new_for_http())
}
