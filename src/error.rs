use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            detail: self.message,
        };
        (self.status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failures while bringing the process up. These never become HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid {key}: {reason}")]
    Config { key: &'static str, reason: String },
    #[error("invalid listen address {addr:?}: {source}")]
    ListenAddr {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to build upstream http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
    #[error("server stopped: {0}")]
    Serve(std::io::Error),
}

/// Failures of the normalize → dispatch → relay pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidBody(String),
    #[error("{0}")]
    MissingField(String),
    #[error("{0}")]
    InvalidField(String),
    #[error("{body}")]
    UpstreamError { status: StatusCode, body: String },
    #[error("Error communicating with the upstream API: {0}")]
    TransportError(String),
    #[error("Upstream returned a malformed response body: {0}")]
    MalformedUpstreamBody(String),
    /// Only ever surfaced in-band on a stream whose headers are committed.
    #[error("{0}")]
    StreamFault(String),
}

impl ProxyError {
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::InvalidBody(_) => "invalid_body",
            ProxyError::MissingField(_) => "missing_field",
            ProxyError::InvalidField(_) => "invalid_field",
            ProxyError::UpstreamError { .. } => "upstream_error",
            ProxyError::TransportError(_) => "transport_error",
            ProxyError::MalformedUpstreamBody(_) => "malformed_upstream_body",
            ProxyError::StreamFault(_) => "stream_fault",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidBody(_)
            | ProxyError::MissingField(_)
            | ProxyError::InvalidField(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamError { status, .. } => *status,
            ProxyError::TransportError(_) | ProxyError::StreamFault(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::MalformedUpstreamBody(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        AppError::new(err.status(), err.code(), err.to_string())
    }
}
