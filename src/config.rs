use crate::error::StartupError;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub upstream_base_url: String,
    pub metrics_path: String,
    /// Applies to every upstream connection attempt, streaming or not.
    pub connect_timeout_ms: u64,
    /// Overall deadline for buffered calls. Streaming calls have none.
    pub request_timeout_ms: u64,
    /// Cap on inbound request bodies. `None` accepts any size.
    pub max_body_bytes: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            metrics_path: "/metrics".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 600_000,
            max_body_bytes: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Ok(Self {
            listen: read("CHATRELAY_LISTEN").unwrap_or(defaults.listen),
            upstream_base_url: read("CHATRELAY_UPSTREAM_BASE_URL")
                .unwrap_or(defaults.upstream_base_url),
            metrics_path: read("CHATRELAY_METRICS_PATH").unwrap_or(defaults.metrics_path),
            connect_timeout_ms: parse_millis(
                "CHATRELAY_CONNECT_TIMEOUT_MS",
                read("CHATRELAY_CONNECT_TIMEOUT_MS"),
                defaults.connect_timeout_ms,
            )?,
            request_timeout_ms: parse_millis(
                "CHATRELAY_REQUEST_TIMEOUT_MS",
                read("CHATRELAY_REQUEST_TIMEOUT_MS"),
                defaults.request_timeout_ms,
            )?,
            max_body_bytes: read("CHATRELAY_MAX_BODY_BYTES")
                .map(|raw| parse_positive("CHATRELAY_MAX_BODY_BYTES", &raw))
                .transpose()?,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_millis(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, StartupError> {
    match raw {
        Some(raw) => parse_positive(key, &raw),
        None => Ok(default),
    }
}

/// Zero is refused: a zero deadline or body cap would fail every request.
fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, StartupError>
where
    T: std::str::FromStr + PartialEq + From<u8>,
    T::Err: std::fmt::Display,
{
    let value = raw.trim().parse::<T>().map_err(|err| StartupError::Config {
        key,
        reason: format!("{err} (got {raw:?})"),
    })?;
    if value == T::from(0) {
        return Err(StartupError::Config {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
