//! Inbound payload validation.
//!
//! The normalizer owns the outbound schema: only the fields in
//! [`KNOWN_CHAT_FIELDS`] survive, and absent optional fields get fixed
//! defaults. Anything else the client sends is dropped.

use crate::error::ProxyError;
use serde::Serialize;
use serde_json::{Map, Value};

pub const DEFAULT_MAX_TOKENS: u64 = 4000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 1.0;

pub const KNOWN_CHAT_FIELDS: [&str; 6] = [
    "model",
    "messages",
    "max_tokens",
    "temperature",
    "top_p",
    "stream",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    /// Role/content objects, forwarded as-is and in order.
    pub messages: Vec<Value>,
    pub max_tokens: u64,
    pub temperature: f64,
    pub top_p: f64,
    pub stream: bool,
}

pub fn normalize(payload: Value) -> Result<ChatRequest, ProxyError> {
    let Value::Object(mut obj) = payload else {
        return Err(ProxyError::InvalidBody(
            "Request body must be a JSON object".to_string(),
        ));
    };

    let model = match take(&mut obj, "model") {
        None => {
            return Err(ProxyError::MissingField(
                "Model parameter is required".to_string(),
            ));
        }
        Some(Value::String(model)) => model,
        Some(_) => return Err(invalid("model", "a string")),
    };
    let messages = match take(&mut obj, "messages") {
        None => {
            return Err(ProxyError::MissingField(
                "Messages parameter is required".to_string(),
            ));
        }
        Some(Value::Array(messages)) => messages,
        Some(_) => return Err(invalid("messages", "an array")),
    };

    let max_tokens = match take(&mut obj, "max_tokens") {
        None => DEFAULT_MAX_TOKENS,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| invalid("max_tokens", "a non-negative integer"))?,
    };
    let temperature = optional_number(&mut obj, "temperature", DEFAULT_TEMPERATURE)?;
    let top_p = optional_number(&mut obj, "top_p", DEFAULT_TOP_P)?;
    let stream = match take(&mut obj, "stream") {
        None => false,
        Some(v) => v.as_bool().ok_or_else(|| invalid("stream", "a boolean"))?,
    };

    if !obj.is_empty() {
        tracing::debug!(
            dropped = ?obj.keys().collect::<Vec<_>>(),
            "dropping fields outside the chat request schema"
        );
    }

    Ok(ChatRequest {
        model,
        messages,
        max_tokens,
        temperature,
        top_p,
        stream,
    })
}

/// Removes `key`, treating an explicit `null` the same as absence.
fn take(obj: &mut Map<String, Value>, key: &str) -> Option<Value> {
    obj.remove(key).filter(|v| !v.is_null())
}

fn optional_number(
    obj: &mut Map<String, Value>,
    key: &str,
    default: f64,
) -> Result<f64, ProxyError> {
    match take(obj, key) {
        None => Ok(default),
        Some(v) => v.as_f64().ok_or_else(|| invalid(key, "a number")),
    }
}

fn invalid(field: &str, expected: &str) -> ProxyError {
    ProxyError::InvalidField(format!("{field} must be {expected}"))
}
