use crate::error::AppError;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use std::fmt;

pub const INVALID_AUTHORIZATION: &str = "Missing or invalid Authorization header.";

/// Caller-supplied token, forwarded upstream as a bearer credential.
///
/// Opaque to the proxy. `Debug` is redacted so the value can't leak through
/// tracing fields.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

pub fn extract_credential(headers: &HeaderMap) -> Result<Credential, AppError> {
    let invalid = || AppError::new(StatusCode::BAD_REQUEST, "unauthorized", INVALID_AUTHORIZATION);
    let auth_header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(invalid)?;
    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(invalid)?;
    Ok(Credential(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_is_extracted() {
        let cred = extract_credential(&headers_with("Bearer sk-test")).unwrap();
        assert_eq!(cred.expose(), "sk-test");
    }

    #[test]
    fn missing_header_is_rejected() {
        let err = extract_credential(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, INVALID_AUTHORIZATION);
    }

    #[test]
    fn non_bearer_and_empty_tokens_are_rejected() {
        for value in ["Basic abc", "Bearer ", "Bearer    ", "sk-test"] {
            assert!(extract_credential(&headers_with(value)).is_err(), "{value}");
        }
    }

    #[test]
    fn debug_output_is_redacted() {
        let cred = extract_credential(&headers_with("Bearer sk-secret")).unwrap();
        assert!(!format!("{cred:?}").contains("sk-secret"));
    }
}
