//! API-key admission (spec §4.10): only applied to `/v1/*` and `/v1beta/*`
//! when a non-empty key set is configured. Header precedence mirrors the
//! teacher's `extract_user_key`, with `anthropic-api-key` added and no
//! query-param fallback.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use ag2_core::AppState;

use crate::response::json_error;

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Some(token) = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")) {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    for name in ["x-api-key", "anthropic-api-key", "x-goog-api-key"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

pub async fn require_api_key(State(state): State<Arc<AppState>>, req: Request<Body>, next: Next) -> Response {
    if state.config.api_keys.is_empty() {
        return next.run(req).await;
    }

    let path = req.uri().path();
    if !(path.starts_with("/v1/") || path.starts_with("/v1beta/") || path == "/v1" || path == "/v1beta") {
        return next.run(req).await;
    }

    let provided = extract_api_key(req.headers());
    match provided {
        Some(key) if state.config.api_keys.iter().any(|configured| configured == &key) => next.run(req).await,
        _ => {
            tracing::warn!(path, "rejected request with missing or invalid api key");
            json_error(StatusCode::UNAUTHORIZED, "Invalid API Key")
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn bearer_token_wins_over_other_headers() {
        let mut headers = headers_with("x-api-key", "from-x-api-key");
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer from-bearer"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("from-bearer"));
    }

    #[test]
    fn falls_back_through_header_precedence() {
        assert_eq!(extract_api_key(&headers_with("x-api-key", "a")).as_deref(), Some("a"));
        assert_eq!(extract_api_key(&headers_with("anthropic-api-key", "b")).as_deref(), Some("b"));
        assert_eq!(extract_api_key(&headers_with("x-goog-api-key", "c")).as_deref(), Some("c"));
    }

    #[test]
    fn no_key_present_returns_none() {
        assert!(extract_api_key(&HeaderMap::new()).is_none());
    }

    #[test]
    fn blank_bearer_token_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(extract_api_key(&headers).is_none());
    }
}
