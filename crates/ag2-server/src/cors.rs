//! Hand-rolled CORS middleware (spec §6) — the upstream-facing teacher has
//! no browser-facing surface and carries no CORS layer of its own.

use axum::body::Body;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, x-api-key, anthropic-api-key, x-goog-api-key, anthropic-version";

pub async fn cors_layer(req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return with_cors_headers(StatusCode::NO_CONTENT.into_response());
    }
    with_cors_headers(next.run(req).await)
}

fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert("access-control-allow-methods", HeaderValue::from_static(ALLOW_METHODS));
    headers.insert("access-control-allow-headers", HeaderValue::from_static(ALLOW_HEADERS));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_all_three_cors_headers() {
        let resp = with_cors_headers(StatusCode::OK.into_response());
        assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(resp.headers().get("access-control-allow-methods").unwrap(), ALLOW_METHODS);
        assert_eq!(resp.headers().get("access-control-allow-headers").unwrap(), ALLOW_HEADERS);
    }
}
