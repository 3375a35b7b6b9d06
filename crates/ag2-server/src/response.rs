//! Uniform response writing: a readable byte stream (piped through), a blob
//! (written as-is), or a JSON object (serialized) — spec §4.10.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use ag2_core::upstream_client::RawResponse;

pub enum ResponseBody {
    Stream(mpsc::Receiver<Bytes>),
    Blob(Bytes),
    Json(serde_json::Value),
}

pub fn write_response(status: u16, headers: Vec<(String, String)>, body: ResponseBody) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    if let Some(map) = builder.headers_mut() {
        for (name, value) in &headers {
            if is_hop_by_hop(name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                map.append(name, value);
            }
        }
        if matches!(body, ResponseBody::Stream(_)) {
            map.entry(axum::http::header::CACHE_CONTROL)
                .or_insert(HeaderValue::from_static("no-cache"));
        }
    }

    let axum_body = match body {
        ResponseBody::Blob(bytes) => Body::from(bytes),
        ResponseBody::Json(value) => Body::from(serde_json::to_vec(&value).unwrap_or_default()),
        ResponseBody::Stream(rx) => Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>)),
    };

    builder
        .body(axum_body)
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response())
}

/// Writes an upstream [`RawResponse`] through untouched (status, headers,
/// body intact) — the passthrough path for 2xx and non-429 errors.
pub fn raw_to_response(raw: RawResponse) -> Response {
    write_response(raw.status, raw.headers, ResponseBody::Blob(raw.body))
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ag2_protocol::anthropic::types::ErrorBody::new(message);
    (status, axum::Json(body)).into_response()
}

pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Response {
    (status, axum::Json(value)).into_response()
}

fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("content-encoding")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let resp = write_response(
            200,
            vec![
                ("content-length".to_string(), "123".to_string()),
                ("content-encoding".to_string(), "gzip".to_string()),
                ("x-upstream".to_string(), "abc".to_string()),
            ],
            ResponseBody::Blob(Bytes::from_static(b"hi")),
        );
        assert!(resp.headers().get("content-length").is_none());
        assert!(resp.headers().get("content-encoding").is_none());
        assert_eq!(resp.headers().get("x-upstream").unwrap(), "abc");
    }

    #[test]
    fn stream_bodies_get_no_cache() {
        let (_tx, rx) = mpsc::channel(1);
        let resp = write_response(200, vec![], ResponseBody::Stream(rx));
        assert_eq!(resp.headers().get("cache-control").unwrap(), "no-cache");
    }
}
