//! Response handling and transformation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from forwarded messages
//! - Replay cached responses
//! - Map dispatch failures to plain-text error responses
//!
//! # Design Decisions
//! - The backend's own headers go back to the client, never the inbound ones
//! - Streaming responses pass through without buffering

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};

use crate::cache::CachedResponse;

/// Marks whether a cacheable response came from the cache.
pub const X_CACHE: &str = "x-cache";

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Tag a response as served from (`true`) or fetched for (`false`) the cache.
pub fn mark_cache_status(headers: &mut HeaderMap, hit: bool) {
    let value = if hit { "HIT" } else { "MISS" };
    headers.insert(X_CACHE, HeaderValue::from_static(value));
}

/// Rebuild a client response from a cache entry.
pub fn cached_response(cached: CachedResponse) -> Response<Body> {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers;
    mark_cache_status(response.headers_mut(), true);
    response
}

/// Plain-text response for a request the proxy could not serve.
pub fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_cached_response_replays_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-backend", HeaderValue::from_static("9002"));
        let response = cached_response(CachedResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"widgets"),
        });

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-backend"], "9002");
        assert_eq!(response.headers()[X_CACHE], "HIT");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"widgets"));
    }

    #[test]
    fn test_error_response() {
        let response = error_response(StatusCode::BAD_GATEWAY, "All targets failed");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    }
}
