//! Backend forwarding.
//!
//! # Responsibilities
//! - Rewrite the inbound request onto a chosen target
//! - Bound connect and response-header time
//! - Hand back the backend's response with its own status and headers

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, Response, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::http::response::strip_hop_by_hop;
use crate::load_balancer::Target;
use crate::resilience::timeouts::with_deadline;

/// Buffered inbound request, replayable against several targets.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Origin-form request target, e.g. "/widgets?page=2".
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardRequest {
    /// Build a forwardable request, dropping hop-by-hop and Host headers.
    pub fn new(method: Method, path_and_query: impl Into<String>, mut headers: HeaderMap, body: Bytes) -> Self {
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers,
            body,
        }
    }
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
}

/// Sends one request to one target.
#[async_trait]
pub trait Forwarder: Send + Sync + fmt::Debug {
    async fn forward(&self, target: &Target, request: &ForwardRequest) -> Result<Response<Body>, ForwardError>;
}

/// Production forwarder over a pooled hyper client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
    request_timeout: Duration,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            request_timeout,
        }
    }
}

impl fmt::Debug for HttpForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpForwarder")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Absolute URI of `path_and_query` on `target`.
pub fn upstream_uri(target: &Target, path_and_query: &str) -> Result<Uri, ForwardError> {
    format!("http://{}{}", target.endpoint, path_and_query)
        .parse::<Uri>()
        .map_err(|e| ForwardError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, target: &Target, request: &ForwardRequest) -> Result<Response<Body>, ForwardError> {
        let uri = upstream_uri(target, &request.path_and_query)?;

        let mut builder = Request::builder().method(request.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers.clone());
        }
        let upstream = builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;

        let response = with_deadline(self.request_timeout, self.client.request(upstream))
            .await
            .map_err(ForwardError::Timeout)?
            .map_err(|e| ForwardError::Unreachable(e.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Version;
    use axum::http::HeaderValue;

    #[test]
    fn test_upstream_uri() {
        let target = Target::new("10.0.0.1:9002", 0, Version(0));
        let uri = upstream_uri(&target, "/widgets?page=2").unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.1:9002/widgets?page=2");
        assert_eq!(uri.authority().unwrap().as_str(), "10.0.0.1:9002");
    }

    #[test]
    fn test_forward_request_drops_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));

        let req = ForwardRequest::new(Method::GET, "/", headers, Bytes::new());
        assert!(req.headers.get(header::HOST).is_none());
        assert!(req.headers.get(header::CONNECTION).is_none());
        assert_eq!(req.headers.get(header::ACCEPT).unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        // Port 9 on localhost is not expected to accept connections
        let forwarder = HttpForwarder::new(Duration::from_millis(200), Duration::from_secs(1));
        let target = Target::new("127.0.0.1:9", 0, Version(0));
        let req = ForwardRequest::new(Method::GET, "/", HeaderMap::new(), Bytes::new());
        let err = forwarder.forward(&target, &req).await.unwrap_err();
        assert!(matches!(err, ForwardError::Unreachable(_) | ForwardError::Timeout(_)));
    }
}
