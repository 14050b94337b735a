//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the proxy handler as fallback
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind server to listener
//! - Hand every request to the dispatcher
//! - Run the cache sweeper alongside the listener
//! - Observability (metrics, correlation IDs)

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response, StatusCode},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::{spawn_sweeper, ResponseCache};
use crate::config::ProxyConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::http::request::{request_id, MakeRequestUuid};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::CoordinationStore;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    dispatcher: Arc<Dispatcher>,
}

impl HttpServer {
    /// Create a new HTTP server dispatching over `store`.
    pub fn new(config: ProxyConfig, store: Arc<dyn CoordinationStore>) -> Self {
        let cache = ResponseCache::new(Duration::from_secs(config.cache.ttl_secs));
        let dispatcher = Arc::new(Dispatcher::from_config(&config, store, cache));
        Self::with_dispatcher(config, dispatcher)
    }

    /// Create a server around an already assembled dispatcher.
    pub fn with_dispatcher(config: ProxyConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let state = AppState {
            dispatcher: dispatcher.clone(),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            dispatcher,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The dispatcher enforces `request_secs` itself and answers 504 with a
    /// logged report; the outer layer only catches what runs past that.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let backstop = Duration::from_secs(config.timeouts.request_secs) + Duration::from_secs(1);
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TimeoutLayer::with_status_code(StatusCode::GATEWAY_TIMEOUT, backstop))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            targets_path = %self.config.coordination.targets_path,
            load_policy = ?self.config.load.policy,
            "HTTP server starting"
        );

        let sweeper = self.config.cache.enabled.then(|| {
            spawn_sweeper(
                self.dispatcher.cache().clone(),
                Duration::from_secs(self.config.cache.sweep_interval_secs),
                shutdown.subscribe(),
            )
        });

        let mut stop = shutdown.subscribe();
        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let start_time = Instant::now();
    let request_id = request_id(&request);
    let method = request.method().clone();
    let uri = request.uri().clone();

    tracing::debug!(request_id = %request_id, method = %method, uri = %uri, "Proxying request");

    let DispatchOutcome { response, report } = state.dispatcher.dispatch(request).await;
    let status = response.status();
    let served_by = report.served_by().unwrap_or("none");

    match &report.error {
        Some(error) => tracing::warn!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            candidates = report.candidates,
            attempts = report.attempts.len(),
            error = %error,
            "Request failed"
        ),
        None => tracing::debug!(
            request_id = %request_id,
            status = status.as_u16(),
            cache = ?report.cache,
            target = %served_by,
            attempts = report.attempts.len(),
            "Request served"
        ),
    }

    metrics::record_request(method.as_str(), status.as_u16(), served_by, start_time);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use crate::registry::MemoryStore;

    #[tokio::test]
    async fn test_empty_directory_is_unavailable() {
        let store = MemoryStore::new();
        let session = store.session();
        crate::lifecycle::bootstrap(&session, &ProxyConfig::default().coordination)
            .await
            .unwrap();

        let server = HttpServer::new(ProxyConfig::default(), Arc::new(session));
        let response = server
            .router
            .oneshot(Request::get("/widgets").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key("x-request-id"));
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_request_id_propagated() {
        let store = MemoryStore::new();
        let server = HttpServer::new(ProxyConfig::default(), Arc::new(store.session()));
        let response = server
            .router
            .oneshot(
                Request::get("/")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");
    }
}
