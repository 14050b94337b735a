//! The demo target application a registered backend serves.
//!
//! `GET /` answers with the port it is served on, which makes it easy to
//! see which backend a proxied request landed on.

use std::io;
use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Router answering every request according to the target app's rules.
pub fn backend_router(port: u16) -> Router {
    Router::new()
        .route("/", any(respond))
        .route("/{*path}", any(respond))
        .with_state(port)
}

async fn respond(State(port): State<u16>, method: Method, uri: Uri) -> (StatusCode, String) {
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not supported".to_string());
    }
    if uri.path() != "/" {
        return (StatusCode::NOT_FOUND, "Path not found".to_string());
    }
    (StatusCode::OK, format!("Served on port {}", port))
}

/// A bound but not yet serving target.
///
/// Binding comes first so the advertised endpoint carries the real port,
/// including when port 0 was requested.
#[derive(Debug)]
pub struct TargetServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TargetServer {
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// "host:port" under which proxies should reach this server.
    pub fn endpoint(&self, advertised_host: &str) -> String {
        format!("{}:{}", advertised_host, self.local_addr.port())
    }

    /// Serve until `shutdown` fires.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        let port = self.local_addr.port();
        tracing::info!(address = %self.local_addr, "Target server listening");
        axum::serve(self.listener, backend_router(port))
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;
        tracing::info!(port, "Target server stopped");
        Ok(())
    }
}
