//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use registry_proxy::config::ProxyConfig;
use registry_proxy::registry::{CoordinationStore, MemorySession, NodeKind};
use registry_proxy::{HttpServer, MemoryStore, Shutdown};

/// A raw TCP backend answering every request with a fixed status and body.
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Requests answered so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start a mock backend on an ephemeral port.
pub async fn start_backend(status: u16, body: &'static str) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        answer(socket, status, body, &counter).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { addr, hits }
}

async fn read_head(socket: &mut TcpStream) -> bool {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    true
}

async fn answer(mut socket: TcpStream, status: u16, body: &str, hits: &AtomicUsize) {
    // Read the request head before answering
    if !read_head(&mut socket).await {
        return;
    }
    hits.fetch_add(1, Ordering::SeqCst);

    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Start a backend that accepts requests and then goes silent.
///
/// With `first_chunk` it sends a chunked 200 head and that one chunk before
/// stalling; without it nothing is ever written. Sockets stay open until the
/// peer hangs up.
#[allow(dead_code)]
pub async fn start_stalled_backend(first_chunk: Option<&'static str>) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                if !read_head(&mut socket).await {
                    return;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(chunk) = first_chunk {
                    let partial = format!(
                        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Type: text/plain\r\n\r\n{:x}\r\n{}\r\n",
                        chunk.len(),
                        chunk
                    );
                    let _ = socket.write_all(partial.as_bytes()).await;
                }
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    MockBackend { addr, hits }
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Create `/hosts` and one persistent node per `(endpoint, count)`.
#[allow(dead_code)]
pub async fn seed_targets(store: &MemoryStore, targets: &[(&str, u64)]) -> MemorySession {
    let admin = store.session();
    admin.create_node("/hosts", b"", NodeKind::Persistent).await.unwrap();
    for (endpoint, count) in targets {
        admin
            .create_node(&format!("/hosts/{}", endpoint), count.to_string().as_bytes(), NodeKind::Persistent)
            .await
            .unwrap();
    }
    admin
}

/// Current load counter of `endpoint`.
#[allow(dead_code)]
pub async fn load_count(store: &dyn CoordinationStore, endpoint: &str) -> String {
    let (data, _) = store.get_data(&format!("/hosts/{}", endpoint)).await.unwrap();
    String::from_utf8(data).unwrap()
}

/// A proxy listening on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;
    config.timeouts.connect_secs = 1;
    config.timeouts.backend_secs = 2;
    config
}

/// Start a proxy over its own session on `store`.
pub async fn start_proxy(config: ProxyConfig, store: &MemoryStore) -> TestProxy {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(config, Arc::new(store.session()));
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, stop).await;
    });

    // Give the server a moment to start accepting
    tokio::time::sleep(Duration::from_millis(50)).await;
    TestProxy { addr, shutdown }
}
