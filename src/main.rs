//! registry-proxy command line.
//!
//! ```text
//! registry-proxy proxy  [--config proxy.toml]
//! registry-proxy target --port 9001 [--host 127.0.0.1] [--bind 0.0.0.0] [--config proxy.toml]
//! registry-proxy demo   [--targets 3] [--config proxy.toml]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use registry_proxy::config::{load_config, ProxyConfig};
use registry_proxy::lifecycle::{bootstrap, bounded, open_store, wait_for_signal, Shutdown, StartupError};
use registry_proxy::observability::{logging, metrics};
use registry_proxy::{HttpServer, MembershipAgent, MemoryStore, TargetServer};

#[derive(Parser)]
#[command(name = "registry-proxy", version, about = "Load-aware reverse proxy over a coordination store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reverse proxy.
    Proxy {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a target server and register it with the proxies.
    Target {
        #[arg(short, long)]
        port: u16,
        /// Host the proxies should use to reach this target.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Interface to listen on.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a proxy and several targets in one process over an in-memory store.
    Demo {
        #[arg(short, long, default_value_t = 3)]
        targets: usize,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Command {
    fn config_path(&self) -> Option<&Path> {
        match self {
            Command::Proxy { config } | Command::Target { config, .. } | Command::Demo { config, .. } => {
                config.as_deref()
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match cli.command.config_path() {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("registry-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.trigger();
        });
    }

    match cli.command {
        Command::Proxy { .. } => run_proxy(config, shutdown).await?,
        Command::Target { port, host, bind, .. } => run_target(config, port, &host, &bind, shutdown).await?,
        Command::Demo { targets, .. } => run_demo(config, targets, shutdown).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_proxy(config: ProxyConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let store = open_store(&config.coordination).await?;
    bootstrap(store.as_ref(), &config.coordination).await?;
    start_metrics(&config);

    let listener = bind(&config.listener.bind_address).await?;
    HttpServer::new(config, store).run(listener, shutdown).await?;
    Ok(())
}

async fn run_target(
    config: ProxyConfig,
    port: u16,
    host: &str,
    bind_host: &str,
    shutdown: Shutdown,
) -> Result<(), StartupError> {
    let store = open_store(&config.coordination).await?;

    let address = format!("{}:{}", bind_host, port);
    let server = TargetServer::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;

    // Register only once the port is actually ours
    let agent = MembershipAgent::new(store, &config.coordination.targets_path);
    let registration = agent.register(&server.endpoint(host)).await?;

    server.serve(shutdown.subscribe()).await?;
    tracing::info!(endpoint = %registration.endpoint(), "Target exiting, registration ends with the session");
    Ok(())
}

async fn run_demo(config: ProxyConfig, targets: usize, shutdown: Shutdown) -> Result<(), StartupError> {
    let memory = MemoryStore::new();
    let proxy_store = bounded(Arc::new(memory.session()), &config.coordination);
    bootstrap(proxy_store.as_ref(), &config.coordination).await?;

    let mut registrations = Vec::with_capacity(targets);
    let mut servers = Vec::with_capacity(targets);
    for _ in 0..targets {
        let address = "127.0.0.1:0".to_string();
        let server = TargetServer::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;

        // One session per target, as separate processes would have
        let session = bounded(Arc::new(memory.session()), &config.coordination);
        let agent = MembershipAgent::new(session, &config.coordination.targets_path);
        registrations.push(agent.register(&server.endpoint("127.0.0.1")).await?);
        servers.push(tokio::spawn(server.serve(shutdown.subscribe())));
    }

    start_metrics(&config);
    let listener = bind(&config.listener.bind_address).await?;
    tracing::info!(
        targets = registrations.len(),
        endpoints = ?registrations.iter().map(|r| r.endpoint()).collect::<Vec<_>>(),
        "Demo targets registered"
    );

    HttpServer::new(config, proxy_store).run(listener, shutdown).await?;

    for server in servers {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Target server failed"),
            Err(e) => tracing::warn!(error = %e, "Target server task panicked"),
        }
    }
    Ok(())
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    let listener = TcpListener::bind(address).await.map_err(|source| StartupError::Bind {
        address: address.to_string(),
        source,
    })?;
    if let Ok(local_addr) = listener.local_addr() {
        tracing::info!(address = %local_addr, "Listening for connections");
    }
    Ok(listener)
}

fn start_metrics(config: &ProxyConfig) {
    if !config.observability.metrics_enabled {
        return;
    }
    match config.observability.metrics_address.parse() {
        Ok(addr) => metrics::init_metrics(addr),
        Err(_) => tracing::error!(
            metrics_address = %config.observability.metrics_address,
            "Failed to parse metrics address"
        ),
    }
}
