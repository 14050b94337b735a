//! Self-registering, load-aware HTTP reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                    REVERSE PROXY                      │
//!                      │                                                       │
//!   Client Request     │  ┌─────────┐   ┌──────────┐   ┌──────────────────┐    │
//!   ───────────────────┼─▶│  http   │──▶│  cache   │──▶│     dispatch     │    │
//!                      │  │ server  │   │ (GET/HEAD)│  │  failover cursor │    │
//!                      │  └─────────┘   └──────────┘   └────────┬─────────┘    │
//!                      │                                        │              │
//!                      │                 ┌──────────────────────┼───────┐      │
//!                      │                 ▼                      ▼       │      │
//!                      │         ┌──────────────┐      ┌──────────────┐ │      │
//!                      │         │load_balancer │      │   forward    │─┼──────┼──▶ Target
//!                      │         │directory+CAS │      │ hyper client │ │      │
//!                      │         └──────┬───────┘      └──────────────┘ │      │
//!                      │                │                               │      │
//!                      │                ▼                               │      │
//!                      │         ┌──────────────┐                       │      │
//!                      │         │   registry   │◀──────────────────────┘      │
//!                      │         │ (store trait)│                              │
//!                      │         └──────┬───────┘                              │
//!                      └────────────────┼──────────────────────────────────────┘
//!                                       │
//!                               coordination store ◀── membership agent (targets)
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod registry;

// Traffic management
pub mod cache;
pub mod dispatch;
pub mod load_balancer;
pub mod membership;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use dispatch::Dispatcher;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use membership::{MembershipAgent, TargetServer};
pub use registry::{CoordinationStore, MemoryStore};
