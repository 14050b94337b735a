//! Backend-side membership.
//!
//! # Data Flow
//! ```text
//! target process start
//!     → backend.rs (bind listener, learn the real port)
//!     → agent.rs   (ensure directory, drop stale node, create ephemeral node "0")
//!     → serve until shutdown
//!
//! session ends (exit, crash, disconnect)
//!     → store removes the ephemeral node; nothing is deregistered explicitly
//! ```

pub mod agent;
pub mod backend;

pub use agent::{MembershipAgent, Registration, RegistrationError};
pub use backend::{backend_router, TargetServer};
