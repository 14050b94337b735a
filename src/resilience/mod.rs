//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Coordination store call ─┐
//! Backend request ─────────┴─▶ timeouts.rs (deadline) ─▶ elapsed → caller's error path
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Failover across candidates replaces in-place retries

pub mod timeouts;
