//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → dispatcher.rs (validate, cache check, snapshot, failover loop)
//!     → forward.rs (rewrite onto target, bounded upstream call)
//!     → backend response streamed or buffered into the cache
//! ```
//!
//! # Design Decisions
//! - Retries are a bounded loop over a fixed candidate list, not recursion
//! - Per-request failures are absorbed by failover; only exhaustion and
//!   malformed requests reach the client as errors
//! - The backend call is owned by the inbound handler, so a client
//!   disconnect cancels it

pub mod dispatcher;
pub mod forward;

pub use dispatcher::{
    Attempt, AttemptOutcome, CacheStatus, DispatchError, DispatchOutcome, DispatchReport, DispatchSettings,
    Dispatcher, FailoverCursor,
};
pub use forward::{ForwardError, ForwardRequest, Forwarder, HttpForwarder};
