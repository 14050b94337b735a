//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (cache miss)
//!     → directory.rs (list targets, read counters concurrently)
//!     → target.rs (CandidateList: least loaded first, ties by endpoint)
//!     → accounting.rs (CAS-claim one unit of load on the chosen target)
//!     → Claimed → forward | Conflict → next candidate
//! ```
//!
//! # Design Decisions
//! - Snapshot taken once per request; failover never re-polls the directory
//! - Counters live in the coordination store, shared by every proxy process
//! - Optimistic concurrency only: conflicts are detected, never prevented

pub mod accounting;
pub mod directory;
pub mod target;

pub use accounting::{accounting_for, Claim, CumulativeLoad, InFlightLoad, LoadAccounting, LoadPolicy};
pub use directory::TargetDirectory;
pub use target::{CandidateList, Target};
