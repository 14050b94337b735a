//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound GET/HEAD
//!     → key.rs (canonical (method, path) signature)
//!     → response_cache.rs lookup
//!         → fresh entry: respond, no directory or backend traffic
//!         → absent/expired: dispatch, then insert on 2xx
//!
//! Background:
//!     sweeper.rs ticks → evict expired entries → stop on shutdown
//! ```
//!
//! # Design Decisions
//! - Headers, query and body are not part of the key
//! - No request coalescing: concurrent misses all dispatch
//! - Last writer wins on concurrent inserts

pub mod key;
pub mod response_cache;
pub mod sweeper;

pub use key::{is_cacheable_method, CacheKey};
pub use response_cache::{CacheEntry, CachedResponse, ResponseCache};
pub use sweeper::spawn_sweeper;
