//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, origin-form check)
//!     → [dispatcher: cache, directory, claim, forward]
//!     → response.rs (hop-by-hop stripping, x-cache, error bodies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::X_CACHE;
pub use server::{AppState, HttpServer};
