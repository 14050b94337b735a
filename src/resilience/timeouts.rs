//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap coordination store and backend calls with a deadline
//! - Report an elapsed deadline as a distinct error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Dropping the wrapped future on expiry cancels the underlying call

use std::future::Future;
use std::time::Duration;

/// Run `fut` to completion unless `deadline` elapses first.
///
/// On expiry the future is dropped and the deadline is returned as the error.
pub async fn with_deadline<F>(deadline: Duration, fut: F) -> Result<F::Output, Duration>
where
    F: Future,
{
    tokio::time::timeout(deadline, fut).await.map_err(|_| deadline)
}
