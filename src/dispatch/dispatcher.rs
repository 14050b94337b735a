//! Per-request dispatch with a bounded failover chain.
//!
//! # State Machine
//! ```text
//! START ─ no path ─────────────────────────────────────────▶ 400
//!   │
//! CACHE_CHECK ─ hit ───────────────────────────────────────▶ cached response
//!   │ miss
//! SNAPSHOT ─ unavailable / empty ──────────────────────────▶ 503
//!   │
//! SELECT(i) → CLAIM ─ conflict / error ─▶ ADVANCE
//!               │ claimed
//!             FORWARD ─ unreachable / timeout ─▶ ADVANCE
//!               │ response
//!             CACHE_WRITE ─ body stalled ─▶ ADVANCE
//!               │         ─ body unreadable ───────────────▶ 502
//!             RESPOND (streamed bodies end with an error if they stall)
//!
//! ADVANCE: i += 1; i == candidates.len() ──────────────────▶ 502
//! dispatch deadline elapsed at any point after SNAPSHOT ───▶ 504
//! ```
//!
//! The candidate list is computed once and walked front to back without
//! wrapping, so a request touches each target at most once.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, Response, StatusCode};
use futures_util::{stream, StreamExt};
use thiserror::Error;
use tokio::time::Instant;

use crate::cache::{is_cacheable_method, CacheKey, CachedResponse, ResponseCache};
use crate::config::ProxyConfig;
use crate::dispatch::forward::{ForwardError, ForwardRequest, Forwarder, HttpForwarder};
use crate::http::request::origin_target;
use crate::http::response::{cached_response, error_response, mark_cache_status, strip_hop_by_hop};
use crate::load_balancer::{accounting_for, CandidateList, Claim, LoadAccounting, Target, TargetDirectory};
use crate::observability::metrics;
use crate::registry::{CoordinationStore, StoreError};
use crate::resilience::timeouts::with_deadline;

/// Failures that end a request without a backend response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request has no path")]
    MalformedRequest,

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("request body could not be read: {0}")]
    UnreadableBody(String),

    #[error("target directory unavailable: {0}")]
    DirectoryUnavailable(StoreError),

    #[error("no targets registered")]
    NoTargets,

    #[error("all {0} candidates failed")]
    Exhausted(usize),

    #[error("backend response could not be cached: {0}")]
    CacheWrite(String),

    #[error("no candidate answered within {0:?}")]
    DeadlineExceeded(Duration),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::MalformedRequest | DispatchError::UnreadableBody(_) => StatusCode::BAD_REQUEST,
            DispatchError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            DispatchError::DirectoryUnavailable(_) | DispatchError::NoTargets => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Exhausted(_) | DispatchError::CacheWrite(_) => StatusCode::BAD_GATEWAY,
            DispatchError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn to_response(&self) -> Response<Body> {
        let message = match self {
            DispatchError::MalformedRequest | DispatchError::UnreadableBody(_) => "Bad Request",
            DispatchError::BodyTooLarge(_) => "Payload Too Large",
            DispatchError::DirectoryUnavailable(_) | DispatchError::NoTargets => "No backends available",
            DispatchError::Exhausted(_) | DispatchError::CacheWrite(_) => "Upstream request failed",
            DispatchError::DeadlineExceeded(_) => "Upstream request timed out",
        };
        error_response(self.status(), message)
    }
}

/// How the cache took part in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStatus {
    /// Method not cacheable, or caching disabled.
    #[default]
    Bypass,
    Hit,
    Miss,
}

/// What happened to one candidate.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Another writer moved the counter since the snapshot.
    ClaimConflict,
    ClaimFailed(StoreError),
    BackendFailed(ForwardError),
    /// Backend answered 5xx and failover on server errors is enabled.
    BackendStatus(StatusCode),
    CacheWriteFailed,
    /// The dispatch deadline ran out while this candidate was in progress.
    DeadlineExceeded,
    Served(StatusCode),
}

impl AttemptOutcome {
    pub fn claimed(&self) -> bool {
        !matches!(
            self,
            AttemptOutcome::ClaimConflict | AttemptOutcome::ClaimFailed(_) | AttemptOutcome::DeadlineExceeded
        )
    }
}

#[derive(Debug)]
pub struct Attempt {
    pub endpoint: String,
    pub outcome: AttemptOutcome,
}

/// Trace of one dispatch, for logs and tests.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub cache: CacheStatus,
    pub candidates: usize,
    pub attempts: Vec<Attempt>,
    pub error: Option<DispatchError>,
}

impl DispatchReport {
    /// Endpoint that produced the response, if a backend did.
    pub fn served_by(&self) -> Option<&str> {
        self.attempts
            .iter()
            .find(|a| matches!(a.outcome, AttemptOutcome::Served(_)))
            .map(|a| a.endpoint.as_str())
    }

    /// Number of attempts whose load claim went through.
    pub fn successful_claims(&self) -> usize {
        self.attempts.iter().filter(|a| a.outcome.claimed()).count()
    }
}

/// A finished dispatch.
pub struct DispatchOutcome {
    pub response: Response<Body>,
    pub report: DispatchReport,
}

/// Index into a request's candidate list. Only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailoverCursor {
    index: usize,
}

impl FailoverCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current<'a>(&self, candidates: &'a CandidateList) -> Option<&'a Target> {
        candidates.get(self.index)
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }
}

/// Tunables for dispatch.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Largest backend body that will be buffered into the cache.
    pub max_cacheable_bytes: usize,
    /// Largest inbound body accepted (it is held for replay on failover).
    pub max_body_bytes: usize,
    /// Treat backend 5xx as a failed attempt and try the next candidate.
    pub failover_on_server_error: bool,
    /// Longest silence tolerated from a backend body, per chunk when
    /// streaming and in total when buffering for the cache.
    pub backend_timeout: Duration,
    /// Budget for walking the candidate list.
    pub deadline: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            cache_enabled: config.cache.enabled,
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
            max_cacheable_bytes: config.cache.max_entry_bytes,
            max_body_bytes: config.security.max_body_size,
            failover_on_server_error: config.dispatch.failover_on_server_error,
            backend_timeout: Duration::from_secs(config.timeouts.backend_secs),
            deadline: Duration::from_secs(config.timeouts.request_secs),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Holds the load unit claimed on a target until the response is done with it.
struct ClaimGuard {
    accounting: Arc<dyn LoadAccounting>,
    target: Target,
    released: bool,
}

impl ClaimGuard {
    fn new(accounting: Arc<dyn LoadAccounting>, target: &Target) -> Self {
        Self {
            accounting,
            target: target.clone(),
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        self.accounting.release(&self.target).await;
    }
}

async fn release_claim(guard: Option<ClaimGuard>) {
    if let Some(guard) = guard {
        guard.release().await;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let accounting = self.accounting.clone();
            let target = self.target.clone();
            handle.spawn(async move {
                accounting.release(&target).await;
            });
        }
    }
}

enum Step {
    Served(Response<Body>, StatusCode),
    Advance(AttemptOutcome),
    Abort(AttemptOutcome, DispatchError),
}

/// Routes requests to the least-loaded live target.
///
/// Built once at startup and shared by every request handler.
#[derive(Debug)]
pub struct Dispatcher {
    directory: TargetDirectory,
    accounting: Arc<dyn LoadAccounting>,
    cache: ResponseCache,
    forwarder: Arc<dyn Forwarder>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        directory: TargetDirectory,
        accounting: Arc<dyn LoadAccounting>,
        cache: ResponseCache,
        forwarder: Arc<dyn Forwarder>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            directory,
            accounting,
            cache,
            forwarder,
            settings,
        }
    }

    /// Wire a dispatcher from configuration with the production forwarder.
    pub fn from_config(config: &ProxyConfig, store: Arc<dyn CoordinationStore>, cache: ResponseCache) -> Self {
        let dir = config.coordination.targets_path.as_str();
        let directory = TargetDirectory::new(store.clone(), dir);
        let accounting = accounting_for(config.load.policy, store, dir);
        let forwarder = Arc::new(HttpForwarder::new(
            Duration::from_secs(config.timeouts.connect_secs),
            Duration::from_secs(config.timeouts.backend_secs),
        ));
        tracing::info!(
            targets_path = %dir,
            policy = accounting.name(),
            cache_enabled = config.cache.enabled,
            cache_ttl_secs = config.cache.ttl_secs,
            "Dispatcher configured"
        );
        Self::new(directory, accounting, cache, forwarder, DispatchSettings::from_config(config))
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Serve one inbound request.
    pub async fn dispatch(&self, request: Request<Body>) -> DispatchOutcome {
        let deadline = Instant::now() + self.settings.deadline;
        let mut report = DispatchReport::default();
        let (parts, body) = request.into_parts();

        let Some(request_target) = origin_target(&parts.uri) else {
            return fail(report, DispatchError::MalformedRequest);
        };

        let cache_key = (self.settings.cache_enabled && is_cacheable_method(&parts.method))
            .then(|| CacheKey::new(parts.method.clone(), request_target.clone()));

        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.lookup(key) {
                metrics::record_cache_lookup(true);
                tracing::debug!(key = %key, "Cache hit");
                report.cache = CacheStatus::Hit;
                return DispatchOutcome {
                    response: cached_response(hit),
                    report,
                };
            }
            metrics::record_cache_lookup(false);
            report.cache = CacheStatus::Miss;
        }

        let body = match self.read_body(&parts.headers, body).await {
            Ok(body) => body,
            Err(e) => return fail(report, e),
        };

        let candidates = match self.directory.list_targets().await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Target directory unavailable");
                return fail(report, DispatchError::DirectoryUnavailable(e));
            }
        };
        report.candidates = candidates.len();
        if candidates.is_empty() {
            tracing::warn!(path = %self.directory.path(), "No targets registered");
            return fail(report, DispatchError::NoTargets);
        }

        let forward = ForwardRequest::new(parts.method, request_target, parts.headers, body);
        let mut cursor = FailoverCursor::new();

        while let Some(target) = cursor.current(&candidates) {
            let step = match tokio::time::timeout_at(deadline, self.attempt(target, &forward, cache_key.as_ref())).await {
                Ok(step) => step,
                Err(_) => {
                    tracing::warn!(
                        endpoint = %target.endpoint,
                        index = cursor.index(),
                        deadline = ?self.settings.deadline,
                        "Dispatch deadline exceeded"
                    );
                    report.attempts.push(Attempt {
                        endpoint: target.endpoint.clone(),
                        outcome: AttemptOutcome::DeadlineExceeded,
                    });
                    return fail(report, DispatchError::DeadlineExceeded(self.settings.deadline));
                }
            };
            match step {
                Step::Served(response, status) => {
                    report.attempts.push(Attempt {
                        endpoint: target.endpoint.clone(),
                        outcome: AttemptOutcome::Served(status),
                    });
                    return DispatchOutcome { response, report };
                }
                Step::Advance(outcome) => {
                    tracing::debug!(
                        endpoint = %target.endpoint,
                        index = cursor.index(),
                        outcome = ?outcome,
                        "Candidate failed, advancing"
                    );
                    report.attempts.push(Attempt {
                        endpoint: target.endpoint.clone(),
                        outcome,
                    });
                    metrics::record_failover();
                    cursor.advance();
                }
                Step::Abort(outcome, error) => {
                    report.attempts.push(Attempt {
                        endpoint: target.endpoint.clone(),
                        outcome,
                    });
                    return fail(report, error);
                }
            }
        }

        tracing::warn!(candidates = candidates.len(), "All candidates exhausted");
        fail(report, DispatchError::Exhausted(candidates.len()))
    }

    async fn read_body(&self, headers: &HeaderMap, body: Body) -> Result<Bytes, DispatchError> {
        let limit = self.settings.max_body_bytes;
        if content_length(headers).is_some_and(|len| len > limit) {
            return Err(DispatchError::BodyTooLarge(limit));
        }
        axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| DispatchError::UnreadableBody(e.to_string()))
    }

    async fn attempt(&self, target: &Target, request: &ForwardRequest, cache_key: Option<&CacheKey>) -> Step {
        match self.accounting.claim(target).await {
            Ok(Claim::Claimed { version }) => {
                metrics::record_claim("claimed");
                tracing::trace!(endpoint = %target.endpoint, version = %version, "Load claimed");
            }
            Ok(Claim::Conflict) => {
                metrics::record_claim("conflict");
                return Step::Advance(AttemptOutcome::ClaimConflict);
            }
            Err(e) => {
                metrics::record_claim("error");
                return Step::Advance(AttemptOutcome::ClaimFailed(e));
            }
        }
        let guard = self
            .accounting
            .releases()
            .then(|| ClaimGuard::new(self.accounting.clone(), target));

        let response = match self.forwarder.forward(target, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(endpoint = %target.endpoint, error = %e, "Upstream error");
                release_claim(guard).await;
                return Step::Advance(AttemptOutcome::BackendFailed(e));
            }
        };

        let status = response.status();
        if self.settings.failover_on_server_error && status.is_server_error() {
            tracing::warn!(endpoint = %target.endpoint, status = %status, "Upstream server error");
            release_claim(guard).await;
            return Step::Advance(AttemptOutcome::BackendStatus(status));
        }

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        let cacheable = cache_key.filter(|_| {
            status.is_success()
                && content_length(&parts.headers).is_some_and(|len| len <= self.settings.max_cacheable_bytes)
        });

        let Some(key) = cacheable else {
            if cache_key.is_some() {
                mark_cache_status(&mut parts.headers, false);
            }
            let body = idle_bounded(body, self.settings.backend_timeout, guard);
            return Step::Served(Response::from_parts(parts, body), status);
        };

        let buffered = with_deadline(
            self.settings.backend_timeout,
            axum::body::to_bytes(body, self.settings.max_cacheable_bytes),
        )
        .await;
        let bytes = match buffered {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::error!(endpoint = %target.endpoint, error = %e, "Failed to buffer cacheable response");
                release_claim(guard).await;
                return Step::Abort(AttemptOutcome::CacheWriteFailed, DispatchError::CacheWrite(e.to_string()));
            }
            Err(elapsed) => {
                // Nothing has reached the client yet, so another candidate can still answer.
                tracing::warn!(endpoint = %target.endpoint, timeout = ?elapsed, "Upstream body stalled");
                release_claim(guard).await;
                return Step::Advance(AttemptOutcome::BackendFailed(ForwardError::Timeout(elapsed)));
            }
        };
        release_claim(guard).await;

        // A HEAD entry has no body to derive the length from.
        let mut stored_headers = parts.headers.clone();
        if request.method != Method::HEAD {
            stored_headers.remove(header::CONTENT_LENGTH);
        }
        self.cache.insert(
            key.clone(),
            CachedResponse {
                status,
                headers: stored_headers,
                body: bytes.clone(),
            },
            self.settings.cache_ttl,
        );

        mark_cache_status(&mut parts.headers, false);
        Step::Served(Response::from_parts(parts, Body::from(bytes)), status)
    }
}

/// Stream `body` through, ending it with an error once the backend has been
/// silent for `idle`. The claim is held until the stream is finished or dropped.
fn idle_bounded(body: Body, idle: Duration, claim: Option<ClaimGuard>) -> Body {
    let chunks = stream::unfold(Some((body.into_data_stream(), claim)), move |state| async move {
        let (mut data, claim) = state?;
        match tokio::time::timeout(idle, data.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some((data, claim)))),
            Ok(Some(Err(e))) => Some((Err(io::Error::other(e)), None)),
            Ok(None) => None,
            Err(_) => {
                tracing::warn!(idle = ?idle, "Upstream body stalled, closing response");
                Some((Err(io::Error::new(io::ErrorKind::TimedOut, "upstream body stalled")), None))
            }
        }
    });
    Body::from_stream(chunks)
}

fn fail(mut report: DispatchReport, error: DispatchError) -> DispatchOutcome {
    let response = error.to_response();
    report.error = Some(error);
    DispatchOutcome { response, report }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
