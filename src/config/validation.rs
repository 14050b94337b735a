//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check the coordination layout is usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ProxyConfig, StoreBackend};

/// One semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let dir = &config.coordination.targets_path;
    if !dir.starts_with('/') || dir.len() < 2 || dir.ends_with('/') {
        errors.push(ValidationError::new(
            "coordination.targets_path",
            "must be an absolute path below the root, without a trailing slash",
        ));
    }
    if config.coordination.operation_timeout_ms == 0 {
        errors.push(ValidationError::new("coordination.operation_timeout_ms", "must be > 0"));
    }
    if config.coordination.backend == StoreBackend::Zookeeper && !cfg!(feature = "zookeeper") {
        errors.push(ValidationError::new(
            "coordination.backend",
            "zookeeper support was not compiled in (enable the `zookeeper` feature)",
        ));
    }

    for (field, value) in [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.backend_secs", config.timeouts.backend_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if config.timeouts.backend_secs > 0 && config.timeouts.request_secs <= config.timeouts.backend_secs {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than timeouts.backend_secs"));
    }

    if config.cache.enabled {
        if config.cache.ttl_secs == 0 {
            errors.push(ValidationError::new("cache.ttl_secs", "must be > 0 when the cache is enabled"));
        }
        if config.cache.sweep_interval_secs == 0 {
            errors.push(ValidationError::new("cache.sweep_interval_secs", "must be > 0"));
        }
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
