//! Cache key derivation.

use std::fmt;

use axum::http::Method;

/// Canonical request signature: method plus path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    path: String,
}

impl CacheKey {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Only safe, idempotent reads are served from or written to the cache.
pub fn is_cacheable_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_nothing_but_method_and_path() {
        assert_eq!(
            CacheKey::new(Method::GET, "/widgets"),
            CacheKey::new(Method::GET, String::from("/widgets"))
        );
        assert_ne!(CacheKey::new(Method::GET, "/widgets"), CacheKey::new(Method::HEAD, "/widgets"));
        assert_eq!(CacheKey::new(Method::GET, "/widgets").to_string(), "GET /widgets");
    }

    #[test]
    fn test_cacheable_methods() {
        assert!(is_cacheable_method(&Method::GET));
        assert!(is_cacheable_method(&Method::HEAD));
        assert!(!is_cacheable_method(&Method::POST));
        assert!(!is_cacheable_method(&Method::PUT));
        assert!(!is_cacheable_method(&Method::DELETE));
    }
}
