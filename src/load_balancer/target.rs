//! Target snapshot and candidate ordering.
//!
//! # Responsibilities
//! - Represent one registered backend as read from the directory
//! - Decode the load counter payload
//! - Order candidates least-loaded first, ties by endpoint

use std::cmp::Ordering;
use std::fmt;

use crate::registry::{Stat, Version};

/// A registered backend as seen at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// `host:port`, unique within the directory.
    pub endpoint: String,
    /// Load counter held by the node.
    pub load_count: u64,
    /// Version the counter was read at; guards the next write.
    pub version: Version,
}

impl Target {
    pub fn new(endpoint: impl Into<String>, load_count: u64, version: Version) -> Self {
        Self {
            endpoint: endpoint.into(),
            load_count,
            version,
        }
    }

    /// Build a snapshot from a node's payload, or `None` if the payload
    /// is not a decimal counter.
    pub fn from_node(endpoint: &str, data: &[u8], stat: Stat) -> Option<Self> {
        let load_count = decode_count(data)?;
        Some(Self::new(endpoint, load_count, stat.version))
    }

    /// Least loaded first; equal counts fall back to the endpoint so the
    /// order is reproducible.
    pub fn selection_order(a: &Target, b: &Target) -> Ordering {
        a.load_count
            .cmp(&b.load_count)
            .then_with(|| a.endpoint.cmp(&b.endpoint))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (load={}, {})", self.endpoint, self.load_count, self.version)
    }
}

/// Decode a counter payload ("0", "17", ...).
pub fn decode_count(data: &[u8]) -> Option<u64> {
    std::str::from_utf8(data).ok()?.trim().parse().ok()
}

/// Encode a counter as its decimal string.
pub fn encode_count(count: u64) -> Vec<u8> {
    count.to_string().into_bytes()
}

/// Candidates for one request, ascending by load.
///
/// Immutable once built; failover walks it front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList {
    targets: Vec<Target>,
}

impl CandidateList {
    pub fn new(mut targets: Vec<Target>) -> Self {
        targets.sort_by(Target::selection_order);
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Target> {
        self.targets.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_loaded_first() {
        let list = CandidateList::new(vec![
            Target::new("10.0.0.1:9001", 3, Version(5)),
            Target::new("10.0.0.1:9002", 1, Version(2)),
        ]);
        assert_eq!(list.get(0).unwrap().endpoint, "10.0.0.1:9002");
        assert_eq!(list.get(1).unwrap().endpoint, "10.0.0.1:9001");
    }

    #[test]
    fn test_ties_break_by_endpoint() {
        let a = vec![
            Target::new("10.0.0.3:80", 2, Version(0)),
            Target::new("10.0.0.1:80", 2, Version(9)),
            Target::new("10.0.0.2:80", 2, Version(4)),
        ];
        let mut b = a.clone();
        b.reverse();

        let first = CandidateList::new(a);
        let second = CandidateList::new(b);
        assert_eq!(first, second);
        let order: Vec<_> = first.iter().map(|t| t.endpoint.as_str()).collect();
        assert_eq!(order, vec!["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]);
    }

    #[test]
    fn test_decode_count() {
        assert_eq!(decode_count(b"0"), Some(0));
        assert_eq!(decode_count(b"42\n"), Some(42));
        assert_eq!(decode_count(b""), None);
        assert_eq!(decode_count(b"-1"), None);
        assert_eq!(decode_count(&[0xff, 0xfe]), None);
        assert_eq!(encode_count(12), b"12".to_vec());
    }
}
