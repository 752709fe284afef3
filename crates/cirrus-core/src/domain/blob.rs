//! Blob identity types: etags, leases and conditional read outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque version token assigned by the store on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Etag(String);

impl Etag {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a granted blob lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of a conditional read.
///
/// `NotModified` and `NotFound` are kept apart; `into_option` collapses them
/// for callers that only care about "is there something new".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfModified<T> {
    Modified { value: T, etag: Etag },
    NotModified,
    NotFound,
}

impl<T> IfModified<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            IfModified::Modified { value, .. } => Some(value),
            IfModified::NotModified | IfModified::NotFound => None,
        }
    }
}

/// Outcome of a lease acquisition. Contention is a value, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseResponse {
    Acquired(LeaseId),
    Conflict,
    NotFound,
}
