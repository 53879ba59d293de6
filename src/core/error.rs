//! Error types for registry operations.
//!
//! Every operation returns an explicit [`RegistryResult`]. Two kinds are
//! ordinary outcomes rather than faults: [`RegistryError::NotFound`] and
//! [`RegistryError::CasFailed`]. Callers inspect them and the registry never
//! logs them at error level. The identifiers returned by
//! [`RegistryError::code`] are stable.

use crate::registry::lease::LeaseId;
use bytes::Bytes;
use thiserror::Error;

/// Registry error conditions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Get or delete addressed a key that has no live entry.
    #[error("key not found: {key}")]
    NotFound { key: String },

    /// A write referenced a lease that is unknown, expired or already reaped.
    #[error("lease {lease_id} not found")]
    LeaseNotFound { lease_id: LeaseId },

    /// Compare predicate did not hold. Carries the value observed at
    /// evaluation time (`None` if the key was absent).
    #[error("compare failed for key {key}")]
    CasFailed { key: String, current: Option<Bytes> },

    /// Watch consumer fell behind past the buffering bound. The stream is
    /// terminated; `last_revision` is the last revision it delivered.
    #[error("watch {watch_id} overrun after revision {last_revision}")]
    Overrun { watch_id: u64, last_revision: u64 },

    /// Backing store is unreachable or has been shut down.
    #[error("registry unavailable: {reason}")]
    Unavailable { reason: String },

    /// Malformed request (empty key, TTL out of bounds, ...).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Broken internal invariant.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RegistryError {
    /// Create a NotFound error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an Unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable identifier for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::LeaseNotFound { .. } => "LeaseNotFound",
            Self::CasFailed { .. } => "CasFailed",
            Self::Overrun { .. } => "Overrun",
            Self::Unavailable { .. } => "Unavailable",
            Self::InvalidRequest { .. } => "InvalidRequest",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Outcomes that callers are expected to inspect rather than treat as
    /// faults.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::CasFailed { .. })
    }

    /// Whether the caller may reasonably retry (or resubscribe).
    ///
    /// The registry never retries on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Overrun { .. })
    }
}

/// Result type using RegistryError.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(RegistryError::not_found("a").code(), "NotFound");
        assert_eq!(
            RegistryError::LeaseNotFound {
                lease_id: LeaseId(7)
            }
            .code(),
            "LeaseNotFound"
        );
        assert_eq!(RegistryError::unavailable("down").code(), "Unavailable");
    }

    #[test]
    fn test_expected_and_retriable() {
        let cas = RegistryError::CasFailed {
            key: "a/x".into(),
            current: Some(Bytes::from_static(b"2")),
        };
        assert!(cas.is_expected());
        assert!(!cas.is_retriable());

        let overrun = RegistryError::Overrun {
            watch_id: 1,
            last_revision: 9,
        };
        assert!(!overrun.is_expected());
        assert!(overrun.is_retriable());
        assert!(!RegistryError::internal("x").is_retriable());
    }

    #[test]
    fn test_display() {
        let err = RegistryError::LeaseNotFound {
            lease_id: LeaseId(0x2a),
        };
        assert_eq!(err.to_string(), "lease 2a not found");
    }
}
