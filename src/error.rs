//! Error types for quota stores, configuration and the admission middleware.
use std::time::Duration;

use crate::decision::Decision;

/// Failure talking to the shared quota store.
///
/// These never reach callers of [`QuotaEngine::evaluate`](crate::QuotaEngine::evaluate):
/// contention becomes a short-retry denial, everything else is decided by the
/// engine's [`FailurePolicy`](crate::FailurePolicy).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("quota store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The operation did not finish within the configured store timeout.
    #[error("quota store did not answer within {0:?}")]
    Timeout(Duration),
    /// Concurrent writers kept winning the compare-and-swap race until the
    /// deadline. The store itself is healthy.
    #[error("quota record '{key}' still contended after {attempts} attempts")]
    Contention {
        /// Record key.
        key: String,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// A stored record could not be encoded or decoded.
    #[error("quota record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    /// Wrap any backend error as [`StoreError::Unavailable`].
    pub fn unavailable<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Unavailable(Box::new(err))
    }

    /// Check if this error is due to the store timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

/// Invalid limiter configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A quota that admits nothing.
    #[error("{field} must be > 0")]
    ZeroLimit {
        /// Offending field.
        field: &'static str,
    },
    /// A window or interval of zero length.
    #[error("{field} must be a non-zero duration")]
    ZeroDuration {
        /// Offending field.
        field: &'static str,
    },
    /// Escalation steps that cannot be evaluated.
    #[error("invalid escalation policy: {0}")]
    Escalation(String),
    /// The config document could not be parsed.
    #[error("invalid limiter config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error returned by the admission middleware and [`QuotaEngine::execute`](crate::QuotaEngine::execute).
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError<E> {
    /// The request was not admitted. Carries the full decision for response headers.
    #[error("request rejected: {}", .0.reason_code())]
    Rejected(Decision),
    /// The guarded operation itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> AdmissionError<E> {
    /// Check if the request was rejected by the quota engine.
    pub fn is_rejected(&self) -> bool {
        matches!(self, AdmissionError::Rejected(_))
    }

    /// Borrow the rejection decision, if any.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            AdmissionError::Rejected(d) => Some(d),
            AdmissionError::Inner(_) => None,
        }
    }

    /// Get the inner error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            AdmissionError::Inner(e) => Some(e),
            AdmissionError::Rejected(_) => None,
        }
    }
}
