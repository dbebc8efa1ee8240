//! Error types for listing analysis
//!
//! Three layers, innermost first:
//! - [`ModelError`]: what the external model client reports for a single attempt
//! - [`CallError`]: what a resilient call reports after breaker + retry
//! - [`AnalysisError`]: what callers of the orchestrator see

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::PromptKind;

/// Result type alias for listing analysis
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Failure reported by the external model client for one attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// No reply arrived within the attempt deadline
    #[error("model call timed out: {0}")]
    Timeout(String),

    /// Provider throttled the request
    #[error("rate limited by model provider: {0}")]
    RateLimited(String),

    /// Credentials were rejected
    #[error("model provider rejected credentials: {0}")]
    AuthFailed(String),

    /// Account quota is spent and will not refill within a retry window
    #[error("model provider quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Provider is down or returned a server-side failure
    #[error("model provider unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the request as malformed
    #[error("model provider rejected input: {0}")]
    MalformedInput(String),
}

impl ModelError {
    /// Whether repeating the same call unchanged could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModelError::Timeout(_) | ModelError::RateLimited(_) | ModelError::Unavailable(_)
        )
    }
}

/// Failure of one resilient call (breaker + retry around a model call).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// The wrapped operation itself failed
    #[error(transparent)]
    Dependency(#[from] ModelError),

    /// The breaker refused the call without invoking the operation
    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The caller abandoned the call
    #[error("call cancelled")]
    Cancelled,
}

/// Stable tag for every terminal analysis error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotAProduct,
    TransientDependency,
    PermanentDependency,
    CircuitOpen,
    Cancelled,
    InvalidRequest,
    MalformedReply,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotAProduct => "not_a_product",
            ErrorKind::TransientDependency => "transient_dependency",
            ErrorKind::PermanentDependency => "permanent_dependency",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::MalformedReply => "malformed_reply",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`crate::ListingOrchestrator::analyze`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// The classification gate rejected the image. `reason` is user-facing and
    /// already phrased in the requested language.
    #[error("image is not a product: {reason}")]
    NotAProduct {
        reason: String,
        category: Option<String>,
    },

    /// Retries were exhausted on a transient dependency failure
    #[error("{stage} call failed after retries: {source}")]
    TransientDependency {
        stage: PromptKind,
        #[source]
        source: ModelError,
    },

    /// The dependency failed in a way retries cannot fix
    #[error("{stage} call failed: {source}")]
    PermanentDependency {
        stage: PromptKind,
        #[source]
        source: ModelError,
    },

    /// The breaker is protecting a known-unhealthy dependency
    #[error(
        "service temporarily disabled due to repeated {stage} failures, retry in {}s",
        retry_after.as_secs()
    )]
    CircuitOpen {
        stage: PromptKind,
        retry_after: Duration,
    },

    /// The caller abandoned the analysis
    #[error("analysis cancelled")]
    Cancelled,

    /// The request was rejected before any model call
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// A model reply could not be interpreted under the strict reply policy
    #[error("{stage} reply could not be interpreted: {message}")]
    MalformedReply { stage: PromptKind, message: String },
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::NotAProduct { .. } => ErrorKind::NotAProduct,
            AnalysisError::TransientDependency { .. } => ErrorKind::TransientDependency,
            AnalysisError::PermanentDependency { .. } => ErrorKind::PermanentDependency,
            AnalysisError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            AnalysisError::Cancelled => ErrorKind::Cancelled,
            AnalysisError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            AnalysisError::MalformedReply { .. } => ErrorKind::MalformedReply,
        }
    }

    /// Human-readable reason. For [`AnalysisError::NotAProduct`] this is the
    /// model's reason verbatim.
    pub fn reason(&self) -> String {
        match self {
            AnalysisError::NotAProduct { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the same request may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::TransientDependency { .. } | AnalysisError::CircuitOpen { .. }
        )
    }
}
