//! Error types for pipeline operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed call to an external platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalErrorKind {
    /// Platform throttled the request.
    RateLimited,
    /// Credential rejected; the user must re-authenticate.
    Unauthorized,
    /// Temporary failure (5xx, transport error, timeout).
    Transient,
    /// Request rejected for good (malformed content, policy violation).
    Terminal,
}

impl ExternalErrorKind {
    /// Whether the engine may retry automatically.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }

    /// Map an HTTP status code to an error class.
    ///
    /// Returns `None` for success statuses.
    #[must_use]
    pub const fn from_http_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            429 => Some(Self::RateLimited),
            401 | 403 => Some(Self::Unauthorized),
            408 | 500..=599 => Some(Self::Transient),
            _ => Some(Self::Terminal),
        }
    }
}

impl fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::Transient => "transient",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Errors produced by pipeline components.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Input rejected before any state was touched.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Requested transition is illegal from the current state.
    #[error("state conflict: {0}")]
    StateConflict(String),
    /// Referenced entity does not exist.
    #[error("{entity} `{id}` not found")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Requested identifier.
        id: String,
    },
    /// External platform call failed.
    #[error("external api error ({kind}): {message}")]
    ExternalApi {
        /// Failure class.
        kind: ExternalErrorKind,
        /// Platform-provided detail.
        message: String,
    },
    /// A recurring job missed its expected cadence.
    #[error("job `{job_id}` stalled: no execution for {idle_secs}s")]
    StalledJob {
        /// Job identifier.
        job_id: String,
        /// Seconds since the last observed execution.
        idle_secs: i64,
    },
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for [`PipelineError::StateConflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict(message.into())
    }

    /// Shorthand for [`PipelineError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the error is a conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::StateConflict(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification() {
        assert_eq!(ExternalErrorKind::from_http_status(201), None);
        assert_eq!(
            ExternalErrorKind::from_http_status(429),
            Some(ExternalErrorKind::RateLimited)
        );
        assert_eq!(
            ExternalErrorKind::from_http_status(401),
            Some(ExternalErrorKind::Unauthorized)
        );
        assert_eq!(
            ExternalErrorKind::from_http_status(403),
            Some(ExternalErrorKind::Unauthorized)
        );
        assert_eq!(
            ExternalErrorKind::from_http_status(503),
            Some(ExternalErrorKind::Transient)
        );
        assert_eq!(
            ExternalErrorKind::from_http_status(422),
            Some(ExternalErrorKind::Terminal)
        );
    }

    #[test]
    fn only_rate_limited_and_transient_retry() {
        assert!(ExternalErrorKind::RateLimited.is_retryable());
        assert!(ExternalErrorKind::Transient.is_retryable());
        assert!(!ExternalErrorKind::Unauthorized.is_retryable());
        assert!(!ExternalErrorKind::Terminal.is_retryable());
    }
}
