//! Error types shared by every stage of a traversal.
//!
//! API failures are classified once, at the client boundary, into [`ApiError`]. The engine
//! only ever asks one question of them ([`ApiError::is_rate_limited`]) to decide between
//! re-enqueueing and abandoning a task.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by the content API (or the transport underneath it).
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// HTTP 429. `retry_after` is the server's hint, when it sent one.
    #[error("rate limited (status 429, code {code:?}): {message}")]
    RateLimited {
        code: Option<String>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other non-success response.
    #[error("request failed (status {status}, code {code:?}): {message}")]
    Request {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Connection, TLS or timeout failure before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response arrived but did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Log tag used for this class of failure in the runtime log.
    pub fn action_tag(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "BOX_RATE_LIMITED",
            ApiError::Request { .. } => "BOX_REQUEST_FAILED",
            ApiError::Transport(_) | ApiError::Decode(_) => "UNKNOWN_ERROR",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("user {0} is not registered")]
    NotFound(String),
}

/// Why a [`TaskHandle`](crate::queue::TaskHandle) resolved without a value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task panicked")]
    Panicked,

    #[error("task was dropped before it ran")]
    Dropped,
}

/// Error returned by a user-defined action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{0}")]
    Other(String),
}

/// Configuration problems detected before any traversal starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the csv feature cannot be combined with the allowlist or denylist features")]
    CsvWithLists,

    #[error("csv.filePath must be set when csv is enabled")]
    MissingCsvPath,

    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),

    #[error("auditReport.uploadFolderId must be set when auditReport.uploadToBox is enabled")]
    MissingUploadFolder,

    #[error("userDefinedLogic.{0} must be set for modifySharedLinks")]
    MissingSharedLinkLevel(&'static str),

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

/// Fatal failure of a whole run (as opposed to a single task).
#[derive(Debug, Error)]
pub enum TraverseError {
    #[error("failed to enumerate target users: {0}")]
    Enumeration(#[source] ApiError),

    #[error("failed to authenticate service account: {0}")]
    ServiceAccount(#[source] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_classified() {
        let err = ApiError::RateLimited {
            code: Some("rate_limit_exceeded".into()),
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(err.action_tag(), "BOX_RATE_LIMITED");
    }

    #[test]
    fn other_failures_are_not_rate_limited() {
        let err = ApiError::Request {
            status: 404,
            code: Some("not_found".into()),
            message: "Not Found".into(),
        };
        assert!(!err.is_rate_limited());
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.action_tag(), "BOX_REQUEST_FAILED");
        assert_eq!(ApiError::Transport("reset".into()).action_tag(), "UNKNOWN_ERROR");
    }
}
