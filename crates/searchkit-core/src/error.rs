use serde::{Deserialize, Serialize};

/// Retry classification attached to every error.
///
/// Classification is a pure function of this tag: provider adapters decide the
/// kind at the boundary, the worker never inspects error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, rate limits, 5xx and store hiccups. Retried with backoff.
    Transient,
    /// Any other rejection. Dead-lettered immediately.
    Permanent,
    /// The entity (or its assets) no longer exists. Completes the task.
    NotFound,
}

impl ErrorKind {
    /// Map an HTTP status code returned by an embedding provider.
    ///
    /// 408, 429 and 5xx are transient; every other non-success status is permanent.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            408 | 429 => ErrorKind::Transient,
            500..=599 => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    /// Whether a failure of this kind should be retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
            ErrorKind::NotFound => write!(f, "not_found"),
        }
    }
}

/// Top-level error type for searchkit.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchkitError {
    /// Bad configuration or malformed input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The hydrated document or asset list is missing.
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// An embedding provider call failed.
    #[error("Provider error ({kind}): {message}")]
    Provider {
        /// Retry classification decided by the adapter.
        kind: ErrorKind,
        /// Provider message, kept for the dead-letter record.
        message: String,
    },

    /// The relational store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// The surrounding tick was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchkitError {
    /// Shorthand for a retryable provider failure.
    pub fn transient(message: impl Into<String>) -> Self {
        SearchkitError::Provider {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Shorthand for a non-retryable provider failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        SearchkitError::Provider {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Shorthand for a missing entity.
    pub fn not_found(message: impl Into<String>) -> Self {
        SearchkitError::NotFound(message.into())
    }

    /// Retry classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchkitError::Provider { kind, .. } => *kind,
            SearchkitError::NotFound(_) => ErrorKind::NotFound,
            SearchkitError::Validation(_)
            | SearchkitError::Config(_)
            | SearchkitError::Json(_) => ErrorKind::Permanent,
            SearchkitError::Store(_) | SearchkitError::Io(_) | SearchkitError::Cancelled => {
                ErrorKind::Transient
            }
        }
    }
}

/// A convenience `Result` alias using [`SearchkitError`].
pub type SearchkitResult<T> = Result<T, SearchkitError>;
