//! Error types for ThreadLens
//!
//! The analyzer taxonomy distinguishes transient failures (retried with
//! backoff) from semantic ones (failed immediately).

use thiserror::Error;

/// Failures of the external text-analysis model.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer request timed out")]
    Timeout,

    #[error("analyzer rate limit exceeded")]
    RateLimited,

    /// The analyzer answered, but not with the structured shape we asked for.
    /// Retrying cannot fix a format mismatch, so this is never retried.
    #[error("analyzer returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("analyzer transport error: {0}")]
    Http(String),
}

impl AnalyzerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalyzerError::Timeout | AnalyzerError::RateLimited | AnalyzerError::Http(_)
        )
    }
}

/// Main error type for ThreadLens operations
#[derive(Error, Debug)]
pub enum ThreadLensError {
    #[error("unknown session: {0}")]
    SessionNotFound(String),

    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("message {index} not found in thread {thread_id}")]
    MessageNotFound { thread_id: String, index: usize },

    #[error("no report available for session {0}")]
    ReportNotAvailable(String),

    #[error("no threads available for analysis in session {0}")]
    NoThreads(String),

    #[error("an operation is already running for session {0}")]
    AlreadyRunning(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for ThreadLensError {
    fn from(err: sqlx::Error) -> Self {
        ThreadLensError::Storage(err.to_string())
    }
}

impl ThreadLensError {
    /// True for errors that should surface as a missing-resource condition
    /// rather than a server fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ThreadLensError::SessionNotFound(_)
                | ThreadLensError::ThreadNotFound(_)
                | ThreadLensError::MessageNotFound { .. }
                | ThreadLensError::ReportNotAvailable(_)
                | ThreadLensError::NoThreads(_)
        )
    }
}

/// Result type alias for ThreadLens operations
pub type Result<T> = std::result::Result<T, ThreadLensError>;
