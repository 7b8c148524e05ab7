//! Error types for the segment pipeline

use std::fmt;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while producing segments
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The generation service did not answer in time
    #[error("Request timeout")]
    Timeout,

    /// The generation service answered with a non-success status
    #[error("Generation service returned status {0}")]
    Status(u16),

    /// The response decoded but failed validation
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The response contained no segment
    #[error("Generation service returned an empty batch")]
    EmptyBatch,

    /// Requested batch size outside 1..=10
    #[error("Invalid segment count: {0} (must be 1-10)")]
    InvalidSegmentCount(usize),

    /// The request was cancelled before completion
    #[error("Request cancelled")]
    Cancelled,

    /// The initial segment source returned nothing
    #[error("Initial segment source returned no segment")]
    EmptyInitialSegments,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the failure comes from decoding or validating a response
    ///
    /// Everything else (timeouts, transport, status codes) is transient.
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::Json(_) | Self::Malformed(_) | Self::EmptyBatch => true,
            Self::Http(err) => err.is_decode(),
            _ => false,
        }
    }
}

/// Terminal outcome of a retried generation run
///
/// Cloneable so that every caller awaiting the same in-flight run receives
/// the same result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// All attempts failed
    #[error("generation failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        attempts: u32,
        /// The last failure was a decoding/validation failure
        malformed: bool,
        last_error: String,
    },

    /// The run was cancelled by shutdown or a superseding request
    #[error("generation cancelled")]
    Cancelled,
}

impl RetryError {
    pub(crate) fn exhausted(attempts: u32, err: &Error) -> Self {
        Self::Exhausted {
            attempts,
            malformed: err.is_malformed(),
            last_error: err.to_string(),
        }
    }

    /// Whether the caller should fall back to a substitute batch
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Exhausted { malformed: true, .. })
    }
}

/// Printable tag for the kind of failure, used in log fields
pub(crate) struct ErrorKind<'a>(pub &'a Error);

impl fmt::Display for ErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.0.is_malformed() {
            "malformed"
        } else {
            "transient"
        };
        f.write_str(kind)
    }
}
