//! Error handling for the mining client
//!
//! One error type covers ledger access, text generation, hashing and
//! configuration. Transient infrastructure failures are told apart from
//! round-ending outcomes through [`Error::is_retryable`].

use thiserror::Error;

/// Result type alias for mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mining client
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Ledger read or protocol errors
    #[error("Ledger error: {message}")]
    Ledger { message: String },

    /// Text generation errors
    #[error("Text generation error: {message}")]
    Generator { message: String },

    /// Submission failed before or during inclusion
    #[error("Submission rejected: {message}")]
    Submission { message: String },

    /// Candidate text outside the accepted byte bounds
    #[error("Invalid candidate: {message}")]
    InvalidCandidate { message: String },

    /// Target parsing errors
    #[error("Invalid target: {message}")]
    Target { message: String },

    /// A single hash worker failed
    #[error("Worker {worker_id} failed: {message}")]
    Worker { worker_id: usize, message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Network errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Cancellation of an async operation (external stop)
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a ledger error
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }

    /// Create a text generation error
    pub fn generator(message: impl Into<String>) -> Self {
        Self::Generator {
            message: message.into(),
        }
    }

    /// Create a submission error
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }

    /// Create an invalid candidate error
    pub fn invalid_candidate(message: impl Into<String>) -> Self {
        Self::InvalidCandidate {
            message: message.into(),
        }
    }

    /// Create a target error
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_id: usize, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_id,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Check if error is a transient infrastructure failure
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request()
                }
            }
            Error::Network { .. } => true,
            Error::Timeout { .. } => true,
            Error::Ledger { .. } => true,
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Ledger { .. } => "ledger",
            Error::Generator { .. } => "generator",
            Error::Submission { .. } => "submission",
            Error::InvalidCandidate { .. } => "invalid_candidate",
            Error::Target { .. } => "target",
            Error::Worker { .. } => "worker",
            Error::Timeout { .. } => "timeout",
            Error::Network { .. } => "network",
            Error::Cancelled { .. } => "cancelled",
        }
    }
}
