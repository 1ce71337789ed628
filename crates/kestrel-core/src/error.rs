use thiserror::Error;

/// Application-wide error types for Kestrel.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (listing fetch, API call).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// A browser or network step ran past its timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The target answered with a redirect/captcha wall instead of content.
    #[error("Blocked by target: {0}")]
    Blocked(String),

    /// The target flagged the session as automated traffic.
    #[error("Automation detected: {0}")]
    AutomationDetected(String),

    /// Caller-supplied data was rejected (bad postcode, malformed listing, empty proxy).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Browser driver failure that is not a timeout.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem failure in a sink.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if the target recognised the session. Such errors are
    /// never retried on the same identity.
    pub fn is_detection(&self) -> bool {
        matches!(
            self,
            AppError::Blocked(_) | AppError::AutomationDetected(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}
