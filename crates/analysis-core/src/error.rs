use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A worker crashed or vanished before producing a result.
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl AnalysisError {
    /// Whether a provider call that failed with this error is worth retrying.
    ///
    /// Rate limiting (429), request timeouts (408), server errors (5xx) and
    /// transport failures are transient. Everything else fails the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..=599).contains(status)
            }
            AnalysisError::Network(_) => true,
            _ => false,
        }
    }

    /// HTTP status code, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            AnalysisError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> AnalysisError {
        AnalysisError::Http { status, message: String::new() }
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_retryable() {
        assert!(http(429).is_retryable());
        assert!(http(408).is_retryable());
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(AnalysisError::Network("timed out".into()).is_retryable());
    }

    #[test]
    fn test_client_errors_are_fatal() {
        assert!(!http(400).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(!AnalysisError::Decode("bad json".into()).is_retryable());
        assert!(!AnalysisError::InvalidData("nan".into()).is_retryable());
        assert!(!AnalysisError::TaskFailed("panicked".into()).is_retryable());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(http(502).status(), Some(502));
        assert_eq!(AnalysisError::Network("reset".into()).status(), None);
    }
}
