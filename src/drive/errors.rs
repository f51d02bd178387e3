//! Drive API Error Types
//!
//! Closed error taxonomy for remote store operations.
//! Maps HTTP status codes and transport failures to variants the retry policy switches on.

/// Drive API error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriveError {
    #[error("Request timeout")]
    Timeout,

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Service unavailable ({status})")]
    ServiceUnavailable { status: u16 },

    #[error("Service error ({status}): {message}")]
    ServiceError { status: u16, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl DriveError {
    /// Whether this error is retryable
    ///
    /// `Unknown` stays retryable: transport and decode failures of unknown shape
    /// are often transient. `InvalidInput` never is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriveError::Timeout
                | DriveError::RateLimited
                | DriveError::ServiceUnavailable { .. }
                | DriveError::Unknown(_)
        )
    }

    /// HTTP status carried by the error, if it came from the remote service
    pub fn status(&self) -> Option<u16> {
        match self {
            DriveError::RateLimited => Some(429),
            DriveError::ServiceUnavailable { status } => Some(*status),
            DriveError::ServiceError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Create a DriveError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => DriveError::RateLimited,
            500 | 503 => DriveError::ServiceUnavailable { status },
            _ => DriveError::ServiceError {
                status,
                message: body.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return DriveError::Timeout;
        }
        match err.status() {
            Some(status) => DriveError::from_status(status.as_u16(), &err.to_string()),
            None => DriveError::Unknown(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DriveError {
    fn from(err: serde_json::Error) -> Self {
        DriveError::Unknown(format!("malformed response: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(DriveError::from_status(429, ""), DriveError::RateLimited);
        assert_eq!(
            DriveError::from_status(500, ""),
            DriveError::ServiceUnavailable { status: 500 }
        );
        assert_eq!(
            DriveError::from_status(503, "busy"),
            DriveError::ServiceUnavailable { status: 503 }
        );
        assert_eq!(
            DriveError::from_status(403, "forbidden"),
            DriveError::ServiceError {
                status: 403,
                message: "forbidden".to_string()
            }
        );
        // 502 is outside the retryable set
        assert!(!DriveError::from_status(502, "").is_retryable());
    }

    #[test]
    fn test_retryable_classes() {
        assert!(DriveError::Timeout.is_retryable());
        assert!(DriveError::RateLimited.is_retryable());
        assert!(DriveError::ServiceUnavailable { status: 503 }.is_retryable());
        assert!(DriveError::Unknown("connection reset".into()).is_retryable());

        assert!(!DriveError::from_status(404, "").is_retryable());
        assert!(!DriveError::InvalidInput("empty name".into()).is_retryable());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(DriveError::RateLimited.status(), Some(429));
        assert_eq!(DriveError::from_status(404, "").status(), Some(404));
        assert_eq!(DriveError::Timeout.status(), None);
    }
}
