//! Application error types

use thiserror::Error;

/// Errors from the scan engine HTTP surface
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Scan engine temporarily unavailable")]
    ServiceUnavailable,
}

/// Errors surfaced by the tracking engine
#[derive(Error, Debug)]
pub enum TrackError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The backend has no record of the job. Terminal, never retried.
    #[error("Scan engine has no record of job {job_id}")]
    NotFound { job_id: String },

    #[error("Invalid response from scan engine: {0}")]
    InvalidResponse(String),

    #[error("Insufficient scan credits")]
    InsufficientCredits,

    #[error("Submission rejected by scan engine: {0}")]
    Rejected(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl TrackError {
    /// Whether a failed call may be retried within the same or next
    /// scheduler cycle. Not-found is terminal; client-side rejections are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackError::Network(_) => true,
            TrackError::Timeout { .. } => true,
            TrackError::Api(ApiError::ServiceUnavailable) => true,
            // Server errors and rate limiting are transient
            TrackError::Api(ApiError::Http { status, .. }) => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TrackError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrackError::Timeout { seconds: 0 }
        } else if err.is_connect() {
            TrackError::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            TrackError::InvalidResponse(err.to_string())
        } else {
            TrackError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TrackError {
    fn from(err: serde_json::Error) -> Self {
        TrackError::InvalidResponse(format!("JSON parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(TrackError::Network("reset".into()).is_retryable());
        assert!(TrackError::Timeout { seconds: 30 }.is_retryable());
        assert!(TrackError::Api(ApiError::ServiceUnavailable).is_retryable());
        assert!(TrackError::Api(ApiError::Http {
            status: 503,
            message: "Service Unavailable".into()
        })
        .is_retryable());
        assert!(TrackError::Api(ApiError::Http {
            status: 429,
            message: "Too Many Requests".into()
        })
        .is_retryable());

        assert!(!TrackError::NotFound { job_id: "J4".into() }.is_retryable());
        assert!(!TrackError::Api(ApiError::Http {
            status: 400,
            message: "Bad Request".into()
        })
        .is_retryable());
        assert!(!TrackError::InsufficientCredits.is_retryable());
        assert!(!TrackError::Rejected("invalid target".into()).is_retryable());
    }

    #[test]
    fn test_not_found_display_names_the_job() {
        let err = TrackError::NotFound { job_id: "J4".into() };
        assert!(err.to_string().contains("J4"));
        assert!(err.to_string().contains("no record"));
    }
}
