//! HTTP access to the KiotViet API
//!
//! [`KiotVietClient`] attaches the bearer token and retailer/branch headers,
//! retries transient failures through [`retry::with_backoff`] and translates
//! everything else into [`ApiError`].

pub mod http;
pub mod retry;

pub use http::KiotVietClient;
pub use retry::{with_backoff, Attempt, RetryPolicy};

/// Errors surfaced by the HTTP client after retries are exhausted
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Connection, TLS, timeout or body-read failure
    #[error("transport error calling {endpoint}: {message}")]
    Transport {
        /// Endpoint that failed
        endpoint: String,
        /// Underlying error
        message: String,
    },

    /// Non-2xx response
    #[error("API error {status_code} from {endpoint}: {message}")]
    Status {
        /// HTTP status code
        status_code: u16,
        /// Endpoint that failed
        endpoint: String,
        /// Response body (truncated)
        message: String,
    },

    /// 2xx response whose body is not the expected JSON
    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse {
        /// Endpoint that failed
        endpoint: String,
        /// Parse failure
        message: String,
    },

    /// The underlying HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl ApiError {
    /// HTTP status code, when the failure carried one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// 401 or 403: no later call with the same token can succeed
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status_code(), Some(401 | 403))
    }
}

/// Result alias for client calls
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_detection() {
        let unauthorized = ApiError::Status {
            status_code: 401,
            endpoint: "/invoices/list".to_string(),
            message: "token expired".to_string(),
        };
        let not_found = ApiError::Status {
            status_code: 404,
            endpoint: "/invoices/9/details".to_string(),
            message: String::new(),
        };
        let transport = ApiError::Transport {
            endpoint: "/invoices/list".to_string(),
            message: "connection reset".to_string(),
        };

        assert!(unauthorized.is_auth_failure());
        assert!(!not_found.is_auth_failure());
        assert!(!transport.is_auth_failure());
        assert_eq!(not_found.status_code(), Some(404));
        assert!(unauthorized.to_string().contains("401"));
    }
}
