//! Error types for the control client.

use thiserror::Error;

/// Errors returned by [`ControlClient`](crate::ControlClient) calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The manager answered with a non-success status.
    #[error("{path} returned status {status}")]
    Status {
        /// Request path.
        path: String,
        /// HTTP status code.
        status: u16,
    },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,

    /// The client could not be constructed.
    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() {
            ClientError::Connection(err.to_string())
        } else if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_names_the_path() {
        let err = ClientError::Status {
            path: "/nodes/status".to_string(),
            status: 503,
        };
        assert_eq!(err.to_string(), "/nodes/status returned status 503");
    }
}
