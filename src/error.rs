use std::{sync::Arc, time::Duration};

/// Represents a result type for operations in the FlagVault SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the FlagVault SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The client could not be constructed from the provided configuration.
    #[error("{0}")]
    InvalidConfig(String),

    /// A method was called with invalid arguments (e.g., an empty flag key).
    #[error("{0}")]
    InvalidArgument(String),

    /// The API rejected the credentials (HTTP 401 or 403).
    #[error("{0}")]
    Authentication(String),

    /// The request did not complete: timeout, connection failure, or another transport error.
    #[error("{0}")]
    Network(String),

    /// The API responded with an unexpected status or an undecodable body.
    #[error("{message}")]
    Api {
        /// HTTP status code, if the server responded at all.
        status: Option<u16>,
        /// Human-readable description of the failure.
        message: String,
    },

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// An I/O error (e.g., the refresh thread failed to start).
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Indicates that the background refresh thread panicked. This should normally never happen.
    #[error("refresh thread panicked")]
    RefreshThreadPanicked,
}

impl Error {
    /// Returns `true` for authentication and authorization failures.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }

    /// Returns `true` for timeouts, connection failures, and other transport errors.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Returns `true` for unexpected API responses.
    pub fn is_api(&self) -> bool {
        matches!(self, Error::Api { .. })
    }

    pub(crate) fn api(status: Option<u16>, message: impl Into<String>) -> Error {
        Error::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify a transport-level `reqwest` error.
    pub(crate) fn from_transport(err: reqwest::Error, timeout: Duration) -> Error {
        let err = err.without_url();
        if err.is_timeout() {
            Error::Network(format!(
                "Request timed out after {} seconds",
                timeout.as_secs_f64()
            ))
        } else if err.is_connect() {
            Error::Network(format!("Failed to connect to API: {err}"))
        } else if err.is_decode() {
            Error::api(None, format!("Invalid JSON response: {err}"))
        } else {
            Error::Network(format!("Network error: {err}"))
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn classifies_errors() {
        assert!(Error::Authentication("Invalid API credentials".into()).is_authentication());
        assert!(Error::Network("Request timed out".into()).is_network());
        assert!(Error::api(Some(500), "Failed to fetch flags: 500").is_api());
        assert!(!Error::InvalidArgument("bad".into()).is_api());
    }

    #[test]
    fn displays_message() {
        let err = Error::api(Some(500), "Failed to fetch flags: 500 Internal Server Error");
        assert_eq!(
            err.to_string(),
            "Failed to fetch flags: 500 Internal Server Error"
        );
    }
}
