//! Error types for the HTTP layer.
//!
//! Every variant carries the URL it concerns so failures surfacing in a batch
//! report can be traced back to the request that produced them.

use thiserror::Error;

/// Errors that can occur while executing an HTTP request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Network-level error (DNS resolution, connection refused, TLS, broken body stream).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

/// Errors raised while building an [`HttpClient`](super::HttpClient).
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// A configured header value cannot be sent on the wire.
    #[error("invalid {name} header value: {value:?}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },

    /// The reqwest client (TLS backend, proxy settings) failed to initialize.
    #[error("failed to initialize HTTP client: {0}")]
    Backend(#[from] reqwest::Error),
}

impl HttpError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the HTTP status code when the server answered with one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true when the request never produced a usable HTTP response
    /// (connection failure, timeout, broken body stream).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

// No `From<reqwest::Error>`: every variant needs the request URL for context,
// so callers go through the helper constructors above.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_timeout_display() {
        let error = HttpError::timeout("https://api.example.com/token");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://api.example.com/token"));
    }

    #[test]
    fn test_http_error_http_status_display() {
        let error = HttpError::http_status("https://api.example.com/music", 503);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected '503' in: {msg}");
        assert!(msg.contains("https://api.example.com/music"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_http_error_invalid_url_display() {
        let error = HttpError::invalid_url("not-a-url");
        let msg = error.to_string();
        assert!(msg.contains("invalid URL"), "Expected 'invalid URL' in: {msg}");
        assert!(msg.contains("not-a-url"));
    }

    #[test]
    fn test_http_error_status_accessor() {
        assert_eq!(HttpError::http_status("http://x", 401).status(), Some(401));
        assert_eq!(HttpError::timeout("http://x").status(), None);
    }

    #[test]
    fn test_http_error_transport_classification() {
        assert!(HttpError::timeout("http://x").is_transport());
        assert!(!HttpError::http_status("http://x", 500).is_transport());
        assert!(!HttpError::invalid_url("x").is_transport());
    }
}
