//! Error types for the HTTP transfer engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::transfer::TransferOutcome;

/// Errors that end a transfer before its bytes are all written.
#[derive(Debug, Error)]
pub enum HostError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response other than the auth and license cases.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the transfer.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The server asked for credentials.
    #[error("authentication required downloading {url}")]
    AuthRequired {
        /// Where the request ended up after redirects.
        url: String,
    },

    /// The server asked for a license to be accepted.
    #[error("license acceptance required downloading {url}")]
    EulaRequired {
        /// Where the request ended up after redirects.
        url: String,
    },
}

impl HostError {
    /// Creates a network error, classifying timeouts separately.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The `Done` outcome reported for this error.
    #[must_use]
    pub fn into_outcome(self) -> TransferOutcome {
        match self {
            Self::AuthRequired { url } => TransferOutcome::AuthRequired {
                auth_url: Some(url),
            },
            Self::EulaRequired { url } => TransferOutcome::EulaRequired {
                eula_url: Some(url),
            },
            other => TransferOutcome::Interrupted {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let error = HostError::http_status("https://example.com/a.nc", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/a.nc"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_auth_and_eula_map_to_waiting_outcomes() {
        let auth = HostError::AuthRequired {
            url: "https://urs.example.com/login".to_string(),
        };
        assert_eq!(
            auth.into_outcome(),
            TransferOutcome::AuthRequired {
                auth_url: Some("https://urs.example.com/login".to_string())
            }
        );
        let eula = HostError::EulaRequired {
            url: "https://example.com/eula".to_string(),
        };
        assert!(matches!(
            eula.into_outcome(),
            TransferOutcome::EulaRequired { eula_url: Some(_) }
        ));
    }

    #[test]
    fn test_other_errors_interrupt_with_reason() {
        let error = HostError::io(
            "/tmp/a.nc",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        match error.into_outcome() {
            TransferOutcome::Interrupted { reason } => assert!(reason.contains("/tmp/a.nc")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
