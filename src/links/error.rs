//! Error types for link enumeration.

use thiserror::Error;

use crate::store::{ErrorKind, ErrorRecord, StoreError};

/// Errors that stop link enumeration for a download.
#[derive(Debug, Error)]
pub enum LinkFetchError {
    /// The download has no listing endpoint.
    #[error("download {download_id} has no links endpoint")]
    MissingEndpoint {
        /// Download that was asked to enumerate.
        download_id: String,
    },

    /// The endpoint is not a valid absolute URL.
    #[error("invalid links endpoint: {url}")]
    InvalidEndpoint {
        /// The rejected value.
        url: String,
    },

    /// The endpoint host is not on the trusted list; no request was sent.
    #[error("untrusted link source {host}")]
    UntrustedSource {
        /// Host that failed the allow-list check.
        host: String,
        /// Full endpoint URL.
        url: String,
    },

    /// The request could not be completed (DNS, connect, timeout).
    #[error("network error fetching links from {url}: {source}")]
    Network {
        /// Page URL.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching links from {url}")]
    HttpStatus {
        /// Page URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The page body did not match `{cursor?, done?, links}`.
    #[error("invalid links response from {url}: {message}")]
    InvalidResponse {
        /// Page URL.
        url: String,
        /// Parser message.
        message: String,
    },

    /// Recording progress failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LinkFetchError {
    /// Structured error entry stored on the download, when this error is user-facing.
    #[must_use]
    pub fn to_record(&self) -> Option<ErrorRecord> {
        let record = match self {
            Self::UntrustedSource { host, url } => {
                ErrorRecord::new(ErrorKind::UntrustedSource, self.to_string())
                    .with_host(host.clone())
                    .with_url(url.clone())
            }
            Self::InvalidResponse { url, .. } | Self::InvalidEndpoint { url } => {
                ErrorRecord::new(ErrorKind::InvalidLinksResponse, self.to_string())
                    .with_url(url.clone())
            }
            Self::HttpStatus { url, status } => {
                ErrorRecord::new(ErrorKind::LinksRequestFailed, self.to_string())
                    .with_url(url.clone())
                    .with_status(*status)
            }
            Self::Network { url, .. } => {
                ErrorRecord::new(ErrorKind::LinksRequestFailed, self.to_string())
                    .with_url(url.clone())
            }
            Self::MissingEndpoint { .. } | Self::Store(_) => return None,
        };
        Some(record)
    }
}
