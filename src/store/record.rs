//! Structured error entries persisted on download and file rows.

use serde::{Deserialize, Serialize};

use super::{Result, StoreError};

/// What went wrong, in a form the UI layer can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The link listing host is not on the allow list.
    UntrustedSource,
    /// A link listing page failed schema validation.
    InvalidLinksResponse,
    /// A link listing request failed (network or HTTP status).
    LinksRequestFailed,
    /// The host engine reported an interrupted transfer.
    TransferInterrupted,
    /// The host engine refused to begin a transfer.
    DispatchFailed,
    /// The server required authentication.
    AuthRequired,
    /// The server required license acceptance.
    EulaRequired,
}

/// One structured error entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: None,
            host: None,
            status: None,
            filename: None,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Decodes an `errors` column; NULL and empty text decode to an empty list.
pub(crate) fn decode_errors(column: &'static str, raw: Option<&str>) -> Result<Vec<ErrorRecord>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(text) => serde_json::from_str(text).map_err(|e| StoreError::json(column, &e)),
    }
}

/// Encodes an error list; an empty list is stored as NULL.
pub(crate) fn encode_errors(
    column: &'static str,
    errors: &[ErrorRecord],
) -> Result<Option<String>> {
    if errors.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(errors)
        .map(Some)
        .map_err(|e| StoreError::json(column, &e))
}
