//! Seam between the orchestration core and the host transfer engine.
//!
//! The core never moves bytes itself. It asks a [`TransferEngine`] to begin
//! a transfer for a URL and then learns about that transfer only through
//! [`TransferEvent`]s delivered on a channel: `Started` once with a live
//! [`TransferHandle`], `Updated` any number of times and `Done` exactly once.
//!
//! # Overview
//!
//! - [`TransferEngine`] / [`TransferHandle`] - Traits the host implements
//! - [`TransferEvent`] / [`TransferOutcome`] - What the host reports back
//! - [`TransferRegistry`] - Live handles keyed by `(download_id, filename)`
//! - [`CorrelationMap`] - Dispatched URLs waiting for their `Started` event

mod correlation;
mod registry;

pub use correlation::{CorrelationMap, PendingTransfer};
pub use registry::TransferRegistry;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Identifier the host engine assigns to a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer-{}", self.0)
    }
}

/// Errors raised by a host engine when asked to begin a transfer.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// The engine refused the request.
    #[error("transfer of {url} rejected: {message}")]
    Rejected {
        /// URL that could not be started.
        url: String,
        /// Engine-provided reason.
        message: String,
    },

    /// The engine is shutting down and accepts no more work.
    #[error("transfer engine is closed")]
    Closed,
}

impl TransferError {
    pub fn rejected(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Starts transfers. Implemented by the host.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Begins transferring `url` with the extra request `headers`.
    ///
    /// Returning `Ok` promises that a `Started` event for the URL follows.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] if the engine cannot take the transfer.
    async fn begin(&self, url: &str, headers: &[(String, String)]) -> Result<(), TransferError>;
}

/// Control surface of a single live transfer. Implemented by the host.
pub trait TransferHandle: Send + Sync + fmt::Debug {
    fn id(&self) -> TransferId;

    /// Name the host suggested for the saved file.
    fn filename(&self) -> String;

    /// Every URL the transfer went through; the first entry is the requested URL.
    fn url_chain(&self) -> Vec<String>;

    /// Sets where the bytes are written. Called once, right after `Started`.
    fn set_save_path(&self, path: &Path);

    fn cancel(&self);

    fn pause(&self);

    fn resume(&self);

    /// Whether the host currently holds the transfer paused.
    fn is_paused(&self) -> bool;
}

/// State carried by an `Updated` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferProgress {
    /// Bytes are flowing, or the transfer is paused when `is_paused` is set.
    Progressing,
    /// The connection dropped; the host may still recover on its own.
    Interrupted,
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    /// Failed for good; `reason` is shown to the user.
    Interrupted { reason: String },
    /// The handle was cancelled, by the user or by a restart.
    Cancelled,
    /// The server asked for credentials at `auth_url`.
    AuthRequired { auth_url: Option<String> },
    /// The server asked for a license to be accepted at `eula_url`.
    EulaRequired { eula_url: Option<String> },
}

/// Messages from the host engine to the translator.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Started {
        handle: Arc<dyn TransferHandle>,
    },
    Updated {
        transfer_id: TransferId,
        state: TransferProgress,
        received_bytes: u64,
        total_bytes: u64,
        is_paused: bool,
    },
    Done {
        transfer_id: TransferId,
        outcome: TransferOutcome,
    },
}

/// Sending half handed to host engines.
pub type EventSender = mpsc::UnboundedSender<TransferEvent>;

/// Receiving half consumed by the translator.
pub type EventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

/// Creates the event channel between a host engine and the translator.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Floor of `received / total` as a percentage, 0 when the total is unknown.
#[must_use]
pub fn percent_of(received: u64, total: u64) -> i64 {
    if total == 0 {
        return 0;
    }
    let percent = u128::from(received) * 100 / u128::from(total);
    i64::try_from(percent.min(100)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_floors() {
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 66);
        assert_eq!(percent_of(3, 3), 100);
    }

    #[test]
    fn test_percent_unknown_total_is_zero() {
        assert_eq!(percent_of(500, 0), 0);
    }

    #[test]
    fn test_percent_never_exceeds_100() {
        assert_eq!(percent_of(12, 10), 100);
    }

    #[test]
    fn test_transfer_id_display() {
        assert_eq!(TransferId(7).to_string(), "transfer-7");
    }
}
