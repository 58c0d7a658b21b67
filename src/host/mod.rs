//! HTTP transfer engine used by the command-line host.
//!
//! [`HttpTransferEngine`] implements [`TransferEngine`] on top of a shared
//! `reqwest` client. Each `begin` announces a `Started` event with a fresh
//! [`HttpTransferHandle`] and spawns a task that waits for the save path,
//! streams the body to disk and reports progress until its single `Done`.
//!
//! # Concurrency Model
//!
//! - One tokio task per transfer; the core bounds how many exist
//! - Handles talk to their task through a `watch` channel, so pause,
//!   resume and cancel never block the caller
//! - A paused task holds its connection open and stops reading
//!
//! # Outcomes
//!
//! - `401` ends the transfer as `AuthRequired` with the final URL
//! - `403` on a URL mentioning a EULA ends it as `EulaRequired`
//! - Any other failure ends it as `Interrupted`, with the partial file removed

mod error;
mod handle;
mod task;

pub use error::HostError;
pub use handle::HttpTransferHandle;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::links::filename_from_url;
use crate::transfer::{EventSender, TransferEngine, TransferError, TransferEvent, TransferId};
use crate::user_agent::default_user_agent;
use task::TransferTask;

/// Default connect timeout for file transfers.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout for file transfers (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Streams files over HTTP and reports through the event channel.
#[derive(Debug)]
pub struct HttpTransferEngine {
    client: Client,
    events: EventSender,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpTransferEngine {
    /// Creates an engine with the default timeouts.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` builder error if the client cannot be built.
    pub fn new(events: EventSender) -> Result<Self, reqwest::Error> {
        Self::with_timeouts(
            events,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates an engine with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` builder error if the client cannot be built.
    pub fn with_timeouts(
        events: EventSender,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .gzip(true)
            .user_agent(default_user_agent())
            .build()?;
        Ok(Self {
            client,
            events,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Refuses every later `begin`. Running transfers are unaffected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferEngine for HttpTransferEngine {
    #[instrument(skip(self, headers))]
    async fn begin(&self, url: &str, headers: &[(String, String)]) -> Result<(), TransferError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransferError::Closed);
        }
        let parsed = Url::parse(url).map_err(|e| TransferError::rejected(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransferError::rejected(url, "unsupported scheme"));
        }

        let id = TransferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let filename = filename_from_url(&parsed).unwrap_or_else(|| id.to_string());
        let (handle, control) = HttpTransferHandle::new(id, url.to_string(), filename);
        self.events
            .send(TransferEvent::Started {
                handle: Arc::new(handle),
            })
            .map_err(|_| TransferError::Closed)?;

        let task = TransferTask {
            client: self.client.clone(),
            id,
            url: url.to_string(),
            headers: headers.to_vec(),
            control,
            events: self.events.clone(),
        };
        tokio::spawn(task.run());
        debug!(transfer_id = %id, "transfer spawned");
        Ok(())
    }
}
