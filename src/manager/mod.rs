//! The orchestration core: state-machine operations over the store.
//!
//! [`DownloadManager`] owns the shared pieces every operation needs: the
//! [`Store`], the live [`TransferRegistry`], the [`CorrelationMap`] of
//! dispatched URLs, the host [`TransferEngine`] and the scheduler lock.
//! Each user operation lives in its own submodule as an `impl` block.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bulk_downloader_core::{Database, DownloadManager, ManagerSettings, Store};
//!
//! let store = Store::new(Database::new_in_memory().await?);
//! let manager = Arc::new(DownloadManager::new(store, engine, ManagerSettings::default())?);
//! manager.pause(Some("granules-1700000000000"), None).await?;
//! ```

mod begin;
mod cancel;
mod callbacks;
mod finish;
mod lifecycle;
mod pause;
mod restart;
mod retry;
mod undo;

pub use begin::{BeginDownload, download_id_for};
pub use finish::DownloadStatistics;
pub use undo::UndoOutcome;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::links::{self, LinkFetchError, LinkFetcher};
use crate::scheduler::Scheduler;
use crate::store::{Store, StoreError};
use crate::transfer::{CorrelationMap, TransferEngine, TransferHandle, TransferRegistry};

/// Hosts trusted to serve link listings when nothing else is configured.
pub const DEFAULT_TRUSTED_HOSTS: &[&str] = &["earthdata.nasa.gov", "earthdatacloud.nasa.gov"];

/// Default undo grace window.
pub const DEFAULT_UNDO_GRACE: Duration = Duration::from_secs(10);

/// Errors returned by manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Links(#[from] LinkFetchError),

    /// No pending mutation with this marker exists.
    #[error("unknown undo marker: {0}")]
    UnknownMarker(String),

    /// The marker's grace window has passed.
    #[error("undo marker {0} has expired")]
    MarkerExpired(String),

    /// The download is still running and cannot be cleared.
    #[error("download {download_id} is not finished (state {state})")]
    NotFinished {
        /// Download that was asked to clear.
        download_id: String,
        /// Its current state.
        state: String,
    },

    /// A control request carried values the manager cannot act on.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The HTTP client for link listings could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Runtime settings of the manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Hosts allowed to serve link listings, matched exactly or by subdomain.
    pub trusted_hosts: Vec<String>,
    /// How long cancel, restart and delete can be undone.
    pub undo_grace: Duration,
    pub links_connect_timeout: Duration,
    pub links_read_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            trusted_hosts: DEFAULT_TRUSTED_HOSTS
                .iter()
                .map(ToString::to_string)
                .collect(),
            undo_grace: DEFAULT_UNDO_GRACE,
            links_connect_timeout: Duration::from_secs(links::CONNECT_TIMEOUT_SECS),
            links_read_timeout: Duration::from_secs(links::READ_TIMEOUT_SECS),
        }
    }
}

impl ManagerSettings {
    /// Grace window in milliseconds, as stored on pending mutations.
    #[must_use]
    pub fn undo_grace_ms(&self) -> i64 {
        i64::try_from(self.undo_grace.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Owner of the orchestration state shared by every operation.
pub struct DownloadManager {
    store: Store,
    registry: TransferRegistry,
    correlation: CorrelationMap,
    engine: Arc<dyn TransferEngine>,
    scheduler: Scheduler,
    links: LinkFetcher,
    settings: ManagerSettings,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("running", &self.registry.len())
            .field("starting", &self.correlation.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Creates a manager over a store and a host engine.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::HttpClient`] if the link listing client cannot be built.
    pub fn new(
        store: Store,
        engine: Arc<dyn TransferEngine>,
        settings: ManagerSettings,
    ) -> Result<Self> {
        let links = LinkFetcher::new(settings.links_connect_timeout, settings.links_read_timeout)?;
        Ok(Self {
            store,
            registry: TransferRegistry::new(),
            correlation: CorrelationMap::new(),
            engine,
            scheduler: Scheduler::new(),
            links,
            settings,
        })
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    #[must_use]
    pub fn correlation(&self) -> &CorrelationMap {
        &self.correlation
    }

    #[must_use]
    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub(crate) fn engine(&self) -> &Arc<dyn TransferEngine> {
        &self.engine
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn links(&self) -> &LinkFetcher {
        &self.links
    }

    /// True when nothing is transferring or waiting to be acknowledged.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.registry.is_empty() && self.correlation.is_empty()
    }

    /// Removes and cancels the live handles of a download (or one of its files).
    ///
    /// Handles leave the registry immediately so that their eventual `Done`
    /// event is recognised as stale and leaves the file state alone.
    pub(crate) fn cancel_handles(&self, download_id: &str, filename: Option<&str>) -> usize {
        let handles = self.registry.handles_for(download_id, filename);
        for (name, handle) in &handles {
            if self
                .registry
                .remove_if(download_id, name, handle.id())
                .is_some()
            {
                debug!(download_id, filename = %name, transfer_id = %handle.id(), "cancelling transfer");
                handle.cancel();
            }
        }
        handles.len()
    }

    /// Live handle of one file, if any.
    pub(crate) fn handle_for(
        &self,
        download_id: &str,
        filename: &str,
    ) -> Option<Arc<dyn TransferHandle>> {
        self.registry.get(download_id, filename)
    }
}
