//! Persistent store for downloads, files, pauses, preferences and tokens.
//!
//! This module provides the `SQLite`-backed state that every other
//! component shares. Rows move through their lifecycle only via the
//! conditional updates defined here, so that concurrent callers never
//! observe half-applied transitions.
//!
//! # Overview
//!
//! - [`Store`] - Main interface for store operations
//! - [`DownloadRow`] / [`FileRow`] / [`PauseRow`] - Typed table rows
//! - [`DownloadState`] / [`FileState`] - Lifecycle states
//! - [`StoreError`] - Operation error types
//!
//! # Example
//!
//! ```ignore
//! use bulk_downloader_core::{Database, Store};
//! use bulk_downloader_core::store::NewDownload;
//!
//! let store = Store::new(Database::new_in_memory().await?);
//! store.create_download(&NewDownload::new("granules-1", "/data")).await?;
//! store.add_file("granules-1", "https://example.com/a.nc", "a.nc").await?;
//! ```

mod download;
mod error;
mod file;
mod mutation;
mod pause;
mod preferences;
mod record;
mod state;
mod token;

pub use download::{DownloadRow, NewDownload};
pub use error::{StoreDbErrorKind, StoreError};
pub use file::{AddFileOutcome, FileRow};
pub use mutation::{
    DownloadSnapshot, FileSnapshot, MutationOperation, MutationSnapshot, PendingMutation,
};
pub use pause::{PauseRow, PauseScope};
pub use preferences::{DEFAULT_CONCURRENT_DOWNLOADS, Preferences};
pub use record::{ErrorKind, ErrorRecord};
pub use state::{DownloadState, FileState, derive_download_state};

use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Milliseconds since the Unix epoch; all row timestamps use this unit.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Builds `?, ?, ?` for an `IN (...)` clause with `count` entries.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Handle to the shared durable state.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over an initialized database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    pub(crate) fn pool(&self) -> &sqlx::SqlitePool {
        self.db.pool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
