//! Singleton preferences row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::instrument;

use super::{Result, Store};

/// Concurrency ceiling used when nothing else is configured.
pub const DEFAULT_CONCURRENT_DOWNLOADS: i64 = 5;

/// User preferences, stored as the single row with `id = 1`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Maximum number of simultaneously running transfers (1..=100).
    pub concurrent_downloads: i64,
    pub default_download_location: Option<String>,
    pub last_download_location: Option<String>,
    pub allow_metrics: bool,
    /// Opaque JSON owned by the presentation layer.
    pub window_state: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
            default_download_location: None,
            last_download_location: None,
            allow_metrics: false,
            window_state: None,
        }
    }
}

impl Store {
    /// Loads preferences, falling back to defaults if the row is missing.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    pub async fn preferences(&self) -> Result<Preferences> {
        let row = sqlx::query_as::<_, Preferences>(
            r"SELECT concurrent_downloads, default_download_location, last_download_location,
                     allow_metrics, window_state
              FROM preferences WHERE id = 1",
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(row.unwrap_or_default())
    }

    /// Current concurrency ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    pub async fn concurrent_downloads(&self) -> Result<i64> {
        Ok(self.preferences().await?.concurrent_downloads)
    }

    /// Replaces the preferences row.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`]; an out-of-range concurrency
    /// fails the table's CHECK constraint.
    #[instrument(skip(self, prefs), fields(concurrent_downloads = prefs.concurrent_downloads))]
    pub async fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        sqlx::query(
            r"INSERT INTO preferences
                (id, concurrent_downloads, default_download_location, last_download_location,
                 allow_metrics, window_state)
              VALUES (1, ?, ?, ?, ?, ?)
              ON CONFLICT (id) DO UPDATE SET
                concurrent_downloads = excluded.concurrent_downloads,
                default_download_location = excluded.default_download_location,
                last_download_location = excluded.last_download_location,
                allow_metrics = excluded.allow_metrics,
                window_state = excluded.window_state",
        )
        .bind(prefs.concurrent_downloads)
        .bind(prefs.default_download_location.as_deref())
        .bind(prefs.last_download_location.as_deref())
        .bind(prefs.allow_metrics)
        .bind(prefs.window_state.as_deref())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Remembers the most recently used destination folder.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the update fails.
    pub async fn set_last_download_location(&self, location: &str) -> Result<()> {
        sqlx::query("UPDATE preferences SET last_download_location = ? WHERE id = 1")
            .bind(location)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
