//! Pause intervals used for elapsed-time accounting.

use serde::Serialize;
use sqlx::FromRow;
use tracing::instrument;

use super::{Result, Store};

/// A row of the `pauses` table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRow {
    pub id: i64,
    pub download_id: String,
    /// `None` for a pause covering the whole download.
    pub file_id: Option<i64>,
    pub time_start: i64,
    pub time_end: Option<i64>,
}

impl PauseRow {
    /// Length of the interval, measuring open pauses up to `now`.
    #[must_use]
    pub fn duration_until(&self, now: i64) -> i64 {
        (self.time_end.unwrap_or(now) - self.time_start).max(0)
    }
}

/// Which pauses of a download an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseScope {
    /// Only the download-scoped pause (`file_id IS NULL`).
    Download,
    /// Only the pause of one file.
    File(i64),
    /// Every pause of the download, file-scoped ones included.
    All,
}

impl Store {
    /// Opens a pause for the scope unless one is already open.
    ///
    /// Returns whether a new row was written.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn open_pause(
        &self,
        download_id: &str,
        file_id: Option<i64>,
        now: i64,
    ) -> Result<bool> {
        // The partial unique index turns a second open pause into a no-op.
        let result = sqlx::query(
            "INSERT OR IGNORE INTO pauses (download_id, file_id, time_start) VALUES (?, ?, ?)",
        )
        .bind(download_id)
        .bind(file_id)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Closes open pauses in `scope`; returns how many were closed.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn close_pauses(&self, download_id: &str, scope: PauseScope, now: i64) -> Result<u64> {
        let query = match scope {
            PauseScope::Download => sqlx::query(
                r"UPDATE pauses SET time_end = ?
                  WHERE download_id = ? AND time_end IS NULL AND file_id IS NULL",
            )
            .bind(now)
            .bind(download_id),
            PauseScope::File(file_id) => sqlx::query(
                r"UPDATE pauses SET time_end = ?
                  WHERE download_id = ? AND time_end IS NULL AND file_id = ?",
            )
            .bind(now)
            .bind(download_id)
            .bind(file_id),
            PauseScope::All => sqlx::query(
                "UPDATE pauses SET time_end = ? WHERE download_id = ? AND time_end IS NULL",
            )
            .bind(now)
            .bind(download_id),
        };
        Ok(query.execute(self.pool()).await?.rows_affected())
    }

    /// Records an already-finished pause, e.g. the idle gap before a restart.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the insert fails.
    pub async fn insert_closed_pause(
        &self,
        download_id: &str,
        file_id: Option<i64>,
        time_start: i64,
        time_end: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO pauses (download_id, file_id, time_start, time_end) VALUES (?, ?, ?, ?)",
        )
        .bind(download_id)
        .bind(file_id)
        .bind(time_start)
        .bind(time_end)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Lists the pauses of a download in `scope`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    pub async fn list_pauses(&self, download_id: &str, scope: PauseScope) -> Result<Vec<PauseRow>> {
        let rows = sqlx::query_as::<_, PauseRow>(
            r"SELECT * FROM pauses
              WHERE download_id = ?
                AND (? = 'all' OR (? = 'download' AND file_id IS NULL) OR file_id = ?)
              ORDER BY time_start ASC, id ASC",
        )
        .bind(download_id)
        .bind(scope_label(scope))
        .bind(scope_label(scope))
        .bind(match scope {
            PauseScope::File(id) => Some(id),
            _ => None,
        })
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Number of currently open pauses for a download, any scope.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    pub async fn count_open_pauses(&self, download_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pauses WHERE download_id = ? AND time_end IS NULL",
        )
        .bind(download_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}

fn scope_label(scope: PauseScope) -> &'static str {
    match scope {
        PauseScope::Download => "download",
        PauseScope::File(_) => "file",
        PauseScope::All => "all",
    }
}
