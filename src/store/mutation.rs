//! Undo markers for cancel, restart and delete.
//!
//! Each of those operations rewrites many rows at once. Before it does, the
//! prior values are captured as a [`MutationSnapshot`] and stored under a
//! fresh UUID marker with an expiry. [`Store::restore_snapshot`] puts the
//! rows back when the user undoes within the grace window.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::instrument;
use uuid::Uuid;

use super::{
    DownloadRow, DownloadState, FileRow, FileState, Result, Store, StoreError, now_millis,
};

/// The kind of operation a marker can undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationOperation {
    Cancel,
    Restart,
    Delete,
}

impl MutationOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Restart => "restart",
            Self::Delete => "delete",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "cancel" => Some(Self::Cancel),
            "restart" => Some(Self::Restart),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Prior download values that an undo restores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSnapshot {
    pub state: DownloadState,
    pub time_end: Option<i64>,
    pub num_errors: i64,
    pub errors: Option<String>,
    pub active: bool,
    pub auth_url: Option<String>,
    pub eula_url: Option<String>,
}

/// Prior file values that an undo restores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub id: i64,
    pub filename: String,
    pub state: FileState,
    pub percent: i64,
    pub received_bytes: i64,
    pub total_bytes: i64,
    pub time_start: Option<i64>,
    pub time_end: Option<i64>,
    pub errors: Option<String>,
}

/// Everything a marker needs to put a download back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSnapshot {
    pub download_id: String,
    pub download: DownloadSnapshot,
    pub files: Vec<FileSnapshot>,
}

impl MutationSnapshot {
    /// Captures the current values of a download and the given files.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] if a stored state does not parse.
    pub fn capture(download: &DownloadRow, files: &[FileRow]) -> Result<Self> {
        let files = files
            .iter()
            .map(|file| {
                Ok(FileSnapshot {
                    id: file.id,
                    filename: file.filename.clone(),
                    state: file.state()?,
                    percent: file.percent,
                    received_bytes: file.received_bytes,
                    total_bytes: file.total_bytes,
                    time_start: file.time_start,
                    time_end: file.time_end,
                    errors: file.errors.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            download_id: download.id.clone(),
            download: DownloadSnapshot {
                state: download.state()?,
                time_end: download.time_end,
                num_errors: download.num_errors,
                errors: download.errors.clone(),
                active: download.active,
                auth_url: download.auth_url.clone(),
                eula_url: download.eula_url.clone(),
            },
            files,
        })
    }
}

/// A row of the `pending_mutations` table.
#[derive(Debug, Clone, FromRow)]
pub struct PendingMutation {
    pub marker: String,
    #[sqlx(rename = "operation")]
    pub operation_str: String,
    pub download_id: String,
    pub filename: Option<String>,
    pub snapshot: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl PendingMutation {
    /// Returns the parsed operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] for an unknown operation.
    pub fn operation(&self) -> Result<MutationOperation> {
        MutationOperation::parse(&self.operation_str).ok_or_else(|| StoreError::InvalidState {
            entity: "mutation",
            state: self.operation_str.clone(),
        })
    }

    /// Decodes the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Json`] if the column is not a valid snapshot.
    pub fn decode_snapshot(&self) -> Result<MutationSnapshot> {
        serde_json::from_str(&self.snapshot)
            .map_err(|e| StoreError::json("pending_mutations.snapshot", &e))
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Restored value for a file state; in-flight work cannot be resurrected.
fn restorable(state: FileState) -> FileState {
    if FileState::IN_FLIGHT.contains(&state) && state != FileState::Paused {
        FileState::Pending
    } else {
        state
    }
}

impl Store {
    /// Stores a snapshot under a new marker that expires after `grace_ms`.
    ///
    /// # Errors
    ///
    /// Returns a database or JSON error.
    #[instrument(skip(self, snapshot), fields(download_id = %snapshot.download_id))]
    pub async fn record_mutation(
        &self,
        operation: MutationOperation,
        filename: Option<&str>,
        snapshot: &MutationSnapshot,
        grace_ms: i64,
    ) -> Result<PendingMutation> {
        let encoded = serde_json::to_string(snapshot)
            .map_err(|e| StoreError::json("pending_mutations.snapshot", &e))?;
        let now = now_millis();
        let row = sqlx::query_as::<_, PendingMutation>(
            r"INSERT INTO pending_mutations
                (marker, operation, download_id, filename, snapshot, created_at, expires_at)
              VALUES (?, ?, ?, ?, ?, ?, ?)
              RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(operation.as_str())
        .bind(&snapshot.download_id)
        .bind(filename)
        .bind(encoded)
        .bind(now)
        .bind(now.saturating_add(grace_ms))
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }

    /// Looks up a marker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_mutation(&self, marker: &str) -> Result<Option<PendingMutation>> {
        let row = sqlx::query_as::<_, PendingMutation>(
            "SELECT * FROM pending_mutations WHERE marker = ?",
        )
        .bind(marker)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Removes a marker; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn delete_mutation(&self, marker: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pending_mutations WHERE marker = ?")
            .bind(marker)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Markers whose grace window has passed, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn expired_mutations(&self, now: i64) -> Result<Vec<PendingMutation>> {
        let rows = sqlx::query_as::<_, PendingMutation>(
            "SELECT * FROM pending_mutations WHERE expires_at <= ? ORDER BY expires_at ASC",
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Markers still open for a download.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn mutations_for_download(&self, download_id: &str) -> Result<Vec<PendingMutation>> {
        let rows = sqlx::query_as::<_, PendingMutation>(
            "SELECT * FROM pending_mutations WHERE download_id = ? ORDER BY created_at ASC",
        )
        .bind(download_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Writes a snapshot back in one transaction.
    ///
    /// Files that were starting, transferring or interrupted come back as
    /// `pending` so the scheduler picks them up again.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] if the download is gone, or a
    /// database error; nothing is written on failure.
    #[instrument(skip(self, snapshot), fields(download_id = %snapshot.download_id))]
    pub async fn restore_snapshot(&self, snapshot: &MutationSnapshot) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let download = &snapshot.download;
        let result = sqlx::query(
            r"UPDATE downloads
              SET state = ?, time_end = ?, num_errors = ?, errors = ?, active = ?,
                  auth_url = ?, eula_url = ?
              WHERE id = ?",
        )
        .bind(download.state.as_str())
        .bind(download.time_end)
        .bind(download.num_errors)
        .bind(download.errors.as_deref())
        .bind(download.active)
        .bind(download.auth_url.as_deref())
        .bind(download.eula_url.as_deref())
        .bind(&snapshot.download_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DownloadNotFound(snapshot.download_id.clone()));
        }

        for file in &snapshot.files {
            sqlx::query(
                r"UPDATE files
                  SET state = ?, percent = ?, received_bytes = ?, total_bytes = ?,
                      time_start = ?, time_end = ?, errors = ?
                  WHERE id = ? AND download_id = ?",
            )
            .bind(restorable(file.state).as_str())
            .bind(file.percent)
            .bind(file.received_bytes)
            .bind(file.total_bytes)
            .bind(file.time_start)
            .bind(file.time_end)
            .bind(file.errors.as_deref())
            .bind(file.id)
            .bind(&snapshot.download_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
