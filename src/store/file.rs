//! File rows and their conditional transitions.

use serde::Serialize;
use sqlx::FromRow;
use tracing::instrument;

use super::record::{decode_errors, encode_errors};
use super::{ErrorRecord, FileState, Result, Store, StoreError, now_millis, placeholders};

/// A row of the `files` table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRow {
    pub id: i64,
    pub download_id: String,
    pub filename: String,
    pub url: String,
    /// Stored state text, parsed via `state()`.
    #[sqlx(rename = "state")]
    #[serde(rename = "state")]
    pub state_str: String,
    pub percent: i64,
    pub received_bytes: i64,
    pub total_bytes: i64,
    pub time_start: Option<i64>,
    pub time_end: Option<i64>,
    /// JSON array of [`ErrorRecord`]s.
    pub errors: Option<String>,
    /// How many times the same filename was listed again.
    pub duplicate_count: i64,
    pub created_at: i64,
}

impl FileRow {
    /// Returns the parsed state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] when the column holds an unknown value.
    pub fn state(&self) -> Result<FileState> {
        self.state_str.parse().map_err(|_| StoreError::InvalidState {
            entity: "file",
            state: self.state_str.clone(),
        })
    }

    /// Returns the decoded error list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Json`] if the column is not a JSON error array.
    pub fn error_records(&self) -> Result<Vec<ErrorRecord>> {
        decode_errors("files.errors", self.errors.as_deref())
    }
}

/// Result of adding a link to a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddFileOutcome {
    /// A new `pending` row was created.
    Inserted(i64),
    /// The filename already existed; its duplicate counter was bumped.
    Duplicate(i64),
}

/// Binds every state of `states` onto `query` in order.
macro_rules! bind_states {
    ($query:expr, $states:expr) => {{
        let mut query = $query;
        for state in $states {
            query = query.bind(state.as_str());
        }
        query
    }};
}

impl Store {
    /// Adds a `pending` file, or bumps `duplicate_count` if the filename exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self), fields(download_id = %download_id, filename = %filename))]
    pub async fn add_file(
        &self,
        download_id: &str,
        url: &str,
        filename: &str,
    ) -> Result<AddFileOutcome> {
        let (id, duplicate_count): (i64, i64) = sqlx::query_as(
            r"INSERT INTO files (download_id, filename, url, state, created_at)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT (download_id, filename)
              DO UPDATE SET duplicate_count = duplicate_count + 1
              RETURNING id, duplicate_count",
        )
        .bind(download_id)
        .bind(filename)
        .bind(url)
        .bind(FileState::Pending.as_str())
        .bind(now_millis())
        .fetch_one(self.pool())
        .await?;

        Ok(if duplicate_count == 0 {
            AddFileOutcome::Inserted(id)
        } else {
            AddFileOutcome::Duplicate(id)
        })
    }

    /// Gets a file by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_file(&self, id: i64) -> Result<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// Finds a file by its `(download_id, filename)` key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn find_file(&self, download_id: &str, filename: &str) -> Result<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(
            "SELECT * FROM files WHERE download_id = ? AND filename = ?",
        )
        .bind(download_id)
        .bind(filename)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Finds a file by key, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FileNotFound`] for an unknown key.
    pub async fn require_file(&self, download_id: &str, filename: &str) -> Result<FileRow> {
        self.find_file(download_id, filename)
            .await?
            .ok_or_else(|| StoreError::FileNotFound {
                download_id: download_id.to_string(),
                filename: filename.to_string(),
            })
    }

    /// Lists a download's files (optionally a single filename) in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_files(
        &self,
        download_id: &str,
        filename: Option<&str>,
    ) -> Result<Vec<FileRow>> {
        let rows = sqlx::query_as::<_, FileRow>(
            r"SELECT * FROM files
              WHERE download_id = ? AND (? IS NULL OR filename = ?)
              ORDER BY created_at ASC, id ASC",
        )
        .bind(download_id)
        .bind(filename)
        .bind(filename)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Returns the parsed states of every file in a download.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::InvalidState`].
    pub async fn file_states(&self, download_id: &str) -> Result<Vec<FileState>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT state FROM files WHERE download_id = ?")
            .bind(download_id)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter()
            .map(|(state,)| {
                state
                    .parse()
                    .map_err(|_| StoreError::InvalidState { entity: "file", state })
            })
            .collect()
    }

    /// Counts files in any of `states`, across all downloads when `download_id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_files_in_states(
        &self,
        download_id: Option<&str>,
        states: &[FileState],
    ) -> Result<i64> {
        if states.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM files WHERE (? IS NULL OR download_id = ?) AND state IN ({})",
            placeholders(states.len())
        );
        let query = sqlx::query_as::<_, (i64,)>(&sql)
            .bind(download_id)
            .bind(download_id);
        let (count,) = bind_states!(query, states).fetch_one(self.pool()).await?;
        Ok(count)
    }

    /// Counts a download's files that are not completed, cancelled or errored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_unfinished_files(&self, download_id: &str) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM files WHERE download_id = ? AND state NOT IN ({})",
            placeholders(FileState::TERMINAL.len())
        );
        let query = sqlx::query_as::<_, (i64,)>(&sql).bind(download_id);
        let (count,) = bind_states!(query, FileState::TERMINAL)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Number of `active` files in a download.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn active_files_count_by_download_id(&self, download_id: &str) -> Result<i64> {
        self.count_files_in_states(Some(download_id), &[FileState::Active])
            .await
    }

    /// Atomically claims up to `limit` pending files of active downloads as `starting`.
    ///
    /// Oldest files go first; `priority_file_id` is ordered ahead of them when
    /// it is itself pending. A single `UPDATE ... RETURNING` guarded on
    /// `state = 'pending'` means overlapping callers can never claim the same row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn claim_pending_files(
        &self,
        limit: i64,
        priority_file_id: Option<i64>,
    ) -> Result<Vec<FileRow>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let mut rows = sqlx::query_as::<_, FileRow>(
            r"UPDATE files
              SET state = ?
              WHERE state = ?
                AND id IN (
                  SELECT f.id FROM files f
                  JOIN downloads d ON d.id = f.download_id
                  WHERE f.state = ?
                    AND d.state = 'active'
                    AND d.active = 1
                  ORDER BY (f.id = ?) DESC, f.created_at ASC, f.id ASC
                  LIMIT ?
                )
              RETURNING *",
        )
        .bind(FileState::Starting.as_str())
        .bind(FileState::Pending.as_str())
        .bind(FileState::Pending.as_str())
        .bind(priority_file_id.unwrap_or(-1))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let priority = priority_file_id.unwrap_or(-1);
        rows.sort_by_key(|row| (row.id != priority, row.created_at, row.id));
        Ok(rows)
    }

    /// Sets a file's state when it is currently in one of `from`; returns whether it changed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn set_file_state_where(
        &self,
        id: i64,
        state: FileState,
        from: &[FileState],
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE files SET state = ? WHERE id = ? AND state IN ({})",
            placeholders(from.len())
        );
        let query = sqlx::query(&sql).bind(state.as_str()).bind(id);
        Ok(bind_states!(query, from)
            .execute(self.pool())
            .await?
            .rows_affected()
            > 0)
    }

    /// Moves every matching file of a download from any of `from` to `to`.
    ///
    /// `filename` narrows the update to a single file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, from))]
    pub async fn transition_files(
        &self,
        download_id: &str,
        filename: Option<&str>,
        to: FileState,
        from: &[FileState],
    ) -> Result<u64> {
        if from.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE files SET state = ? \
             WHERE download_id = ? AND (? IS NULL OR filename = ?) AND state IN ({})",
            placeholders(from.len())
        );
        let query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(download_id)
            .bind(filename)
            .bind(filename);
        Ok(bind_states!(query, from)
            .execute(self.pool())
            .await?
            .rows_affected())
    }

    /// Stamps the transfer start time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn set_file_started(&self, id: i64, now: i64) -> Result<()> {
        sqlx::query("UPDATE files SET time_start = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Writes progress counters and state while the file is still in flight.
    ///
    /// Returns false when the file has left the in-flight states (for example
    /// cancelled by the user), in which case nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn update_file_progress(
        &self,
        id: i64,
        state: FileState,
        percent: i64,
        received_bytes: i64,
        total_bytes: i64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE files SET state = ?, percent = ?, received_bytes = ?, total_bytes = ? \
             WHERE id = ? AND state IN ({})",
            placeholders(FileState::IN_FLIGHT.len())
        );
        let query = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(percent)
            .bind(received_bytes)
            .bind(total_bytes)
            .bind(id);
        Ok(bind_states!(query, FileState::IN_FLIGHT)
            .execute(self.pool())
            .await?
            .rows_affected()
            > 0)
    }

    /// Marks an in-flight file completed at 100 percent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn complete_file(&self, id: i64, now: i64) -> Result<bool> {
        let sql = format!(
            "UPDATE files SET state = ?, percent = 100, time_end = ?, \
             received_bytes = MAX(received_bytes, total_bytes) \
             WHERE id = ? AND state IN ({})",
            placeholders(FileState::IN_FLIGHT.len())
        );
        let query = sqlx::query(&sql)
            .bind(FileState::Completed.as_str())
            .bind(now)
            .bind(id);
        Ok(bind_states!(query, FileState::IN_FLIGHT)
            .execute(self.pool())
            .await?
            .rows_affected()
            > 0)
    }

    /// Moves an in-flight file to `state` and appends a structured error.
    ///
    /// Used for transfer failures (`error`) and for auth/EULA waits.
    ///
    /// # Errors
    ///
    /// Returns a database or JSON error.
    pub async fn fail_file(
        &self,
        id: i64,
        state: FileState,
        record: ErrorRecord,
        now: i64,
    ) -> Result<bool> {
        let Some(row) = self.get_file(id).await? else {
            return Ok(false);
        };
        let mut errors = row.error_records()?;
        errors.push(record);
        let encoded = encode_errors("files.errors", &errors)?;
        let time_end = (state == FileState::Error).then_some(now);
        let sql = format!(
            "UPDATE files SET state = ?, errors = ?, time_end = COALESCE(?, time_end) \
             WHERE id = ? AND state IN ({})",
            placeholders(FileState::IN_FLIGHT.len())
        );
        let query = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(encoded)
            .bind(time_end)
            .bind(id);
        Ok(bind_states!(query, FileState::IN_FLIGHT)
            .execute(self.pool())
            .await?
            .rows_affected()
            > 0)
    }

    /// Resets progress bookkeeping and returns matching files to `pending`.
    ///
    /// `from` limits the reset to files in those states (retry resets only
    /// `error` files); `None` resets every matching file (restart).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, from))]
    pub async fn reset_files(
        &self,
        download_id: &str,
        filename: Option<&str>,
        from: Option<&[FileState]>,
    ) -> Result<u64> {
        let state_clause = match from {
            Some(states) if states.is_empty() => return Ok(0),
            Some(states) => format!(" AND state IN ({})", placeholders(states.len())),
            None => String::new(),
        };
        let sql = format!(
            "UPDATE files SET state = ?, percent = 0, received_bytes = 0, total_bytes = 0, \
             time_start = NULL, time_end = NULL, errors = NULL \
             WHERE download_id = ? AND (? IS NULL OR filename = ?){state_clause}"
        );
        let query = sqlx::query(&sql)
            .bind(FileState::Pending.as_str())
            .bind(download_id)
            .bind(filename)
            .bind(filename);
        let query = bind_states!(query, from.unwrap_or(&[]));
        Ok(query.execute(self.pool()).await?.rows_affected())
    }

    /// Returns files stuck in flight by a previous process to `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_in_flight_files(&self) -> Result<u64> {
        let stale = [
            FileState::Starting,
            FileState::Active,
            FileState::Interrupted,
            FileState::Cancelling,
        ];
        let sql = format!(
            "UPDATE files SET state = ? WHERE state IN ({})",
            placeholders(stale.len())
        );
        let query = sqlx::query(&sql).bind(FileState::Pending.as_str());
        Ok(bind_states!(query, stale)
            .execute(self.pool())
            .await?
            .rows_affected())
    }

    /// First file of a download in `state`, by creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn first_file_in_state(
        &self,
        download_id: &str,
        state: FileState,
    ) -> Result<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(
            r"SELECT * FROM files WHERE download_id = ? AND state = ?
              ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(download_id)
        .bind(state.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Sum of received bytes across a download's files.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn received_bytes_for_download(&self, download_id: &str) -> Result<i64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(received_bytes), 0) FROM files WHERE download_id = ?",
        )
        .bind(download_id)
        .fetch_one(self.pool())
        .await?;
        Ok(total)
    }
}
