//! Download rows.

use serde::Serialize;
use sqlx::FromRow;
use tracing::instrument;

use super::record::{decode_errors, encode_errors};
use super::{
    DownloadState, ErrorRecord, Result, Store, StoreError, now_millis, placeholders,
};

/// Values needed to create a download.
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub id: String,
    pub download_location: String,
    pub links_url: Option<String>,
    pub client_id: Option<String>,
}

impl NewDownload {
    #[must_use]
    pub fn new(id: impl Into<String>, download_location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            download_location: download_location.into(),
            links_url: None,
            client_id: None,
        }
    }

    #[must_use]
    pub fn with_links_url(mut self, links_url: impl Into<String>) -> Self {
        self.links_url = Some(links_url.into());
        self
    }
}

/// A row of the `downloads` table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRow {
    pub id: String,
    /// Stored state text, parsed via `state()`.
    #[sqlx(rename = "state")]
    #[serde(rename = "state")]
    pub state_str: String,
    pub download_location: String,
    pub links_url: Option<String>,
    pub created_at: i64,
    pub time_start: Option<i64>,
    pub time_end: Option<i64>,
    /// False once the download is cleared or pending deletion.
    pub active: bool,
    /// True while link pages are still being fetched.
    pub loading_more_files: bool,
    pub num_errors: i64,
    pub client_id: Option<String>,
    pub auth_url: Option<String>,
    pub eula_url: Option<String>,
    /// JSON array of [`ErrorRecord`]s.
    pub errors: Option<String>,
}

impl DownloadRow {
    /// Returns the parsed state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] when the column holds an unknown value.
    pub fn state(&self) -> Result<DownloadState> {
        self.state_str.parse().map_err(|_| StoreError::InvalidState {
            entity: "download",
            state: self.state_str.clone(),
        })
    }

    /// Returns the decoded error list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Json`] if the column is not a JSON error array.
    pub fn error_records(&self) -> Result<Vec<ErrorRecord>> {
        decode_errors("downloads.errors", self.errors.as_deref())
    }
}

impl Store {
    /// Inserts a download in `pending` state with `loading_more_files` set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails (including a duplicate id).
    #[instrument(skip(self, new), fields(download_id = %new.id))]
    pub async fn create_download(&self, new: &NewDownload) -> Result<DownloadRow> {
        let row = sqlx::query_as::<_, DownloadRow>(
            r"INSERT INTO downloads (id, state, download_location, links_url, client_id, created_at)
              VALUES (?, ?, ?, ?, ?, ?)
              RETURNING *",
        )
        .bind(&new.id)
        .bind(DownloadState::Pending.as_str())
        .bind(&new.download_location)
        .bind(new.links_url.as_deref())
        .bind(new.client_id.as_deref())
        .bind(now_millis())
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    /// Gets a download by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_download(&self, id: &str) -> Result<Option<DownloadRow>> {
        let row = sqlx::query_as::<_, DownloadRow>("SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// Gets a download by id, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] for an unknown id.
    pub async fn require_download(&self, id: &str) -> Result<DownloadRow> {
        self.get_download(id)
            .await?
            .ok_or_else(|| StoreError::DownloadNotFound(id.to_string()))
    }

    /// Lists downloads, oldest first. Cleared downloads are skipped unless asked for.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_downloads(&self, include_inactive: bool) -> Result<Vec<DownloadRow>> {
        let sql = if include_inactive {
            "SELECT * FROM downloads ORDER BY created_at ASC, id ASC"
        } else {
            "SELECT * FROM downloads WHERE active = 1 ORDER BY created_at ASC, id ASC"
        };
        let rows = sqlx::query_as::<_, DownloadRow>(sql)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Returns ids of visible downloads currently in any of `states`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn download_ids_in_states(&self, states: &[DownloadState]) -> Result<Vec<String>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id FROM downloads WHERE active = 1 AND state IN ({}) ORDER BY created_at ASC",
            placeholders(states.len())
        );
        let mut query = sqlx::query_as::<_, (String,)>(&sql);
        for state in states {
            query = query.bind(state.as_str());
        }
        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Unconditionally sets a download's state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] if no row matched.
    #[instrument(skip(self))]
    pub async fn set_download_state(&self, id: &str, state: DownloadState) -> Result<()> {
        let result = sqlx::query("UPDATE downloads SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DownloadNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Sets a download's state only if it is currently in one of `from`.
    ///
    /// Returns whether the row changed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, from))]
    pub async fn set_download_state_where(
        &self,
        id: &str,
        state: DownloadState,
        from: &[DownloadState],
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE downloads SET state = ? WHERE id = ? AND state IN ({})",
            placeholders(from.len())
        );
        let mut query = sqlx::query(&sql).bind(state.as_str()).bind(id);
        for state in from {
            query = query.bind(state.as_str());
        }
        Ok(query.execute(self.pool()).await?.rows_affected() > 0)
    }

    /// Marks a download as dispatchable and stamps its start time once.
    ///
    /// Only a `pending` download is promoted; any other state is left alone so
    /// that a pause issued while links were loading is honoured.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn mark_download_started(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET state = CASE WHEN state = ? THEN ? ELSE state END,
                  time_start = COALESCE(time_start, ?)
              WHERE id = ?",
        )
        .bind(DownloadState::Pending.as_str())
        .bind(DownloadState::Active.as_str())
        .bind(now_millis())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sets or clears the `loading_more_files` flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn set_loading_more_files(&self, id: &str, loading: bool) -> Result<()> {
        sqlx::query("UPDATE downloads SET loading_more_files = ? WHERE id = ?")
            .bind(loading)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Marks a download completed unless it already is.
    ///
    /// Returns the updated row, or `None` when it was already completed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn complete_download(&self, id: &str, now: i64) -> Result<Option<DownloadRow>> {
        let row = sqlx::query_as::<_, DownloadRow>(
            r"UPDATE downloads
              SET state = ?, time_end = ?
              WHERE id = ? AND state != ?
              RETURNING *",
        )
        .bind(DownloadState::Completed.as_str())
        .bind(now)
        .bind(id)
        .bind(DownloadState::Completed.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Puts a download back to `active` with its failure markers cleared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] if no row matched.
    #[instrument(skip(self))]
    pub async fn reset_download_for_restart(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET state = ?, errors = NULL, num_errors = 0, time_end = NULL,
                  auth_url = NULL, eula_url = NULL
              WHERE id = ?",
        )
        .bind(DownloadState::Active.as_str())
        .bind(id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DownloadNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Reopens a download for more work: `active`, no end time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn reopen_download(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE downloads SET state = ?, time_end = NULL WHERE id = ?")
            .bind(DownloadState::Active.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Appends a structured error to the download's `errors` list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] or a database/JSON error.
    #[instrument(skip(self, record), fields(kind = ?record.kind))]
    pub async fn append_download_error(&self, id: &str, record: ErrorRecord) -> Result<()> {
        let row = self.require_download(id).await?;
        let mut errors = row.error_records()?;
        errors.push(record);
        let encoded = encode_errors("downloads.errors", &errors)?;
        sqlx::query("UPDATE downloads SET errors = ? WHERE id = ?")
            .bind(encoded)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Increments the download's `num_errors` counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn increment_download_errors(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE downloads SET num_errors = num_errors + 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Suspends a download waiting on an external auth or license step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn set_download_waiting(
        &self,
        id: &str,
        state: DownloadState,
        redirect_url: Option<&str>,
    ) -> Result<()> {
        let column = match state {
            DownloadState::WaitingForEula => "eula_url",
            _ => "auth_url",
        };
        let sql = format!("UPDATE downloads SET state = ?, {column} = ? WHERE id = ?");
        sqlx::query(&sql)
            .bind(state.as_str())
            .bind(redirect_url)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Shows or hides a download in listings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] if no row matched.
    pub async fn set_download_visible(&self, id: &str, visible: bool) -> Result<()> {
        let result = sqlx::query("UPDATE downloads SET active = ? WHERE id = ?")
            .bind(visible)
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DownloadNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Removes a download and everything that belongs to it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any delete fails; nothing is removed then.
    #[instrument(skip(self))]
    pub async fn delete_download_rows(&self, id: &str) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        for sql in [
            "DELETE FROM pauses WHERE download_id = ?",
            "DELETE FROM files WHERE download_id = ?",
            "DELETE FROM token WHERE download_id = ?",
        ] {
            sqlx::query(sql).bind(id).execute(&mut *tx).await?;
        }
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::store::ErrorKind;

    async fn store_with_download(id: &str) -> Store {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        store
            .create_download(&NewDownload::new(id, "/tmp/downloads"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_download_defaults() {
        let store = store_with_download("granules-1").await;
        let row = store.require_download("granules-1").await.unwrap();
        assert_eq!(row.state().unwrap(), DownloadState::Pending);
        assert!(row.active);
        assert!(row.loading_more_files);
        assert_eq!(row.num_errors, 0);
        assert!(row.time_start.is_none());
    }

    #[tokio::test]
    async fn test_require_download_missing() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let result = store.require_download("nope").await;
        assert!(matches!(result, Err(StoreError::DownloadNotFound(id)) if id == "nope"));
    }

    #[tokio::test]
    async fn test_mark_started_promotes_only_pending() {
        let store = store_with_download("d").await;
        store.set_download_state("d", DownloadState::Paused).await.unwrap();
        store.mark_download_started("d").await.unwrap();
        let row = store.require_download("d").await.unwrap();
        assert_eq!(row.state().unwrap(), DownloadState::Paused);
        assert!(row.time_start.is_some());
    }

    #[tokio::test]
    async fn test_set_state_where_respects_guard() {
        let store = store_with_download("d").await;
        let changed = store
            .set_download_state_where("d", DownloadState::Active, &[DownloadState::Paused])
            .await
            .unwrap();
        assert!(!changed);
        let changed = store
            .set_download_state_where("d", DownloadState::Active, &[DownloadState::Pending])
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_complete_download_only_once() {
        let store = store_with_download("d").await;
        assert!(store.complete_download("d", 10).await.unwrap().is_some());
        assert!(store.complete_download("d", 20).await.unwrap().is_none());
        let row = store.require_download("d").await.unwrap();
        assert_eq!(row.time_end, Some(10));
    }

    #[tokio::test]
    async fn test_append_download_error_accumulates() {
        let store = store_with_download("d").await;
        store
            .append_download_error("d", ErrorRecord::new(ErrorKind::LinksRequestFailed, "a"))
            .await
            .unwrap();
        store
            .append_download_error("d", ErrorRecord::new(ErrorKind::InvalidLinksResponse, "b"))
            .await
            .unwrap();
        let errors = store.require_download("d").await.unwrap().error_records().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].kind, ErrorKind::InvalidLinksResponse);
    }

    #[tokio::test]
    async fn test_restart_reset_clears_markers() {
        let store = store_with_download("d").await;
        store.increment_download_errors("d").await.unwrap();
        store.complete_download("d", 5).await.unwrap();
        store.reset_download_for_restart("d").await.unwrap();
        let row = store.require_download("d").await.unwrap();
        assert_eq!(row.state().unwrap(), DownloadState::Active);
        assert_eq!(row.num_errors, 0);
        assert!(row.time_end.is_none());
    }

    #[tokio::test]
    async fn test_hidden_downloads_skipped_in_listing() {
        let store = store_with_download("d").await;
        store.set_download_visible("d", false).await.unwrap();
        assert!(store.list_downloads(false).await.unwrap().is_empty());
        assert_eq!(store.list_downloads(true).await.unwrap().len(), 1);
    }
}
