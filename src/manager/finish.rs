//! Completing a download once all its files are done.

use serde::Serialize;
use tracing::{debug, info, instrument};

use super::{DownloadManager, Result};
use crate::progress::active_time;
use crate::store::{FileState, PauseScope, now_millis};

/// Summary emitted when a download completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatistics {
    pub download_id: String,
    pub total_files: i64,
    pub completed_files: i64,
    pub cancelled_files: i64,
    pub failed_files: i64,
    pub received_bytes: i64,
    /// Wall time from start to completion minus download-level pauses, in ms.
    pub active_duration_ms: i64,
    pub pause_count: i64,
    pub num_errors: i64,
}

impl DownloadManager {
    /// Marks the download completed when nothing is left to do.
    ///
    /// Completion requires that every file is completed, cancelled or
    /// errored, that link enumeration has finished, and that the download is
    /// not already completed. Returns the statistics when it completed now.
    ///
    /// # Errors
    ///
    /// Returns a store error if any read or the final update fails.
    #[instrument(skip(self))]
    pub async fn finish_download(&self, download_id: &str) -> Result<Option<DownloadStatistics>> {
        let download = self.store().require_download(download_id).await?;
        if download.loading_more_files {
            debug!(download_id, "still loading links");
            return Ok(None);
        }
        let unfinished = self.store().count_unfinished_files(download_id).await?;
        if unfinished > 0 {
            debug!(download_id, unfinished, "files still outstanding");
            return Ok(None);
        }

        let now = now_millis();
        let Some(row) = self.store().complete_download(download_id, now).await? else {
            return Ok(None);
        };

        let states = self.store().file_states(download_id).await?;
        let count = |wanted: FileState| {
            i64::try_from(states.iter().filter(|state| **state == wanted).count())
                .unwrap_or(i64::MAX)
        };
        let pauses = self.store().list_pauses(download_id, PauseScope::All).await?;
        let download_pauses: Vec<_> = pauses
            .iter()
            .filter(|pause| pause.file_id.is_none())
            .cloned()
            .collect();
        let started = row.time_start.unwrap_or(row.created_at);
        let stats = DownloadStatistics {
            download_id: download_id.to_string(),
            total_files: i64::try_from(states.len()).unwrap_or(i64::MAX),
            completed_files: count(FileState::Completed),
            cancelled_files: count(FileState::Cancelled),
            failed_files: count(FileState::Error),
            received_bytes: self.store().received_bytes_for_download(download_id).await?,
            active_duration_ms: active_time(started, now, &download_pauses),
            pause_count: i64::try_from(pauses.len()).unwrap_or(i64::MAX),
            num_errors: row.num_errors,
        };

        info!(
            download_id,
            total_files = stats.total_files,
            completed_files = stats.completed_files,
            cancelled_files = stats.cancelled_files,
            failed_files = stats.failed_files,
            received_bytes = stats.received_bytes,
            active_duration_ms = stats.active_duration_ms,
            pause_count = stats.pause_count,
            "download completed"
        );
        Ok(Some(stats))
    }
}
