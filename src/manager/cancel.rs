//! Cancel, delete and clear.

use tracing::{info, instrument, warn};

use super::{DownloadManager, ManagerError, Result};
use crate::store::{
    DownloadState, FileState, MutationOperation, MutationSnapshot, PauseScope, now_millis,
};

/// File states a cancel moves to `cancelled`; completed files keep their state.
const CANCELLABLE: [FileState; 9] = [
    FileState::Pending,
    FileState::Starting,
    FileState::Active,
    FileState::Paused,
    FileState::Interrupted,
    FileState::Error,
    FileState::WaitingForAuth,
    FileState::WaitingForEula,
    FileState::Cancelling,
];

/// Download states that count as finished for `clear_download`.
const CLEARABLE: [DownloadState; 4] = [
    DownloadState::Completed,
    DownloadState::Cancelled,
    DownloadState::Error,
    DownloadState::ErrorFetchingLinks,
];

impl DownloadManager {
    /// Cancels a download or one of its files.
    ///
    /// Live handles are cancelled and every matching file that is not
    /// completed becomes `cancelled`. A whole-download cancel also stops link
    /// enumeration and then runs `finish_download`, so the download settles on
    /// `completed`. Returns an undo marker valid for the grace window.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id or filename.
    #[instrument(skip(self))]
    pub async fn cancel(&self, download_id: &str, filename: Option<&str>) -> Result<String> {
        let download = self.store().require_download(download_id).await?;
        if let Some(filename) = filename {
            self.store().require_file(download_id, filename).await?;
        }
        let files = self.store().list_files(download_id, filename).await?;
        let snapshot = MutationSnapshot::capture(&download, &files)?;
        let marker = self
            .store()
            .record_mutation(
                MutationOperation::Cancel,
                filename,
                &snapshot,
                self.settings().undo_grace_ms(),
            )
            .await?;

        let cancelled_handles = self.cancel_handles(download_id, filename);
        for file in &files {
            self.correlation().remove_file(&file.url, file.id);
        }
        let cancelled_files = self
            .store()
            .transition_files(download_id, filename, FileState::Cancelled, &CANCELLABLE)
            .await?;
        let now = now_millis();
        match filename {
            Some(_) => {
                for file in &files {
                    self.store()
                        .close_pauses(download_id, PauseScope::File(file.id), now)
                        .await?;
                }
            }
            None => {
                self.store()
                    .close_pauses(download_id, PauseScope::All, now)
                    .await?;
                self.store()
                    .set_download_state(download_id, DownloadState::Cancelled)
                    .await?;
                self.store()
                    .set_loading_more_files(download_id, false)
                    .await?;
            }
        }
        info!(
            download_id,
            filename,
            handles = cancelled_handles,
            files = cancelled_files,
            marker = %marker.marker,
            "cancelled"
        );

        self.finish_download(download_id).await?;
        self.schedule_next(None).await?;
        Ok(marker.marker)
    }

    /// Hides a download and schedules its rows for removal.
    ///
    /// Rows are removed by [`purge_expired_mutations`](Self::purge_expired_mutations)
    /// once the grace window has passed; until then the returned marker
    /// brings the download back.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id.
    #[instrument(skip(self))]
    pub async fn delete_download(&self, download_id: &str) -> Result<String> {
        let download = self.store().require_download(download_id).await?;
        let files = self.store().list_files(download_id, None).await?;
        let snapshot = MutationSnapshot::capture(&download, &files)?;
        let marker = self
            .store()
            .record_mutation(
                MutationOperation::Delete,
                None,
                &snapshot,
                self.settings().undo_grace_ms(),
            )
            .await?;

        self.cancel_handles(download_id, None);
        self.correlation().remove_download(download_id);
        self.store().set_download_visible(download_id, false).await?;
        info!(download_id, marker = %marker.marker, "download marked for deletion");

        self.schedule_next(None).await?;
        Ok(marker.marker)
    }

    /// Archives a finished download so it no longer shows in listings.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotFinished`] while the download still has work,
    /// or a store error.
    #[instrument(skip(self))]
    pub async fn clear_download(&self, download_id: &str) -> Result<()> {
        let download = self.store().require_download(download_id).await?;
        let state = download.state()?;
        if !CLEARABLE.contains(&state) {
            return Err(ManagerError::NotFinished {
                download_id: download_id.to_string(),
                state: state.to_string(),
            });
        }
        self.store().set_download_visible(download_id, false).await?;
        info!(download_id, "download cleared");
        Ok(())
    }

    /// Drops markers whose grace window has passed, finalizing deletes.
    ///
    /// Returns the number of markers removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read or delete fails.
    #[instrument(skip(self))]
    pub async fn purge_expired_mutations(&self) -> Result<usize> {
        let expired = self.store().expired_mutations(now_millis()).await?;
        for mutation in &expired {
            match mutation.operation() {
                Ok(MutationOperation::Delete) => {
                    let removed = self
                        .store()
                        .delete_download_rows(&mutation.download_id)
                        .await?;
                    info!(download_id = %mutation.download_id, removed, "download deleted");
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(marker = %mutation.marker, error = %error, "dropping unreadable marker");
                }
            }
            self.store().delete_mutation(&mutation.marker).await?;
        }
        Ok(expired.len())
    }
}
