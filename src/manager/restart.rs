//! Restart, in two phases.

use tracing::{info, instrument};

use super::{DownloadManager, Result};
use crate::store::{FileState, MutationOperation, MutationSnapshot, PauseScope, now_millis};

/// Every state a restart tears down in its first phase.
const RESTARTABLE: [FileState; 10] = [
    FileState::Pending,
    FileState::Starting,
    FileState::Active,
    FileState::Paused,
    FileState::Interrupted,
    FileState::Error,
    FileState::WaitingForAuth,
    FileState::WaitingForEula,
    FileState::Cancelled,
    FileState::Completed,
];

impl DownloadManager {
    /// Restarts a download or one of its files from scratch.
    ///
    /// Phase one marks the files `cancelling` and cancels their handles.
    /// Phase two resets them to `pending` with progress cleared and reopens
    /// the download. If the download had already ended, the idle gap between
    /// its end and now is recorded as a closed pause. Returns an undo marker.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id or filename.
    #[instrument(skip(self))]
    pub async fn restart(&self, download_id: &str, filename: Option<&str>) -> Result<String> {
        let download = self.store().require_download(download_id).await?;
        if let Some(filename) = filename {
            self.store().require_file(download_id, filename).await?;
        }
        let files = self.store().list_files(download_id, filename).await?;
        let snapshot = MutationSnapshot::capture(&download, &files)?;
        let marker = self
            .store()
            .record_mutation(
                MutationOperation::Restart,
                filename,
                &snapshot,
                self.settings().undo_grace_ms(),
            )
            .await?;

        self.store()
            .transition_files(download_id, filename, FileState::Cancelling, &RESTARTABLE)
            .await?;
        self.cancel_handles(download_id, filename);
        for file in &files {
            self.correlation().remove_file(&file.url, file.id);
        }

        let now = now_millis();
        self.store().reset_files(download_id, filename, None).await?;
        match filename {
            Some(_) => {
                for file in &files {
                    self.store()
                        .close_pauses(download_id, PauseScope::File(file.id), now)
                        .await?;
                }
                self.store().reopen_download(download_id).await?;
            }
            None => {
                self.store()
                    .close_pauses(download_id, PauseScope::All, now)
                    .await?;
                self.store().reset_download_for_restart(download_id).await?;
            }
        }
        if let Some(ended) = download.time_end {
            self.store()
                .insert_closed_pause(download_id, None, ended, now)
                .await?;
        }
        info!(download_id, filename, files = files.len(), marker = %marker.marker, "restarted");

        self.schedule_next(None).await?;
        Ok(marker.marker)
    }
}
