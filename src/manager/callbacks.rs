//! Auth and license callbacks that release waiting files.

use tracing::{info, instrument};

use super::{DownloadManager, Result};
use crate::store::{DownloadState, FileState};

impl DownloadManager {
    /// Stores the bearer token and requeues files waiting for authentication.
    ///
    /// The first waiting file is dispatched ahead of everything else.
    /// Returns how many files were released.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id.
    #[instrument(skip(self, token))]
    pub async fn auth_callback(&self, download_id: &str, token: &str) -> Result<u64> {
        self.store().require_download(download_id).await?;
        self.store().set_token(download_id, token).await?;
        self.release_waiting(download_id, FileState::WaitingForAuth)
            .await
    }

    /// Resolves a license prompt.
    ///
    /// Accepting requeues files waiting on the license; rejecting cancels them.
    /// Returns how many files were affected.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id.
    #[instrument(skip(self))]
    pub async fn eula_callback(&self, download_id: &str, accepted: bool) -> Result<u64> {
        self.store().require_download(download_id).await?;
        if accepted {
            return self
                .release_waiting(download_id, FileState::WaitingForEula)
                .await;
        }

        let cancelled = self
            .store()
            .transition_files(
                download_id,
                None,
                FileState::Cancelled,
                &[FileState::WaitingForEula],
            )
            .await?;
        self.store()
            .set_download_state_where(
                download_id,
                DownloadState::Active,
                &[DownloadState::WaitingForEula],
            )
            .await?;
        info!(download_id, files = cancelled, "license rejected");
        self.finish_download(download_id).await?;
        self.schedule_next(None).await?;
        Ok(cancelled)
    }

    async fn release_waiting(&self, download_id: &str, waiting: FileState) -> Result<u64> {
        let priority = self
            .store()
            .first_file_in_state(download_id, waiting)
            .await?
            .map(|file| file.id);
        let released = self
            .store()
            .transition_files(download_id, None, FileState::Pending, &[waiting])
            .await?;
        self.store()
            .set_download_state(download_id, DownloadState::Active)
            .await?;
        info!(download_id, files = released, state = %waiting, "released waiting files");
        self.schedule_next(priority).await?;
        Ok(released)
    }
}
