//! Application shutdown and startup recovery.

use tracing::{info, instrument};

use super::{DownloadManager, Result};
use crate::store::{DownloadState, PauseScope, now_millis};

impl DownloadManager {
    /// Suspends every running download before the process exits.
    ///
    /// All live handles are paused, each running download gets an open
    /// download-level pause and moves to `appQuitting`. Returns how many
    /// downloads were suspended.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read or update fails.
    #[instrument(skip(self))]
    pub async fn app_quitting(&self) -> Result<usize> {
        for handle in self.registry().all() {
            handle.pause();
        }
        let ids = self
            .store()
            .download_ids_in_states(&[
                DownloadState::Active,
                DownloadState::Pending,
                DownloadState::Interrupted,
            ])
            .await?;
        let now = now_millis();
        for id in &ids {
            self.store().open_pause(id, None, now).await?;
            self.store()
                .set_download_state(id, DownloadState::AppQuitting)
                .await?;
        }
        info!(downloads = ids.len(), "suspended for shutdown");
        Ok(ids.len())
    }

    /// Brings the store back in line after a restart of the process.
    ///
    /// Files left in flight by the previous process go back to `pending`,
    /// downloads suspended for shutdown become `active` with their pauses
    /// closed, expired undo markers are purged, and the scheduler runs.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read or update fails.
    #[instrument(skip(self))]
    pub async fn recover_on_startup(&self) -> Result<usize> {
        self.correlation().clear();
        let requeued = self.store().reset_in_flight_files().await?;

        let quitting = self
            .store()
            .download_ids_in_states(&[DownloadState::AppQuitting])
            .await?;
        let now = now_millis();
        for id in &quitting {
            self.store().close_pauses(id, PauseScope::Download, now).await?;
            self.store()
                .set_download_state(id, DownloadState::Active)
                .await?;
        }
        let purged = self.purge_expired_mutations().await?;
        info!(
            files = requeued,
            downloads = quitting.len(),
            markers = purged,
            "recovered previous session"
        );

        let dispatched = self.schedule_next(None).await?;
        Ok(dispatched.len())
    }
}
