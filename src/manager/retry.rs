//! Retrying errored files.

use tracing::{info, instrument};

use super::{DownloadManager, Result};
use crate::store::FileState;

impl DownloadManager {
    /// Resets `error` files of a download (or one file) and schedules them.
    ///
    /// Percent, byte counters, timestamps and errors are cleared. Files in any
    /// other state are untouched. Returns how many files were reset.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id.
    #[instrument(skip(self))]
    pub async fn retry(&self, download_id: &str, filename: Option<&str>) -> Result<u64> {
        self.store().require_download(download_id).await?;
        let reset = self
            .store()
            .reset_files(download_id, filename, Some(&[FileState::Error]))
            .await?;
        if reset > 0 {
            self.store().reopen_download(download_id).await?;
        }
        info!(download_id, filename, files = reset, "retrying errored files");
        self.schedule_next(None).await?;
        Ok(reset)
    }
}
