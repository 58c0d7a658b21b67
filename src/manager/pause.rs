//! Pause and resume, per file or per download.

use tracing::{debug, info, instrument};

use super::{DownloadManager, Result};
use crate::store::{DownloadState, FileState, PauseScope, now_millis};

/// File states a pause moves to `paused`.
const PAUSABLE: [FileState; 4] = [
    FileState::Pending,
    FileState::Starting,
    FileState::Active,
    FileState::Interrupted,
];

/// Download states paused by a global pause.
const RUNNING_DOWNLOADS: [DownloadState; 3] = [
    DownloadState::Active,
    DownloadState::Pending,
    DownloadState::Interrupted,
];

/// Download states a single-download pause applies to.
const PAUSABLE_DOWNLOADS: [DownloadState; 4] = [
    DownloadState::Active,
    DownloadState::Pending,
    DownloadState::Interrupted,
    DownloadState::Paused,
];

/// Download states a resume brings back to `active`.
const RESUMABLE_DOWNLOADS: [DownloadState; 5] = [
    DownloadState::Paused,
    DownloadState::Interrupted,
    DownloadState::AppQuitting,
    DownloadState::Pending,
    DownloadState::Active,
];

impl DownloadManager {
    /// Pauses one file, one download, or every running download.
    ///
    /// Returns the number of downloads touched.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id or filename.
    #[instrument(skip(self))]
    pub async fn pause(&self, download_id: Option<&str>, filename: Option<&str>) -> Result<usize> {
        match (download_id, filename) {
            (Some(download_id), Some(filename)) => {
                self.pause_file(download_id, filename).await?;
                Ok(1)
            }
            (Some(download_id), None) => Ok(usize::from(self.pause_download(download_id).await?)),
            (None, _) => {
                let ids = self
                    .store()
                    .download_ids_in_states(&RUNNING_DOWNLOADS)
                    .await?;
                let mut paused = 0;
                for id in &ids {
                    paused += usize::from(self.pause_download(id).await?);
                }
                info!(downloads = paused, "paused all downloads");
                Ok(paused)
            }
        }
    }

    async fn pause_file(&self, download_id: &str, filename: &str) -> Result<()> {
        let file = self.store().require_file(download_id, filename).await?;
        if !PAUSABLE.contains(&file.state()?) {
            debug!(download_id, filename, state = %file.state_str, "file not pausable");
            return Ok(());
        }
        self.store()
            .open_pause(download_id, Some(file.id), now_millis())
            .await?;
        if let Some(handle) = self.handle_for(download_id, filename) {
            handle.pause();
        }
        self.store()
            .set_file_state_where(file.id, FileState::Paused, &PAUSABLE)
            .await?;
        Ok(())
    }

    /// Pauses a running download; finished and waiting downloads are left alone.
    async fn pause_download(&self, download_id: &str) -> Result<bool> {
        let download = self.store().require_download(download_id).await?;
        if !PAUSABLE_DOWNLOADS.contains(&download.state()?) {
            debug!(download_id, state = %download.state_str, "download not pausable");
            return Ok(false);
        }
        self.store()
            .open_pause(download_id, None, now_millis())
            .await?;
        for (_, handle) in self.registry().handles_for(download_id, None) {
            handle.pause();
        }
        let paused = self
            .store()
            .transition_files(download_id, None, FileState::Paused, &PAUSABLE)
            .await?;
        self.store()
            .set_download_state_where(download_id, DownloadState::Paused, &PAUSABLE_DOWNLOADS)
            .await?;
        info!(download_id, files = paused, "download paused");
        Ok(true)
    }

    /// Resumes one file, one download, or every paused download.
    ///
    /// Paused files with a live handle go back to `active`; the rest become
    /// `pending` and wait for the scheduler. Matching open pauses are closed.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id or filename.
    #[instrument(skip(self))]
    pub async fn resume(&self, download_id: Option<&str>, filename: Option<&str>) -> Result<usize> {
        let touched = match (download_id, filename) {
            (Some(download_id), Some(filename)) => {
                self.resume_file(download_id, filename).await?;
                1
            }
            (Some(download_id), None) => {
                self.store().require_download(download_id).await?;
                self.resume_download(download_id).await?;
                1
            }
            (None, _) => {
                let ids = self
                    .store()
                    .download_ids_in_states(&[DownloadState::Paused])
                    .await?;
                for id in &ids {
                    self.resume_download(id).await?;
                }
                ids.len()
            }
        };
        self.schedule_next(None).await?;
        match download_id {
            Some(download_id) => {
                self.finish_download(download_id).await?;
            }
            None => {
                for id in self
                    .store()
                    .download_ids_in_states(&[DownloadState::Active])
                    .await?
                {
                    self.finish_download(&id).await?;
                }
            }
        }
        Ok(touched)
    }

    async fn resume_file(&self, download_id: &str, filename: &str) -> Result<()> {
        let file = self.store().require_file(download_id, filename).await?;
        if file.state()? != FileState::Paused {
            debug!(download_id, filename, state = %file.state_str, "file not paused");
            return Ok(());
        }
        self.resume_paused_file(download_id, file.id, filename)
            .await?;
        self.store()
            .close_pauses(download_id, PauseScope::File(file.id), now_millis())
            .await?;
        self.store()
            .set_download_state_where(download_id, DownloadState::Active, &RESUMABLE_DOWNLOADS)
            .await?;
        Ok(())
    }

    async fn resume_download(&self, download_id: &str) -> Result<()> {
        let paused = self
            .store()
            .list_files(download_id, None)
            .await?
            .into_iter()
            .filter(|file| file.state_str == FileState::Paused.as_str());
        let mut resumed = 0_usize;
        for file in paused {
            self.resume_paused_file(download_id, file.id, &file.filename)
                .await?;
            resumed += 1;
        }
        self.store()
            .close_pauses(download_id, PauseScope::All, now_millis())
            .await?;
        self.store()
            .set_download_state_where(download_id, DownloadState::Active, &RESUMABLE_DOWNLOADS)
            .await?;
        info!(download_id, files = resumed, "download resumed");
        Ok(())
    }

    async fn resume_paused_file(&self, download_id: &str, file_id: i64, filename: &str) -> Result<()> {
        let next = match self.handle_for(download_id, filename) {
            Some(handle) => {
                handle.resume();
                FileState::Active
            }
            None => FileState::Pending,
        };
        self.store()
            .set_file_state_where(file_id, next, &[FileState::Paused])
            .await?;
        Ok(())
    }
}
