//! Progress reports for downloads and their files.
//!
//! Reports are computed on read. The displayed state comes from
//! [`derive_download_state`] unless the stored state is imposed, and elapsed
//! time leaves out every recorded pause interval.

use serde::Serialize;
use tracing::instrument;

use crate::manager::{DownloadManager, Result};
use crate::store::{
    DownloadRow, DownloadState, ErrorRecord, FileRow, FileState, PauseRow, PauseScope,
    derive_download_state, now_millis,
};

/// Progress counters shared by download and file reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub percent: i64,
    pub finished_files: i64,
    pub total_files: i64,
    /// Milliseconds spent running, pauses excluded.
    pub total_time: i64,
}

/// Progress report for one download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub id: String,
    pub progress: Progress,
    pub state: DownloadState,
    pub errors: Vec<ErrorRecord>,
    pub loading_more_files: bool,
    pub num_errors: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eula_url: Option<String>,
}

/// Progress report for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub download_id: String,
    pub filename: String,
    pub url: String,
    pub state: FileState,
    pub percent: i64,
    pub received_bytes: i64,
    pub total_bytes: i64,
    pub total_time: i64,
    pub duplicate_count: i64,
    pub errors: Vec<ErrorRecord>,
}

/// Running time inside `[start, end]` with the union of `pauses` removed.
///
/// Overlapping pauses are counted once; open pauses run to `end`.
#[must_use]
pub fn active_time(start: i64, end: i64, pauses: &[PauseRow]) -> i64 {
    if end <= start {
        return 0;
    }
    let mut intervals: Vec<(i64, i64)> = pauses
        .iter()
        .map(|pause| {
            (
                pause.time_start.max(start),
                pause.time_end.unwrap_or(end).min(end),
            )
        })
        .filter(|(from, to)| to > from)
        .collect();
    intervals.sort_unstable();

    let mut paused = 0;
    let mut current: Option<(i64, i64)> = None;
    for (from, to) in intervals {
        current = match current {
            Some((open_from, open_to)) if from <= open_to => Some((open_from, open_to.max(to))),
            Some((open_from, open_to)) => {
                paused += open_to - open_from;
                Some((from, to))
            }
            None => Some((from, to)),
        };
    }
    if let Some((from, to)) = current {
        paused += to - from;
    }
    (end - start - paused).max(0)
}

/// Floored mean of the file percents, 0 for a download without files.
#[must_use]
pub fn average_percent(files: &[FileRow]) -> i64 {
    if files.is_empty() {
        return 0;
    }
    let sum: i64 = files.iter().map(|file| file.percent.clamp(0, 100)).sum();
    sum / i64::try_from(files.len()).unwrap_or(i64::MAX)
}

fn download_report(
    download: DownloadRow,
    files: &[FileRow],
    pauses: &[PauseRow],
    now: i64,
) -> Result<DownloadProgress> {
    let states = files
        .iter()
        .map(FileRow::state)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let finished = states
        .iter()
        .filter(|state| **state == FileState::Completed)
        .count();
    let download_pauses: Vec<PauseRow> = pauses
        .iter()
        .filter(|pause| pause.file_id.is_none())
        .cloned()
        .collect();
    let total_time = match download.time_start {
        Some(start) => active_time(start, download.time_end.unwrap_or(now), &download_pauses),
        None => 0,
    };

    Ok(DownloadProgress {
        progress: Progress {
            percent: average_percent(files),
            finished_files: i64::try_from(finished).unwrap_or(i64::MAX),
            total_files: i64::try_from(files.len()).unwrap_or(i64::MAX),
            total_time,
        },
        state: derive_download_state(download.state()?, &states),
        errors: download.error_records()?,
        loading_more_files: download.loading_more_files,
        num_errors: download.num_errors,
        id: download.id,
        auth_url: download.auth_url,
        eula_url: download.eula_url,
    })
}

fn file_report(file: FileRow, pauses: &[PauseRow], now: i64) -> Result<FileProgress> {
    let relevant: Vec<PauseRow> = pauses
        .iter()
        .filter(|pause| pause.file_id.is_none_or(|id| id == file.id))
        .cloned()
        .collect();
    let total_time = match file.time_start {
        Some(start) => active_time(start, file.time_end.unwrap_or(now), &relevant),
        None => 0,
    };
    Ok(FileProgress {
        state: file.state()?,
        errors: file.error_records()?,
        total_time,
        download_id: file.download_id,
        filename: file.filename,
        url: file.url,
        percent: file.percent,
        received_bytes: file.received_bytes,
        total_bytes: file.total_bytes,
        duplicate_count: file.duplicate_count,
    })
}

impl DownloadManager {
    /// Progress of every visible download, or of the given ids only.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read fails or a row holds invalid data.
    #[instrument(skip(self))]
    pub async fn downloads_progress(&self, ids: Option<&[String]>) -> Result<Vec<DownloadProgress>> {
        let now = now_millis();
        let downloads = self.store().list_downloads(false).await?;
        let mut reports = Vec::with_capacity(downloads.len());
        for download in downloads {
            if ids.is_some_and(|wanted| !wanted.contains(&download.id)) {
                continue;
            }
            let files = self.store().list_files(&download.id, None).await?;
            let pauses = self
                .store()
                .list_pauses(&download.id, PauseScope::All)
                .await?;
            reports.push(download_report(download, &files, &pauses, now)?);
        }
        Ok(reports)
    }

    /// Progress of one download's files, optionally narrowed to one filename.
    ///
    /// # Errors
    ///
    /// Returns a store error, including not-found for an unknown id.
    #[instrument(skip(self))]
    pub async fn files_progress(
        &self,
        download_id: &str,
        filename: Option<&str>,
    ) -> Result<Vec<FileProgress>> {
        self.store().require_download(download_id).await?;
        let now = now_millis();
        let files = self.store().list_files(download_id, filename).await?;
        let pauses = self
            .store()
            .list_pauses(download_id, PauseScope::All)
            .await?;
        files
            .into_iter()
            .map(|file| file_report(file, &pauses, now))
            .collect()
    }
}
