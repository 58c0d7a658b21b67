//! JSON control surface over the manager.
//!
//! A presentation layer talks to the core with [`ControlRequest`] messages
//! and receives [`ControlResponse`] messages. Both are internally tagged on
//! `type` with camelCase names and fields, e.g.
//! `{"type":"pauseDownloadItem","downloadId":"granules-1700000000000"}`.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::links::FetchReport;
use crate::manager::{BeginDownload, DownloadManager, ManagerError, Result, UndoOutcome};
use crate::progress::{DownloadProgress, FileProgress};
use crate::store::Preferences;

/// A message from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlRequest {
    BeginDownload {
        label: String,
        links_url: String,
        /// Falls back to the default, then the last used location.
        #[serde(default)]
        download_location: Option<String>,
        #[serde(default)]
        client_id: Option<String>,
    },
    PauseDownloadItem {
        #[serde(default)]
        download_id: Option<String>,
        #[serde(default)]
        filename: Option<String>,
    },
    ResumeDownloadItem {
        #[serde(default)]
        download_id: Option<String>,
        #[serde(default)]
        filename: Option<String>,
    },
    CancelDownloadItem {
        download_id: String,
        #[serde(default)]
        filename: Option<String>,
    },
    RetryErroredDownloadItem {
        download_id: String,
        #[serde(default)]
        filename: Option<String>,
    },
    RestartDownload {
        download_id: String,
        #[serde(default)]
        filename: Option<String>,
    },
    RequestDownloadsProgress {
        #[serde(default)]
        download_ids: Option<Vec<String>>,
    },
    RequestFilesProgress {
        download_id: String,
        #[serde(default)]
        filename: Option<String>,
    },
    Undo {
        marker: String,
    },
    DeleteDownload {
        download_id: String,
    },
    ClearDownload {
        download_id: String,
    },
    AuthCallback {
        download_id: String,
        token: String,
    },
    EulaCallback {
        download_id: String,
        accepted: bool,
    },
    SetPreferences {
        #[serde(default)]
        concurrent_downloads: Option<i64>,
        #[serde(default)]
        default_download_location: Option<String>,
        #[serde(default)]
        allow_metrics: Option<bool>,
        #[serde(default)]
        window_state: Option<String>,
    },
}

/// A message back to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlResponse {
    DownloadBegun {
        download_id: String,
        report: FetchReport,
    },
    /// Pause or resume; `downloads` is how many downloads were touched.
    Updated {
        downloads: usize,
    },
    /// Cancel, restart or delete, with the marker that undoes it.
    UndoAvailable {
        marker: String,
    },
    FilesRequeued {
        files: u64,
    },
    DownloadsProgress {
        downloads: Vec<DownloadProgress>,
    },
    FilesProgress {
        download_id: String,
        files: Vec<FileProgress>,
    },
    Undone {
        outcome: UndoOutcome,
    },
    Cleared {
        download_id: String,
    },
    Preferences {
        preferences: Preferences,
    },
    Error {
        message: String,
    },
}

impl DownloadManager {
    /// Runs one control request.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying operation, or
    /// [`ManagerError::InvalidRequest`] for values out of range.
    #[instrument(skip(self, request))]
    pub async fn dispatch(&self, request: ControlRequest) -> Result<ControlResponse> {
        debug!(?request, "control request");
        let response = match request {
            ControlRequest::BeginDownload {
                label,
                links_url,
                download_location,
                client_id,
            } => {
                let download_location = match download_location {
                    Some(location) => location,
                    None => self.fallback_location().await?,
                };
                let (download_id, report) = self
                    .begin_download(BeginDownload {
                        label,
                        links_url,
                        download_location,
                        client_id,
                    })
                    .await?;
                ControlResponse::DownloadBegun {
                    download_id,
                    report,
                }
            }
            ControlRequest::PauseDownloadItem {
                download_id,
                filename,
            } => ControlResponse::Updated {
                downloads: self
                    .pause(download_id.as_deref(), filename.as_deref())
                    .await?,
            },
            ControlRequest::ResumeDownloadItem {
                download_id,
                filename,
            } => ControlResponse::Updated {
                downloads: self
                    .resume(download_id.as_deref(), filename.as_deref())
                    .await?,
            },
            ControlRequest::CancelDownloadItem {
                download_id,
                filename,
            } => ControlResponse::UndoAvailable {
                marker: self.cancel(&download_id, filename.as_deref()).await?,
            },
            ControlRequest::RetryErroredDownloadItem {
                download_id,
                filename,
            } => ControlResponse::FilesRequeued {
                files: self.retry(&download_id, filename.as_deref()).await?,
            },
            ControlRequest::RestartDownload {
                download_id,
                filename,
            } => ControlResponse::UndoAvailable {
                marker: self.restart(&download_id, filename.as_deref()).await?,
            },
            ControlRequest::RequestDownloadsProgress { download_ids } => {
                ControlResponse::DownloadsProgress {
                    downloads: self.downloads_progress(download_ids.as_deref()).await?,
                }
            }
            ControlRequest::RequestFilesProgress {
                download_id,
                filename,
            } => {
                let files = self
                    .files_progress(&download_id, filename.as_deref())
                    .await?;
                ControlResponse::FilesProgress { download_id, files }
            }
            ControlRequest::Undo { marker } => ControlResponse::Undone {
                outcome: self.undo(&marker).await?,
            },
            ControlRequest::DeleteDownload { download_id } => ControlResponse::UndoAvailable {
                marker: self.delete_download(&download_id).await?,
            },
            ControlRequest::ClearDownload { download_id } => {
                self.clear_download(&download_id).await?;
                ControlResponse::Cleared { download_id }
            }
            ControlRequest::AuthCallback { download_id, token } => {
                ControlResponse::FilesRequeued {
                    files: self.auth_callback(&download_id, &token).await?,
                }
            }
            ControlRequest::EulaCallback {
                download_id,
                accepted,
            } => ControlResponse::FilesRequeued {
                files: self.eula_callback(&download_id, accepted).await?,
            },
            ControlRequest::SetPreferences {
                concurrent_downloads,
                default_download_location,
                allow_metrics,
                window_state,
            } => {
                let mut preferences = self.store().preferences().await?;
                if let Some(limit) = concurrent_downloads {
                    if !(1..=100).contains(&limit) {
                        return Err(ManagerError::InvalidRequest(format!(
                            "concurrentDownloads must be between 1 and 100, got {limit}"
                        )));
                    }
                    preferences.concurrent_downloads = limit;
                }
                if default_download_location.is_some() {
                    preferences.default_download_location = default_download_location;
                }
                if let Some(allow) = allow_metrics {
                    preferences.allow_metrics = allow;
                }
                if window_state.is_some() {
                    preferences.window_state = window_state;
                }
                self.store().save_preferences(&preferences).await?;
                self.schedule_next(None).await?;
                ControlResponse::Preferences { preferences }
            }
        };
        Ok(response)
    }

    /// Runs a JSON-encoded request and always answers with JSON.
    ///
    /// Malformed requests and failed operations come back as an `error` response.
    pub async fn dispatch_json(&self, request: &str) -> String {
        let response = match serde_json::from_str::<ControlRequest>(request) {
            Ok(request) => match self.dispatch(request).await {
                Ok(response) => response,
                Err(error) => ControlResponse::Error {
                    message: error.to_string(),
                },
            },
            Err(error) => ControlResponse::Error {
                message: format!("malformed request: {error}"),
            },
        };
        serde_json::to_string(&response)
            .unwrap_or_else(|error| format!(r#"{{"type":"error","message":"{error}"}}"#))
    }

    async fn fallback_location(&self) -> Result<String> {
        let preferences = self.store().preferences().await?;
        preferences
            .default_download_location
            .or(preferences.last_download_location)
            .ok_or_else(|| ManagerError::InvalidRequest("no download location given".to_string()))
    }
}
