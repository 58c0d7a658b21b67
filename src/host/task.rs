//! The per-transfer task: request, stream to disk, report.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::error::HostError;
use super::handle::Control;
use crate::transfer::{EventSender, TransferEvent, TransferId, TransferOutcome, TransferProgress};

/// Minimum gap between two progress events of one transfer.
pub(crate) const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// One transfer, from `Started` to `Done`.
pub(crate) struct TransferTask {
    pub(crate) client: Client,
    pub(crate) id: TransferId,
    pub(crate) url: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) control: watch::Receiver<Control>,
    pub(crate) events: EventSender,
}

/// Where a stream ended when nothing failed.
enum Finish {
    Completed,
    Cancelled,
}

impl TransferTask {
    /// Runs the transfer and sends exactly one `Done`.
    #[instrument(skip(self), fields(transfer_id = %self.id, url = %self.url))]
    pub(crate) async fn run(mut self) {
        let outcome = match self.wait_for_save_path().await {
            None => TransferOutcome::Cancelled,
            Some(path) => match self.transfer(&path).await {
                Ok(Finish::Completed) => {
                    info!(path = %path.display(), "transfer complete");
                    TransferOutcome::Completed
                }
                Ok(Finish::Cancelled) => {
                    remove_partial(&path).await;
                    TransferOutcome::Cancelled
                }
                Err(error) => {
                    warn!(error = %error, "transfer failed");
                    remove_partial(&path).await;
                    error.into_outcome()
                }
            },
        };
        let _ = self.events.send(TransferEvent::Done {
            transfer_id: self.id,
            outcome,
        });
    }

    /// Waits until the core has picked a save path; `None` if cancelled first.
    async fn wait_for_save_path(&mut self) -> Option<PathBuf> {
        let control = self
            .control
            .wait_for(|control| control.save_path.is_some() || control.cancelled)
            .await
            .ok()?;
        if control.cancelled {
            return None;
        }
        control.save_path.clone()
    }

    async fn transfer(&mut self, path: &Path) -> Result<Finish, HostError> {
        let mut request = self.client.get(&self.url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = tokio::select! {
            response = request.send() => response.map_err(|e| HostError::network(&self.url, e))?,
            () = cancelled(&mut self.control) => return Ok(Finish::Cancelled),
        };

        let status = response.status();
        let final_url = response.url().to_string();
        if status == StatusCode::UNAUTHORIZED {
            return Err(HostError::AuthRequired { url: final_url });
        }
        if status == StatusCode::FORBIDDEN && final_url.to_ascii_lowercase().contains("eula") {
            return Err(HostError::EulaRequired { url: final_url });
        }
        if !status.is_success() {
            return Err(HostError::http_status(&self.url, status.as_u16()));
        }

        let total = response.content_length().unwrap_or(0);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HostError::io(parent, e))?;
        }
        let file = File::create(path)
            .await
            .map_err(|e| HostError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut last_report = Instant::now();
        debug!(total, path = %path.display(), "streaming body");

        loop {
            if self.control.borrow().paused {
                self.report(TransferProgress::Progressing, received, total, true);
                let resumed = self
                    .control
                    .wait_for(|control| !control.paused || control.cancelled)
                    .await
                    .map(|control| !control.cancelled)
                    .unwrap_or(false);
                if !resumed {
                    return Ok(Finish::Cancelled);
                }
                self.report(TransferProgress::Progressing, received, total, false);
            }

            tokio::select! {
                biased;
                changed = self.control.changed() => {
                    if changed.is_err() || self.control.borrow().cancelled {
                        return Ok(Finish::Cancelled);
                    }
                }
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(Ok(bytes)) => {
                        writer
                            .write_all(&bytes)
                            .await
                            .map_err(|e| HostError::io(path, e))?;
                        received += bytes.len() as u64;
                        if last_report.elapsed() >= PROGRESS_INTERVAL {
                            self.report(TransferProgress::Progressing, received, total, false);
                            last_report = Instant::now();
                        }
                    }
                    Some(Err(error)) => {
                        self.report(TransferProgress::Interrupted, received, total, false);
                        return Err(HostError::network(&self.url, error));
                    }
                },
            }
        }

        writer.flush().await.map_err(|e| HostError::io(path, e))?;
        self.report(TransferProgress::Progressing, received, total.max(received), false);
        Ok(Finish::Completed)
    }

    fn report(&self, state: TransferProgress, received_bytes: u64, total_bytes: u64, is_paused: bool) {
        let _ = self.events.send(TransferEvent::Updated {
            transfer_id: self.id,
            state,
            received_bytes,
            total_bytes,
            is_paused,
        });
    }
}

/// Resolves once the handle is cancelled or dropped.
async fn cancelled(control: &mut watch::Receiver<Control>) {
    let _ = control.wait_for(|control| control.cancelled).await;
}

async fn remove_partial(path: &Path) {
    if tokio::fs::remove_file(path).await.is_ok() {
        debug!(path = %path.display(), "removed partial file");
    }
}
