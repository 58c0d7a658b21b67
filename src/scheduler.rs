//! Concurrency-bounded dispatch of pending files.
//!
//! A scheduling pass computes the free slots as
//! `limit - (running + starting)`, where `running` is the number of live
//! handles in the transfer registry and `starting` the number of dispatched
//! URLs the engine has not acknowledged yet. Up to that many pending files of
//! active downloads are claimed as `starting` in one conditional
//! `UPDATE ... RETURNING` and handed to the host engine.
//!
//! # Concurrency Model
//!
//! - Passes are serialized by an async mutex, so slot arithmetic and the
//!   claim never interleave between callers
//! - The claim is guarded on `state = 'pending'`, so even an unserialized
//!   caller could not dispatch a row twice
//! - A refused `begin` turns the file into `error` and frees its slot
//! - The translator holds the same lock while it moves an acknowledged
//!   transfer from the correlation map into the registry, so a pass never
//!   counts it in neither

use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::manager::{DownloadManager, Result};
use crate::store::{ErrorKind, ErrorRecord, FileRow, FileState, now_millis};
use crate::transfer::PendingTransfer;

/// Serializes scheduling passes.
#[derive(Debug, Default)]
pub struct Scheduler {
    lock: Mutex<()>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks scheduling passes while a transfer moves from the correlation
    /// map into the registry.
    pub(crate) async fn hold(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

/// Free dispatch slots for a pass; zero or negative means nothing to do.
#[must_use]
pub fn available_slots(limit: i64, running: usize, starting: usize) -> i64 {
    let busy = i64::try_from(running.saturating_add(starting)).unwrap_or(i64::MAX);
    limit.saturating_sub(busy)
}

impl DownloadManager {
    /// Runs a scheduling pass with the concurrency limit from preferences.
    ///
    /// Returns the files handed to the engine.
    ///
    /// # Errors
    ///
    /// Returns a store error if reading preferences or claiming files fails.
    pub async fn schedule_next(&self, priority_file_id: Option<i64>) -> Result<Vec<FileRow>> {
        let limit = self.store().concurrent_downloads().await?;
        self.schedule_with_limit(limit, priority_file_id).await
    }

    /// Runs a scheduling pass with an explicit concurrency limit.
    ///
    /// `priority_file_id` is dispatched ahead of older files when it is pending.
    ///
    /// # Errors
    ///
    /// Returns a store error if claiming or failing files fails.
    #[instrument(skip(self))]
    pub async fn schedule_with_limit(
        &self,
        limit: i64,
        priority_file_id: Option<i64>,
    ) -> Result<Vec<FileRow>> {
        let guard = self.scheduler().lock.lock().await;

        let running = self.registry().len();
        let starting = self.correlation().len();
        let slots = available_slots(limit, running, starting);
        if slots <= 0 {
            debug!(limit, running, starting, "no free slots");
            return Ok(Vec::new());
        }

        let claimed = self.store().claim_pending_files(slots, priority_file_id).await?;
        if claimed.is_empty() {
            return Ok(Vec::new());
        }

        let mut locations: HashMap<String, (String, Vec<(String, String)>)> = HashMap::new();
        let mut dispatched = Vec::with_capacity(claimed.len());
        let mut refused = Vec::new();

        for file in claimed {
            if !locations.contains_key(&file.download_id) {
                let download = self.store().require_download(&file.download_id).await?;
                let headers = self
                    .store()
                    .token(&file.download_id)
                    .await?
                    .map(|token| vec![("Authorization".to_string(), format!("Bearer {token}"))])
                    .unwrap_or_default();
                locations.insert(
                    file.download_id.clone(),
                    (download.download_location, headers),
                );
            }
            let Some((location, headers)) = locations.get(&file.download_id) else {
                continue;
            };

            self.correlation().register(
                &file.url,
                PendingTransfer {
                    download_id: file.download_id.clone(),
                    download_location: location.clone(),
                    file_id: file.id,
                    filename: file.filename.clone(),
                },
            );

            match self.engine().begin(&file.url, headers).await {
                Ok(()) => {
                    debug!(download_id = %file.download_id, filename = %file.filename, "dispatched");
                    dispatched.push(file);
                }
                Err(error) => {
                    warn!(
                        download_id = %file.download_id,
                        filename = %file.filename,
                        error = %error,
                        "engine refused transfer"
                    );
                    self.correlation().remove_file(&file.url, file.id);
                    let record = ErrorRecord::new(ErrorKind::DispatchFailed, error.to_string())
                        .with_url(file.url.clone())
                        .with_filename(file.filename.clone());
                    self.store()
                        .fail_file(file.id, FileState::Error, record, now_millis())
                        .await?;
                    self.store()
                        .increment_download_errors(&file.download_id)
                        .await?;
                    refused.push(file.download_id);
                }
            }
        }
        drop(guard);

        info!(
            dispatched = dispatched.len(),
            refused = refused.len(),
            slots,
            "scheduling pass complete"
        );

        refused.sort();
        refused.dedup();
        for download_id in refused {
            self.finish_download(&download_id).await?;
        }
        Ok(dispatched)
    }
}
