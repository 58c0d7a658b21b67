//! Reconciles host transfer events with the store.
//!
//! The [`Translator`] is the single consumer of the event channel. It binds
//! each `Started` transfer to the file the scheduler dispatched for its URL,
//! mirrors progress onto the file row, and on `Done` settles the file,
//! reschedules and checks whether the download has finished.
//!
//! # Stale events
//!
//! Cancel, restart and delete take handles out of the registry before the
//! host has reacted. A `Done` for a transfer that is no longer registered is
//! therefore stale and leaves the file alone; the operation that removed the
//! handle already decided the file's state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::manager::{DownloadManager, ManagerError, Result};
use crate::store::{
    DownloadState, ErrorKind, ErrorRecord, FileState, PauseScope, StoreDbErrorKind, now_millis,
};
use crate::transfer::{
    EventReceiver, TransferEvent, TransferHandle, TransferId, TransferOutcome, TransferProgress,
    percent_of,
};

/// File states in which a `Started` transfer is accepted.
const BINDABLE: [FileState; 4] = [
    FileState::Starting,
    FileState::Active,
    FileState::Paused,
    FileState::Interrupted,
];

/// A transfer tied to the file it carries.
#[derive(Debug, Clone)]
struct Binding {
    download_id: String,
    filename: String,
    file_id: i64,
    /// An interruption pause is open for this file.
    interrupted: bool,
}

/// Single consumer of [`TransferEvent`]s.
#[derive(Debug)]
pub struct Translator {
    manager: Arc<DownloadManager>,
    bindings: HashMap<TransferId, Binding>,
}

impl Translator {
    #[must_use]
    pub fn new(manager: Arc<DownloadManager>) -> Self {
        Self {
            manager,
            bindings: HashMap::new(),
        }
    }

    /// Number of transfers currently bound to files.
    #[must_use]
    pub fn bound(&self) -> usize {
        self.bindings.len()
    }

    /// Consumes events until every sender is dropped.
    ///
    /// Errors from individual events are logged and do not stop the loop.
    pub async fn run(mut self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            match self.handle_event(event).await {
                Ok(()) => {}
                Err(ManagerError::Store(error))
                    if error.database_kind() == Some(StoreDbErrorKind::PoolClosed) =>
                {
                    debug!("state database closed; dropping transfer event");
                }
                Err(error) => warn!(error = %error, "failed to apply transfer event"),
            }
        }
        debug!("transfer event channel closed");
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read or update fails.
    pub async fn handle_event(&mut self, event: TransferEvent) -> Result<()> {
        match event {
            TransferEvent::Started { handle } => self.on_started(handle).await,
            TransferEvent::Updated {
                transfer_id,
                state,
                received_bytes,
                total_bytes,
                is_paused,
            } => {
                self.on_updated(transfer_id, state, received_bytes, total_bytes, is_paused)
                    .await
            }
            TransferEvent::Done {
                transfer_id,
                outcome,
            } => self.on_done(transfer_id, outcome).await,
        }
    }

    #[instrument(skip(self, handle), fields(transfer_id = %handle.id()))]
    async fn on_started(&mut self, handle: Arc<dyn TransferHandle>) -> Result<()> {
        let store = self.manager.store();
        let Some(url) = handle.url_chain().into_iter().next() else {
            warn!("transfer has no url; cancelling");
            handle.cancel();
            return Ok(());
        };
        let pending = {
            let _slots = self.manager.scheduler().hold().await;
            let Some(pending) = self.manager.correlation().take(&url) else {
                debug!(url = %url, "no dispatch recorded for url; cancelling");
                handle.cancel();
                return Ok(());
            };
            self.manager
                .registry()
                .insert(&pending.download_id, &pending.filename, Arc::clone(&handle));
            pending
        };

        let file = match store.get_file(pending.file_id).await? {
            Some(file) if BINDABLE.contains(&file.state()?) => file,
            Some(file) => {
                debug!(
                    download_id = %pending.download_id,
                    filename = %pending.filename,
                    state = %file.state_str,
                    "file left flight before start; cancelling"
                );
                self.release(&pending.download_id, &pending.filename, &handle);
                return Ok(());
            }
            None => {
                debug!(file_id = pending.file_id, "file removed before start; cancelling");
                self.release(&pending.download_id, &pending.filename, &handle);
                return Ok(());
            }
        };
        if self
            .manager
            .registry()
            .get(&pending.download_id, &pending.filename)
            .is_none_or(|live| live.id() != handle.id())
        {
            debug!(filename = %pending.filename, "handle withdrawn before start");
            handle.cancel();
            return Ok(());
        }

        handle.set_save_path(&Path::new(&pending.download_location).join(&pending.filename));
        store.set_file_started(file.id, now_millis()).await?;
        if file.state()? == FileState::Paused {
            handle.pause();
        }
        self.bindings.insert(
            handle.id(),
            Binding {
                download_id: pending.download_id,
                filename: pending.filename,
                file_id: file.id,
                interrupted: false,
            },
        );
        Ok(())
    }

    /// Takes a handle that will not be bound back out of the registry and cancels it.
    fn release(&self, download_id: &str, filename: &str, handle: &Arc<dyn TransferHandle>) {
        self.manager
            .registry()
            .remove_if(download_id, filename, handle.id());
        handle.cancel();
    }

    async fn on_updated(
        &mut self,
        transfer_id: TransferId,
        progress: TransferProgress,
        received_bytes: u64,
        total_bytes: u64,
        is_paused: bool,
    ) -> Result<()> {
        let manager = Arc::clone(&self.manager);
        let store = manager.store();
        let Some(binding) = self.bindings.get_mut(&transfer_id) else {
            return Ok(());
        };
        let live = manager
            .registry()
            .get(&binding.download_id, &binding.filename)
            .is_some_and(|handle| handle.id() == transfer_id);
        if !live {
            return Ok(());
        }

        let percent = percent_of(received_bytes, total_bytes);
        let received = i64::try_from(received_bytes).unwrap_or(i64::MAX);
        let total = i64::try_from(total_bytes).unwrap_or(i64::MAX);
        let now = now_millis();

        match progress {
            TransferProgress::Interrupted => {
                if !binding.interrupted {
                    store
                        .open_pause(&binding.download_id, Some(binding.file_id), now)
                        .await?;
                    binding.interrupted = true;
                }
                let written = store
                    .update_file_progress(
                        binding.file_id,
                        FileState::Interrupted,
                        percent,
                        received,
                        total,
                    )
                    .await?;
                if written
                    && store
                        .active_files_count_by_download_id(&binding.download_id)
                        .await?
                        == 0
                {
                    store
                        .set_download_state_where(
                            &binding.download_id,
                            DownloadState::Interrupted,
                            &[DownloadState::Active],
                        )
                        .await?;
                }
            }
            TransferProgress::Progressing => {
                if binding.interrupted {
                    store
                        .close_pauses(&binding.download_id, PauseScope::File(binding.file_id), now)
                        .await?;
                    binding.interrupted = false;
                    store
                        .set_download_state_where(
                            &binding.download_id,
                            DownloadState::Active,
                            &[DownloadState::Interrupted],
                        )
                        .await?;
                }
                let held = store
                    .get_file(binding.file_id)
                    .await?
                    .map(|file| file.state_str == FileState::Paused.as_str())
                    .unwrap_or(false);
                let state = if is_paused || held {
                    FileState::Paused
                } else {
                    FileState::Active
                };
                store
                    .update_file_progress(binding.file_id, state, percent, received, total)
                    .await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, outcome))]
    async fn on_done(&mut self, transfer_id: TransferId, outcome: TransferOutcome) -> Result<()> {
        let Some(binding) = self.bindings.remove(&transfer_id) else {
            debug!("done for unknown transfer");
            return Ok(());
        };
        let manager = Arc::clone(&self.manager);
        let store = manager.store();
        if manager
            .registry()
            .remove_if(&binding.download_id, &binding.filename, transfer_id)
            .is_none()
        {
            debug!(
                download_id = %binding.download_id,
                filename = %binding.filename,
                "stale done ignored"
            );
            return Ok(());
        }

        let now = now_millis();
        match outcome {
            TransferOutcome::Completed => {
                store.complete_file(binding.file_id, now).await?;
                store
                    .close_pauses(&binding.download_id, PauseScope::File(binding.file_id), now)
                    .await?;
                info!(download_id = %binding.download_id, filename = %binding.filename, "file completed");
            }
            TransferOutcome::Interrupted { reason } => {
                let record = ErrorRecord::new(ErrorKind::TransferInterrupted, reason)
                    .with_filename(binding.filename.clone());
                if store
                    .fail_file(binding.file_id, FileState::Error, record, now)
                    .await?
                {
                    store.increment_download_errors(&binding.download_id).await?;
                }
                store
                    .close_pauses(&binding.download_id, PauseScope::File(binding.file_id), now)
                    .await?;
                warn!(download_id = %binding.download_id, filename = %binding.filename, "file failed");
            }
            TransferOutcome::Cancelled => {
                store
                    .set_file_state_where(binding.file_id, FileState::Pending, &FileState::IN_FLIGHT)
                    .await?;
                debug!(download_id = %binding.download_id, filename = %binding.filename, "transfer cancelled by host");
            }
            TransferOutcome::AuthRequired { auth_url } => {
                self.wait_for(
                    &binding,
                    FileState::WaitingForAuth,
                    DownloadState::WaitingForAuth,
                    ErrorKind::AuthRequired,
                    auth_url,
                )
                .await?;
            }
            TransferOutcome::EulaRequired { eula_url } => {
                self.wait_for(
                    &binding,
                    FileState::WaitingForEula,
                    DownloadState::WaitingForEula,
                    ErrorKind::EulaRequired,
                    eula_url,
                )
                .await?;
            }
        }

        manager.schedule_next(None).await?;
        manager.finish_download(&binding.download_id).await?;
        Ok(())
    }

    async fn wait_for(
        &self,
        binding: &Binding,
        file_state: FileState,
        download_state: DownloadState,
        kind: ErrorKind,
        redirect_url: Option<String>,
    ) -> Result<()> {
        let store = self.manager.store();
        let mut record = ErrorRecord::new(kind, format!("transfer is {file_state}"))
            .with_filename(binding.filename.clone());
        if let Some(url) = &redirect_url {
            record = record.with_url(url.clone());
        }
        let moved = store
            .fail_file(binding.file_id, file_state, record, now_millis())
            .await?;
        if moved {
            store
                .set_download_waiting(&binding.download_id, download_state, redirect_url.as_deref())
                .await?;
            info!(download_id = %binding.download_id, filename = %binding.filename, state = %file_state, "waiting on user");
        }
        Ok(())
    }
}
