//! Undoing cancel, restart and delete within the grace window.

use serde::Serialize;
use tracing::{info, instrument};

use super::{DownloadManager, ManagerError, Result};
use crate::store::{MutationOperation, now_millis};

/// What an undo put back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    pub operation: MutationOperation,
    pub download_id: String,
    pub filename: Option<String>,
    pub restored_files: usize,
}

impl DownloadManager {
    /// Restores the rows a cancel, restart or delete changed.
    ///
    /// Handles and dispatches the affected files acquired since the mutation
    /// are dropped first, then the snapshot is written back and the marker removed.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownMarker`] for a marker that does not
    /// exist, [`ManagerError::MarkerExpired`] once the grace window has passed,
    /// or a store error.
    #[instrument(skip(self))]
    pub async fn undo(&self, marker: &str) -> Result<UndoOutcome> {
        let Some(mutation) = self.store().get_mutation(marker).await? else {
            return Err(ManagerError::UnknownMarker(marker.to_string()));
        };
        if mutation.is_expired(now_millis()) {
            return Err(ManagerError::MarkerExpired(marker.to_string()));
        }
        let operation = mutation.operation()?;
        let snapshot = mutation.decode_snapshot()?;

        for file in &snapshot.files {
            self.cancel_handles(&snapshot.download_id, Some(&file.filename));
            self.correlation().remove_file_id(file.id);
        }
        self.store().restore_snapshot(&snapshot).await?;
        self.store().delete_mutation(marker).await?;
        info!(
            download_id = %snapshot.download_id,
            operation = operation.as_str(),
            files = snapshot.files.len(),
            "undone"
        );

        self.schedule_next(None).await?;
        Ok(UndoOutcome {
            operation,
            download_id: snapshot.download_id,
            filename: mutation.filename,
            restored_files: snapshot.files.len(),
        })
    }
}
