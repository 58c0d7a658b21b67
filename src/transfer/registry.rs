//! Live transfer handles keyed by `(download_id, filename)`.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{TransferHandle, TransferId};

type Key = (String, String);

/// In-memory registry of live transfers. Never persisted.
///
/// At most one handle is held per key; registering a second handle for the
/// same file cancels the one it replaces.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    handles: DashMap<Key, Arc<dyn TransferHandle>>,
}

impl TransferRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handle for a file, cancelling any handle it replaces.
    pub fn insert(&self, download_id: &str, filename: &str, handle: Arc<dyn TransferHandle>) {
        let key = (download_id.to_string(), filename.to_string());
        if let Some(previous) = self.handles.insert(key, handle) {
            debug!(download_id, filename, transfer_id = %previous.id(), "replacing live handle");
            previous.cancel();
        }
    }

    #[must_use]
    pub fn get(&self, download_id: &str, filename: &str) -> Option<Arc<dyn TransferHandle>> {
        self.handles
            .get(&(download_id.to_string(), filename.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes the handle for a file, but only if it is still `transfer_id`.
    ///
    /// A late `Done` for a replaced transfer must not evict its successor.
    pub fn remove_if(
        &self,
        download_id: &str,
        filename: &str,
        transfer_id: TransferId,
    ) -> Option<Arc<dyn TransferHandle>> {
        self.handles
            .remove_if(&(download_id.to_string(), filename.to_string()), |_, handle| {
                handle.id() == transfer_id
            })
            .map(|(_, handle)| handle)
    }

    /// Handles of one download, optionally narrowed to a single filename.
    #[must_use]
    pub fn handles_for(
        &self,
        download_id: &str,
        filename: Option<&str>,
    ) -> Vec<(String, Arc<dyn TransferHandle>)> {
        self.handles
            .iter()
            .filter(|entry| {
                let (id, name) = entry.key();
                id == download_id && filename.is_none_or(|wanted| wanted == name)
            })
            .map(|entry| (entry.key().1.clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Every live handle.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn TransferHandle>> {
        self.handles
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of live transfers; the scheduler counts these as running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
