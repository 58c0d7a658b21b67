//! Dispatched URLs waiting for the host engine to acknowledge them.

use std::collections::VecDeque;

use dashmap::DashMap;

/// What the scheduler knew about a file when it dispatched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub download_id: String,
    pub download_location: String,
    pub file_id: i64,
    pub filename: String,
}

/// Maps a dispatched URL to the file it belongs to.
///
/// Entries are written when a file is handed to the engine and taken when the
/// engine's `Started` event arrives. Two files can share a URL, so each URL
/// holds a FIFO of pending entries.
#[derive(Debug, Default)]
pub struct CorrelationMap {
    entries: DashMap<String, VecDeque<PendingTransfer>>,
}

impl CorrelationMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: &str, pending: PendingTransfer) {
        self.entries
            .entry(url.to_string())
            .or_default()
            .push_back(pending);
    }

    /// Takes the oldest entry for `url`.
    pub fn take(&self, url: &str) -> Option<PendingTransfer> {
        let mut queue = self.entries.get_mut(url)?;
        let pending = queue.pop_front();
        let now_empty = queue.is_empty();
        drop(queue);
        if now_empty {
            self.entries.remove_if(url, |_, queue| queue.is_empty());
        }
        pending
    }

    /// Drops the entry for one file, e.g. after the engine refused it.
    pub fn remove_file(&self, url: &str, file_id: i64) -> bool {
        let Some(mut queue) = self.entries.get_mut(url) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|pending| pending.file_id != file_id);
        let removed = queue.len() != before;
        let now_empty = queue.is_empty();
        drop(queue);
        if now_empty {
            self.entries.remove_if(url, |_, queue| queue.is_empty());
        }
        removed
    }

    /// Drops the entry for a file whatever URL it was dispatched under.
    pub fn remove_file_id(&self, file_id: i64) -> bool {
        let mut removed = false;
        self.entries.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|pending| pending.file_id != file_id);
            removed |= queue.len() != before;
            !queue.is_empty()
        });
        removed
    }

    /// Drops every entry belonging to a download.
    pub fn remove_download(&self, download_id: &str) {
        self.entries
            .retain(|_, queue| {
                queue.retain(|pending| pending.download_id != download_id);
                !queue.is_empty()
            });
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of dispatched transfers not yet acknowledged by the engine.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
