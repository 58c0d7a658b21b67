//! Shared fixtures for integration tests.
//!
//! [`FakeEngine`] records every `begin` instead of moving bytes, and
//! [`FakeHandle`] records the control calls the core makes. Tests play the
//! host by feeding `TransferEvent`s to a [`Translator`] themselves.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bulk_downloader_core::store::NewDownload;
use bulk_downloader_core::{
    Database, DownloadManager, ManagerSettings, Store, TransferEngine, TransferError,
    TransferEvent, TransferHandle, TransferId, TransferOutcome, TransferProgress, Translator,
};
use tempfile::TempDir;

/// A `begin` call as the engine saw it.
#[derive(Debug, Clone)]
pub struct BeginCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Host engine that only records requests.
#[derive(Debug, Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<BeginCall>>,
    refuse: AtomicBool,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<BeginCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn begun(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Makes every later `begin` fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferEngine for FakeEngine {
    async fn begin(&self, url: &str, headers: &[(String, String)]) -> Result<(), TransferError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransferError::rejected(url, "refused by test"));
        }
        self.calls.lock().expect("calls lock").push(BeginCall {
            url: url.to_string(),
            headers: headers.to_vec(),
        });
        Ok(())
    }
}

/// Handle that records pause, resume and cancel.
#[derive(Debug)]
pub struct FakeHandle {
    id: TransferId,
    url: String,
    paused: AtomicBool,
    cancelled: AtomicBool,
    save_path: Mutex<Option<PathBuf>>,
}

impl FakeHandle {
    pub fn new(id: u64, url: &str) -> Arc<Self> {
        Arc::new(Self {
            id: TransferId(id),
            url: url.to_string(),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            save_path: Mutex::new(None),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn save_path(&self) -> Option<PathBuf> {
        self.save_path.lock().expect("save path lock").clone()
    }
}

impl TransferHandle for FakeHandle {
    fn id(&self) -> TransferId {
        self.id
    }

    fn filename(&self) -> String {
        self.url.rsplit('/').next().unwrap_or_default().to_string()
    }

    fn url_chain(&self) -> Vec<String> {
        vec![self.url.clone()]
    }

    fn set_save_path(&self, path: &Path) {
        *self.save_path.lock().expect("save path lock") = Some(path.to_path_buf());
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// A manager over a temp database, a fake engine and a translator driven by hand.
pub struct Harness {
    pub manager: Arc<DownloadManager>,
    pub engine: Arc<FakeEngine>,
    pub translator: Translator,
    pub download_dir: PathBuf,
    next_id: AtomicU64,
    _temp_dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(ManagerSettings::default()).await
    }

    pub async fn with_settings(settings: ManagerSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::new(&temp_dir.path().join("state.db"))
            .await
            .expect("Failed to create database");
        let engine = Arc::new(FakeEngine::default());
        let manager = Arc::new(
            DownloadManager::new(Store::new(db), engine.clone(), settings)
                .expect("Failed to create manager"),
        );
        let translator = Translator::new(Arc::clone(&manager));
        Self {
            manager,
            engine,
            translator,
            download_dir: temp_dir.path().join("downloads"),
            next_id: AtomicU64::new(1),
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> &Store {
        self.manager.store()
    }

    /// Creates an active download whose link listing has been fully read.
    pub async fn seed_download(&self, id: &str, files: usize) -> Vec<i64> {
        let location = self.download_dir.display().to_string();
        self.store()
            .create_download(&NewDownload::new(id, location))
            .await
            .expect("create download");
        let mut ids = Vec::with_capacity(files);
        for index in 0..files {
            let outcome = self
                .store()
                .add_file(id, &file_url(id, index), &file_name(index))
                .await
                .expect("add file");
            ids.push(match outcome {
                bulk_downloader_core::store::AddFileOutcome::Inserted(id)
                | bulk_downloader_core::store::AddFileOutcome::Duplicate(id) => id,
            });
        }
        self.store()
            .mark_download_started(id)
            .await
            .expect("mark started");
        self.store()
            .set_loading_more_files(id, false)
            .await
            .expect("clear loading flag");
        ids
    }

    /// Plays the host acknowledging a dispatched URL.
    pub async fn start(&mut self, url: &str) -> Arc<FakeHandle> {
        let handle = FakeHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst), url);
        self.translator
            .handle_event(TransferEvent::Started {
                handle: handle.clone(),
            })
            .await
            .expect("started event");
        handle
    }

    pub async fn progress(&mut self, handle: &FakeHandle, received: u64, total: u64) {
        self.send(TransferEvent::Updated {
            transfer_id: handle.id(),
            state: TransferProgress::Progressing,
            received_bytes: received,
            total_bytes: total,
            is_paused: handle.is_paused(),
        })
        .await;
    }

    pub async fn done(&mut self, handle: &FakeHandle, outcome: TransferOutcome) {
        self.send(TransferEvent::Done {
            transfer_id: handle.id(),
            outcome,
        })
        .await;
    }

    pub async fn send(&mut self, event: TransferEvent) {
        self.translator
            .handle_event(event)
            .await
            .expect("transfer event");
    }

    pub async fn file_state(&self, download_id: &str, index: usize) -> String {
        self.store()
            .require_file(download_id, &file_name(index))
            .await
            .expect("file exists")
            .state_str
    }

    pub async fn download_state(&self, download_id: &str) -> String {
        self.store()
            .require_download(download_id)
            .await
            .expect("download exists")
            .state_str
    }
}

pub fn file_name(index: usize) -> String {
    format!("granule{index}.nc")
}

pub fn file_url(download_id: &str, index: usize) -> String {
    format!("https://data.example.com/{download_id}/{}", file_name(index))
}

/// Settings trusting the given host, with a short undo window.
pub fn settings_trusting(host: &str) -> ManagerSettings {
    ManagerSettings {
        trusted_hosts: vec![host.to_string()],
        undo_grace: Duration::from_secs(30),
        ..ManagerSettings::default()
    }
}
