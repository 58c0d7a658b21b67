//! Bulk Downloader Core Library
//!
//! This library provides the orchestration engine for bulk file downloads:
//! batches of URLs grouped into named downloads, fetched under a
//! user-configurable concurrency ceiling, with pause, resume, cancel, retry
//! and restart per file or per download.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`store`] - Download, file, pause and preference persistence
//! - [`transfer`] - Host engine traits, transfer registry and correlation map
//! - [`links`] - Paginated link enumeration from trusted listing endpoints
//! - [`manager`] - State machine operations (pause, cancel, restart, ...)
//! - [`scheduler`] - Concurrency-bounded dispatch of pending files
//! - [`translator`] - Applies host transfer events to the store
//! - [`progress`] - Progress reports with pause-aware elapsed time
//! - [`control`] - JSON request/response surface over the manager
//! - [`host`] - `reqwest`-backed transfer engine

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod control;
pub mod db;
pub mod host;
pub mod links;
pub mod manager;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod transfer;
pub mod translator;
mod user_agent;

// Re-export commonly used types
pub use control::{ControlRequest, ControlResponse};
pub use db::{Database, DatabaseOptions, DbError};
pub use host::{HostError, HttpTransferEngine};
pub use links::{FetchReport, LinkFetchError};
pub use manager::{
    BeginDownload, DownloadManager, DownloadStatistics, ManagerError, ManagerSettings,
    UndoOutcome,
};
pub use progress::{DownloadProgress, FileProgress};
pub use store::{DownloadState, FileState, Store, StoreError};
pub use transfer::{
    TransferEngine, TransferError, TransferEvent, TransferHandle, TransferId, TransferOutcome,
    TransferProgress, event_channel,
};
pub use translator::Translator;
