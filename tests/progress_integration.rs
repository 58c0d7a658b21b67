//! Integration tests for progress reports and the JSON control surface.

use bulk_downloader_core::store::FileState;
use bulk_downloader_core::{ControlRequest, ControlResponse, DownloadState, TransferOutcome};
use serde_json::Value;

mod support;
use support::{Harness, file_name, file_url};

// ==================== Progress ====================

#[tokio::test]
async fn test_download_progress_averages_percent_and_counts_completed() {
    let mut h = Harness::new().await;
    h.seed_download("d", 3).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let first = h.start(&file_url("d", 0)).await;
    let second = h.start(&file_url("d", 1)).await;
    h.progress(&first, 100, 100).await;
    h.done(&first, TransferOutcome::Completed).await;
    h.progress(&second, 50, 100).await;

    let reports = h.manager.downloads_progress(None).await.expect("progress");

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.id, "d");
    assert_eq!(report.state, DownloadState::Active);
    assert_eq!(report.progress.percent, 50);
    assert_eq!(report.progress.finished_files, 1);
    assert_eq!(report.progress.total_files, 3);
    assert!(report.progress.total_time >= 0);
}

#[tokio::test]
async fn test_downloads_progress_filters_by_id() {
    let h = Harness::new().await;
    h.seed_download("a", 1).await;
    h.seed_download("b", 1).await;

    let reports = h
        .manager
        .downloads_progress(Some(&["b".to_string()]))
        .await
        .expect("progress");

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, "b");
}

#[tokio::test]
async fn test_files_progress_reports_bytes_and_errors() {
    let mut h = Harness::new().await;
    h.seed_download("d", 2).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let first = h.start(&file_url("d", 0)).await;
    let second = h.start(&file_url("d", 1)).await;
    h.progress(&first, 30, 120).await;
    h.done(
        &second,
        TransferOutcome::Interrupted {
            reason: "reset by peer".to_string(),
        },
    )
    .await;

    let files = h.manager.files_progress("d", None).await.expect("files");

    assert_eq!(files.len(), 2);
    assert_eq!(files[0].filename, file_name(0));
    assert_eq!(files[0].state, FileState::Active);
    assert_eq!((files[0].percent, files[0].received_bytes, files[0].total_bytes), (25, 30, 120));
    assert_eq!(files[1].state, FileState::Error);
    assert_eq!(files[1].errors.len(), 1);
    assert_eq!(files[1].errors[0].message, "reset by peer");

    let one = h
        .manager
        .files_progress("d", Some(&file_name(1)))
        .await
        .expect("one file");
    assert_eq!(one.len(), 1);
}

#[tokio::test]
async fn test_auth_wait_is_visible_in_progress() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.done(
        &handle,
        TransferOutcome::AuthRequired {
            auth_url: Some("https://urs.example.com/login".to_string()),
        },
    )
    .await;

    let reports = h.manager.downloads_progress(None).await.expect("progress");

    assert_eq!(reports[0].state, DownloadState::WaitingForAuth);
    assert_eq!(reports[0].auth_url.as_deref(), Some("https://urs.example.com/login"));
}

// ==================== Control Surface ====================

#[tokio::test]
async fn test_dispatch_pause_then_progress_request() {
    let h = Harness::new().await;
    h.seed_download("d", 1).await;

    let response = h
        .manager
        .dispatch(ControlRequest::PauseDownloadItem {
            download_id: Some("d".to_string()),
            filename: None,
        })
        .await
        .expect("pause");
    assert_eq!(response, ControlResponse::Updated { downloads: 1 });

    let response = h
        .manager
        .dispatch(ControlRequest::RequestDownloadsProgress { download_ids: None })
        .await
        .expect("progress");
    let ControlResponse::DownloadsProgress { downloads } = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(downloads[0].state, DownloadState::Paused);
}

#[tokio::test]
async fn test_dispatch_json_round_trip_for_cancel_and_undo() {
    let h = Harness::new().await;
    h.seed_download("d", 1).await;

    let raw = h
        .manager
        .dispatch_json(r#"{"type":"cancelDownloadItem","downloadId":"d"}"#)
        .await;
    let value: Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["type"], "undoAvailable");
    let marker = value["marker"].as_str().expect("marker").to_string();

    let raw = h
        .manager
        .dispatch_json(&format!(r#"{{"type":"undo","marker":"{marker}"}}"#))
        .await;
    let value: Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["type"], "undone");
    assert_eq!(value["outcome"]["operation"], "cancel");
    assert_eq!(value["outcome"]["downloadId"], "d");
}

#[tokio::test]
async fn test_dispatch_json_reports_errors_as_messages() {
    let h = Harness::new().await;

    let raw = h.manager.dispatch_json("{not json").await;
    let value: Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["type"], "error");

    let raw = h
        .manager
        .dispatch_json(r#"{"type":"clearDownload","downloadId":"missing"}"#)
        .await;
    let value: Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["type"], "error");
    assert!(value["message"].as_str().expect("message").contains("missing"));
}

#[tokio::test]
async fn test_set_preferences_validates_range() {
    let h = Harness::new().await;

    let err = h
        .manager
        .dispatch(ControlRequest::SetPreferences {
            concurrent_downloads: Some(0),
            default_download_location: None,
            allow_metrics: None,
            window_state: None,
        })
        .await
        .expect_err("out of range");
    assert!(err.to_string().contains("invalid request"));

    let response = h
        .manager
        .dispatch(ControlRequest::SetPreferences {
            concurrent_downloads: Some(2),
            default_download_location: Some("/data".to_string()),
            allow_metrics: Some(true),
            window_state: None,
        })
        .await
        .expect("saved");
    let ControlResponse::Preferences { preferences } = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(preferences.concurrent_downloads, 2);
    assert_eq!(h.store().concurrent_downloads().await.expect("limit"), 2);
}

#[tokio::test]
async fn test_raising_the_limit_dispatches_more_files() {
    let h = Harness::new().await;
    h.seed_download("d", 4).await;
    h.manager.schedule_with_limit(1, None).await.expect("schedule");
    assert_eq!(h.engine.begun(), 1);

    h.manager
        .dispatch(ControlRequest::SetPreferences {
            concurrent_downloads: Some(3),
            default_download_location: None,
            allow_metrics: None,
            window_state: None,
        })
        .await
        .expect("saved");

    assert_eq!(h.engine.begun(), 3);
}
