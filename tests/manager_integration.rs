//! Integration tests for the download state machine.
//!
//! The host is played by hand through the support harness, so every
//! transition can be observed between events.

use bulk_downloader_core::store::{PauseScope, StoreDbErrorKind, now_millis};
use bulk_downloader_core::{
    DownloadManager, ManagerError, ManagerSettings, StoreError, TransferEvent, TransferHandle,
    TransferOutcome,
};

mod support;
use support::{FakeHandle, Harness, file_name, file_url};

// ==================== Pause / Resume ====================

#[tokio::test]
async fn test_pause_resume_file_keeps_progress_and_closes_one_pause() {
    let mut h = Harness::new().await;
    let ids = h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.progress(&handle, 50, 100).await;

    h.manager
        .pause(Some("d"), Some(&file_name(0)))
        .await
        .expect("pause");

    assert!(handle.is_paused());
    let file = h.store().get_file(ids[0]).await.expect("get").expect("file");
    assert_eq!(file.state_str, "paused");
    assert_eq!((file.percent, file.received_bytes), (50, 50));
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 1);

    h.manager
        .resume(Some("d"), Some(&file_name(0)))
        .await
        .expect("resume");

    assert!(!handle.is_paused());
    let file = h.store().get_file(ids[0]).await.expect("get").expect("file");
    assert_eq!(file.state_str, "active");
    assert_eq!(file.received_bytes, 50);
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 0);
    let pauses = h
        .store()
        .list_pauses("d", PauseScope::File(ids[0]))
        .await
        .expect("pauses");
    assert_eq!(pauses.len(), 1);
    assert!(pauses[0].time_end.is_some());
}

#[tokio::test]
async fn test_pausing_twice_opens_a_single_pause() {
    let h = Harness::new().await;
    h.seed_download("d", 2).await;

    h.manager.pause(Some("d"), None).await.expect("pause");
    h.manager.pause(Some("d"), None).await.expect("pause again");

    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 1);
    assert_eq!(h.download_state("d").await, "paused");
}

#[tokio::test]
async fn test_pause_download_pauses_pending_and_running_files() {
    let mut h = Harness::new().await;
    h.seed_download("d", 3).await;
    h.manager.schedule_with_limit(1, None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.progress(&handle, 10, 100).await;

    h.manager.pause(Some("d"), None).await.expect("pause");

    assert!(handle.is_paused());
    for index in 0..3 {
        assert_eq!(h.file_state("d", index).await, "paused");
    }
}

#[tokio::test]
async fn test_resume_download_requeues_files_without_handles() {
    let mut h = Harness::new().await;
    h.seed_download("d", 3).await;
    h.manager.schedule_with_limit(1, None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.progress(&handle, 10, 100).await;
    h.manager.pause(Some("d"), None).await.expect("pause");

    h.manager.resume(Some("d"), None).await.expect("resume");

    assert_eq!(h.download_state("d").await, "active");
    assert_eq!(h.file_state("d", 0).await, "active");
    // The other two went back to pending and were dispatched straight away.
    assert_eq!(h.file_state("d", 1).await, "starting");
    assert_eq!(h.file_state("d", 2).await, "starting");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 0);
}

#[tokio::test]
async fn test_global_pause_and_resume_touch_every_download() {
    let h = Harness::new().await;
    h.seed_download("a", 1).await;
    h.seed_download("b", 1).await;

    let paused = h.manager.pause(None, None).await.expect("pause all");
    assert_eq!(paused, 2);
    assert_eq!(h.download_state("a").await, "paused");
    assert_eq!(h.download_state("b").await, "paused");

    let resumed = h.manager.resume(None, None).await.expect("resume all");
    assert_eq!(resumed, 2);
    assert_eq!(h.download_state("a").await, "active");
}

#[tokio::test]
async fn test_progress_does_not_override_a_user_pause() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.manager
        .pause(Some("d"), Some(&file_name(0)))
        .await
        .expect("pause");

    // A late report from the host that still claims to be running.
    h.send(bulk_downloader_core::TransferEvent::Updated {
        transfer_id: handle.id(),
        state: bulk_downloader_core::TransferProgress::Progressing,
        received_bytes: 70,
        total_bytes: 100,
        is_paused: false,
    })
    .await;

    assert_eq!(h.file_state("d", 0).await, "paused");
}

#[tokio::test]
async fn test_pause_unknown_file_is_not_found() {
    let h = Harness::new().await;
    h.seed_download("d", 1).await;

    let err = h
        .manager
        .pause(Some("d"), Some("missing.nc"))
        .await
        .expect_err("unknown file");
    assert!(matches!(
        err,
        ManagerError::Store(StoreError::FileNotFound { .. })
    ));
}

#[tokio::test]
async fn test_pause_leaves_completed_download_alone() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.done(&handle, TransferOutcome::Completed).await;
    assert_eq!(h.download_state("d").await, "completed");

    let paused = h.manager.pause(Some("d"), None).await.expect("pause");
    assert_eq!(paused, 0);
    assert_eq!(h.download_state("d").await, "completed");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 0);

    h.manager.resume(Some("d"), None).await.expect("resume");
    assert_eq!(h.download_state("d").await, "completed");
}

#[tokio::test]
async fn test_resume_finishes_download_whose_files_ended_while_paused() {
    let h = Harness::new().await;
    let ids = h.seed_download("d", 1).await;
    h.manager.pause(Some("d"), None).await.expect("pause");
    assert!(h.store().complete_file(ids[0], now_millis()).await.expect("complete"));
    assert_eq!(h.download_state("d").await, "paused");

    h.manager.resume(Some("d"), None).await.expect("resume");

    assert_eq!(h.download_state("d").await, "completed");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 0);
}

// ==================== Cancel ====================

#[tokio::test]
async fn test_cancel_keeps_completed_files_and_completes_download() {
    let mut h = Harness::new().await;
    h.seed_download("d", 5).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let mut handles = Vec::new();
    for index in 0..5 {
        handles.push(h.start(&file_url("d", index)).await);
    }
    for handle in &handles {
        h.progress(handle, 10, 100).await;
    }
    for handle in &handles[..3] {
        h.done(handle, TransferOutcome::Completed).await;
    }

    let marker = h.manager.cancel("d", None).await.expect("cancel");

    assert!(!marker.is_empty());
    for index in 0..3 {
        assert_eq!(h.file_state("d", index).await, "completed");
    }
    for index in 3..5 {
        assert_eq!(h.file_state("d", index).await, "cancelled");
        assert!(handles[index].is_cancelled());
    }
    assert_eq!(h.download_state("d").await, "completed");
    assert!(h.manager.registry().is_empty());
}

#[tokio::test]
async fn test_cancel_single_file_leaves_siblings_running() {
    let mut h = Harness::new().await;
    h.seed_download("d", 2).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let first = h.start(&file_url("d", 0)).await;
    let second = h.start(&file_url("d", 1)).await;

    h.manager
        .cancel("d", Some(&file_name(0)))
        .await
        .expect("cancel");

    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());
    assert_eq!(h.file_state("d", 0).await, "cancelled");
    assert_eq!(h.file_state("d", 1).await, "starting");
    assert_eq!(h.download_state("d").await, "active");
}

#[tokio::test]
async fn test_done_after_cancel_is_stale() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.manager.cancel("d", None).await.expect("cancel");

    h.done(&handle, TransferOutcome::Cancelled).await;

    assert_eq!(h.file_state("d", 0).await, "cancelled");
    assert_eq!(h.translator.bound(), 0);
}

#[tokio::test]
async fn test_cancel_of_dispatched_file_drops_correlation() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    assert_eq!(h.manager.correlation().len(), 1);

    h.manager.cancel("d", None).await.expect("cancel");
    assert!(h.manager.correlation().is_empty());

    // The host acknowledging after the cancel gets its handle cancelled.
    let handle = h.start(&file_url("d", 0)).await;
    assert!(handle.is_cancelled());
    assert!(h.manager.registry().is_empty());
}

// ==================== Retry / Restart ====================

#[tokio::test]
async fn test_retry_resets_errored_files_only() {
    let mut h = Harness::new().await;
    let ids = h.seed_download("d", 2).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let failing = h.start(&file_url("d", 0)).await;
    let passing = h.start(&file_url("d", 1)).await;
    h.progress(&failing, 40, 100).await;
    h.done(
        &failing,
        TransferOutcome::Interrupted {
            reason: "connection reset".to_string(),
        },
    )
    .await;
    h.done(&passing, TransferOutcome::Completed).await;
    assert_eq!(h.download_state("d").await, "completed");
    let errored = h.store().get_file(ids[0]).await.expect("get").expect("file");
    assert_eq!(errored.state_str, "error");
    assert_eq!(errored.error_records().expect("errors").len(), 1);

    let reset = h.manager.retry("d", None).await.expect("retry");

    assert_eq!(reset, 1);
    let retried = h.store().get_file(ids[0]).await.expect("get").expect("file");
    assert_eq!(retried.state_str, "starting");
    assert_eq!((retried.percent, retried.received_bytes), (0, 0));
    assert!(retried.errors.is_none());
    assert_eq!(h.file_state("d", 1).await, "completed");
    assert_eq!(h.download_state("d").await, "active");
    assert_eq!(h.engine.begun(), 3);
}

#[tokio::test]
async fn test_retry_without_errors_changes_nothing() {
    let h = Harness::new().await;
    h.seed_download("d", 1).await;

    let reset = h.manager.retry("d", None).await.expect("retry");

    assert_eq!(reset, 0);
}

#[tokio::test]
async fn test_restart_file_cancels_old_transfer_and_requeues() {
    let mut h = Harness::new().await;
    let ids = h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let old = h.start(&file_url("d", 0)).await;
    h.progress(&old, 80, 100).await;

    h.manager
        .restart("d", Some(&file_name(0)))
        .await
        .expect("restart");

    assert!(old.is_cancelled());
    let file = h.store().get_file(ids[0]).await.expect("get").expect("file");
    assert_eq!(file.state_str, "starting");
    assert_eq!(file.received_bytes, 0);
    assert_eq!(h.engine.begun(), 2);

    // The old transfer's Done arrives late and must not touch the new attempt.
    h.done(&old, TransferOutcome::Cancelled).await;
    assert_eq!(h.file_state("d", 0).await, "starting");
}

#[tokio::test]
async fn test_restart_completed_download_records_idle_gap() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.done(&handle, TransferOutcome::Completed).await;
    assert_eq!(h.download_state("d").await, "completed");

    h.manager.restart("d", None).await.expect("restart");

    let download = h.store().require_download("d").await.expect("download");
    assert_eq!(download.state_str, "active");
    assert!(download.time_end.is_none());
    let pauses = h
        .store()
        .list_pauses("d", PauseScope::Download)
        .await
        .expect("pauses");
    assert_eq!(pauses.len(), 1);
    assert!(pauses[0].time_end.is_some());
}

// ==================== Repeated Operations ====================

#[tokio::test]
async fn test_cancel_twice_before_done_lands() {
    let mut h = Harness::new().await;
    h.seed_download("d", 2).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let first = h.start(&file_url("d", 0)).await;
    let second = h.start(&file_url("d", 1)).await;
    h.progress(&first, 40, 100).await;

    h.manager.cancel("d", None).await.expect("cancel");
    h.manager.cancel("d", None).await.expect("cancel again");
    h.done(&first, TransferOutcome::Cancelled).await;
    h.done(&second, TransferOutcome::Cancelled).await;

    assert!(first.is_cancelled() && second.is_cancelled());
    assert_eq!(h.file_state("d", 0).await, "cancelled");
    assert_eq!(h.file_state("d", 1).await, "cancelled");
    assert_eq!(h.download_state("d").await, "completed");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 0);
    assert_eq!(h.engine.begun(), 2);
    assert!(h.manager.registry().is_empty());
    assert!(h.manager.correlation().is_empty());
}

#[tokio::test]
async fn test_restart_twice_before_done_lands() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let old = h.start(&file_url("d", 0)).await;
    h.progress(&old, 50, 100).await;

    h.manager.restart("d", None).await.expect("restart");
    h.manager.restart("d", None).await.expect("restart again");
    h.done(&old, TransferOutcome::Cancelled).await;

    assert!(old.is_cancelled());
    assert_eq!(h.file_state("d", 0).await, "starting");
    assert_eq!(h.download_state("d").await, "active");
    // Only the latest dispatch is still waiting for its acknowledgement.
    assert_eq!(h.manager.correlation().len(), 1);

    let fresh = h.start(&file_url("d", 0)).await;
    h.progress(&fresh, 100, 100).await;
    h.done(&fresh, TransferOutcome::Completed).await;

    let file = h.store().require_file("d", &file_name(0)).await.expect("file");
    assert_eq!(file.state_str, "completed");
    assert_eq!(file.received_bytes, 100);
    assert_eq!(h.download_state("d").await, "completed");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 0);
    assert!(h.manager.registry().is_empty());
    assert!(h.manager.correlation().is_empty());
}

#[tokio::test]
async fn test_retry_twice_before_done_lands() {
    let mut h = Harness::new().await;
    h.seed_download("d", 2).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let failing = h.start(&file_url("d", 0)).await;
    let running = h.start(&file_url("d", 1)).await;
    h.done(
        &failing,
        TransferOutcome::Interrupted {
            reason: "connection reset".to_string(),
        },
    )
    .await;

    assert_eq!(h.manager.retry("d", None).await.expect("retry"), 1);
    assert_eq!(h.manager.retry("d", None).await.expect("retry again"), 0);
    assert_eq!(h.engine.begun(), 3);

    h.done(&running, TransferOutcome::Completed).await;
    let again = h.start(&file_url("d", 0)).await;
    h.done(&again, TransferOutcome::Completed).await;

    assert_eq!(h.file_state("d", 0).await, "completed");
    assert_eq!(h.file_state("d", 1).await, "completed");
    assert_eq!(h.download_state("d").await, "completed");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 0);
    assert!(h.manager.registry().is_empty());
    assert!(h.manager.correlation().is_empty());
}

// ==================== Finish ====================

#[tokio::test]
async fn test_download_completes_only_after_links_finish_loading() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.store()
        .set_loading_more_files("d", true)
        .await
        .expect("set loading");
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.done(&handle, TransferOutcome::Completed).await;

    assert_eq!(h.download_state("d").await, "active");

    h.store()
        .set_loading_more_files("d", false)
        .await
        .expect("clear loading");
    let stats = h
        .manager
        .finish_download("d")
        .await
        .expect("finish")
        .expect("completed now");
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.completed_files, 1);
    assert_eq!(h.download_state("d").await, "completed");

    // A second call finds it already completed.
    assert!(h.manager.finish_download("d").await.expect("finish").is_none());
}

#[tokio::test]
async fn test_download_with_outstanding_files_does_not_finish() {
    let h = Harness::new().await;
    h.seed_download("d", 2).await;

    assert!(h.manager.finish_download("d").await.expect("finish").is_none());
    assert_eq!(h.download_state("d").await, "active");
}

#[tokio::test]
async fn test_clear_requires_a_finished_download() {
    let h = Harness::new().await;
    h.seed_download("d", 1).await;

    let err = h.manager.clear_download("d").await.expect_err("still running");
    assert!(matches!(err, ManagerError::NotFinished { .. }));

    h.manager.cancel("d", None).await.expect("cancel");
    h.manager.clear_download("d").await.expect("clear");
    let visible = h.store().list_downloads(false).await.expect("list");
    assert!(visible.is_empty());
}

// ==================== Interruptions ====================

#[tokio::test]
async fn test_interruption_pauses_clock_until_progress_returns() {
    let mut h = Harness::new().await;
    let ids = h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.progress(&handle, 10, 100).await;

    h.send(bulk_downloader_core::TransferEvent::Updated {
        transfer_id: handle.id(),
        state: bulk_downloader_core::TransferProgress::Interrupted,
        received_bytes: 10,
        total_bytes: 100,
        is_paused: false,
    })
    .await;

    assert_eq!(h.file_state("d", 0).await, "interrupted");
    assert_eq!(h.download_state("d").await, "interrupted");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 1);

    h.progress(&handle, 20, 100).await;

    assert_eq!(h.file_state("d", 0).await, "active");
    assert_eq!(h.download_state("d").await, "active");
    let pauses = h
        .store()
        .list_pauses("d", PauseScope::File(ids[0]))
        .await
        .expect("pauses");
    assert_eq!(pauses.len(), 1);
    assert!(pauses[0].time_end.is_some());
}

#[tokio::test]
async fn test_failed_transfer_records_error_on_file_and_download() {
    let mut h = Harness::new().await;
    h.seed_download("d", 2).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;

    h.done(
        &handle,
        TransferOutcome::Interrupted {
            reason: "disk full".to_string(),
        },
    )
    .await;

    assert_eq!(h.file_state("d", 0).await, "error");
    let download = h.store().require_download("d").await.expect("download");
    assert_eq!(download.num_errors, 1);
    assert_eq!(download.state_str, "active");
}

// ==================== Session lifecycle ====================

#[tokio::test]
async fn test_app_quitting_then_recovery_resumes_work() {
    let mut h = Harness::new().await;
    h.seed_download("d", 2).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.progress(&handle, 30, 100).await;

    let suspended = h.manager.app_quitting().await.expect("quit");
    assert_eq!(suspended, 1);
    assert!(handle.is_paused());
    assert_eq!(h.download_state("d").await, "appQuitting");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 1);

    // A fresh process shares the database but none of the old handles.
    let engine = std::sync::Arc::new(support::FakeEngine::default());
    let fresh = DownloadManager::new(h.store().clone(), engine.clone(), ManagerSettings::default())
        .expect("manager");

    let dispatched = fresh.recover_on_startup().await.expect("recover");

    assert_eq!(dispatched, 2);
    assert_eq!(h.download_state("d").await, "active");
    assert_eq!(h.store().count_open_pauses("d").await.expect("count"), 0);
    assert_eq!(h.file_state("d", 0).await, "starting");
    assert_eq!(h.file_state("d", 1).await, "starting");
    assert_eq!(engine.begun(), 2);
}

#[tokio::test]
async fn test_operations_on_unknown_download_fail() {
    let h = Harness::new().await;

    let err = h.manager.cancel("nope", None).await.expect_err("unknown");
    assert!(matches!(
        err,
        ManagerError::Store(StoreError::DownloadNotFound(_))
    ));
    assert!(h.manager.retry("nope", None).await.is_err());
    assert!(h.manager.restart("nope", None).await.is_err());
}

#[tokio::test]
async fn test_events_after_shutdown_report_closed_database() {
    let mut h = Harness::new().await;
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");

    h.store().database().close().await;

    let err = h
        .translator
        .handle_event(TransferEvent::Started {
            handle: FakeHandle::new(1, &file_url("d", 0)),
        })
        .await
        .expect_err("closed database");
    let ManagerError::Store(err) = err else {
        panic!("expected a store error, got {err:?}");
    };
    assert_eq!(err.database_kind(), Some(StoreDbErrorKind::PoolClosed));
}
