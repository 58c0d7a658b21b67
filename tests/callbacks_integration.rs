//! Integration tests for transfers that stop to wait on the user.

use bulk_downloader_core::TransferOutcome;

mod support;
use support::{Harness, file_url};

async fn wait_on_auth(h: &mut Harness, files: usize) {
    h.seed_download("d", files).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.done(
        &handle,
        TransferOutcome::AuthRequired {
            auth_url: Some("https://urs.example.com/oauth/authorize".to_string()),
        },
    )
    .await;
}

async fn wait_on_eula(h: &mut Harness) {
    h.seed_download("d", 1).await;
    h.manager.schedule_next(None).await.expect("schedule");
    let handle = h.start(&file_url("d", 0)).await;
    h.done(
        &handle,
        TransferOutcome::EulaRequired {
            eula_url: Some("https://data.example.com/eula/accept".to_string()),
        },
    )
    .await;
}

// ==================== Authentication ====================

#[tokio::test]
async fn test_auth_required_suspends_file_and_download() {
    let mut h = Harness::new().await;
    wait_on_auth(&mut h, 1).await;

    assert_eq!(h.file_state("d", 0).await, "waitingForAuth");
    let download = h.store().require_download("d").await.expect("download");
    assert_eq!(download.state_str, "waitingForAuth");
    assert_eq!(
        download.auth_url.as_deref(),
        Some("https://urs.example.com/oauth/authorize")
    );
    // Waiting is not finished.
    assert!(download.time_end.is_none());
}

#[tokio::test]
async fn test_auth_callback_stores_token_and_redispatches_with_it() {
    let mut h = Harness::new().await;
    wait_on_auth(&mut h, 1).await;

    let released = h
        .manager
        .auth_callback("d", "secret-token")
        .await
        .expect("auth callback");

    assert_eq!(released, 1);
    assert_eq!(h.file_state("d", 0).await, "starting");
    assert_eq!(h.download_state("d").await, "active");
    assert_eq!(
        h.store().token("d").await.expect("token").as_deref(),
        Some("secret-token")
    );
    let last = h.engine.calls().pop().expect("a redispatch");
    assert_eq!(last.url, file_url("d", 0));
    assert!(
        last.headers
            .contains(&("Authorization".to_string(), "Bearer secret-token".to_string()))
    );
}

#[tokio::test]
async fn test_auth_callback_releases_every_waiting_file() {
    let mut h = Harness::new().await;
    wait_on_auth(&mut h, 2).await;
    let second = h.start(&file_url("d", 1)).await;
    h.done(&second, TransferOutcome::AuthRequired { auth_url: None })
        .await;

    let released = h.manager.auth_callback("d", "t").await.expect("auth");

    assert_eq!(released, 2);
}

#[tokio::test]
async fn test_auth_callback_for_unknown_download_fails() {
    let h = Harness::new().await;
    assert!(h.manager.auth_callback("nope", "t").await.is_err());
}

// ==================== License ====================

#[tokio::test]
async fn test_eula_accept_redispatches() {
    let mut h = Harness::new().await;
    wait_on_eula(&mut h).await;
    let download = h.store().require_download("d").await.expect("download");
    assert_eq!(download.state_str, "waitingForEula");
    assert!(download.eula_url.is_some());

    let released = h.manager.eula_callback("d", true).await.expect("eula");

    assert_eq!(released, 1);
    assert_eq!(h.file_state("d", 0).await, "starting");
    assert_eq!(h.engine.begun(), 2);
}

#[tokio::test]
async fn test_eula_reject_cancels_waiting_files() {
    let mut h = Harness::new().await;
    wait_on_eula(&mut h).await;

    let cancelled = h.manager.eula_callback("d", false).await.expect("eula");

    assert_eq!(cancelled, 1);
    assert_eq!(h.file_state("d", 0).await, "cancelled");
    assert_eq!(h.download_state("d").await, "completed");
    assert_eq!(h.engine.begun(), 1);
}
