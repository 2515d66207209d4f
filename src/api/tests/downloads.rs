use super::*;
use crate::types::{DownloadId, TransferStatus};

#[tokio::test]
async fn test_start_pause_resume_cancel() {
    let app = TestApp::new().await;
    let id = add_catalog_entry(&app.harness.coordinator, SOURCE, 1_000).await;

    let response = app.post(&format!("/downloads/{id}/start")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get(&format!("/downloads/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["status"], "downloading");
    assert_eq!(info["source_url"], SOURCE);

    let response = app.post(&format!("/downloads/{id}/pause")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let info = body_json(app.get(&format!("/downloads/{id}")).await).await;
    assert_eq!(info["status"], "paused");
    assert_eq!(info["has_resume_token"], true);

    let response = app.post(&format!("/downloads/{id}/resume")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri(format!("/downloads/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get(&format!("/downloads/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_unknown_download() {
    let app = TestApp::new().await;
    let id = DownloadId::new();

    let response = app.post(&format!("/downloads/{id}/start")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "download_not_found");
    assert_eq!(body["error"]["details"]["download_id"], id.to_string());
}

#[tokio::test]
async fn test_start_twice_conflicts() {
    let app = TestApp::new().await;
    let id = add_catalog_entry(&app.harness.coordinator, SOURCE, 1_000).await;

    app.post(&format!("/downloads/{id}/start")).await;
    let response = app.post(&format!("/downloads/{id}/start")).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "already_active");
}

#[tokio::test]
async fn test_resume_without_token_conflicts() {
    let app = TestApp::new().await;
    let id = add_catalog_entry(&app.harness.coordinator, SOURCE, 1_000).await;

    let response = app.post(&format!("/downloads/{id}/resume")).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "nothing_to_resume");
}

#[tokio::test]
async fn test_pause_inactive_conflicts() {
    let app = TestApp::new().await;
    let id = add_catalog_entry(&app.harness.coordinator, SOURCE, 1_000).await;

    let response = app.post(&format!("/downloads/{id}/pause")).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "not_active");
}

#[tokio::test]
async fn test_invalid_download_id_rejected() {
    let app = TestApp::new().await;
    let response = app.post("/downloads/not-a-uuid/start").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_downloads() {
    let app = TestApp::new().await;
    let first = add_catalog_entry(&app.harness.coordinator, SOURCE, 1_000).await;
    let second = add_catalog_entry(
        &app.harness.coordinator,
        "https://mirror.example.org/zim/wiktionary_en_all.zim",
        2_000,
    )
    .await;
    app.harness.coordinator.start(first).await.unwrap();
    app.harness.coordinator.start(second).await.unwrap();
    app.harness.coordinator.pause(second).await.unwrap();

    let response = app.get("/downloads").await;
    assert_eq!(response.status(), StatusCode::OK);

    let infos: Vec<crate::types::DownloadInfo> =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(infos.len(), 2);
    let status_of = |id: DownloadId| infos.iter().find(|i| i.id == id).unwrap().status;
    assert_eq!(status_of(first), TransferStatus::Downloading);
    assert_eq!(status_of(second), TransferStatus::Paused);
}

#[tokio::test]
async fn test_start_during_shutdown_unavailable() {
    let app = TestApp::new().await;
    let id = add_catalog_entry(&app.harness.coordinator, SOURCE, 1_000).await;
    app.harness.coordinator.shutdown().await.unwrap();

    let response = app.post(&format!("/downloads/{id}/start")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
