use super::*;
use crate::coordinator::test_helpers::{Harness, add_catalog_entry, create_test_coordinator};
use crate::delivery::MemoryContentStore;
use crate::types::ContentDescriptor;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt;

mod downloads;

const SOURCE: &str = "https://mirror.example.org/zim/wikipedia_en_all.zim";

/// Router wired to a fake engine and an in-memory content store
struct TestApp {
    app: Router,
    harness: Harness,
    store: Arc<MemoryContentStore>,
    dispatcher: ContentRequestDispatcher,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let harness = create_test_coordinator().await;
        let mut config = (*harness.coordinator.get_config()).clone();
        adjust(&mut config);
        let config = Arc::new(config);

        let store = Arc::new(MemoryContentStore::new());
        let dispatcher = ContentRequestDispatcher::new(store.clone(), &config.delivery);
        let app = create_router(
            Arc::new(harness.coordinator.clone()),
            dispatcher.clone(),
            config,
        );

        Self {
            app,
            harness,
            store,
            dispatcher,
        }
    }

    fn insert(&self, collection: &str, path: &str, data: &'static [u8]) {
        self.store
            .insert(ContentDescriptor::new(collection, path), data);
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str) -> axum::response::Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let harness = create_test_coordinator().await;
    let mut config = (*harness.coordinator.get_config()).clone();
    // Port 0 = OS assigns a free port
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let dispatcher =
        ContentRequestDispatcher::new(Arc::new(MemoryContentStore::new()), &config.delivery);
    let api_handle = tokio::spawn({
        let coordinator = Arc::new(harness.coordinator.clone());
        async move { start_api_server(coordinator, dispatcher, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished());
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let app = TestApp::new().await;

    let response = app
        .send(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let app = TestApp::with_config(|config| config.api.cors_enabled = false).await;

    let response = app
        .send(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_specific_origin() {
    let app = TestApp::with_config(|config| {
        config.api.cors_origins = vec!["http://reader.local".to_string()];
    })
    .await;

    let response = app
        .send(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://reader.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://reader.local"
    );
}

#[tokio::test]
async fn test_swagger_ui_disabled() {
    let app = TestApp::with_config(|config| config.api.swagger_ui = false).await;
    let response = app.get("/swagger-ui").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
