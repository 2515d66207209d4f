//! REST API server module
//!
//! Hosts the content request dispatcher behind an HTTP route and exposes
//! download control, the event stream and an OpenAPI document.

use crate::delivery::ContentRequestDispatcher;
use crate::{Config, DownloadCoordinator, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Content
/// - `GET /content/:collection/*path` - Serve an archive entry (honors `Range`)
///
/// ## Downloads
/// - `GET /downloads` - List downloads with records
/// - `GET /downloads/:id` - Get single download
/// - `POST /downloads/:id/start` - Start fetching a catalog entry
/// - `POST /downloads/:id/pause` - Pause download
/// - `POST /downloads/:id/resume` - Resume download
/// - `DELETE /downloads/:id` - Cancel download and discard its records
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
/// - `GET /events` - Server-sent events stream
pub fn create_router(
    coordinator: Arc<DownloadCoordinator>,
    dispatcher: ContentRequestDispatcher,
    config: Arc<Config>,
) -> Router {
    let state = AppState::new(coordinator, dispatcher, config.clone());

    let router = Router::new()
        // Content
        .route("/content/:collection/*path", get(routes::get_content))
        // Downloads
        .route("/downloads", get(routes::list_downloads))
        .route(
            "/downloads/:id",
            get(routes::get_download).delete(routes::cancel_download),
        )
        .route("/downloads/:id/start", post(routes::start_download))
        .route("/downloads/:id/pause", post(routes::pause_download))
        .route("/downloads/:id/resume", post(routes::resume_download))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream));

    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins ("*" allows any)
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server stops.
///
/// # Example
///
/// ```no_run
/// use archive_delivery::delivery::{ContentRequestDispatcher, DirectoryContentStore};
/// use archive_delivery::{Config, DownloadCoordinator};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let coordinator = Arc::new(DownloadCoordinator::new((*config).clone()).await?);
///
/// let store = Arc::new(DirectoryContentStore::new());
/// store.register("wikipedia_en", "/srv/zim/wikipedia_en");
/// let dispatcher = ContentRequestDispatcher::new(store, &config.delivery);
///
/// archive_delivery::api::start_api_server(coordinator, dispatcher, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(
    coordinator: Arc<DownloadCoordinator>,
    dispatcher: ContentRequestDispatcher,
    config: Arc<Config>,
) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(coordinator, dispatcher.clone(), config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    let served = axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()));

    // Whatever is still pending will never be answered
    dispatcher.stop_all().await;

    served?;
    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
