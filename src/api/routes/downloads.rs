//! Download control handlers.

use crate::api::AppState;
use crate::types::{DownloadId, DownloadInfo};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /downloads - List downloads that have task or transfer records
#[utoipa::path(
    get,
    path = "/api/v1/downloads",
    tag = "downloads",
    responses(
        (status = 200, description = "Downloads with records", body = Vec<DownloadInfo>),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_downloads(State(state): State<AppState>) -> Response {
    match state.coordinator.list_downloads().await {
        Ok(downloads) => (StatusCode::OK, Json(downloads)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /downloads/:id - Get single download
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(
        ("id" = DownloadId, Path, description = "Download ID")
    ),
    responses(
        (status = 200, description = "Download information", body = DownloadInfo),
        (status = 404, description = "Download not found", body = crate::error::ApiError)
    )
)]
pub async fn get_download(State(state): State<AppState>, Path(id): Path<DownloadId>) -> Response {
    match state.coordinator.get_download(id).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /downloads/:id/start - Start fetching a catalog entry
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{id}/start",
    tag = "downloads",
    params(
        ("id" = DownloadId, Path, description = "Download ID")
    ),
    responses(
        (status = 204, description = "Transfer started"),
        (status = 400, description = "Catalog entry has no valid source URL", body = crate::error::ApiError),
        (status = 404, description = "No catalog entry", body = crate::error::ApiError),
        (status = 409, description = "Transfer already active", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn start_download(State(state): State<AppState>, Path(id): Path<DownloadId>) -> Response {
    no_content(state.coordinator.start(id).await)
}

/// POST /downloads/:id/pause - Pause download
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{id}/pause",
    tag = "downloads",
    params(
        ("id" = DownloadId, Path, description = "Download ID")
    ),
    responses(
        (status = 204, description = "Transfer paused (or failed if the source cannot resume)"),
        (status = 409, description = "No transfer is active", body = crate::error::ApiError)
    )
)]
pub async fn pause_download(State(state): State<AppState>, Path(id): Path<DownloadId>) -> Response {
    no_content(state.coordinator.pause(id).await)
}

/// POST /downloads/:id/resume - Resume download
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{id}/resume",
    tag = "downloads",
    params(
        ("id" = DownloadId, Path, description = "Download ID")
    ),
    responses(
        (status = 204, description = "Transfer resumed"),
        (status = 409, description = "Nothing to resume or already active", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn resume_download(
    State(state): State<AppState>,
    Path(id): Path<DownloadId>,
) -> Response {
    no_content(state.coordinator.resume(id).await)
}

/// DELETE /downloads/:id - Cancel download and discard its records
#[utoipa::path(
    delete,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(
        ("id" = DownloadId, Path, description = "Download ID")
    ),
    responses(
        (status = 204, description = "Download canceled"),
        (status = 404, description = "Download not found", body = crate::error::ApiError)
    )
)]
pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<DownloadId>,
) -> Response {
    no_content(state.coordinator.cancel(id).await)
}

fn no_content(result: crate::Result<()>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
