//! Content delivery handler.
//!
//! Bridges one HTTP request onto the dispatcher's start/stop protocol: the
//! request is started with a fresh handle and stopped if the client goes away
//! before the response is ready.

use crate::api::AppState;
use crate::delivery::{ContentRequestDispatcher, ContentResponse};
use crate::types::{ContentDescriptor, RequestHandle};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::sync::oneshot;

/// Stops the dispatcher request if the handler future is dropped early
struct StopOnDrop {
    dispatcher: ContentRequestDispatcher,
    handle: RequestHandle,
    armed: bool,
}

impl StopOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let dispatcher = self.dispatcher.clone();
        let handle = self.handle;
        tokio::spawn(async move {
            dispatcher.stop(handle).await;
        });
    }
}

/// GET /content/:collection/*path - Serve an archive entry
#[utoipa::path(
    get,
    path = "/api/v1/content/{collection}/{path}",
    tag = "content",
    params(
        ("collection" = String, Path, description = "Content collection identifier"),
        ("path" = String, Path, description = "Entry path within the collection"),
        ("Range" = Option<String>, Header, description = "Single byte range, e.g. bytes=0-1023")
    ),
    responses(
        (status = 200, description = "Whole entry"),
        (status = 206, description = "Requested byte range of the entry"),
        (status = 400, description = "Malformed or unsatisfiable range"),
        (status = 404, description = "No entry at this path"),
        (status = 503, description = "Request was stopped before a response was produced")
    )
)]
pub async fn get_content(
    State(state): State<AppState>,
    Path((collection, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let descriptor = ContentDescriptor::new(collection, path);
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let dispatcher = state.dispatcher.clone();
    let handle = dispatcher.allocate_handle();
    let guard = StopOnDrop {
        dispatcher: dispatcher.clone(),
        handle,
        armed: true,
    };

    let (tx, rx) = oneshot::channel();
    dispatcher.start(handle, descriptor, range, tx).await;

    match rx.await {
        Ok(response) => {
            guard.disarm();
            into_http_response(response)
        }
        Err(_) => {
            // The dispatcher dropped the sink: stop_all or a duplicate handle
            guard.disarm();
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

fn into_http_response(response: ContentResponse) -> Response {
    let ContentResponse { envelope, body, .. } = response;

    let body = match body {
        Some(stream) => Body::from_stream(stream),
        None => Body::empty(),
    };

    let mut http = Response::new(body);
    *http.status_mut() = envelope.status.status_code();
    *http.headers_mut() = envelope.headers;
    http
}
