//! Event and state assertions shared by integration tests

use archive_delivery::{DownloadCoordinator, DownloadId, Event, TransferStatus};
use std::time::Duration;
use tokio::sync::broadcast;

/// Wait for the first event matching `predicate`
///
/// Takes a receiver subscribed before the action under test so that no
/// event can slip past between the action and the subscription.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    predicate: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    })
    .await;

    result.ok().flatten()
}

/// Collect all events until timeout or `stop_predicate` is satisfied
pub async fn collect_events_until<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}

/// Assert the derived status of a download
pub async fn assert_download_status(
    coordinator: &DownloadCoordinator,
    id: DownloadId,
    expected: TransferStatus,
) {
    let info = coordinator
        .get_download(id)
        .await
        .unwrap_or_else(|e| panic!("download {id} should exist: {e}"));
    assert_eq!(
        info.status, expected,
        "download {id} status mismatch (info: {info:?})"
    );
}
