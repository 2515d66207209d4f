use super::*;

#[tokio::test]
async fn test_live_tasks_overwrite_stale_counters() {
    let temp_dir = tempfile::tempdir().unwrap();
    let id;
    {
        let (coordinator, engine) = open_coordinator(temp_dir.path(), |_| {}).await;
        id = add_catalog_entry(&coordinator, SOURCE, 1_000_000).await;
        coordinator.start(id).await.unwrap();
        coordinator
            .handle_engine_event(EngineEvent::Progress {
                tag: id,
                generation: engine.generation(id),
                received_bytes: 100_000,
                expected_bytes: 1_000_000,
            })
            .await;
        coordinator.states.flush().await.unwrap();
        // Process killed: background work stops, no clean shutdown
        coordinator.shutdown_token.cancel();
    }

    // The engine kept running in the background and got further
    let (coordinator, _engine) =
        open_coordinator(temp_dir.path(), |engine| engine.adopt(id, 700_000, 1_000_000)).await;

    assert!(coordinator.was_unclean_shutdown());
    let state = coordinator.states.get(id).await.unwrap();
    assert_eq!(state.downloaded_bytes, 700_000);
    let row = coordinator.db.get_transfer_state(id).await.unwrap().unwrap();
    assert_eq!(row.downloaded_bytes, 700_000);

    let info = coordinator.get_download(id).await.unwrap();
    assert_eq!(info.status, TransferStatus::Downloading);

    // Adopted transfers are fully controllable again
    coordinator.pause(id).await.unwrap();
    assert!(coordinator.states.resume_token_for(id).await.is_some());
}

#[tokio::test]
async fn test_live_task_without_record_is_canceled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let orphan = DownloadId::new();

    let (coordinator, engine) =
        open_coordinator(temp_dir.path(), |engine| engine.adopt(orphan, 5, 10)).await;

    assert!(!engine.is_live(orphan));
    assert!(engine.canceled.lock().unwrap().contains(&orphan));
    assert!(coordinator.states.get(orphan).await.is_none());
}

#[tokio::test]
async fn test_lost_transfer_is_marked_interrupted() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (lost, paused);
    {
        let (coordinator, _engine) = open_coordinator(temp_dir.path(), |_| {}).await;
        lost = add_catalog_entry(&coordinator, SOURCE, 100).await;
        paused = add_catalog_entry(&coordinator, SOURCE, 100).await;
        coordinator.start(lost).await.unwrap();
        coordinator.start(paused).await.unwrap();
        coordinator.pause(paused).await.unwrap();
        coordinator.shutdown_token.cancel();
    }

    // Nothing survived in the engine
    let (coordinator, _engine) = open_coordinator(temp_dir.path(), |_| {}).await;

    let task = coordinator.db.get_download_task(lost).await.unwrap().unwrap();
    assert_eq!(task.error_message.as_deref(), Some(crate::coordinator::reconcile::INTERRUPTED));
    assert_eq!(
        coordinator.get_download(lost).await.unwrap().status,
        TransferStatus::Failed
    );

    let task = coordinator.db.get_download_task(paused).await.unwrap().unwrap();
    assert!(task.error_message.is_none());
    assert_eq!(
        coordinator.get_download(paused).await.unwrap().status,
        TransferStatus::Paused
    );
    coordinator.resume(paused).await.unwrap();
}

#[tokio::test]
async fn test_reconcile_is_repeatable() {
    let h = create_test_coordinator().await;
    let id = add_catalog_entry(&h.coordinator, SOURCE, 100).await;
    h.coordinator.start(id).await.unwrap();

    h.coordinator.restart_if_needed().await.unwrap();

    let task = h.coordinator.db.get_download_task(id).await.unwrap().unwrap();
    assert!(task.error_message.is_none());
    assert_eq!(
        h.coordinator.get_download(id).await.unwrap().status,
        TransferStatus::Downloading
    );
}
