//! Test configuration helpers for creating isolated coordinators

use archive_delivery::db::CatalogEntry;
use archive_delivery::{Config, Database, DownloadId};
use std::path::Path;
use std::time::Duration;

/// Config rooted in `root` with a fast progress flush
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("archive.db");
    config.download.download_dir = root.join("downloads");
    config.download.temp_dir = root.join("temp");
    config.download.progress_flush_interval = Duration::from_millis(50);
    config
}

/// Register a catalog entry and return its ID
pub async fn add_catalog_entry(db: &Database, name: &str, source_url: &str, size: i64) -> DownloadId {
    let id = DownloadId::new();
    db.upsert_catalog_entry(&CatalogEntry {
        content_id: id,
        name: name.to_string(),
        source_url: source_url.to_string(),
        size_bytes: size,
        local_path: None,
    })
    .await
    .expect("catalog entry should be stored");
    id
}
