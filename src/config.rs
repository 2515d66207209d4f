//! Configuration types for archive-delivery

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Main configuration
///
/// Fields are organized into logical sub-configs:
/// - [`delivery`](DeliveryConfig) - content request handling
/// - [`download`](DownloadConfig) - directories and progress persistence
/// - [`persistence`](PersistenceConfig) - database location
/// - [`watch`](WatchConfig) - directory stasis detection
/// - [`api`](ApiConfig) - HTTP surface
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Content delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Data storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Watched directory settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.download.temp_dir
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> crate::Result<()> {
        if self.delivery.read_chunk_size == 0 {
            return Err(crate::Error::Config {
                message: "read_chunk_size must be greater than zero".to_string(),
                key: Some("read_chunk_size".to_string()),
            });
        }
        if self.delivery.max_concurrent_lookups == 0 {
            return Err(crate::Error::Config {
                message: "max_concurrent_lookups must be greater than zero".to_string(),
                key: Some("max_concurrent_lookups".to_string()),
            });
        }
        if self.download.download_dir == self.download.temp_dir {
            return Err(crate::Error::Config {
                message: "download_dir and temp_dir must differ".to_string(),
                key: Some("temp_dir".to_string()),
            });
        }
        Ok(())
    }
}

/// Content delivery configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryConfig {
    /// URL scheme accepted for content URLs (default: "kiwix")
    #[serde(default = "default_content_scheme")]
    pub content_scheme: String,

    /// Maximum bytes fetched from the store in one read call (default: 2 MiB)
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: u64,

    /// Maximum number of concurrent content lookups (default: 8)
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            content_scheme: default_content_scheme(),
            read_chunk_size: default_read_chunk_size(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
        }
    }
}

/// Download behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// Final directory for fetched files (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Directory for in-flight partial files (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// How often batched byte counters are flushed to the database (default: 2000ms)
    #[serde(default = "default_progress_flush_interval", with = "duration_millis")]
    #[schema(value_type = u64)]
    pub progress_flush_interval: Duration,

    /// How many alternate file names to try when the destination exists (default: 3)
    #[serde(default = "default_max_name_attempts")]
    pub max_name_attempts: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            progress_flush_interval: default_progress_flush_interval(),
            max_name_attempts: default_max_name_attempts(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./archive-delivery.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Directory stasis detection configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WatchConfig {
    /// Delay between consecutive snapshots while checking (default: 500ms)
    #[serde(default = "default_check_interval", with = "duration_millis")]
    #[schema(value_type = u64)]
    pub check_interval: Duration,

    /// Delay between declaring stasis and notifying (default: 100ms)
    #[serde(default = "default_settle_delay", with = "duration_millis")]
    #[schema(value_type = u64)]
    pub settle_delay: Duration,

    /// Number of equal observations that must be exceeded to declare stasis (default: 2)
    #[serde(default = "default_stable_checks")]
    pub stable_checks: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            settle_delay: default_settle_delay(),
            stable_checks: default_stable_checks(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Serve Swagger UI at /swagger-ui (default: false)
    #[serde(default)]
    pub swagger_ui: bool,

    /// Answer cross-origin requests (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed origins; "*" allows any (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            swagger_ui: false,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_content_scheme() -> String {
    "kiwix".to_string()
}

fn default_read_chunk_size() -> u64 {
    2 * 1024 * 1024
}

fn default_max_concurrent_lookups() -> usize {
    8
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_progress_flush_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_max_name_attempts() -> u32 {
    3
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./archive-delivery.db")
}

fn default_check_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_stable_checks() -> u32 {
    2
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

// Duration serialization helper (integer milliseconds)
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
