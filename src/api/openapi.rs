//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the archive-delivery REST API using
//! utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the archive-delivery REST API
///
/// The document can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "archive-delivery REST API",
        version = "0.1.0",
        description = "Serves offline archive content with byte-range support and controls resumable archive downloads",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6789/api/v1", description = "Local development server")
    ),
    paths(
        // Content
        crate::api::routes::get_content,

        // Downloads
        crate::api::routes::list_downloads,
        crate::api::routes::get_download,
        crate::api::routes::start_download,
        crate::api::routes::pause_download,
        crate::api::routes::resume_download,
        crate::api::routes::cancel_download,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::DownloadId,
        crate::types::DownloadInfo,
        crate::types::TransferStatus,
        crate::types::ContentDescriptor,
        crate::types::Event,

        // Config types from config.rs
        crate::config::Config,
        crate::config::DeliveryConfig,
        crate::config::DownloadConfig,
        crate::config::PersistenceConfig,
        crate::config::WatchConfig,
        crate::config::ApiConfig,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "content", description = "Content delivery - Archive entries with HTTP range semantics"),
        (name = "downloads", description = "Download control - Start, pause, resume, cancel and monitor archive downloads"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
