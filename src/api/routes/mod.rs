//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`content`] - Archive entry delivery
//! - [`downloads`] - Download control and status
//! - [`system`] - Health, events, OpenAPI

mod content;
mod downloads;
mod system;

// Re-export all handlers so `routes::function_name` continues to work
pub use content::*;
pub use downloads::*;
pub use system::*;
