//! Common test utilities for archive-delivery integration tests

#[allow(dead_code)]
pub mod assertions;
#[allow(dead_code)]
pub mod config;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use config::*;
