//! Content delivery: serving archive entries with HTTP range semantics
//!
//! - [`range`] - Range header parsing and span planning
//! - [`response`] - status and header construction
//! - [`store`] - the content lookup capability
//! - [`dispatcher`] - per-request start/stop state machine

pub mod dispatcher;
pub mod range;
pub mod response;
pub mod store;

pub use dispatcher::{ContentBody, ContentRequestDispatcher, ContentResponse, ResponseSink};
pub use range::{RangeKind, RequestedRange, ResolvedRange, Spans};
pub use response::{ResponseEnvelope, ResponseStatus};
pub use store::{
    ContentLookup, ContentMetadata, ContentReader, ContentStore, DirectoryContentStore,
    MemoryContentStore,
};
