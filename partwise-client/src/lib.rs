//! Client-driven multipart uploads for large files.
//!
//! The [`Orchestrator`] splits a file into parts, opens a multipart session
//! on an [`ObjectStorage`] backend, pushes the parts to presigned URLs via a
//! [`PartTransport`] with bounded concurrency and retries, records progress
//! in a [`partwise_core::SessionStore`] and finalizes or aborts the session.
//! [`Upload`] wraps one operation in an observable handle.

pub mod backend;
pub mod driver;
pub mod error;
pub mod http_storage;
pub mod orchestrator;
pub mod retry;
pub mod source;
pub mod transport;
pub mod upload;

pub use backend::*;
pub use driver::{CancelFlag, NoopObserver, UploadObserver};
pub use error::*;
pub use http_storage::*;
pub use orchestrator::*;
pub use retry::*;
pub use source::*;
pub use transport::*;
pub use upload::*;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
