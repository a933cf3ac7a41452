//! Core data model for partwise multipart uploads: chunk planning, the
//! upload session state machine, progress projection and the session store
//! contract.

pub mod chunker;
pub mod config;
pub mod error;
pub mod progress;
pub mod session;
pub mod store;
pub mod types;

pub use chunker::*;
pub use config::*;
pub use error::*;
pub use progress::*;
pub use session::*;
pub use store::*;
pub use types::*;

/// Result type alias for partwise operations
pub type Result<T> = std::result::Result<T, CoreError>;
