//! Development storage backend for partwise.
//!
//! Serves the multipart control API and presigned part/object URLs over
//! HTTP/1.1, staging parts and assembled objects in fjall.

pub mod handlers;
pub mod server;

pub use server::*;
