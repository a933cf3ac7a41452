//! Control protocol shared by the partwise client and development backend:
//! JSON request/response bodies, route layout, and presigned URL signing.

pub mod presign;
pub mod protocol;
pub mod routes;

pub use presign::*;
pub use protocol::*;
pub use routes::*;
