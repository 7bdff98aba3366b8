//! Types shared by the ToDo server and its clients.
//!
//! - [`error`] - the service error type and its gRPC status mapping.
//! - [`version`] - the supported API version and the version guard.
//! - [`timestamp`] - `google.protobuf.Timestamp` conversions.

pub mod error;
pub mod timestamp;
pub mod version;

pub use error::{Error, Result};
