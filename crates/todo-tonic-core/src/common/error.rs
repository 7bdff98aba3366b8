//! Error types for the ToDo service.
//!
//! This module defines the central `Error` enum, a closed set of the failures
//! a request can end in. It implements `From<Error>` for `tonic::Status` so
//! handlers can return it with `?` and clients receive a meaningful status
//! code and message.
//!
//! ## Error Cases
//! - `VersionMismatch`: The client asked for an API version the server does
//!   not implement.
//! - `InvalidArgument`: The request carried a malformed value (e.g., a missing
//!   or out-of-range reminder timestamp).
//! - `NotFound`: No ToDo exists with the requested identifier.
//! - `Internal`: Datastore or integrity failure (connection, statement, row
//!   decoding, duplicate identifiers).

use tonic::Status;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the ToDo service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The requested API version differs from the one the server implements.
    #[error(
        "Unsupported API version: service implements API version '{expected}' but asked for '{requested}'"
    )]
    VersionMismatch {
        expected: &'static str,
        requested: String,
    },

    /// The client request carried an invalid field.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// No row matches the requested identifier.
    #[error("ToDo with ID='{id}' is not found")]
    NotFound { id: i64 },

    /// The datastore failed, or returned data that violates an invariant.
    #[error("{context}: {cause}")]
    Internal { context: &'static str, cause: String },
}

impl Error {
    /// Wraps an underlying failure with a short description of the step that
    /// failed.
    pub fn internal(context: &'static str, cause: impl core::fmt::Display) -> Self {
        Self::Internal {
            context,
            cause: cause.to_string(),
        }
    }

    /// Wraps a failure to obtain a pooled datastore connection.
    pub fn connection_unavailable(cause: impl core::fmt::Display) -> Self {
        Self::internal("failed to connect to database", cause)
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns `true` when the failure was caused by the request rather than
    /// the server.
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::VersionMismatch { .. } => Status::unimplemented(message),
            Error::InvalidArgument { .. } => Status::invalid_argument(message),
            Error::NotFound { .. } => Status::not_found(message),
            Error::Internal { .. } => Status::unknown(message),
        }
    }
}
