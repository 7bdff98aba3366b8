//! API versioning.
//!
//! Every request carries an `api` string naming the protocol version the
//! client was built against. The server implements exactly one version,
//! [`API_VERSION`], and rejects anything else before doing any work. An empty
//! string means "whatever the server implements".

use crate::Error;

/// The API version implemented by this server. Echoed back in every response.
pub const API_VERSION: &str = "v1";

/// Checks a client-requested API version against [`API_VERSION`].
///
/// # Errors
///
/// Returns [`Error::VersionMismatch`] if `requested` is non-empty and differs
/// from the server's version.
pub fn check_api(requested: &str) -> Result<(), Error> {
    if requested.is_empty() || requested == API_VERSION {
        return Ok(());
    }
    Err(Error::VersionMismatch {
        expected: API_VERSION,
        requested: requested.to_string(),
    })
}
