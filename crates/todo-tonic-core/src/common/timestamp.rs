//! Conversions between `google.protobuf.Timestamp` and `chrono`.
//!
//! The wire type admits values the datastore cannot hold (and vice versa), so
//! both directions are fallible. Valid timestamps lie in
//! `0001-01-01T00:00:00Z ..= 9999-12-31T23:59:59.999999999Z` with nanos in
//! `0..1_000_000_000`.

use crate::Error;
use chrono::{DateTime, Utc};
use prost_types::Timestamp;

/// Seconds of `0001-01-01T00:00:00Z` relative to the Unix epoch.
const MIN_VALID_SECONDS: i64 = -62_135_596_800;

/// Seconds of `10000-01-01T00:00:00Z` relative to the Unix epoch (exclusive).
const MAX_VALID_SECONDS: i64 = 253_402_300_800;

const NANOS_PER_SECOND: i32 = 1_000_000_000;

fn validate(seconds: i64, nanos: i32) -> Result<(), String> {
    if seconds < MIN_VALID_SECONDS {
        return Err(format!("timestamp: seconds {seconds} before 0001-01-01"));
    }
    if seconds >= MAX_VALID_SECONDS {
        return Err(format!("timestamp: seconds {seconds} after 10000-01-01"));
    }
    if !(0..NANOS_PER_SECOND).contains(&nanos) {
        return Err(format!("timestamp: nanos {nanos} not in range [0, 1e9)"));
    }
    Ok(())
}

/// Converts a reminder received from a client into a UTC datetime.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when the timestamp is absent or outside
/// the valid range.
pub fn from_proto(ts: Option<&Timestamp>) -> Result<DateTime<Utc>, Error> {
    let ts = ts.ok_or_else(|| {
        Error::invalid_argument("reminder field has invalid format: timestamp is missing")
    })?;

    validate(ts.seconds, ts.nanos).map_err(|reason| {
        Error::invalid_argument(format!("reminder field has invalid format: {reason}"))
    })?;

    // `validate` guarantees a non-negative nanos below one second.
    DateTime::from_timestamp(ts.seconds, ts.nanos as u32).ok_or_else(|| {
        Error::invalid_argument(format!(
            "reminder field has invalid format: {}s {}ns is not representable",
            ts.seconds, ts.nanos
        ))
    })
}

/// Converts a stored reminder into its wire representation.
///
/// # Errors
///
/// Returns [`Error::Internal`] when the stored value lies outside the range
/// the wire format accepts.
pub fn to_proto(dt: &DateTime<Utc>) -> Result<Timestamp, Error> {
    let seconds = dt.timestamp();
    let nanos = i32::try_from(dt.timestamp_subsec_nanos())
        .map_err(|e| Error::internal("reminder field has invalid format", e))?;

    validate(seconds, nanos)
        .map_err(|reason| Error::internal("reminder field has invalid format", reason))?;

    Ok(Timestamp { seconds, nanos })
}
