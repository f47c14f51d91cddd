//! Protocol timestamps.
//!
//! Every signed request carries a UTC ISO-8601 timestamp truncated to whole
//! seconds (`2026-10-19T08:30:00Z`). The remote verifier rebuilds the signing
//! string from the same text, so the format must not vary.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{CoreError, CoreResult};

/// Current time formatted for signing strings and wallet timestamps.
pub fn protocol_time() -> String {
    format_protocol_time(Utc::now())
}

pub fn format_protocol_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp as sent by the coordinating authority.
pub fn parse_protocol_time(value: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Whether `expires_at` lies at or before `now`.
pub fn is_expired(expires_at: &str, now: DateTime<Utc>) -> CoreResult<bool> {
    Ok(parse_protocol_time(expires_at)? <= now)
}
