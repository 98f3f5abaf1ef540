//! RFC 3339 timestamp rendering and parsing.
//!
//! All textual timestamps in the stores use RFC 3339 with exactly nine
//! fractional digits, UTC designator `Z`.

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Renders a millisecond timestamp as RFC 3339 with nanosecond precision.
pub fn format_rfc3339_ms(timestamp_ms: u64) -> Result<String> {
	let instant = DateTime::<Utc>::from_timestamp_millis(timestamp_ms as i64)
		.ok_or_else(|| Error::invalid(format!("timestamp {timestamp_ms} not representable")))?;
	Ok(instant.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_rfc3339(text: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(text)
		.map(|instant| instant.with_timezone(&Utc))
		.map_err(|error| Error::invalid(format!("bad RFC 3339 timestamp {text:?}: {error}")))
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
	Utc::now().timestamp_millis().max(0) as u64
}
