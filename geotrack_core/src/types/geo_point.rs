//! This module defines the [`GeoPoint`] structure, a single time-stamped
//! geographic position, together with its fixed 14-byte on-disk encoding:
//! a 48-bit big-endian millisecond timestamp followed by longitude and
//! latitude as signed 32-bit big-endian integers in 1e-7 degrees.

use crate::error::{Error, Result};
use crate::utils::format_rfc3339_ms;
use byteorder::{BigEndian, ByteOrder};

/// Size of one encoded record in bytes.
pub const RECORD_SIZE: usize = 14;

/// Largest representable timestamp (48 unsigned bits of milliseconds).
pub const MAX_TIMESTAMP_MS: u64 = (1 << 48) - 1;

/// Latitude bound in 1e-7 degrees (90°).
pub const MAX_LATITUDE_E7: i32 = 900_000_000;

/// Longitude bound in 1e-7 degrees (180°).
pub const MAX_LONGITUDE_E7: i32 = 1_800_000_000;

/// A time-stamped geographic point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoPoint {
	/// Milliseconds since the Unix epoch, at most 48 bits wide.
	pub timestamp_ms: u64,
	/// Latitude in 1e-7 degrees, positive north.
	pub lat_e7: i32,
	/// Longitude in 1e-7 degrees, positive east.
	pub lon_e7: i32,
}

impl GeoPoint {
	pub fn new(timestamp_ms: u64, lat_e7: i32, lon_e7: i32) -> Result<GeoPoint> {
		let point = GeoPoint {
			timestamp_ms,
			lat_e7,
			lon_e7,
		};
		point.validate()?;
		Ok(point)
	}

	/// Checks the timestamp width and the coordinate ranges.
	pub fn validate(&self) -> Result<()> {
		if self.timestamp_ms > MAX_TIMESTAMP_MS {
			return Err(Error::invalid(format!(
				"timestamp {} exceeds 48 bits",
				self.timestamp_ms
			)));
		}
		if self.lat_e7.unsigned_abs() > MAX_LATITUDE_E7 as u32 {
			return Err(Error::invalid(format!("latitude {} out of range", self.lat_e7)));
		}
		if self.lon_e7.unsigned_abs() > MAX_LONGITUDE_E7 as u32 {
			return Err(Error::invalid(format!("longitude {} out of range", self.lon_e7)));
		}
		Ok(())
	}

	/// Encodes the point into its fixed-width record form.
	pub fn encode(&self) -> [u8; RECORD_SIZE] {
		let mut buffer = [0u8; RECORD_SIZE];
		BigEndian::write_uint(&mut buffer[0..6], self.timestamp_ms & MAX_TIMESTAMP_MS, 6);
		BigEndian::write_i32(&mut buffer[6..10], self.lon_e7);
		BigEndian::write_i32(&mut buffer[10..14], self.lat_e7);
		buffer
	}

	/// Decodes a fixed-width record.
	///
	/// The timestamp is 48 bits by construction; out-of-range coordinates are
	/// reported as corruption since the bytes cannot describe a position.
	pub fn decode(buffer: &[u8; RECORD_SIZE]) -> Result<GeoPoint> {
		let timestamp_ms = BigEndian::read_uint(&buffer[0..6], 6);
		let lon_e7 = BigEndian::read_i32(&buffer[6..10]);
		let lat_e7 = BigEndian::read_i32(&buffer[10..14]);
		if lat_e7.unsigned_abs() > MAX_LATITUDE_E7 as u32 {
			return Err(Error::corrupt(format!("latitude {lat_e7} out of range")));
		}
		if lon_e7.unsigned_abs() > MAX_LONGITUDE_E7 as u32 {
			return Err(Error::corrupt(format!("longitude {lon_e7} out of range")));
		}
		Ok(GeoPoint {
			timestamp_ms,
			lat_e7,
			lon_e7,
		})
	}

	/// Reads only the timestamp prefix of an encoded record.
	pub fn decode_timestamp(prefix: &[u8; 6]) -> u64 {
		BigEndian::read_uint(prefix, 6)
	}

	pub fn latitude(&self) -> f64 {
		self.lat_e7 as f64 / 1e7
	}

	pub fn longitude(&self) -> f64 {
		self.lon_e7 as f64 / 1e7
	}

	/// The timestamp in RFC 3339 form with nanosecond precision, UTC.
	pub fn timestamp_rfc3339(&self) -> Result<String> {
		format_rfc3339_ms(self.timestamp_ms)
	}
}
