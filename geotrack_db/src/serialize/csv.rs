//! RFC 4180 export: one record per line, CRLF-terminated, three fields.
//!
//! The timestamp renders as RFC 3339 with nanosecond precision. Coordinates
//! render as unsigned decimal degrees with exactly seven fractional digits
//! and a direction letter in place of the sign, `N`/`S` for latitude and
//! `E`/`W` for longitude.

use crate::geodb::{GeoDb, GeoDbState};
use geotrack_core::io::Storage;
use geotrack_core::utils::CancelToken;
use geotrack_core::{Error, GeoPoint, Result};
use parking_lot::RwLockReadGuard;
use std::io::Read;

/// A single-consumer streaming CSV source over the store's records.
#[derive(Debug)]
pub struct CsvSerializer<'a, S: Storage> {
	state: RwLockReadGuard<'a, GeoDbState<S>>,
	cancel: CancelToken,
	next_index: u32,
	buffer: Vec<u8>,
	buffer_pos: usize,
	/// A pull failure noticed after bytes were already handed out; the
	/// `Read` contract forbids reporting it in the same call.
	deferred: Option<std::io::Error>,
}

impl<S: Storage> GeoDb<S> {
	/// Opens a CSV serializer. Fails on a closed store. The cancellation
	/// token is polled once per record pulled.
	pub fn csv_serializer(&self, cancel: &CancelToken) -> Result<CsvSerializer<'_, S>> {
		let state = self.state.read();
		if state.is_closed() {
			return Err(Error::invalid("store is closed"));
		}
		Ok(CsvSerializer {
			state,
			cancel: cancel.clone(),
			next_index: 0,
			buffer: Vec::new(),
			buffer_pos: 0,
			deferred: None,
		})
	}
}

/// Renders a coordinate in 1e-7 degrees as `d.ddddddd` plus a direction
/// letter. The integer part carries no leading zeros, the fractional part is
/// always seven digits wide.
pub(crate) fn format_coordinate(value_e7: i32, positive: char, negative: char) -> String {
	let direction = if value_e7 < 0 { negative } else { positive };
	let magnitude = value_e7.unsigned_abs();
	format!(
		"{}.{:07}{}",
		magnitude / 10_000_000,
		magnitude % 10_000_000,
		direction
	)
}

pub(crate) fn format_csv_line(point: &GeoPoint) -> Result<String> {
	Ok(format!(
		"{},{},{}\r\n",
		point.timestamp_rfc3339()?,
		format_coordinate(point.lat_e7, 'N', 'S'),
		format_coordinate(point.lon_e7, 'E', 'W'),
	))
}

impl<S: Storage> CsvSerializer<'_, S> {
	fn pull_line(&mut self) -> geotrack_core::Result<()> {
		self.cancel.check()?;
		let point = self.state.read_record(self.next_index)?;
		let line = format_csv_line(&point)?;
		self.buffer.clear();
		self.buffer.extend_from_slice(line.as_bytes());
		self.buffer_pos = 0;
		self.next_index += 1;
		Ok(())
	}
}

impl<S: Storage> Read for CsvSerializer<'_, S> {
	fn read(&mut self, target: &mut [u8]) -> std::io::Result<usize> {
		if let Some(error) = self.deferred.take() {
			return Err(error);
		}
		let mut written = 0;
		while written < target.len() {
			if self.buffer_pos == self.buffer.len() {
				if self.next_index >= self.state.count() {
					break;
				}
				if let Err(error) = self.pull_line() {
					let error = std::io::Error::from(error);
					if written == 0 {
						return Err(error);
					}
					self.deferred = Some(error);
					return Ok(written);
				}
			}
			let available = self.buffer.len() - self.buffer_pos;
			let step = available.min(target.len() - written);
			target[written..written + step].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + step]);
			self.buffer_pos += step;
			written += step;
		}
		Ok(written)
	}
}
