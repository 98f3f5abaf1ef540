//! JSON export: `{"locations": [...]}` with one object per record.
//!
//! The serializer is a pull-driven state machine (`Header → Entries →
//! Trailer → Eof`); each read advances it exactly as far as needed to fill
//! the caller's buffer. A `pretty` flag switches to newline-and-tab
//! indentation.

use crate::geodb::{GeoDb, GeoDbState};
use geotrack_core::io::Storage;
use geotrack_core::utils::CancelToken;
use geotrack_core::{Error, GeoPoint, Result};
use parking_lot::RwLockReadGuard;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonState {
	Header,
	Entries,
	Trailer,
	Eof,
}

/// A single-consumer streaming JSON source over the store's records.
pub struct JsonSerializer<'a, S: Storage> {
	state: RwLockReadGuard<'a, GeoDbState<S>>,
	cancel: CancelToken,
	pretty: bool,
	machine: JsonState,
	next_index: u32,
	buffer: Vec<u8>,
	buffer_pos: usize,
	/// A refill failure noticed after bytes were already handed out; the
	/// `Read` contract forbids reporting it in the same call.
	deferred: Option<std::io::Error>,
}

impl<S: Storage> GeoDb<S> {
	/// Opens a JSON serializer. Fails on a closed store. The cancellation
	/// token is polled once per record pulled.
	pub fn json_serializer(&self, pretty: bool, cancel: &CancelToken) -> Result<JsonSerializer<'_, S>> {
		let state = self.state.read();
		if state.is_closed() {
			return Err(Error::invalid("store is closed"));
		}
		Ok(JsonSerializer {
			state,
			cancel: cancel.clone(),
			pretty,
			machine: JsonState::Header,
			next_index: 0,
			buffer: Vec::new(),
			buffer_pos: 0,
			deferred: None,
		})
	}
}

/// Escapes `"`, `\`, newline, carriage return and tab with their two-letter
/// forms; every other control character becomes `\uXXXX`.
pub(crate) fn escape_json_string(input: &str) -> String {
	let mut output = String::with_capacity(input.len());
	for character in input.chars() {
		match character {
			'"' => output.push_str("\\\""),
			'\\' => output.push_str("\\\\"),
			'\n' => output.push_str("\\n"),
			'\r' => output.push_str("\\r"),
			'\t' => output.push_str("\\t"),
			c if c.is_control() => output.push_str(&format!("\\u{:04x}", c as u32)),
			c => output.push(c),
		}
	}
	output
}

impl<S: Storage> JsonSerializer<'_, S> {
	fn format_entry(&self, point: &GeoPoint, first: bool) -> Result<String> {
		let timestamp = escape_json_string(&point.timestamp_rfc3339()?);
		if self.pretty {
			Ok(format!(
				"{}\n\t\t{{\n\t\t\t\"timestamp\": \"{}\",\n\t\t\t\"timestampMs\": \"{}\",\n\t\t\t\"latitudeE7\": {},\n\t\t\t\"longitudeE7\": {}\n\t\t}}",
				if first { "" } else { "," },
				timestamp,
				point.timestamp_ms,
				point.lat_e7,
				point.lon_e7,
			))
		} else {
			Ok(format!(
				"{}{{\"timestamp\":\"{}\",\"timestampMs\":\"{}\",\"latitudeE7\":{},\"longitudeE7\":{}}}",
				if first { "" } else { "," },
				timestamp,
				point.timestamp_ms,
				point.lat_e7,
				point.lon_e7,
			))
		}
	}

	/// Advances the state machine by one step, refilling the chunk buffer.
	fn refill(&mut self) -> Result<()> {
		self.buffer.clear();
		self.buffer_pos = 0;
		match self.machine {
			JsonState::Header => {
				let header = if self.pretty { "{\n\t\"locations\": [" } else { "{\"locations\":[" };
				self.buffer.extend_from_slice(header.as_bytes());
				self.machine = if self.state.count() == 0 {
					JsonState::Trailer
				} else {
					JsonState::Entries
				};
			}
			JsonState::Entries => {
				self.cancel.check()?;
				let point = self.state.read_record(self.next_index)?;
				let entry = self.format_entry(&point, self.next_index == 0)?;
				self.buffer.extend_from_slice(entry.as_bytes());
				self.next_index += 1;
				if self.next_index >= self.state.count() {
					self.machine = JsonState::Trailer;
				}
			}
			JsonState::Trailer => {
				let trailer = if self.pretty { "\n\t]\n}\n" } else { "]}" };
				self.buffer.extend_from_slice(trailer.as_bytes());
				self.machine = JsonState::Eof;
			}
			JsonState::Eof => {}
		}
		Ok(())
	}
}

impl<S: Storage> Read for JsonSerializer<'_, S> {
	fn read(&mut self, target: &mut [u8]) -> std::io::Result<usize> {
		if let Some(error) = self.deferred.take() {
			return Err(error);
		}
		let mut written = 0;
		while written < target.len() {
			if self.buffer_pos == self.buffer.len() {
				if self.machine == JsonState::Eof {
					break;
				}
				if let Err(error) = self.refill() {
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
