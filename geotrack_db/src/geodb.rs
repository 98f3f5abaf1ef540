//! This module defines [`GeoDb`], the fixed-record binary store of
//! time-stamped geographic points.
//!
//! # On-disk format
//!
//! Big-endian throughout. A 10-byte header (8-byte magic, major version,
//! minor version) followed by a packed array of 14-byte records. The record
//! count is always derived from the storage size, so a torn trailing write is
//! detected at open time and fails with a corruption error a recovery tool
//! can act on.
//!
//! Existing records are never rewritten in place except by the whole-record
//! swaps of [`GeoDb::sort`].

use geotrack_core::io::Storage;
use geotrack_core::utils::CancelToken;
use geotrack_core::{DatasetStats, Error, GeoPoint, Result, StatsCollector, RECORD_SIZE};
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// File magic: `GeoDB\n\0\x04`.
pub const GEODB_MAGIC: [u8; 8] = [0x47, 0x65, 0x6F, 0x44, 0x42, 0x0A, 0x00, 0x04];

/// Header length: magic plus major and minor version bytes.
pub const HEADER_SIZE: u64 = 10;

pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 0;

/// Outcome of a bulk record read.
///
/// Delivery is best-effort: undecodable records are skipped and counted
/// against `decode_error`, an i/o failure stops the read. Each slot keeps the
/// first error of its kind, pinned to its byte offset.
#[derive(Debug, Default)]
pub struct ReadOutcome {
	/// Number of records written to the target slice, packed from index 0.
	pub delivered: usize,
	pub io_error: Option<Error>,
	pub decode_error: Option<Error>,
}

impl ReadOutcome {
	/// Collapses to the delivered count, surfacing the i/o error first.
	pub fn into_result(self) -> Result<usize> {
		if let Some(error) = self.io_error {
			return Err(error);
		}
		if let Some(error) = self.decode_error {
			return Err(error);
		}
		Ok(self.delivered)
	}

	pub fn is_clean(&self) -> bool {
		self.io_error.is_none() && self.decode_error.is_none()
	}
}

#[derive(Debug)]
pub(crate) struct GeoDbState<S: Storage> {
	/// `None` once the store was closed. The inner mutex serializes physical
	/// seek+read/write pairs between logical readers sharing the read lock.
	storage: Option<Mutex<S>>,
	count: u32,
}

impl<S: Storage> GeoDbState<S> {
	pub(crate) fn count(&self) -> u32 {
		self.count
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.storage.is_none()
	}

	fn handle(&self) -> Result<&Mutex<S>> {
		self
			.storage
			.as_ref()
			.ok_or_else(|| Error::invalid("store is closed"))
	}

	pub(crate) fn record_offset(index: u32) -> u64 {
		HEADER_SIZE + index as u64 * RECORD_SIZE as u64
	}

	/// Reads raw file bytes, used by the binary serializer to reproduce the
	/// store byte-identically (header included).
	pub(crate) fn read_bytes_at(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
		let mutex = self.handle()?;
		let mut storage = mutex.lock();
		storage
			.seek(SeekFrom::Start(offset))
			.and_then(|_| storage.read_exact(buffer))
			.map_err(|error| Error::io_at(offset, error))?;
		Ok(())
	}

	pub(crate) fn read_record_bytes(&self, index: u32) -> Result<[u8; RECORD_SIZE]> {
		let offset = Self::record_offset(index);
		let mutex = self.handle()?;
		let mut storage = mutex.lock();
		let mut buffer = [0u8; RECORD_SIZE];
		storage
			.seek(SeekFrom::Start(offset))
			.and_then(|_| storage.read_exact(&mut buffer))
			.map_err(|error| Error::io_at(offset, error))?;
		Ok(buffer)
	}

	pub(crate) fn read_record(&self, index: u32) -> Result<GeoPoint> {
		let buffer = self.read_record_bytes(index)?;
		GeoPoint::decode(&buffer).map_err(|error| pin_offset(error, Self::record_offset(index)))
	}

	pub(crate) fn read_timestamp(&self, index: u32) -> Result<u64> {
		let offset = Self::record_offset(index);
		let mutex = self.handle()?;
		let mut storage = mutex.lock();
		let mut prefix = [0u8; 6];
		storage
			.seek(SeekFrom::Start(offset))
			.and_then(|_| storage.read_exact(&mut prefix))
			.map_err(|error| Error::io_at(offset, error))?;
		Ok(GeoPoint::decode_timestamp(&prefix))
	}

	fn write_record_bytes(&self, index: u32, buffer: &[u8; RECORD_SIZE]) -> Result<()> {
		let offset = Self::record_offset(index);
		let mutex = self.handle()?;
		let mut storage = mutex.lock();
		storage
			.seek(SeekFrom::Start(offset))
			.and_then(|_| storage.write_all(buffer))
			.map_err(|error| Error::io_at(offset, error))?;
		Ok(())
	}

	pub(crate) fn append_record(&mut self, point: &GeoPoint) -> Result<()> {
		if self.count == u32::MAX {
			return Err(Error::Overflow("record count limit reached".to_string()));
		}
		point.validate()?;
		self.write_record_bytes(self.count, &point.encode())?;
		self.count += 1;
		Ok(())
	}

	/// Scans all timestamps in record order, folding them into statistics.
	pub(crate) fn scan_stats(&self, cancel: &CancelToken) -> Result<DatasetStats> {
		let mut collector = StatsCollector::new();
		for index in 0..self.count {
			cancel.check()?;
			collector.observe(self.read_timestamp(index)?);
		}
		Ok(collector.finish())
	}
}

/// The fixed-record store. All shared state sits behind one readers-writer
/// lock; serializers borrow the read side for their whole lifetime.
#[derive(Debug)]
pub struct GeoDb<S: Storage> {
	pub(crate) state: RwLock<GeoDbState<S>>,
}

impl GeoDb<File> {
	/// Opens (or creates) a file-backed store.
	pub fn open_path(path: &Path) -> Result<GeoDb<File>> {
		let file = File::options().read(true).write(true).create(true).open(path)?;
		GeoDb::open(file)
	}
}

impl<S: Storage> GeoDb<S> {
	/// Opens a store over its backing storage.
	///
	/// Empty storage is initialized with a fresh header. Anything shorter
	/// than the header, carrying the wrong magic, an unsupported major
	/// version, or a body that is not a whole number of records is rejected.
	/// Higher minor versions are accepted; they are reserved for additive
	/// extensions.
	pub fn open(mut storage: S) -> Result<GeoDb<S>> {
		let size = storage.len()?;
		let count;
		if size == 0 {
			let mut header = [0u8; HEADER_SIZE as usize];
			header[0..8].copy_from_slice(&GEODB_MAGIC);
			header[8] = MAJOR_VERSION;
			header[9] = MINOR_VERSION;
			storage.seek(SeekFrom::Start(0))?;
			storage
				.write_all(&header)
				.and_then(|_| storage.flush())
				.map_err(|error| Error::io_at(0, error))?;
			count = 0;
		} else {
			if size < HEADER_SIZE {
				return Err(Error::corrupt_at(0, format!("file of {size} bytes is shorter than the header")));
			}
			let mut header = [0u8; HEADER_SIZE as usize];
			storage.seek(SeekFrom::Start(0))?;
			storage.read_exact(&mut header).map_err(|error| Error::io_at(0, error))?;
			if header[0..8] != GEODB_MAGIC {
				return Err(Error::corrupt_at(0, "magic number mismatch"));
			}
			if header[8] != MAJOR_VERSION {
				return Err(Error::corrupt_at(
					8,
					format!("unsupported major version {}", header[8]),
				));
			}
			let body = size - HEADER_SIZE;
			let remainder = body % RECORD_SIZE as u64;
			if remainder != 0 {
				return Err(Error::corrupt_at(
					size - remainder,
					"trailing partial record, truncate the tail to recover",
				));
			}
			let records = body / RECORD_SIZE as u64;
			if records > u32::MAX as u64 {
				return Err(Error::Overflow(format!("{records} records exceed the count limit")));
			}
			count = records as u32;
		}
		Ok(GeoDb {
			state: RwLock::new(GeoDbState {
				storage: Some(Mutex::new(storage)),
				count,
			}),
		})
	}

	/// Number of stored records. Zero after `close`.
	pub fn count(&self) -> u32 {
		self.state.read().count
	}

	/// Appends one record at the end of the store.
	///
	/// The record write and the count increment happen under the write lock
	/// and are never observable separately. A failed write leaves the count
	/// unchanged; a torn trailing write is caught by the next open.
	pub fn append(&self, point: &GeoPoint) -> Result<()> {
		self.state.write().append_record(point)
	}

	/// Reads up to `target.len()` records starting at record `start_index`.
	pub fn read_locations(&self, start_index: u32, target: &mut [GeoPoint]) -> ReadOutcome {
		let state = self.state.read();
		let mut outcome = ReadOutcome::default();
		if state.storage.is_none() || start_index >= state.count {
			return outcome;
		}
		let available = (state.count - start_index) as usize;
		let wanted = target.len().min(available);
		for step in 0..wanted {
			let index = start_index + step as u32;
			match state.read_record(index) {
				Ok(point) => {
					target[outcome.delivered] = point;
					outcome.delivered += 1;
				}
				Err(error @ Error::Io { .. }) => {
					if outcome.io_error.is_none() {
						outcome.io_error = Some(error);
					}
					break;
				}
				Err(error) => {
					if outcome.decode_error.is_none() {
						outcome.decode_error = Some(error);
					}
				}
			}
		}
		outcome
	}

	/// Computes dataset statistics by scanning all timestamps.
	pub fn stats(&self, cancel: &CancelToken) -> Result<DatasetStats> {
		self.state.read().scan_stats(cancel)
	}

	/// Stable in-place sort by timestamp, ascending.
	///
	/// Comparison reads only the 6-byte timestamp prefix of each record; the
	/// sorted order is applied with whole-record swaps (two reads and two
	/// writes each), so an aborted sort can leave records out of order but
	/// never torn. Equal timestamps keep their insertion order.
	pub fn sort(&self, cancel: &CancelToken) -> Result<()> {
		let state = self.state.write();
		let count = state.count as usize;
		if count < 2 {
			return Ok(());
		}

		let mut keys: Vec<(u64, u32)> = Vec::with_capacity(count);
		for index in 0..state.count {
			cancel.check()?;
			keys.push((state.read_timestamp(index)?, index));
		}
		// Stable by construction: equal timestamps keep ascending indices.
		keys.sort_by_key(|&(timestamp, _)| timestamp);
		let mut sources: Vec<u32> = keys.into_iter().map(|(_, index)| index).collect();

		for target in 0..count {
			cancel.check()?;
			let mut source = sources[target] as usize;
			while source < target {
				source = sources[source] as usize;
			}
			sources[target] = source as u32;
			if source != target {
				swap_records(&state, target as u32, source as u32)?;
			}
		}
		Ok(())
	}

	/// Closes the store: the count drops to zero and the storage handle is
	/// released from internal state. Closing twice is an error.
	pub fn close(&self) -> Result<()> {
		let mut state = self.state.write();
		if state.storage.is_none() {
			return Err(Error::invalid("store is already closed"));
		}
		state.count = 0;
		state.storage = None;
		Ok(())
	}
}

/// Swaps two whole records. Any i/o failure is unrecoverable mid-sort, so it
/// surfaces as corruption rather than a retryable i/o error.
fn swap_records<S: Storage>(state: &GeoDbState<S>, a: u32, b: u32) -> Result<()> {
	let buffer_a = state.read_record_bytes(a)?;
	let buffer_b = state.read_record_bytes(b)?;
	let result = state
		.write_record_bytes(a, &buffer_b)
		.and_then(|_| state.write_record_bytes(b, &buffer_a));
	result.map_err(|error| {
		Error::corrupt_at(
			GeoDbState::<S>::record_offset(a),
			format!("swap failed mid-sort, record order may be inconsistent: {error}"),
		)
	})
}

/// Pins an offset onto an error that was produced without one.
pub(crate) fn pin_offset(error: Error, offset: u64) -> Error {
	match error {
		Error::Io { offset: None, source } => Error::Io {
			offset: Some(offset),
			source,
		},
		Error::Corruption { offset: None, detail } => Error::Corruption {
			offset: Some(offset),
			detail,
		},
		other => other,
	}
}
