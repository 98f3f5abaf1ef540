//! This module defines [`IndexStore`], the flat array of fixed-width slots
//! mapping tile coordinates to blob handles.
//!
//! # On-disk format
//!
//! An 8-byte magic (`IndexDB\x04`) followed by 81-byte slots:
//! `z (1) ‖ x (u32 BE) ‖ y (u32 BE) ‖ timestamp_ms (i64 BE) ‖ hash (64)`.
//! An in-memory hash map resolves a coordinate to its slot in O(1).
//! Inserting an already-indexed coordinate overwrites its slot in place.

use byteorder::{BigEndian, ByteOrder};
use geotrack_core::io::Storage;
use geotrack_core::{Error, ImageHandle, Result, TileCoord, HANDLE_SIZE};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// File magic: `IndexDB\x04`.
pub const INDEX_MAGIC: [u8; 8] = [0x49, 0x6E, 0x64, 0x65, 0x78, 0x44, 0x42, 0x04];

/// Size of one slot in bytes.
pub const SLOT_SIZE: usize = 81;

/// What a slot stores about its tile: when it was fetched and which blob
/// carries the pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileMeta {
	pub timestamp_ms: i64,
	pub handle: ImageHandle,
}

#[derive(Debug)]
struct IndexState<S: Storage> {
	storage: Option<Mutex<S>>,
	map: HashMap<TileCoord, u32>,
	count: u32,
}

impl<S: Storage> IndexState<S> {
	fn handle(&self) -> Result<&Mutex<S>> {
		self
			.storage
			.as_ref()
			.ok_or_else(|| Error::invalid("store is closed"))
	}

	fn slot_offset(slot: u32) -> u64 {
		8 + slot as u64 * SLOT_SIZE as u64
	}

	fn read_slot(&self, slot: u32) -> Result<(TileCoord, TileMeta)> {
		let offset = Self::slot_offset(slot);
		let mutex = self.handle()?;
		let mut storage = mutex.lock();
		let mut buffer = [0u8; SLOT_SIZE];
		storage
			.seek(SeekFrom::Start(offset))
			.and_then(|_| storage.read_exact(&mut buffer))
			.map_err(|error| Error::io_at(offset, error))?;
		decode_slot(&buffer).map_err(|error| match error {
			Error::Corruption { detail, .. } => Error::corrupt_at(offset, detail),
			other => other,
		})
	}

	fn write_slot(&self, slot: u32, coord: &TileCoord, meta: &TileMeta) -> Result<()> {
		let offset = Self::slot_offset(slot);
		let mutex = self.handle()?;
		let mut storage = mutex.lock();
		let buffer = encode_slot(coord, meta);
		storage
			.seek(SeekFrom::Start(offset))
			.and_then(|_| storage.write_all(&buffer))
			.and_then(|_| storage.flush())
			.map_err(|error| Error::io_at(offset, error))?;
		Ok(())
	}
}

fn encode_slot(coord: &TileCoord, meta: &TileMeta) -> [u8; SLOT_SIZE] {
	let mut buffer = [0u8; SLOT_SIZE];
	buffer[0] = coord.level;
	BigEndian::write_u32(&mut buffer[1..5], coord.x);
	BigEndian::write_u32(&mut buffer[5..9], coord.y);
	BigEndian::write_i64(&mut buffer[9..17], meta.timestamp_ms);
	buffer[17..81].copy_from_slice(meta.handle.as_bytes());
	buffer
}

fn decode_slot(buffer: &[u8; SLOT_SIZE]) -> Result<(TileCoord, TileMeta)> {
	let coord = TileCoord::new(
		buffer[0],
		BigEndian::read_u32(&buffer[1..5]),
		BigEndian::read_u32(&buffer[5..9]),
	)
	.map_err(|error| Error::corrupt(format!("bad tile coordinate in slot: {error}")))?;
	let timestamp_ms = BigEndian::read_i64(&buffer[9..17]);
	let mut hash = [0u8; HANDLE_SIZE];
	hash.copy_from_slice(&buffer[17..81]);
	Ok((
		coord,
		TileMeta {
			timestamp_ms,
			handle: ImageHandle::from_bytes(hash),
		},
	))
}

/// The tile-coordinate index over the blob store.
#[derive(Debug)]
pub struct IndexStore<S: Storage> {
	state: RwLock<IndexState<S>>,
}

impl IndexStore<File> {
	pub fn open_path(path: &Path) -> Result<IndexStore<File>> {
		let file = File::options().read(true).write(true).create(true).open(path)?;
		IndexStore::open(file)
	}
}

impl<S: Storage> IndexStore<S> {
	/// Opens the store, verifying the magic, the slot alignment and every
	/// stored coordinate. A coordinate occurring twice keeps its last slot,
	/// matching overwrite semantics.
	pub fn open(mut storage: S) -> Result<IndexStore<S>> {
		let size = storage.len()?;
		let mut map = HashMap::new();
		let count;
		if size == 0 {
			storage.seek(SeekFrom::Start(0))?;
			storage
				.write_all(&INDEX_MAGIC)
				.and_then(|_| storage.flush())
				.map_err(|error| Error::io_at(0, error))?;
			count = 0;
		} else {
			if size < 8 {
				return Err(Error::corrupt_at(0, format!("file of {size} bytes is shorter than the magic")));
			}
			let mut magic = [0u8; 8];
			storage.seek(SeekFrom::Start(0))?;
			storage.read_exact(&mut magic).map_err(|error| Error::io_at(0, error))?;
			if magic != INDEX_MAGIC {
				return Err(Error::corrupt_at(0, "magic number mismatch"));
			}
			let body = size - 8;
			let remainder = body % SLOT_SIZE as u64;
			if remainder != 0 {
				return Err(Error::corrupt_at(size - remainder, "trailing partial slot"));
			}
			let slots = body / SLOT_SIZE as u64;
			if slots > u32::MAX as u64 {
				return Err(Error::Overflow(format!("{slots} slots exceed the count limit")));
			}
			count = slots as u32;
			for slot in 0..count {
				let offset = IndexState::<S>::slot_offset(slot);
				let mut buffer = [0u8; SLOT_SIZE];
				storage
					.seek(SeekFrom::Start(offset))
					.and_then(|_| storage.read_exact(&mut buffer))
					.map_err(|error| Error::io_at(offset, error))?;
				let (coord, _) = decode_slot(&buffer).map_err(|error| match error {
					Error::Corruption { detail, .. } => Error::corrupt_at(offset, detail),
					other => other,
				})?;
				map.insert(coord, slot);
			}
		}
		Ok(IndexStore {
			state: RwLock::new(IndexState {
				storage: Some(Mutex::new(storage)),
				map,
				count,
			}),
		})
	}

	/// Number of slots, derived from the storage size.
	pub fn len(&self) -> u32 {
		self.state.read().count
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Inserts or overwrites the slot for `coord`.
	///
	/// An existing coordinate keeps its slot index; only timestamp and handle
	/// change. A new coordinate appends a slot at the end.
	pub fn insert(&self, coord: &TileCoord, meta: &TileMeta) -> Result<u32> {
		if !coord.is_valid() {
			return Err(Error::invalid(format!("bad tile coordinate {coord:?}")));
		}
		let mut state = self.state.write();
		let existing = state.map.get(coord).copied();
		match existing {
			Some(slot) => {
				state.write_slot(slot, coord, meta)?;
				Ok(slot)
			}
			None => {
				let slot = state.count;
				state.write_slot(slot, coord, meta)?;
				state.count += 1;
				state.map.insert(*coord, slot);
				Ok(slot)
			}
		}
	}

	/// Returns the slot contents at `slot`, failing out of range.
	pub fn entry(&self, slot: u32) -> Result<(TileCoord, TileMeta)> {
		let state = self.state.read();
		if slot >= state.count {
			return Err(Error::invalid(format!(
				"slot {slot} out of range, store has {} slots",
				state.count
			)));
		}
		state.read_slot(slot)
	}

	/// O(1) lookup of the slot index for a coordinate.
	pub fn search(&self, coord: &TileCoord) -> Option<u32> {
		self.state.read().map.get(coord).copied()
	}

	/// Closes the store, dropping the storage handle from internal state.
	/// Closing twice is an error.
	pub fn close(&self) -> Result<()> {
		let mut state = self.state.write();
		if state.storage.is_none() {
			return Err(Error::invalid("store is already closed"));
		}
		state.storage = None;
		state.map.clear();
		state.count = 0;
		Ok(())
	}
}
