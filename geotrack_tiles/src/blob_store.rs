//! This module defines [`BlobStore`], the append-only, content-addressed
//! image store.
//!
//! # On-disk format
//!
//! An 8-byte magic (`ImageDB\x04`) followed by records of the form
//! `length (u32 big-endian) ‖ bytes[length]`. The in-memory index maps the
//! SHA-512 handle of each payload to the offset of its length field.
//! Re-inserting an existing handle is a no-op. A trailing partial record is
//! tolerated at open time as long as the prefix is well-formed; appends
//! overwrite it and cleanup removes it for good.

use crate::image_reader::ImageReader;
use geotrack_core::io::Storage;
use geotrack_core::utils::CancelToken;
use geotrack_core::{Error, ImageHandle, Result};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// File magic: `ImageDB\x04`.
pub const BLOB_MAGIC: [u8; 8] = [0x49, 0x6D, 0x61, 0x67, 0x65, 0x44, 0x42, 0x04];

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
pub(crate) struct BlobState<S: Storage> {
	pub(crate) storage: Option<Mutex<S>>,
	/// Handle to the offset of the record's length field.
	index: HashMap<ImageHandle, u64>,
	/// Logical end of the well-formed record sequence. Anything beyond is a
	/// tolerated partial tail that the next insert overwrites.
	end: u64,
}

impl<S: Storage> BlobState<S> {
	pub(crate) fn handle(&self) -> Result<&Mutex<S>> {
		self
			.storage
			.as_ref()
			.ok_or_else(|| Error::invalid("store is closed"))
	}

	/// Reads the length field at `offset` and returns the payload bounds.
	fn record_bounds(storage: &mut S, offset: u64) -> Result<(u64, u64)> {
		let mut length = [0u8; 4];
		storage
			.seek(SeekFrom::Start(offset))
			.and_then(|_| storage.read_exact(&mut length))
			.map_err(|error| Error::io_at(offset, error))?;
		Ok((offset + 4, u32::from_be_bytes(length) as u64))
	}

	/// Hashes `length` payload bytes starting at the current position.
	fn hash_payload(storage: &mut S, offset: u64, length: u64) -> Result<ImageHandle> {
		let mut hasher = Sha512::new();
		let mut remaining = length;
		let mut buffer = vec![0u8; COPY_CHUNK.min(length.max(1) as usize)];
		while remaining > 0 {
			let step = (buffer.len() as u64).min(remaining) as usize;
			storage
				.read_exact(&mut buffer[..step])
				.map_err(|error| Error::io_at(offset + (length - remaining), error))?;
			hasher.update(&buffer[..step]);
			remaining -= step as u64;
		}
		Ok(ImageHandle::from_bytes(hasher.finalize().into()))
	}
}

/// The append-only, content-addressed image store.
#[derive(Debug)]
pub struct BlobStore<S: Storage> {
	pub(crate) state: RwLock<BlobState<S>>,
}

impl BlobStore<File> {
	pub fn open_path(path: &Path) -> Result<BlobStore<File>> {
		let file = File::options().read(true).write(true).create(true).open(path)?;
		BlobStore::open(file)
	}
}

impl<S: Storage> BlobStore<S> {
	/// Opens the store, verifying the magic and walking every record to build
	/// the handle index. Duplicate payloads are indexed once (first wins).
	pub fn open(mut storage: S) -> Result<BlobStore<S>> {
		let size = storage.len()?;
		let mut index = HashMap::new();
		let mut end = 8u64;
		if size == 0 {
			storage.seek(SeekFrom::Start(0))?;
			storage
				.write_all(&BLOB_MAGIC)
				.and_then(|_| storage.flush())
				.map_err(|error| Error::io_at(0, error))?;
		} else {
			if size < 8 {
				return Err(Error::corrupt_at(0, format!("file of {size} bytes is shorter than the magic")));
			}
			let mut magic = [0u8; 8];
			storage.seek(SeekFrom::Start(0))?;
			storage.read_exact(&mut magic).map_err(|error| Error::io_at(0, error))?;
			if magic != BLOB_MAGIC {
				return Err(Error::corrupt_at(0, "magic number mismatch"));
			}
			let mut offset = 8u64;
			while offset + 4 <= size {
				let (payload_offset, length) = BlobState::record_bounds(&mut storage, offset)?;
				if payload_offset + length > size {
					break;
				}
				let handle = BlobState::hash_payload(&mut storage, payload_offset, length)?;
				index.entry(handle).or_insert(offset);
				offset = payload_offset + length;
			}
			end = offset;
			if end < size {
				log::warn!(
					"blob store carries {} bytes of trailing partial record, the next insert overwrites them",
					size - end
				);
			}
		}
		Ok(BlobStore {
			state: RwLock::new(BlobState {
				storage: Some(Mutex::new(storage)),
				index,
				end,
			}),
		})
	}

	/// Number of distinct payloads currently indexed.
	pub fn count(&self) -> usize {
		self.state.read().index.len()
	}

	pub fn contains(&self, handle: &ImageHandle) -> bool {
		self.state.read().index.contains_key(handle)
	}

	/// Inserts a payload, returning its content handle.
	///
	/// Content-addressing makes this idempotent: an already-stored payload is
	/// a no-op. The append is all-or-nothing; on an i/o failure the file is
	/// truncated back to its pre-insert size before the error surfaces.
	pub fn insert(&self, payload: &[u8]) -> Result<ImageHandle> {
		if payload.len() as u64 > u32::MAX as u64 {
			return Err(Error::Overflow(format!("payload of {} bytes exceeds the length field", payload.len())));
		}
		let handle = ImageHandle::of_payload(payload);
		let mut state = self.state.write();
		if state.index.contains_key(&handle) {
			return Ok(handle);
		}
		let offset = state.end;
		{
			let mutex = state.handle()?;
			let mut storage = mutex.lock();
			let written = storage
				.seek(SeekFrom::Start(offset))
				.and_then(|_| storage.write_all(&(payload.len() as u32).to_be_bytes()))
				.and_then(|_| storage.write_all(payload))
				.and_then(|_| storage.flush());
			if let Err(error) = written {
				// Rewind to the pre-insert size so the record sequence stays
				// well-formed; a failing rewind is reported instead.
				storage.truncate(offset).map_err(|truncate_error| {
					Error::io_at(offset, truncate_error)
				})?;
				return Err(Error::io_at(offset, error));
			}
		}
		state.index.insert(handle, offset);
		state.end = offset + 4 + payload.len() as u64;
		Ok(handle)
	}

	/// Opens a bounded reader over one stored payload.
	///
	/// The reader borrows the store's read lock; dropping it releases the
	/// lock. Multiple readers may coexist.
	pub fn open_image(&self, handle: &ImageHandle) -> Result<ImageReader<'_, S>> {
		let state = self.state.read();
		let offset = *state
			.index
			.get(handle)
			.ok_or_else(|| Error::not_found(format!("no image for handle {handle:?}")))?;
		let (payload_offset, length) = {
			let mutex = state.handle()?;
			let mut storage = mutex.lock();
			BlobState::record_bounds(&mut *storage, offset)?
		};
		Ok(ImageReader::new(state, payload_offset, length))
	}

	/// Compacting garbage collection under an externally supplied
	/// reachability predicate.
	///
	/// Walks every record in order, re-hashing payloads; records whose handle
	/// the predicate rejects are dropped, the rest slide down to close the
	/// gaps. Duplicate records of a kept handle are dropped too (the index
	/// can only ever reference the first). The file is truncated to the final
	/// write offset, so no trailing garbage survives. On an i/o failure the
	/// compacted prefix is kept and the error surfaces; rerunning cleanup is
	/// safe.
	pub fn cleanup(&self, keep: impl Fn(&ImageHandle) -> bool, cancel: &CancelToken) -> Result<()> {
		let mut state = self.state.write();
		let mutex = state.handle()?;
		let mut index = HashMap::new();
		let mut read_offset = 8u64;
		let mut write_offset = 8u64;
		let size = state.end;
		let result = (|| -> Result<()> {
			let mut storage = mutex.lock();
			while read_offset + 4 <= size {
				cancel.check()?;
				let (payload_offset, length) = BlobState::record_bounds(&mut *storage, read_offset)?;
				if payload_offset + length > size {
					break;
				}
				let handle = BlobState::hash_payload(&mut *storage, payload_offset, length)?;
				let record = 4 + length;
				if keep(&handle) && !index.contains_key(&handle) {
					if write_offset == read_offset {
						// Position is stable, nothing moved so far.
						index.insert(handle, write_offset);
						write_offset += record;
					} else {
						copy_record(&mut *storage, read_offset, write_offset, record)?;
						index.insert(handle, write_offset);
						write_offset += record;
					}
				}
				read_offset = payload_offset + length;
			}
			storage.truncate(write_offset)?;
			storage.flush()?;
			Ok(())
		})();
		if result.is_err() {
			// Keep the compacted prefix well-formed; records behind the scan
			// point are gone, the caller reruns cleanup after recovery.
			let mut storage = mutex.lock();
			let _ = storage.truncate(write_offset);
		}
		log::debug!(
			"blob cleanup kept {} records, reclaimed {} bytes",
			index.len(),
			size.saturating_sub(write_offset)
		);
		state.index = index;
		state.end = write_offset;
		result
	}

	/// Closes the store, dropping the storage handle from internal state.
	/// Closing twice is an error.
	pub fn close(&self) -> Result<()> {
		let mut state = self.state.write();
		if state.storage.is_none() {
			return Err(Error::invalid("store is already closed"));
		}
		state.storage = None;
		state.index.clear();
		state.end = 8;
		Ok(())
	}
}

/// Moves one whole record downwards within the same storage.
fn copy_record<S: Storage>(storage: &mut S, from: u64, to: u64, length: u64) -> Result<()> {
	debug_assert!(to < from);
	let mut buffer = vec![0u8; COPY_CHUNK.min(length as usize)];
	let mut moved = 0u64;
	while moved < length {
		let step = (buffer.len() as u64).min(length - moved) as usize;
		storage
			.seek(SeekFrom::Start(from + moved))
			.and_then(|_| storage.read_exact(&mut buffer[..step]))
			.map_err(|error| Error::io_at(from + moved, error))?;
		storage
			.seek(SeekFrom::Start(to + moved))
			.and_then(|_| storage.write_all(&buffer[..step]))
			.map_err(|error| Error::io_at(to + moved, error))?;
		moved += step as u64;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::Result;
	use geotrack_core::ErrorKind;
	use std::io::Cursor;

	fn new_store() -> BlobStore<Cursor<Vec<u8>>> {
		BlobStore::open(Cursor::new(Vec::new())).unwrap()
	}

	fn raw_bytes(store: &BlobStore<Cursor<Vec<u8>>>) -> Vec<u8> {
		store.state.read().storage.as_ref().unwrap().lock().get_ref().clone()
	}

	#[test]
	fn open_empty_writes_magic() {
		let store = new_store();
		assert_eq!(raw_bytes(&store), BLOB_MAGIC.to_vec());
		assert_eq!(store.count(), 0);
	}

	#[test]
	fn open_rejects_bad_magic() {
		let error = BlobStore::open(Cursor::new(b"NotTheDB".to_vec())).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::Corruption);
	}

	#[test]
	fn insert_and_read_back() -> Result<()> {
		let store = new_store();
		let handle = store.insert(b"payload")?;
		assert_eq!(handle, ImageHandle::of_payload(b"payload"));

		let mut reader = store.open_image(&handle)?;
		let mut bytes = Vec::new();
		reader.read_to_end(&mut bytes)?;
		assert_eq!(bytes, b"payload");
		Ok(())
	}

	#[test]
	fn insert_is_idempotent() -> Result<()> {
		let store = new_store();
		store.insert(b"payload")?;
		let before = raw_bytes(&store);
		store.insert(b"payload")?;
		assert_eq!(raw_bytes(&store), before);
		assert_eq!(store.count(), 1);
		Ok(())
	}

	#[test]
	fn empty_payload_gets_a_zero_length_record() -> Result<()> {
		let store = new_store();
		let handle = store.insert(b"")?;
		assert_eq!(handle, ImageHandle::of_payload(b""));
		assert_eq!(raw_bytes(&store).len(), 8 + 4);

		let mut reader = store.open_image(&handle)?;
		let mut bytes = Vec::new();
		reader.read_to_end(&mut bytes)?;
		assert!(bytes.is_empty());
		Ok(())
	}

	#[test]
	fn reopen_rebuilds_the_index() -> Result<()> {
		let store = new_store();
		let a = store.insert(b"aaa")?;
		let b = store.insert(b"bb")?;
		let bytes = raw_bytes(&store);

		let reopened = BlobStore::open(Cursor::new(bytes))?;
		assert_eq!(reopened.count(), 2);
		assert!(reopened.contains(&a));
		assert!(reopened.contains(&b));
		Ok(())
	}

	#[test]
	fn open_tolerates_partial_tail() -> Result<()> {
		let store = new_store();
		store.insert(b"whole")?;
		let mut bytes = raw_bytes(&store);
		// A truncated length field of a second record.
		bytes.extend_from_slice(&[0, 0]);

		let reopened = BlobStore::open(Cursor::new(bytes))?;
		assert_eq!(reopened.count(), 1);
		// The next insert overwrites the tail.
		reopened.insert(b"x")?;
		let reread = BlobStore::open(Cursor::new(raw_bytes(&reopened)))?;
		assert_eq!(reread.count(), 2);
		Ok(())
	}

	#[test]
	fn duplicate_records_index_first_occurrence() -> Result<()> {
		let store = new_store();
		store.insert(b"dup")?;
		let mut bytes = raw_bytes(&store);
		let record = bytes[8..].to_vec();
		bytes.extend_from_slice(&record);

		let reopened = BlobStore::open(Cursor::new(bytes))?;
		assert_eq!(reopened.count(), 1);
		Ok(())
	}

	#[test]
	fn cleanup_compacts_and_truncates() -> Result<()> {
		let store = new_store();
		let a = store.insert(b"aa")?;
		let b = store.insert(b"bbbb")?;
		let c = store.insert(b"cccccc")?;
		store.cleanup(|handle| *handle == a || *handle == c, &CancelToken::new())?;

		assert_eq!(store.count(), 2);
		assert!(store.contains(&a));
		assert!(!store.contains(&b));
		assert!(store.contains(&c));
		assert_eq!(raw_bytes(&store).len() as u64, 8 + 4 + 2 + 4 + 6);

		let mut reader = store.open_image(&c)?;
		let mut bytes = Vec::new();
		reader.read_to_end(&mut bytes)?;
		assert_eq!(bytes, b"cccccc");
		Ok(())
	}

	#[test]
	fn cleanup_drop_everything() -> Result<()> {
		let store = new_store();
		store.insert(b"gone")?;
		store.cleanup(|_| false, &CancelToken::new())?;
		assert_eq!(store.count(), 0);
		assert_eq!(raw_bytes(&store), BLOB_MAGIC.to_vec());
		Ok(())
	}

	#[test]
	fn cleanup_removes_duplicate_records() -> Result<()> {
		let store = new_store();
		store.insert(b"dup")?;
		let mut bytes = raw_bytes(&store);
		let record = bytes[8..].to_vec();
		bytes.extend_from_slice(&record);

		let reopened = BlobStore::open(Cursor::new(bytes))?;
		reopened.cleanup(|_| true, &CancelToken::new())?;
		assert_eq!(raw_bytes(&reopened).len() as u64, 8 + 4 + 3);
		Ok(())
	}

	#[test]
	fn cleanup_observes_cancellation() -> Result<()> {
		let store = new_store();
		store.insert(b"payload")?;
		let cancel = CancelToken::new();
		cancel.cancel();
		let error = store.cleanup(|_| true, &cancel).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::Cancelled);
		Ok(())
	}

	#[test]
	fn double_close_is_an_error() -> Result<()> {
		let store = new_store();
		store.close()?;
		let error = store.close().unwrap_err();
		assert_eq!(error.kind(), ErrorKind::InvalidArgument);
		Ok(())
	}

	#[test]
	fn insert_after_close_fails() -> Result<()> {
		let store = new_store();
		store.close()?;
		let error = store.insert(b"payload").unwrap_err();
		assert_eq!(error.kind(), ErrorKind::InvalidArgument);
		Ok(())
	}
}
