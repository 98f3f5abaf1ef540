//! Bounded read access to one stored image payload.

use crate::blob_store::BlobState;
use geotrack_core::io::Storage;
use parking_lot::RwLockReadGuard;
use std::io::{Read, Seek, SeekFrom};

/// A reader over the byte range of a single blob payload.
///
/// Holds a read lock on its [`BlobStore`](crate::BlobStore) for its whole
/// lifetime, so cleanup cannot move the payload underneath it. Dropping the
/// reader releases the lock; multiple readers may coexist.
#[derive(Debug)]
pub struct ImageReader<'a, S: Storage> {
	state: RwLockReadGuard<'a, BlobState<S>>,
	/// Absolute offset of the first payload byte.
	offset: u64,
	length: u64,
	position: u64,
}

impl<'a, S: Storage> ImageReader<'a, S> {
	pub(crate) fn new(state: RwLockReadGuard<'a, BlobState<S>>, offset: u64, length: u64) -> ImageReader<'a, S> {
		ImageReader {
			state,
			offset,
			length,
			position: 0,
		}
	}

	/// Payload length in bytes.
	pub fn len(&self) -> u64 {
		self.length
	}

	pub fn is_empty(&self) -> bool {
		self.length == 0
	}

	/// Reads at an absolute payload position without moving the cursor.
	pub fn read_at(&self, target: &mut [u8], position: u64) -> std::io::Result<usize> {
		let remaining = self.length.saturating_sub(position);
		let wanted = (target.len() as u64).min(remaining) as usize;
		if wanted == 0 {
			return Ok(0);
		}
		let mutex = self.state.handle().map_err(std::io::Error::from)?;
		let mut storage = mutex.lock();
		storage.seek(SeekFrom::Start(self.offset + position))?;
		storage.read_exact(&mut target[..wanted])?;
		Ok(wanted)
	}
}

impl<S: Storage> Read for ImageReader<'_, S> {
	fn read(&mut self, target: &mut [u8]) -> std::io::Result<usize> {
		let read = self.read_at(target, self.position)?;
		self.position += read as u64;
		Ok(read)
	}
}

impl<S: Storage> Seek for ImageReader<'_, S> {
	fn seek(&mut self, target: SeekFrom) -> std::io::Result<u64> {
		let position = match target {
			SeekFrom::Start(offset) => offset as i128,
			SeekFrom::Current(delta) => self.position as i128 + delta as i128,
			SeekFrom::End(delta) => self.length as i128 + delta as i128,
		};
		if position < 0 || position > u64::MAX as i128 {
			return Err(std::io::Error::new(
				std::io::ErrorKind::InvalidInput,
				"seek before start of image",
			));
		}
		self.position = position as u64;
		Ok(self.position)
	}
}
