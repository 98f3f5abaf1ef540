//! This module defines the [`Storage`] trait, the seam between the stores and
//! their backing bytes. A store owns its storage exclusively for the process
//! lifetime; collaborators hand the handle over at open time and get it back
//! only by closing the store.
//!
//! Implementations exist for [`std::fs::File`] (production) and
//! [`std::io::Cursor<Vec<u8>>`] (in-memory, used by tests and by callers that
//! assemble stores from buffers).

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

/// Seekable, truncatable byte storage.
pub trait Storage: Read + Write + Seek + Send {
	/// Shortens (or zero-extends) the storage to `size` bytes without moving
	/// the current position.
	fn truncate(&mut self, size: u64) -> std::io::Result<()>;

	/// Total size in bytes, determined by seeking to the end and back.
	fn len(&mut self) -> std::io::Result<u64> {
		let position = self.stream_position()?;
		let end = self.seek(SeekFrom::End(0))?;
		self.seek(SeekFrom::Start(position))?;
		Ok(end)
	}

	fn is_empty(&mut self) -> std::io::Result<bool> {
		Ok(self.len()? == 0)
	}
}

impl Storage for File {
	fn truncate(&mut self, size: u64) -> std::io::Result<()> {
		self.set_len(size)
	}
}

impl Storage for Cursor<Vec<u8>> {
	fn truncate(&mut self, size: u64) -> std::io::Result<()> {
		let buffer = self.get_mut();
		if (size as usize) < buffer.len() {
			buffer.truncate(size as usize);
		} else {
			buffer.resize(size as usize, 0);
		}
		Ok(())
	}
}
