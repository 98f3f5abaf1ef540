//! Byte-identical export of the store: header then records, exactly as they
//! sit in the backing storage.

use crate::geodb::{GeoDb, GeoDbState, HEADER_SIZE};
use geotrack_core::io::Storage;
use geotrack_core::{Error, Result, RECORD_SIZE};
use parking_lot::RwLockReadGuard;
use std::io::{Read, Seek, SeekFrom};

/// A single-consumer streaming source over the raw store bytes.
///
/// Holds the store's read lock for its lifetime; dropping it releases the
/// lock. Supports absolute, relative and end-relative seeking.
pub struct BinarySerializer<'a, S: Storage> {
	state: RwLockReadGuard<'a, GeoDbState<S>>,
	position: u64,
	total: u64,
}

impl<S: Storage> GeoDb<S> {
	/// Opens a binary serializer. Fails on a closed store.
	pub fn binary_serializer(&self) -> Result<BinarySerializer<'_, S>> {
		let state = self.state.read();
		if state.is_closed() {
			return Err(Error::invalid("store is closed"));
		}
		let total = HEADER_SIZE + state.count() as u64 * RECORD_SIZE as u64;
		Ok(BinarySerializer {
			state,
			position: 0,
			total,
		})
	}
}

impl<S: Storage> Read for BinarySerializer<'_, S> {
	fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
		let remaining = self.total.saturating_sub(self.position);
		let wanted = (buffer.len() as u64).min(remaining) as usize;
		if wanted == 0 {
			return Ok(0);
		}
		self
			.state
			.read_bytes_at(self.position, &mut buffer[..wanted])
			.map_err(std::io::Error::from)?;
		self.position += wanted as u64;
		Ok(wanted)
	}
}

impl<S: Storage> Seek for BinarySerializer<'_, S> {
	fn seek(&mut self, target: SeekFrom) -> std::io::Result<u64> {
		let position = match target {
			SeekFrom::Start(offset) => offset as i128,
			SeekFrom::Current(delta) => self.position as i128 + delta as i128,
			SeekFrom::End(delta) => self.total as i128 + delta as i128,
		};
		if position < 0 || position > u64::MAX as i128 {
			return Err(std::io::Error::new(
				std::io::ErrorKind::InvalidInput,
				"seek before start of serializer",
			));
		}
		self.position = position as u64;
		Ok(self.position)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::Result;
	use geotrack_core::GeoPoint;
	use std::io::Cursor;

	fn sample_db() -> GeoDb<Cursor<Vec<u8>>> {
		let db = GeoDb::open(Cursor::new(Vec::new())).unwrap();
		db.append(&GeoPoint::new(1, 10, 20).unwrap()).unwrap();
		db.append(&GeoPoint::new(2, 30, 40).unwrap()).unwrap();
		db
	}

	#[test]
	fn output_is_byte_identical_to_storage() -> Result<()> {
		let db = sample_db();
		let mut bytes = Vec::new();
		db.binary_serializer()?.read_to_end(&mut bytes)?;
		assert_eq!(bytes.len(), 10 + 2 * 14);

		let reopened = GeoDb::open(Cursor::new(bytes))?;
		assert_eq!(reopened.count(), 2);
		let mut target = [GeoPoint::new(0, 0, 0)?; 2];
		assert_eq!(reopened.read_locations(0, &mut target).into_result()?, 2);
		assert_eq!(target[0], GeoPoint::new(1, 10, 20)?);
		assert_eq!(target[1], GeoPoint::new(2, 30, 40)?);
		Ok(())
	}

	#[test]
	fn seeking_all_three_modes() -> Result<()> {
		let db = sample_db();
		let mut serializer = db.binary_serializer()?;

		serializer.seek(SeekFrom::End(-14))?;
		let mut tail = Vec::new();
		serializer.read_to_end(&mut tail)?;
		assert_eq!(tail.len(), 14);

		serializer.seek(SeekFrom::Start(10))?;
		serializer.seek(SeekFrom::Current(14))?;
		let mut second = Vec::new();
		serializer.read_to_end(&mut second)?;
		assert_eq!(second, tail);

		assert!(serializer.seek(SeekFrom::Current(-100)).is_err());
		Ok(())
	}

	#[test]
	fn reads_past_end_return_zero() -> Result<()> {
		let db = sample_db();
		let mut serializer = db.binary_serializer()?;
		serializer.seek(SeekFrom::End(10))?;
		let mut buffer = [0u8; 4];
		assert_eq!(serializer.read(&mut buffer)?, 0);
		Ok(())
	}

	#[test]
	fn serializer_blocks_writers_until_dropped() -> Result<()> {
		let db = sample_db();
		let serializer = db.binary_serializer()?;
		// The read lock is held: a try-write on the store must fail.
		assert!(db.state.try_write().is_none());
		drop(serializer);
		assert!(db.state.try_write().is_some());
		Ok(())
	}

	#[test]
	fn closed_store_refuses_serializer() -> Result<()> {
		let db = sample_db();
		db.close()?;
		assert!(db.binary_serializer().is_err());
		Ok(())
	}
}
