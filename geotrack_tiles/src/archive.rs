//! Gzipped-TAR import and export of a whole tile store.
//!
//! The archive layout is a `tile/` directory entry followed by one file per
//! index slot, named `tile/osm-<z>-<x>-<y>.png`, with the slot's timestamp as
//! modification time (whole seconds; the tar mtime field carries no
//! milliseconds). Import streams any gzipped TAR and silently skips entries
//! outside the `tile/` prefix, entries over the size cap, and names that do
//! not match the pattern.

use crate::index_store::TileMeta;
use crate::tile_store::TileStore;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use geotrack_core::io::Storage;
use geotrack_core::utils::CancelToken;
use geotrack_core::{Result, TileCoord};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::{Read, Write};
use tar::{Archive, Builder, EntryType, Header};

/// Largest tile payload an archive entry may carry.
pub const MAX_TILE_BYTES: u64 = 1 << 20;

lazy_static! {
	static ref TILE_ENTRY: Regex = Regex::new(r"^tile/osm-([0-9]{1,2})-([0-9]{1,9})-([0-9]{1,9})\.png$").unwrap();
}

/// Parses an archive entry name into a tile coordinate, if it is one.
fn parse_entry_name(name: &str) -> Option<TileCoord> {
	let name = name.strip_prefix("./").unwrap_or(name);
	let captures = TILE_ENTRY.captures(name)?;
	let level: u8 = captures[1].parse().ok()?;
	let x: u32 = captures[2].parse().ok()?;
	let y: u32 = captures[3].parse().ok()?;
	TileCoord::new(level, x, y).ok()
}

impl<S: Storage> TileStore<S> {
	/// Imports tiles from a gzipped TAR stream.
	///
	/// Returns the number of tiles taken over. Entry modification times
	/// become tile timestamps.
	pub fn import_archive(&self, reader: impl Read, cancel: &CancelToken) -> Result<u32> {
		let _guard = self.composite_lock();
		let mut archive = Archive::new(GzDecoder::new(reader));
		let mut imported = 0u32;
		for entry in archive.entries()? {
			cancel.check()?;
			let mut entry = entry?;
			if entry.header().entry_type() != EntryType::Regular {
				continue;
			}
			let name = entry.path()?.to_string_lossy().into_owned();
			let Some(coord) = parse_entry_name(&name) else {
				log::debug!("skipping archive entry {name:?}: not a tile");
				continue;
			};
			if entry.size() > MAX_TILE_BYTES {
				log::debug!("skipping archive entry {name:?}: {} bytes exceed the cap", entry.size());
				continue;
			}
			let timestamp_ms = entry.header().mtime().unwrap_or(0).saturating_mul(1_000) as i64;
			let mut payload = Vec::with_capacity(entry.size() as usize);
			entry.read_to_end(&mut payload)?;

			let handle = self.blob().insert(&payload)?;
			self.index().insert(&coord, &TileMeta { timestamp_ms, handle })?;
			imported += 1;
		}
		log::debug!("archive import installed {imported} tiles");
		Ok(imported)
	}

	/// Exports every indexed tile as a gzipped TAR stream.
	///
	/// `creation_time_ms` stamps the `tile/` directory entry; each file
	/// carries its slot's timestamp.
	pub fn export_archive(&self, writer: impl Write, creation_time_ms: i64, cancel: &CancelToken) -> Result<()> {
		let _guard = self.composite_lock();
		let mut builder = Builder::new(GzEncoder::new(writer, Compression::default()));

		let mut header = Header::new_gnu();
		header.set_entry_type(EntryType::Directory);
		header.set_size(0);
		header.set_mode(0o755);
		header.set_mtime((creation_time_ms / 1_000).max(0) as u64);
		builder.append_data(&mut header, "tile/", std::io::empty())?;

		for slot in 0..self.index().len() {
			cancel.check()?;
			let (coord, meta) = self.index().entry(slot)?;
			let mut payload = Vec::new();
			{
				let mut reader = self.blob().open_image(&meta.handle)?;
				reader.read_to_end(&mut payload)?;
			}
			let name = format!("tile/osm-{}-{}-{}.png", coord.level, coord.x, coord.y);
			let mut header = Header::new_gnu();
			header.set_entry_type(EntryType::Regular);
			header.set_size(payload.len() as u64);
			header.set_mode(0o644);
			header.set_mtime((meta.timestamp_ms / 1_000).max(0) as u64);
			builder.append_data(&mut header, name, payload.as_slice())?;
		}

		let _writer = builder.into_inner()?.finish()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::server::FnTileServer;
	use anyhow::Result;
	use std::io::Cursor;

	fn new_store() -> TileStore<Cursor<Vec<u8>>> {
		TileStore::open(Cursor::new(Vec::new()), Cursor::new(Vec::new())).unwrap()
	}

	fn filled_store(coords: &[(u8, u32, u32)]) -> TileStore<Cursor<Vec<u8>>> {
		let store = new_store();
		let server = FnTileServer(|coord: &TileCoord| Ok(format!("tile-{:?}", coord).into_bytes()));
		for &(level, x, y) in coords {
			store
				.fetch(&server, &TileCoord::new(level, x, y).unwrap())
				.unwrap();
		}
		store
	}

	#[test]
	fn entry_names_parse_strictly() {
		assert_eq!(parse_entry_name("tile/osm-3-4-5.png"), Some(TileCoord::new(3, 4, 5).unwrap()));
		assert_eq!(parse_entry_name("./tile/osm-3-4-5.png"), Some(TileCoord::new(3, 4, 5).unwrap()));
		assert_eq!(parse_entry_name("tile/osm-20-0-0.png"), None, "zoom past the limit");
		assert_eq!(parse_entry_name("tile/osm-1-5-0.png"), None, "x out of range at level 1");
		assert_eq!(parse_entry_name("other/osm-1-0-0.png"), None);
		assert_eq!(parse_entry_name("tile/osm-1-0-0.jpg"), None);
		assert_eq!(parse_entry_name("tile/osm-1-0.png"), None);
	}

	#[test]
	fn export_then_import_reproduces_the_index() -> Result<()> {
		let store = filled_store(&[(0, 0, 0), (2, 1, 3), (5, 30, 31)]);
		let mut archive = Vec::new();
		store.export_archive(&mut archive, 1_700_000_000_000, &CancelToken::new())?;

		let fresh = new_store();
		let imported = fresh.import_archive(Cursor::new(archive), &CancelToken::new())?;
		assert_eq!(imported, 3);
		assert_eq!(fresh.index().len(), 3);
		for slot in 0..store.index().len() {
			let (coord, meta) = store.index().entry(slot)?;
			let imported_slot = fresh.index().search(&coord).expect("coordinate survives");
			let (_, imported_meta) = fresh.index().entry(imported_slot)?;
			assert_eq!(imported_meta.handle, meta.handle);
			// Seconds precision survives the tar mtime field.
			assert_eq!(imported_meta.timestamp_ms / 1_000, meta.timestamp_ms / 1_000);
		}
		Ok(())
	}

	#[test]
	fn import_skips_foreign_and_oversized_entries() -> Result<()> {
		let mut archive = Vec::new();
		{
			let mut builder = Builder::new(GzEncoder::new(&mut archive, Compression::default()));
			let mut append = |name: &str, payload: &[u8]| {
				let mut header = Header::new_gnu();
				header.set_entry_type(EntryType::Regular);
				header.set_size(payload.len() as u64);
				header.set_mode(0o644);
				header.set_mtime(42);
				builder.append_data(&mut header, name, payload).unwrap();
			};
			append("tile/osm-1-0-0.png", b"good");
			append("tile/readme.txt", b"not a tile");
			append("elsewhere/osm-1-0-1.png", b"wrong prefix");
			append("tile/osm-1-0-1.png", &vec![0u8; (MAX_TILE_BYTES + 1) as usize]);
			builder.into_inner()?.finish()?;
		}

		let store = new_store();
		let imported = store.import_archive(Cursor::new(archive), &CancelToken::new())?;
		assert_eq!(imported, 1);
		assert_eq!(store.index().len(), 1);
		let slot = store.index().search(&TileCoord::new(1, 0, 0)?).unwrap();
		assert_eq!(store.index().entry(slot)?.1.timestamp_ms, 42_000);
		Ok(())
	}

	#[test]
	fn export_writes_the_directory_entry_first() -> Result<()> {
		let store = filled_store(&[(1, 1, 1)]);
		let mut archive = Vec::new();
		store.export_archive(&mut archive, 0, &CancelToken::new())?;

		let mut reader = Archive::new(GzDecoder::new(Cursor::new(archive)));
		let mut entries = reader.entries()?;
		let first = entries.next().unwrap()?;
		assert_eq!(first.header().entry_type(), EntryType::Directory);
		assert_eq!(first.path()?.to_string_lossy(), "tile/");
		let second = entries.next().unwrap()?;
		assert_eq!(second.path()?.to_string_lossy(), "tile/osm-1-1-1.png");
		assert!(entries.next().is_none());
		Ok(())
	}

	#[test]
	fn import_observes_cancellation() -> Result<()> {
		let store = filled_store(&[(1, 0, 0)]);
		let mut archive = Vec::new();
		store.export_archive(&mut archive, 0, &CancelToken::new())?;

		let fresh = new_store();
		let cancel = CancelToken::new();
		cancel.cancel();
		let error = fresh
			.import_archive(Cursor::new(archive), &cancel)
			.unwrap_err();
		assert_eq!(error.kind(), geotrack_core::ErrorKind::Cancelled);
		Ok(())
	}

	#[test]
	fn empty_store_exports_just_the_directory() -> Result<()> {
		let store = new_store();
		let mut archive = Vec::new();
		store.export_archive(&mut archive, 0, &CancelToken::new())?;

		let mut reader = Archive::new(GzDecoder::new(Cursor::new(archive)));
		assert_eq!(reader.entries()?.count(), 1);
		Ok(())
	}
}
