//! This module defines [`TileStore`], the pairing of one [`BlobStore`] and
//! one [`IndexStore`] plus the composed operations that keep them consistent:
//! cache-or-fetch, bulk prefetching and cross-store cleanup.
//!
//! A coarse mutex serializes the composite mutations; component locks are
//! always taken blob first, then index. The tile server is never called with
//! a store lock held.

use crate::blob_store::BlobStore;
use crate::image_reader::ImageReader;
use crate::index_store::{IndexStore, TileMeta};
use crate::server::TileServer;
use geotrack_core::io::Storage;
use geotrack_core::utils::{now_ms, CancelToken};
use geotrack_core::{Error, ErrorKind, ImageHandle, Result, TileCoord, MAX_TILE_LEVEL};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

/// The two-file tile database.
pub struct TileStore<S: Storage> {
	blob: BlobStore<S>,
	index: IndexStore<S>,
	/// Serializes composite operations (fetch install, cleanup, archive
	/// import/export) against each other.
	composite: Mutex<()>,
}

impl TileStore<File> {
	/// Opens (or creates) both backing files under one directory.
	pub fn open_paths(blob_path: &Path, index_path: &Path) -> Result<TileStore<File>> {
		Ok(TileStore::new(
			BlobStore::open_path(blob_path)?,
			IndexStore::open_path(index_path)?,
		))
	}
}

impl<S: Storage> TileStore<S> {
	pub fn new(blob: BlobStore<S>, index: IndexStore<S>) -> TileStore<S> {
		TileStore {
			blob,
			index,
			composite: Mutex::new(()),
		}
	}

	pub fn open(blob_storage: S, index_storage: S) -> Result<TileStore<S>> {
		Ok(TileStore::new(
			BlobStore::open(blob_storage)?,
			IndexStore::open(index_storage)?,
		))
	}

	pub(crate) fn composite_lock(&self) -> parking_lot::MutexGuard<'_, ()> {
		self.composite.lock()
	}

	pub fn blob(&self) -> &BlobStore<S> {
		&self.blob
	}

	pub fn index(&self) -> &IndexStore<S> {
		&self.index
	}

	/// Serves a tile from the cache, failing with `NotFound` on a miss.
	pub fn cached(&self, coord: &TileCoord) -> Result<ImageReader<'_, S>> {
		let slot = self
			.index
			.search(coord)
			.ok_or_else(|| Error::not_found(format!("no cached tile for {coord:?}")))?;
		let (_, meta) = self.index.entry(slot)?;
		self.blob.open_image(&meta.handle)
	}

	/// Serves a tile from the cache, downloading and installing it on a miss.
	///
	/// On a miss the cache is retried under the composite lock before the
	/// server is asked, so concurrent fetches of the same tile download it
	/// once. The component store locks are only taken to install the result;
	/// the server call itself holds none of them.
	pub fn fetch(&self, server: &dyn TileServer, coord: &TileCoord) -> Result<ImageReader<'_, S>> {
		match self.cached(coord) {
			Ok(reader) => return Ok(reader),
			Err(error) if error.kind() == ErrorKind::NotFound => {}
			Err(error) => return Err(error),
		}
		{
			let _guard = self.composite.lock();
			if self.index.search(coord).is_none() {
				let payload = server.get(coord)?;
				let handle = self.blob.insert(&payload)?;
				self.index.insert(
					coord,
					&TileMeta {
						timestamp_ms: now_ms() as i64,
						handle,
					},
				)?;
			}
		}
		self.cached(coord)
	}

	/// Fetches every tile of every level up to `max_zoom` through a bounded
	/// worker pool. The first failure stops the run; cancellation is observed
	/// once per tile.
	pub fn prefetch(&self, server: &dyn TileServer, max_zoom: u8, cancel: &CancelToken) -> Result<()> {
		let worker_count = num_cpus::get().clamp(1, 8);
		let (sender, receiver) = crossbeam_channel::bounded::<TileCoord>(worker_count * 2);
		let failure: Mutex<Option<Error>> = Mutex::new(None);

		std::thread::scope(|scope| {
			for _ in 0..worker_count {
				let receiver = receiver.clone();
				let failure = &failure;
				scope.spawn(move || {
					for coord in receiver.iter() {
						if cancel.is_cancelled() || failure.lock().is_some() {
							// Keep draining so the producer never blocks.
							continue;
						}
						if let Err(error) = self.fetch(server, &coord) {
							let mut slot = failure.lock();
							if slot.is_none() {
								*slot = Some(error);
							}
						}
					}
				});
			}
			drop(receiver);

			'levels: for level in 0..=max_zoom.min(MAX_TILE_LEVEL) {
				let width = 1u32 << level;
				for y in 0..width {
					for x in 0..width {
						if cancel.is_cancelled() || failure.lock().is_some() {
							break 'levels;
						}
						let Ok(coord) = TileCoord::new(level, x, y) else {
							break 'levels;
						};
						if sender.send(coord).is_err() {
							break 'levels;
						}
					}
				}
			}
			drop(sender);
		});

		cancel.check()?;
		match failure.into_inner() {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	/// Drops every blob no index slot references, restoring the cross-store
	/// invariant after external modification.
	pub fn cleanup(&self, cancel: &CancelToken) -> Result<()> {
		let _guard = self.composite.lock();
		let mut referenced = HashSet::new();
		for slot in 0..self.index.len() {
			cancel.check()?;
			let (_, meta) = self.index.entry(slot)?;
			referenced.insert(meta.handle);
		}
		self
			.blob
			.cleanup(|handle: &ImageHandle| referenced.contains(handle), cancel)
	}
}
