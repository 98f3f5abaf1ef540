//! The tile-server collaborator seam.
//!
//! Downloading (and rendering, rate limiting, retrying) lives outside the
//! stores; the composed operations only need a way to ask for the bytes of
//! one tile.

use geotrack_core::{Result, TileCoord};

/// Anything that can produce the image bytes of a tile.
pub trait TileServer: Sync {
	fn get(&self, coord: &TileCoord) -> Result<Vec<u8>>;
}

/// A closure-backed server, handy for tests and for adapting exotic sources.
pub struct FnTileServer<F: Fn(&TileCoord) -> Result<Vec<u8>> + Sync>(pub F);

impl<F: Fn(&TileCoord) -> Result<Vec<u8>> + Sync> TileServer for FnTileServer<F> {
	fn get(&self, coord: &TileCoord) -> Result<Vec<u8>> {
		(self.0)(coord)
	}
}
