//! This module defines the [`TileCoord`] structure addressing a map tile in
//! the slippy scheme: a zoom level and an `(x, y)` position within it.

use crate::error::{Error, Result};
use std::fmt::{self, Debug};

/// Highest zoom level a tile coordinate may carry.
pub const MAX_TILE_LEVEL: u8 = 19;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
	pub level: u8,
	pub x: u32,
	pub y: u32,
}

impl TileCoord {
	pub fn new(level: u8, x: u32, y: u32) -> Result<TileCoord> {
		if level > MAX_TILE_LEVEL {
			return Err(Error::invalid(format!(
				"level ({level}) must be <= {MAX_TILE_LEVEL}"
			)));
		}
		let max = 1u32 << level;
		if x >= max || y >= max {
			return Err(Error::invalid(format!(
				"position ({x}, {y}) must be < {max} at level {level}"
			)));
		}
		Ok(TileCoord { level, x, y })
	}

	/// Number of tiles along one axis of this coordinate's level.
	pub fn level_width(level: u8) -> u32 {
		1u32 << level.min(MAX_TILE_LEVEL)
	}

	pub fn is_valid(&self) -> bool {
		if self.level > MAX_TILE_LEVEL {
			return false;
		}
		let max = 1u32 << self.level;
		self.x < max && self.y < max
	}
}

impl Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("TileCoord({}, [{}, {}])", &self.level, &self.x, &self.y))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn new_and_getters() {
		let coord = TileCoord::new(5, 3, 4).unwrap();
		assert_eq!(coord.level, 5);
		assert_eq!(coord.x, 3);
		assert_eq!(coord.y, 4);
		assert!(coord.is_valid());
	}

	#[rstest]
	#[case(20, 0, 0)]
	#[case(3, 8, 0)]
	#[case(3, 0, 8)]
	#[case(0, 1, 0)]
	fn new_rejects_out_of_range(#[case] level: u8, #[case] x: u32, #[case] y: u32) {
		assert!(TileCoord::new(level, x, y).is_err());
	}

	#[test]
	fn boundary_positions_are_valid() {
		assert!(TileCoord::new(19, (1 << 19) - 1, (1 << 19) - 1).is_ok());
		assert!(TileCoord::new(0, 0, 0).is_ok());
	}

	#[test]
	fn equality_and_hash_are_structural() {
		use std::collections::HashSet;
		let mut set = HashSet::new();
		set.insert(TileCoord::new(2, 1, 3).unwrap());
		assert!(set.contains(&TileCoord::new(2, 1, 3).unwrap()));
		assert!(!set.contains(&TileCoord::new(2, 3, 1).unwrap()));
	}

	#[test]
	fn debug_format() {
		let coord = TileCoord::new(7, 11, 13).unwrap();
		assert_eq!(format!("{coord:?}"), "TileCoord(7, [11, 13])");
	}
}
