//! Record and coordinate types shared by the stores.

mod dataset_stats;
mod geo_point;
mod image_handle;
mod tile_coord;

pub use dataset_stats::*;
pub use geo_point::*;
pub use image_handle::*;
pub use tile_coord::*;
