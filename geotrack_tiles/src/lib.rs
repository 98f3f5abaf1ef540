//! The two-file tile database: an append-only, content-addressed image blob
//! store paired with a fixed-slot index mapping tile coordinates to blob
//! handles, plus the composed operations (fetch, prefetch, compacting
//! cleanup, tarball import/export) that keep the two consistent.

mod archive;
mod blob_store;
mod image_reader;
mod index_store;
mod server;
mod tile_store;

pub use archive::*;
pub use blob_store::*;
pub use image_reader::*;
pub use index_store::*;
pub use server::*;
pub use tile_store::*;
