//! The storage seam shared by every store.

mod storage;

pub use storage::*;
