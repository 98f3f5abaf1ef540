//! Shared primitives for the geotrack stores: record and coordinate types,
//! the error taxonomy, the storage seam, and small utilities (cancellation,
//! RFC 3339 timestamp rendering).

pub mod error;
pub use error::*;
pub mod io;
pub mod types;
pub use types::*;
pub mod utils;
