//! The process-global OS entropy source.
//!
//! This is the only piece of process-wide state in the whole system. It
//! seeds fresh [`Csprng`](crate::Csprng) instances and provides one-shot
//! entropy for salts. It must never be replaced by a deterministic generator
//! in release builds; deterministic generators exist only as locally seeded
//! instances in tests.

use geotrack_core::{Error, Result};

/// Fills the target with entropy from the operating system.
pub fn fill_entropy(target: &mut [u8]) -> Result<()> {
	getrandom::getrandom(target).map_err(|error| Error::Io {
		offset: None,
		source: std::io::Error::new(std::io::ErrorKind::Other, format!("os entropy unavailable: {error}")),
	})
}
