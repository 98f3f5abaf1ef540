//! This module defines the [`ImageHandle`] structure, the content-derived
//! identifier of an image blob: the SHA-512 digest of the exact payload.

use crate::error::{Error, Result};
use sha2::{Digest, Sha512};
use std::fmt::{self, Debug, Display};

/// Size of a handle in bytes.
pub const HANDLE_SIZE: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle([u8; HANDLE_SIZE]);

impl ImageHandle {
	/// Computes the handle of a payload. The empty payload has a well-defined
	/// handle (the SHA-512 digest of no bytes).
	pub fn of_payload(payload: &[u8]) -> ImageHandle {
		let digest = Sha512::digest(payload);
		ImageHandle(digest.into())
	}

	pub fn from_bytes(bytes: [u8; HANDLE_SIZE]) -> ImageHandle {
		ImageHandle(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; HANDLE_SIZE] {
		&self.0
	}

	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}
}

impl TryFrom<&[u8]> for ImageHandle {
	type Error = Error;

	fn try_from(bytes: &[u8]) -> Result<ImageHandle> {
		let array: [u8; HANDLE_SIZE] = bytes
			.try_into()
			.map_err(|_| Error::invalid(format!("handle must be {HANDLE_SIZE} bytes, got {}", bytes.len())))?;
		Ok(ImageHandle(array))
	}
}

impl Display for ImageHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl Debug for ImageHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("ImageHandle({}…)", &self.to_hex()[0..16]))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn of_payload_is_sha512() {
		// SHA-512 of the empty input, a fixed public value.
		let handle = ImageHandle::of_payload(b"");
		assert_eq!(
			handle.to_hex(),
			"cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce\
			47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e"
		);
	}

	#[test]
	fn equality_is_byte_equal() {
		let a = ImageHandle::of_payload(b"tile");
		let b = ImageHandle::of_payload(b"tile");
		let c = ImageHandle::of_payload(b"other");
		assert_eq!(a, b);
		assert_ne!(a, c);
	}

	#[test]
	fn try_from_checks_length() {
		assert!(ImageHandle::try_from(&[0u8; 64][..]).is_ok());
		assert!(ImageHandle::try_from(&[0u8; 63][..]).is_err());
		assert!(ImageHandle::try_from(&[0u8; 65][..]).is_err());
	}

	#[test]
	fn debug_is_abbreviated() {
		let handle = ImageHandle::from_bytes([0xAB; 64]);
		assert_eq!(format!("{handle:?}"), "ImageHandle(abababababababab…)");
		assert_eq!(handle.to_string().len(), 128);
	}
}
