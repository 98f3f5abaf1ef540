//! SHA-512 chaining used by the password store and the wire protocol.
//!
//! The stored credential is `SHA512(salt ‖ SHA512(password))`; a login
//! response is `SHA512(nonce ‖ stored_credential)`, which the client derives
//! as `SHA512(nonce ‖ SHA512(salt ‖ SHA512(password)))`.

use sha2::{Digest, Sha512};

/// Size of every digest, salt, nonce and session token in the protocol.
pub const DIGEST_SIZE: usize = 64;

/// SHA-512 over the concatenation of all parts.
pub fn sha512_concat(parts: &[&[u8]]) -> [u8; DIGEST_SIZE] {
	let mut hasher = Sha512::new();
	for part in parts {
		hasher.update(part);
	}
	hasher.finalize().into()
}

/// The credential stored for a password: `SHA512(salt ‖ SHA512(password))`.
pub fn password_credential(salt: &[u8], password: &str) -> [u8; DIGEST_SIZE] {
	let inner = sha512_concat(&[password.as_bytes()]);
	sha512_concat(&[salt, &inner])
}

/// The login response expected for a nonce: `SHA512(nonce ‖ credential)`.
pub fn login_response(nonce: &[u8], credential: &[u8]) -> [u8; DIGEST_SIZE] {
	sha512_concat(&[nonce, credential])
}
