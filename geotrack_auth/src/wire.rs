//! Wire form of the challenge-response exchange.
//!
//! Three request/response pairs carry base64 of the raw 64-byte values; the
//! transport (HTTP, RPC) is a collaborator and lives elsewhere. The pairs:
//!
//! 1. name → `{salt, nonce}`
//! 2. name + response hash → session token
//! 3. session token → success
//!
//! The client side computes `SHA512(nonce ‖ SHA512(salt ‖ SHA512(password)))`
//! from the decoded challenge; [`encode_login_response`] does exactly that.

use crate::hashing::{login_response, password_credential};
use crate::session::{SessionManager, TOKEN_SIZE};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use geotrack_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Base64 form of the first response: the user's salt and login nonce.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireChallenge {
	pub salt: String,
	pub nonce: String,
}

/// Base64 form of the second response: the minted session token.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireToken {
	pub token: String,
}

fn decode_fixed<const N: usize>(text: &str, what: &str) -> Result<[u8; N]> {
	let bytes = BASE64
		.decode(text)
		.map_err(|error| Error::invalid(format!("bad base64 in {what}: {error}")))?;
	bytes
		.try_into()
		.map_err(|bytes: Vec<u8>| Error::invalid(format!("{what} must be {N} bytes, got {}", bytes.len())))
}

/// Client-side helper: derives the base64 response hash from a decoded
/// challenge and the password.
pub fn encode_login_response(challenge: &WireChallenge, password: &str) -> Result<String> {
	let salt: [u8; 64] = decode_fixed(&challenge.salt, "salt")?;
	let nonce: [u8; 64] = decode_fixed(&challenge.nonce, "nonce")?;
	let credential = password_credential(&salt, password);
	Ok(BASE64.encode(login_response(&nonce, &credential)))
}

impl SessionManager {
	/// Pair 1: name in, base64 salt and nonce out.
	pub fn challenge_wire(&self, name: &str) -> Result<WireChallenge> {
		let challenge = self.challenge(name)?;
		Ok(WireChallenge {
			salt: BASE64.encode(challenge.salt),
			nonce: BASE64.encode(challenge.nonce),
		})
	}

	/// Pair 2: name and base64 response hash in, base64 session token out.
	pub fn respond_wire(&self, name: &str, response: &str) -> Result<WireToken> {
		let response: [u8; 64] = decode_fixed(response, "response").map_err(|_| Error::AuthFailed)?;
		let token = self.respond_with_password_hash(name, &response)?;
		Ok(WireToken {
			token: BASE64.encode(token),
		})
	}

	/// Pair 3: base64 session token in, the session's user name out.
	pub fn user_name_wire(&self, token: &str) -> Result<String> {
		let token: [u8; TOKEN_SIZE] = decode_fixed(token, "token")?;
		self.user_name(&token)
	}

	/// Ends the session named by a base64 token.
	pub fn terminate_wire(&self, token: &str) -> Result<()> {
		let token: [u8; TOKEN_SIZE] = decode_fixed(token, "token")?;
		self.terminate(&token)
	}
}
