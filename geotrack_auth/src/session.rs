//! This module defines [`SessionManager`], the short-lived token table bound
//! to a [`UserStore`], together with the challenge-response protocol that
//! mints tokens.
//!
//! Authentication failures are deliberately opaque: whether the user was
//! unknown, had no password, or presented a wrong response is never
//! disclosed. Token lookup touches every live session with constant-time
//! comparison so timing reveals nothing about which token matched.

use crate::csprng::Csprng;
use crate::hashing::{login_response, DIGEST_SIZE};
use crate::user_store::{UserStore, HASH_SIZE, NONCE_SIZE, SALT_SIZE};
use geotrack_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use sha2::Sha512;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

/// Size of a session token in bytes.
pub const TOKEN_SIZE: usize = DIGEST_SIZE;

/// What the server hands a client that wants to log in.
#[derive(Debug, Clone, Copy)]
pub struct Challenge {
	pub nonce: [u8; NONCE_SIZE],
	pub salt: [u8; SALT_SIZE],
}

struct Session {
	token: [u8; TOKEN_SIZE],
	user: String,
	/// Guarded separately so parallel lookups can refresh it under the outer
	/// read lock.
	last_access: Mutex<Instant>,
}

/// The session table: tokens live only in memory and expire on overdue
/// access, checked per access rather than by a background sweeper.
pub struct SessionManager {
	sessions: RwLock<Vec<Session>>,
	expiry: Duration,
	users: Arc<UserStore>,
	rng: Csprng,
}

impl SessionManager {
	pub fn new(users: Arc<UserStore>, expiry: Duration) -> Result<SessionManager> {
		Ok(SessionManager::with_rng(users, expiry, Csprng::from_system()?))
	}

	pub fn with_rng(users: Arc<UserStore>, expiry: Duration, rng: Csprng) -> SessionManager {
		SessionManager {
			sessions: RwLock::new(Vec::new()),
			expiry,
			users,
			rng,
		}
	}

	/// Starts a login: hands out the user's current nonce and salt.
	pub fn challenge(&self, name: &str) -> Result<Challenge> {
		Ok(Challenge {
			nonce: self.users.nonce(name)?,
			salt: self.users.salt(name)?,
		})
	}

	/// Mints a session for an authenticated user and burns the nonce.
	fn create_session(&self, name: &str) -> Result<[u8; TOKEN_SIZE]> {
		let token: [u8; TOKEN_SIZE] = self.rng.fill_array()?;
		self.sessions.write().push(Session {
			token,
			user: name.to_string(),
			last_access: Mutex::new(Instant::now()),
		});
		self.users.regenerate_nonce(name)?;
		Ok(token)
	}

	/// Finishes a password login. The expected response is
	/// `SHA512(nonce ‖ stored_credential)`, compared in constant time.
	pub fn respond_with_password_hash(&self, name: &str, response: &[u8]) -> Result<[u8; TOKEN_SIZE]> {
		let (nonce, credential) = match (self.users.nonce(name), self.users.hash(name)) {
			(Ok(nonce), Ok(credential)) => (nonce, credential),
			_ => return Err(Error::AuthFailed),
		};
		if credential.len() != HASH_SIZE || response.len() != DIGEST_SIZE {
			return Err(Error::AuthFailed);
		}
		let expected = login_response(&nonce, &credential);
		if bool::from(expected[..].ct_eq(response)) {
			self.create_session(name)
		} else {
			Err(Error::AuthFailed)
		}
	}

	/// Finishes a signature login: the response is an RSA-PSS (SHA-512)
	/// signature over the raw nonce, valid under any of the user's
	/// registered public keys.
	pub fn respond_with_signature(&self, name: &str, signature: &[u8]) -> Result<[u8; TOKEN_SIZE]> {
		let nonce = self.users.nonce(name).map_err(|_| Error::AuthFailed)?;
		let keys = self.users.public_keys(name).map_err(|_| Error::AuthFailed)?;
		let signature = Signature::try_from(signature).map_err(|_| Error::AuthFailed)?;
		for key in keys {
			let verifier = VerifyingKey::<Sha512>::new(key);
			if verifier.verify(&nonce, &signature).is_ok() {
				return self.create_session(name);
			}
		}
		Err(Error::AuthFailed)
	}

	/// Locates the session in constant time across all live sessions.
	fn locate(sessions: &[Session], token: &[u8; TOKEN_SIZE]) -> Option<usize> {
		let mut found = Choice::from(0u8);
		let mut position = 0u64;
		for (index, session) in sessions.iter().enumerate() {
			let matches = session.token.ct_eq(token);
			position = u64::conditional_select(&position, &(index as u64), matches);
			found |= matches;
		}
		if bool::from(found) {
			Some(position as usize)
		} else {
			None
		}
	}

	/// Resolves a token to its user name, refreshing the session.
	///
	/// An access at or past the expiry boundary drops the session and fails
	/// exactly like an unknown token.
	pub fn user_name(&self, token: &[u8; TOKEN_SIZE]) -> Result<String> {
		let now = Instant::now();
		{
			let sessions = self.sessions.read();
			let Some(position) = Self::locate(&sessions, token) else {
				return Err(Error::not_found("no such session"));
			};
			let session = &sessions[position];
			let mut last_access = session.last_access.lock();
			if now.duration_since(*last_access) < self.expiry {
				*last_access = now;
				return Ok(session.user.clone());
			}
		}
		// Expired: drop it under the write lock, then report it missing.
		let mut sessions = self.sessions.write();
		sessions.retain(|session| !bool::from(session.token.ct_eq(token)));
		Err(Error::not_found("no such session"))
	}

	/// Ends a session. Terminating an unknown token is an error.
	pub fn terminate(&self, token: &[u8; TOKEN_SIZE]) -> Result<()> {
		let mut sessions = self.sessions.write();
		let Some(position) = Self::locate(&sessions, token) else {
			return Err(Error::not_found("no such session"));
		};
		sessions.remove(position);
		Ok(())
	}

	/// Number of live sessions, expired ones included until their next
	/// access.
	pub fn session_count(&self) -> usize {
		self.sessions.read().len()
	}
}
