//! This module defines [`UserStore`], the authoritative in-memory table of
//! users: salted password credentials, login nonces, permissions, device
//! tokens and runtime-registered RSA public keys.
//!
//! The store never touches disk itself; a caller serializes it with
//! [`UserStore::export`] and decides where the document lives. Every
//! operation either succeeds or leaves the table unchanged.

use crate::csprng::Csprng;
use crate::hashing::{password_credential, DIGEST_SIZE};
use chrono::{DateTime, Utc};
use geotrack_core::{Error, Result};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use rsa::RsaPublicKey;
use std::collections::BTreeMap;

/// Salt, credential and nonce all share the digest width.
pub const SALT_SIZE: usize = DIGEST_SIZE;
pub const NONCE_SIZE: usize = DIGEST_SIZE;
pub const HASH_SIZE: usize = DIGEST_SIZE;

pub const MIN_NAME_LENGTH: usize = 3;
pub const MAX_NAME_LENGTH: usize = 16;

lazy_static! {
	static ref USER_NAME: Regex = Regex::new(r"^[A-Za-z0-9._\-]+$").unwrap();
}

/// A static 64-bit shared secret for low-capability submission paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceToken {
	pub token: u64,
	pub created_at: DateTime<Utc>,
	pub description: String,
}

pub(crate) struct User {
	pub(crate) salt: [u8; SALT_SIZE],
	/// Empty means "no password set, authentication impossible".
	pub(crate) hash: Vec<u8>,
	pub(crate) nonce: [u8; NONCE_SIZE],
	pub(crate) permissions: Vec<String>,
	pub(crate) device_tokens: Vec<DeviceToken>,
	pub(crate) public_keys: Vec<RsaPublicKey>,
}

/// Checks the user-name grammar: 3 to 16 characters out of
/// `[A-Za-z0-9._-]`.
pub fn validate_user_name(name: &str) -> Result<()> {
	if name.len() < MIN_NAME_LENGTH || name.len() > MAX_NAME_LENGTH {
		return Err(Error::invalid(format!(
			"user name must be {MIN_NAME_LENGTH} to {MAX_NAME_LENGTH} characters, got {}",
			name.len()
		)));
	}
	if !USER_NAME.is_match(name) {
		return Err(Error::invalid(format!("user name {name:?} carries forbidden characters")));
	}
	Ok(())
}

/// The authoritative list of users behind one readers-writer lock.
///
/// Accessors hand out copies of permission and token lists so callers never
/// alias internal state.
pub struct UserStore {
	pub(crate) users: RwLock<BTreeMap<String, User>>,
	pub(crate) rng: Csprng,
}

impl UserStore {
	/// An empty store drawing randomness from the OS-seeded CSPRNG.
	pub fn new() -> Result<UserStore> {
		Ok(UserStore::with_rng(Csprng::from_system()?))
	}

	/// An empty store over a caller-provided generator (deterministic in
	/// tests).
	pub fn with_rng(rng: Csprng) -> UserStore {
		UserStore {
			users: RwLock::new(BTreeMap::new()),
			rng,
		}
	}

	fn fresh_user(&self) -> Result<User> {
		Ok(User {
			salt: self.rng.fill_array()?,
			hash: Vec::new(),
			nonce: self.rng.fill_array()?,
			permissions: Vec::new(),
			device_tokens: Vec::new(),
			public_keys: Vec::new(),
		})
	}

	/// Creates a user with a fresh salt and nonce and no password.
	pub fn create_user(&self, name: &str) -> Result<()> {
		validate_user_name(name)?;
		let user = self.fresh_user()?;
		let mut users = self.users.write();
		if users.contains_key(name) {
			return Err(Error::Conflict(format!("user {name:?}")));
		}
		users.insert(name.to_string(), user);
		Ok(())
	}

	pub fn remove_user(&self, name: &str) -> Result<()> {
		let mut users = self.users.write();
		users
			.remove(name)
			.map(|_| ())
			.ok_or_else(|| Error::not_found(format!("user {name:?}")))
	}

	pub fn has_user(&self, name: &str) -> bool {
		self.users.read().contains_key(name)
	}

	/// All user names, sorted.
	pub fn users(&self) -> Vec<String> {
		self.users.read().keys().cloned().collect()
	}

	fn with_user<T>(&self, name: &str, read: impl FnOnce(&User) -> T) -> Result<T> {
		let users = self.users.read();
		let user = users
			.get(name)
			.ok_or_else(|| Error::not_found(format!("user {name:?}")))?;
		Ok(read(user))
	}

	fn with_user_mut<T>(&self, name: &str, change: impl FnOnce(&mut User) -> Result<T>) -> Result<T> {
		let mut users = self.users.write();
		let user = users
			.get_mut(name)
			.ok_or_else(|| Error::not_found(format!("user {name:?}")))?;
		change(user)
	}

	/// Draws a fresh salt and stores `SHA512(salt ‖ SHA512(password))`.
	pub fn set_password(&self, name: &str, password: &str) -> Result<()> {
		let salt: [u8; SALT_SIZE] = self.rng.fill_array()?;
		let credential = password_credential(&salt, password);
		self.with_user_mut(name, |user| {
			user.salt = salt;
			user.hash = credential.to_vec();
			Ok(())
		})
	}

	pub fn salt(&self, name: &str) -> Result<[u8; SALT_SIZE]> {
		self.with_user(name, |user| user.salt)
	}

	/// The stored credential; empty when no password is set.
	pub fn hash(&self, name: &str) -> Result<Vec<u8>> {
		self.with_user(name, |user| user.hash.clone())
	}

	pub fn nonce(&self, name: &str) -> Result<[u8; NONCE_SIZE]> {
		self.with_user(name, |user| user.nonce)
	}

	/// Replaces the user's nonce with 64 fresh bytes.
	pub fn regenerate_nonce(&self, name: &str) -> Result<()> {
		let nonce: [u8; NONCE_SIZE] = self.rng.fill_array()?;
		self.with_user_mut(name, |user| {
			user.nonce = nonce;
			Ok(())
		})
	}

	/// Adds a permission; set semantics, adding twice is a no-op.
	pub fn add_permission(&self, name: &str, permission: &str) -> Result<()> {
		self.with_user_mut(name, |user| {
			if !user.permissions.iter().any(|p| p == permission) {
				user.permissions.push(permission.to_string());
			}
			Ok(())
		})
	}

	pub fn remove_permission(&self, name: &str, permission: &str) -> Result<()> {
		self.with_user_mut(name, |user| {
			user.permissions.retain(|p| p != permission);
			Ok(())
		})
	}

	pub fn has_permission(&self, name: &str, permission: &str) -> Result<bool> {
		self.with_user(name, |user| user.permissions.iter().any(|p| p == permission))
	}

	/// A copy of the user's permissions.
	pub fn permissions(&self, name: &str) -> Result<Vec<String>> {
		self.with_user(name, |user| user.permissions.clone())
	}

	/// Mints a device token, retrying on the (unlikely) collision within the
	/// same user.
	pub fn create_device_token(&self, name: &str, created_at: DateTime<Utc>, description: &str) -> Result<u64> {
		loop {
			let token = self.rng.next_u64()?;
			let inserted = self.with_user_mut(name, |user| {
				if user.device_tokens.iter().any(|t| t.token == token) {
					return Ok(false);
				}
				user.device_tokens.push(DeviceToken {
					token,
					created_at,
					description: description.to_string(),
				});
				Ok(true)
			})?;
			if inserted {
				return Ok(token);
			}
		}
	}

	pub fn has_device_token(&self, name: &str, token: u64) -> Result<bool> {
		self.with_user(name, |user| user.device_tokens.iter().any(|t| t.token == token))
	}

	pub fn remove_device_token(&self, name: &str, token: u64) -> Result<()> {
		self.with_user_mut(name, |user| {
			let before = user.device_tokens.len();
			user.device_tokens.retain(|t| t.token != token);
			if user.device_tokens.len() == before {
				return Err(Error::not_found(format!("device token {token:016x}")));
			}
			Ok(())
		})
	}

	/// A copy of the user's device tokens, in creation order.
	pub fn device_tokens(&self, name: &str) -> Result<Vec<DeviceToken>> {
		self.with_user(name, |user| user.device_tokens.clone())
	}

	/// Registers an RSA public key for signature login. Keys live only in
	/// memory; the persisted document does not carry them.
	pub fn add_public_key(&self, name: &str, key: RsaPublicKey) -> Result<()> {
		self.with_user_mut(name, |user| {
			if !user.public_keys.contains(&key) {
				user.public_keys.push(key);
			}
			Ok(())
		})
	}

	/// A copy of the user's registered public keys.
	pub fn public_keys(&self, name: &str) -> Result<Vec<RsaPublicKey>> {
		self.with_user(name, |user| user.public_keys.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::csprng::SEED_SIZE;
	use anyhow::Result;
	use geotrack_core::ErrorKind;
	use rstest::rstest;

	pub(crate) fn test_store() -> UserStore {
		UserStore::with_rng(Csprng::new(&[7u8; SEED_SIZE]).unwrap())
	}

	#[rstest]
	#[case("bob")]
	#[case("a.b-c_d")]
	#[case("ABCDEFGHIJKLMNOP")]
	fn good_names(#[case] name: &str) {
		assert!(validate_user_name(name).is_ok());
	}

	#[rstest]
	#[case("ab")]
	#[case("seventeen-letters")]
	#[case("with space")]
	#[case("umlaut-äöü")]
	#[case("")]
	fn bad_names(#[case] name: &str) {
		assert_eq!(validate_user_name(name).unwrap_err().kind(), ErrorKind::InvalidArgument);
	}

	#[test]
	fn create_remove_and_list() -> Result<()> {
		let store = test_store();
		store.create_user("bob")?;
		store.create_user("alice")?;
		assert_eq!(store.users(), vec!["alice".to_string(), "bob".to_string()]);
		assert!(store.has_user("bob"));

		assert_eq!(store.create_user("bob").unwrap_err().kind(), ErrorKind::Conflict);
		store.remove_user("bob")?;
		assert_eq!(store.remove_user("bob").unwrap_err().kind(), ErrorKind::NotFound);
		Ok(())
	}

	#[test]
	fn fresh_user_has_salt_nonce_and_no_password() -> Result<()> {
		let store = test_store();
		store.create_user("alice")?;
		assert_eq!(store.hash("alice")?, Vec::<u8>::new());
		assert_ne!(store.salt("alice")?, [0u8; SALT_SIZE]);
		assert_ne!(store.nonce("alice")?, [0u8; NONCE_SIZE]);
		assert_ne!(store.salt("alice")?.as_slice(), store.nonce("alice")?.as_slice());
		Ok(())
	}

	#[test]
	fn set_password_replaces_the_salt() -> Result<()> {
		let store = test_store();
		store.create_user("alice")?;
		let old_salt = store.salt("alice")?;
		store.set_password("alice", "secret")?;
		let new_salt = store.salt("alice")?;
		assert_ne!(old_salt, new_salt);
		assert_eq!(
			store.hash("alice")?,
			password_credential(&new_salt, "secret").to_vec()
		);
		Ok(())
	}

	#[test]
	fn permissions_have_set_semantics() -> Result<()> {
		let store = test_store();
		store.create_user("alice")?;
		store.add_permission("alice", "admin")?;
		store.add_permission("alice", "admin")?;
		store.add_permission("alice", "upload")?;
		assert_eq!(store.permissions("alice")?, vec!["admin", "upload"]);
		assert!(store.has_permission("alice", "admin")?);

		store.remove_permission("alice", "admin")?;
		assert!(!store.has_permission("alice", "admin")?);
		assert_eq!(store.permissions("alice")?, vec!["upload"]);
		Ok(())
	}

	#[test]
	fn permissions_are_copies_not_aliases() -> Result<()> {
		let store = test_store();
		store.create_user("alice")?;
		store.add_permission("alice", "admin")?;
		let mut copy = store.permissions("alice")?;
		copy.push("hacked".to_string());
		assert_eq!(store.permissions("alice")?, vec!["admin"]);
		Ok(())
	}

	#[test]
	fn device_token_lifecycle() -> Result<()> {
		let store = test_store();
		store.create_user("alice")?;
		let created_at = Utc::now();
		let token = store.create_device_token("alice", created_at, "tracker")?;
		assert!(store.has_device_token("alice", token)?);
		assert!(!store.has_device_token("alice", token.wrapping_add(1))?);

		let tokens = store.device_tokens("alice")?;
		assert_eq!(tokens.len(), 1);
		assert_eq!(tokens[0].token, token);
		assert_eq!(tokens[0].description, "tracker");

		store.remove_device_token("alice", token)?;
		assert_eq!(
			store.remove_device_token("alice", token).unwrap_err().kind(),
			ErrorKind::NotFound
		);
		Ok(())
	}

	#[test]
	fn operations_on_unknown_users_fail() {
		let store = test_store();
		assert_eq!(store.salt("ghost").unwrap_err().kind(), ErrorKind::NotFound);
		assert_eq!(store.set_password("ghost", "pw").unwrap_err().kind(), ErrorKind::NotFound);
		assert_eq!(store.regenerate_nonce("ghost").unwrap_err().kind(), ErrorKind::NotFound);
		assert_eq!(store.permissions("ghost").unwrap_err().kind(), ErrorKind::NotFound);
	}

	#[test]
	fn regenerate_nonce_changes_the_nonce() -> Result<()> {
		let store = test_store();
		store.create_user("alice")?;
		let before = store.nonce("alice")?;
		store.regenerate_nonce("alice")?;
		assert_ne!(store.nonce("alice")?, before);
		Ok(())
	}
}
