//! The persisted form of the user table: a JSON array of user records with
//! PascalCase field names.
//!
//! Salts and credentials travel as base64, device tokens as 16 lowercase hex
//! digits, creation times as RFC 3339 UTC. Nonces are ephemeral and never
//! persisted; import draws fresh ones. Import is all-or-nothing: one bad
//! record rejects the whole document and leaves the store unchanged.

use crate::user_store::{User, UserStore, validate_user_name, HASH_SIZE, SALT_SIZE};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::SecondsFormat;
use geotrack_core::utils::parse_rfc3339;
use geotrack_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceTokenRecord {
	creation_time: String,
	description: String,
	token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserRecord {
	name: String,
	salt: String,
	hash: String,
	permissions: Vec<String>,
	device_tokens: Vec<DeviceTokenRecord>,
}

fn parse_token(text: &str) -> Result<u64> {
	let valid = text.len() == 16 && text.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
	if !valid {
		return Err(Error::invalid(format!("device token {text:?} is not 16 lowercase hex digits")));
	}
	u64::from_str_radix(text, 16).map_err(|error| Error::invalid(format!("device token {text:?}: {error}")))
}

impl UserStore {
	/// Serializes every user into the stable document schema, sorted by
	/// name.
	pub fn export(&self) -> Result<Vec<u8>> {
		let users = self.users.read();
		let records: Vec<UserRecord> = users
			.iter()
			.map(|(name, user)| UserRecord {
				name: name.clone(),
				salt: BASE64.encode(user.salt),
				hash: BASE64.encode(&user.hash),
				permissions: user.permissions.clone(),
				device_tokens: user
					.device_tokens
					.iter()
					.map(|token| DeviceTokenRecord {
						creation_time: token.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
						description: token.description.clone(),
						token: format!("{:016x}", token.token),
					})
					.collect(),
			})
			.collect();
		serde_json::to_vec_pretty(&records).map_err(|error| Error::invalid(format!("export failed: {error}")))
	}

	/// Replaces the whole table with the document's contents.
	pub fn import(&self, document: &[u8]) -> Result<()> {
		let records: Vec<UserRecord> = serde_json::from_slice(document)
			.map_err(|error| Error::invalid(format!("unparseable user document: {error}")))?;

		let mut users = BTreeMap::new();
		for record in records {
			validate_user_name(&record.name)?;
			let salt_bytes = BASE64
				.decode(&record.salt)
				.map_err(|error| Error::invalid(format!("user {:?}: bad salt base64: {error}", record.name)))?;
			let salt: [u8; SALT_SIZE] = salt_bytes
				.try_into()
				.map_err(|bytes: Vec<u8>| {
					Error::invalid(format!(
						"user {:?}: salt must be {SALT_SIZE} bytes, got {}",
						record.name,
						bytes.len()
					))
				})?;
			let hash = BASE64
				.decode(&record.hash)
				.map_err(|error| Error::invalid(format!("user {:?}: bad hash base64: {error}", record.name)))?;
			if !hash.is_empty() && hash.len() != HASH_SIZE {
				return Err(Error::invalid(format!(
					"user {:?}: hash must be empty or {HASH_SIZE} bytes, got {}",
					record.name,
					hash.len()
				)));
			}
			let mut device_tokens = Vec::with_capacity(record.device_tokens.len());
			for token in &record.device_tokens {
				device_tokens.push(crate::DeviceToken {
					token: parse_token(&token.token)?,
					created_at: parse_rfc3339(&token.creation_time)?,
					description: token.description.clone(),
				});
			}
			let user = User {
				salt,
				hash,
				nonce: self.rng.fill_array()?,
				permissions: record.permissions.clone(),
				device_tokens,
				public_keys: Vec::new(),
			};
			if users.insert(record.name.clone(), user).is_some() {
				return Err(Error::Conflict(format!("user {:?} occurs twice in the document", record.name)));
			}
		}
		log::debug!("user document imported, {} users", users.len());
		*self.users.write() = users;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::csprng::{Csprng, SEED_SIZE};
	use anyhow::Result;
	use chrono::TimeZone;
	use chrono::Utc;
	use geotrack_core::ErrorKind;

	fn test_store() -> UserStore {
		UserStore::with_rng(Csprng::new(&[3u8; SEED_SIZE]).unwrap())
	}

	fn populated_store() -> UserStore {
		let store = test_store();
		store.create_user("alice").unwrap();
		store.set_password("alice", "secret").unwrap();
		store.add_permission("alice", "admin").unwrap();
		let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
		store.create_device_token("alice", created, "tracker").unwrap();
		store.create_user("bob").unwrap();
		store
	}

	#[test]
	fn export_schema_is_stable() -> Result<()> {
		let store = populated_store();
		let document = store.export()?;
		let parsed: serde_json::Value = serde_json::from_slice(&document)?;

		let alice = &parsed[0];
		assert_eq!(alice["Name"], "alice");
		assert_eq!(alice["Permissions"][0], "admin");
		assert_eq!(BASE64.decode(alice["Salt"].as_str().unwrap())?.len(), 64);
		assert_eq!(BASE64.decode(alice["Hash"].as_str().unwrap())?.len(), 64);
		let token = &alice["DeviceTokens"][0];
		assert_eq!(token["Description"], "tracker");
		assert_eq!(token["CreationTime"], "2024-05-01T12:00:00.000000000Z");
		let token_text = token["Token"].as_str().unwrap();
		assert_eq!(token_text.len(), 16);
		assert!(token_text.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));

		let bob = &parsed[1];
		assert_eq!(bob["Name"], "bob");
		assert_eq!(bob["Hash"], "", "no password exports as the empty string");
		Ok(())
	}

	#[test]
	fn export_import_round_trip() -> Result<()> {
		let store = populated_store();
		let document = store.export()?;

		let restored = test_store();
		restored.import(&document)?;
		assert_eq!(restored.users(), vec!["alice".to_string(), "bob".to_string()]);
		assert_eq!(restored.salt("alice")?, store.salt("alice")?);
		assert_eq!(restored.hash("alice")?, store.hash("alice")?);
		assert_eq!(restored.permissions("alice")?, vec!["admin"]);
		assert_eq!(restored.hash("bob")?, Vec::<u8>::new());

		let original_tokens = store.device_tokens("alice")?;
		let restored_tokens = restored.device_tokens("alice")?;
		assert_eq!(restored_tokens, original_tokens);

		// Nonces are drawn fresh on import, never carried over.
		assert_ne!(restored.nonce("alice")?, store.nonce("alice")?);
		Ok(())
	}

	#[test]
	fn import_replaces_existing_contents() -> Result<()> {
		let store = populated_store();
		let document = store.export()?;

		let other = test_store();
		other.create_user("mallory")?;
		other.import(&document)?;
		assert!(!other.has_user("mallory"));
		assert!(other.has_user("alice"));
		Ok(())
	}

	#[test]
	fn import_rejects_bad_salt_length() -> Result<()> {
		let short_salt = BASE64.encode([0u8; 32]);
		let document = format!(
			r#"[{{"Name":"alice","Salt":"{short_salt}","Hash":"","Permissions":[],"DeviceTokens":[]}}]"#
		);
		let store = test_store();
		let error = store.import(document.as_bytes()).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::InvalidArgument);
		assert!(store.users().is_empty(), "failed import must not change the store");
		Ok(())
	}

	#[test]
	fn import_rejects_bad_hash_length() -> Result<()> {
		let salt = BASE64.encode([0u8; 64]);
		let hash = BASE64.encode([0u8; 63]);
		let document = format!(
			r#"[{{"Name":"alice","Salt":"{salt}","Hash":"{hash}","Permissions":[],"DeviceTokens":[]}}]"#
		);
		let error = test_store().import(document.as_bytes()).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::InvalidArgument);
		Ok(())
	}

	#[test]
	fn import_rejects_bad_names_and_tokens() -> Result<()> {
		let salt = BASE64.encode([0u8; 64]);
		let bad_name = format!(r#"[{{"Name":"x","Salt":"{salt}","Hash":"","Permissions":[],"DeviceTokens":[]}}]"#);
		assert!(test_store().import(bad_name.as_bytes()).is_err());

		let bad_token = format!(
			r#"[{{"Name":"alice","Salt":"{salt}","Hash":"","Permissions":[],"DeviceTokens":[{{"CreationTime":"2024-05-01T12:00:00Z","Description":"d","Token":"XYZ"}}]}}]"#
		);
		assert!(test_store().import(bad_token.as_bytes()).is_err());
		Ok(())
	}

	#[test]
	fn import_rejects_duplicate_names() -> Result<()> {
		let salt = BASE64.encode([0u8; 64]);
		let record = format!(r#"{{"Name":"alice","Salt":"{salt}","Hash":"","Permissions":[],"DeviceTokens":[]}}"#);
		let document = format!("[{record},{record}]");
		let error = test_store().import(document.as_bytes()).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::Conflict);
		Ok(())
	}

	#[test]
	fn token_parser_is_strict() {
		assert_eq!(parse_token("00000000000000ff").unwrap(), 255);
		assert!(parse_token("00000000000000FF").is_err(), "uppercase rejected");
		assert!(parse_token("ff").is_err(), "too short");
		assert!(parse_token("00000000000000fff").is_err(), "too long");
	}
}
