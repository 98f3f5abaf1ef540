//! The geotrack storage core: a fixed-record location store, a two-file
//! content-addressed tile store, the migration engine that feeds the former,
//! and the challenge-response authentication gating all mutations.
//!
//! This crate re-exports the four component crates under one roof:
//!
//! - [`core`](geotrack_core) — shared types, errors, the storage seam
//! - [`db`](geotrack_db) — the location store and its serializers
//! - [`tiles`](geotrack_tiles) — blob and index stores, composed operations
//! - [`auth`](geotrack_auth) — CSPRNG, user table, sessions

pub use geotrack_auth as auth;
pub use geotrack_core as core;
pub use geotrack_db as db;
pub use geotrack_tiles as tiles;
