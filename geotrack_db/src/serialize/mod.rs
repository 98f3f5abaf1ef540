//! Streaming serializers for the location store.
//!
//! Each serializer acquires the store's read lock at construction and holds
//! it until dropped, so the record array cannot change underneath a running
//! export. All three implement [`std::io::Read`]; the binary one also
//! implements [`std::io::Seek`].

mod binary;
mod csv;
mod json;

pub use binary::*;
pub use csv::*;
pub use json::*;
