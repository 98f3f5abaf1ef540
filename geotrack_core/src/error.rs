//! Error taxonomy shared by every geotrack store.
//!
//! Each error carries a kind that callers can match on programmatically and a
//! free-form detail. Storage errors carry the byte offset of the failure when
//! one is meaningful; offsets are rendered in hexadecimal.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error kinds a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Precondition violation visible to the caller (bad name, oversize, closed handle).
	InvalidArgument,
	/// Absent user, session, tile id, or image handle.
	NotFound,
	/// Opaque authentication failure.
	AuthFailed,
	/// Already exists (user creation, duplicate device token).
	Conflict,
	/// Underlying storage failure.
	Io,
	/// Magic mismatch, bad record size, version mismatch, unparseable record.
	Corruption,
	/// Numeric bound exceeded.
	Overflow,
	/// Caller-requested abort of a long-running operation.
	Cancelled,
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("not found: {0}")]
	NotFound(String),

	/// A single uniform message. Whether the user was unknown or the
	/// credential was wrong is never disclosed.
	#[error("authentication failed")]
	AuthFailed,

	#[error("already exists: {0}")]
	Conflict(String),

	#[error("i/o error{}: {source}", fmt_offset(.offset))]
	Io {
		offset: Option<u64>,
		#[source]
		source: std::io::Error,
	},

	#[error("corrupt store{}: {detail}", fmt_offset(.offset))]
	Corruption { offset: Option<u64>, detail: String },

	#[error("numeric overflow: {0}")]
	Overflow(String),

	#[error("operation cancelled")]
	Cancelled,
}

fn fmt_offset(offset: &Option<u64>) -> String {
	match offset {
		Some(o) => format!(" at offset {o:#x}"),
		None => String::new(),
	}
}

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
			Error::NotFound(_) => ErrorKind::NotFound,
			Error::AuthFailed => ErrorKind::AuthFailed,
			Error::Conflict(_) => ErrorKind::Conflict,
			Error::Io { .. } => ErrorKind::Io,
			Error::Corruption { .. } => ErrorKind::Corruption,
			Error::Overflow(_) => ErrorKind::Overflow,
			Error::Cancelled => ErrorKind::Cancelled,
		}
	}

	/// An i/o error pinned to a byte offset in the backing storage.
	pub fn io_at(offset: u64, source: std::io::Error) -> Error {
		Error::Io {
			offset: Some(offset),
			source,
		}
	}

	pub fn corrupt(detail: impl Into<String>) -> Error {
		Error::Corruption {
			offset: None,
			detail: detail.into(),
		}
	}

	pub fn corrupt_at(offset: u64, detail: impl Into<String>) -> Error {
		Error::Corruption {
			offset: Some(offset),
			detail: detail.into(),
		}
	}

	pub fn invalid(detail: impl Into<String>) -> Error {
		Error::InvalidArgument(detail.into())
	}

	pub fn not_found(detail: impl Into<String>) -> Error {
		Error::NotFound(detail.into())
	}
}

impl From<std::io::Error> for Error {
	fn from(source: std::io::Error) -> Error {
		Error::Io { offset: None, source }
	}
}

impl From<Error> for std::io::Error {
	fn from(error: Error) -> std::io::Error {
		let kind = match &error {
			Error::Cancelled => std::io::ErrorKind::Interrupted,
			Error::Io { source, .. } => source.kind(),
			_ => std::io::ErrorKind::Other,
		};
		std::io::Error::new(kind, error)
	}
}
