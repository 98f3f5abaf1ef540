//! Cooperative cancellation for long-running store operations.
//!
//! Sorting, compaction, prefetching, serializer drains and migrations poll a
//! [`CancelToken`] once per outer-loop iteration (per record, per tile, per
//! entry) and abort promptly, leaving the store structurally valid but
//! possibly with partial progress.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable cancellation flag shared between a long-running operation and
/// the caller that may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
	cancelled: Arc<AtomicBool>,
}

impl CancelToken {
	pub fn new() -> CancelToken {
		CancelToken::default()
	}

	/// Requests cancellation. Every clone observes the request.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Relaxed)
	}

	/// Returns [`Error::Cancelled`] once cancellation was requested.
	pub fn check(&self) -> Result<()> {
		if self.is_cancelled() {
			return Err(Error::Cancelled);
		}
		Ok(())
	}
}
