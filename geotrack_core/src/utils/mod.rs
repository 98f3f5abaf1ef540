//! Small utilities: cooperative cancellation and RFC 3339 rendering.

mod cancel;
mod time;

pub use cancel::*;
pub use time::*;
