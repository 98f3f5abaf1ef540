//! Challenge-response authentication and session lifecycle: the counter-mode
//! CSPRNG, the salted user table with its persisted document form, and the
//! short-lived session manager that gates all mutations.

mod csprng;
mod document;
mod entropy;
mod hashing;
mod session;
mod user_store;
mod wire;

pub use csprng::*;
pub use document::*;
pub use entropy::*;
pub use hashing::*;
pub use session::*;
pub use user_store::*;
pub use wire::*;
