//! The fixed-record location store: a binary file of time-stamped geographic
//! points with stable in-place sorting, streaming serializers to three
//! textual formats, and a statistics-driven migration engine.

mod geodb;
pub mod migrate;
pub mod serialize;

pub use geodb::*;
pub use migrate::{migrate, MigrationReport, PointSource, Strategy};
