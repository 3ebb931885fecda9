//! Small helpers shared across the crate.

pub mod collections;
pub mod testing;
