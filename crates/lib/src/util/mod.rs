//! Shared utilities.
//!
//! Hashing helpers and test fixtures used across the crate.

pub mod hash;

#[cfg(test)]
pub mod testutil;
