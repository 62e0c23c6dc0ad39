//! Test fixtures
//!
//! Throwaway chains in temporary directories and helpers for building
//! signed transactions against them.

pub mod test_utils;

pub use test_utils::*;
