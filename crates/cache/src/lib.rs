//! Persistent memoization of samples and optimizer-generated variants.

pub mod cache;

pub use cache::*;
