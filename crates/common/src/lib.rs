//! Shared error plumbing and small helpers used across all marketsync crates.

pub mod error;
pub mod time;
pub mod value;

pub use error::FromMessage;
