//! cf-core: shared errors, configuration, IDs, and job events.
//!
//! This crate is the foundational dependency for all other cf-* crates.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, ErrorKind, Result};
pub use ids::*;
