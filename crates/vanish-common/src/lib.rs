//! # vanish-common
//!
//! Shared types, configuration, error handling, and codecs used across all Vanish crates.
//! This is the foundation layer: no I/O-bound business logic, just primitives and contracts.

pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod models;

pub use error::{VanishError, VanishResult};
