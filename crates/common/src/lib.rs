//! Sunder Common Utilities
//!
//! Shared infrastructure for all Sunder crates:
//! - Error types and result aliases
//! - Clock abstraction for progress estimates
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
