//! Shared types for the hawkBit test harness
//!
//! Contains the identifiers and value types that travel between the entity
//! manager, the configuration composer and the proxy controller, together
//! with the tracing bootstrap used by every test binary.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
