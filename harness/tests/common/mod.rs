//! Common test utilities and infrastructure
//!
//! Shared fixtures and helpers for the end-to-end scenarios.

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items for convenience
pub use fixtures::TestFixtures;
pub use helpers::TestHelpers;
