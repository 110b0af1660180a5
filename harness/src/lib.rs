//! hawkBit test harness
//!
//! Provisions backend entities, client configs and helper processes for
//! tests of the update client, and tears all of it down again in reverse
//! order when a test's scope ends.

pub mod error;
pub mod options;
pub mod scope;
pub mod services;
pub mod session;
pub mod traits;

// Re-export commonly used types
pub use error::{HarnessError, HarnessResult};
pub use options::HarnessOptions;
pub use scope::{ResourceScope, ScopedResource};
pub use session::{ClientConfig, Session};
pub use traits::{HawkbitBackend, MockHawkbitBackend};
