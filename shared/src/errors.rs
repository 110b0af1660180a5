//! Shared error types for the hawkBit test harness

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Invalid backend address '{input}': expected HOST:PORT")]
    InvalidAddress { input: String },

    #[error("Invalid rate limit '{input}': expected digits with optional k/m suffix")]
    InvalidRateLimit { input: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
