//! Harness error types
//!
//! The variants split into three groups: setup failures that abort a test,
//! the one teardown failure that is expected and swallowed (`EntityConflict`),
//! and `EnvironmentUnavailable`, which turns a test into a skip.

use std::time::Duration;
use thiserror::Error;
use shared::SharedError;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("{label} did not print '{marker}' within {waited:?}; captured output:\n{output}")]
    ReadinessTimeout {
        label: String,
        marker: String,
        waited: Duration,
        output: String,
    },

    #[error("Conflict on {entity}: {message}")]
    EntityConflict { entity: String, message: String },

    #[error("Template error: {detail}")]
    TemplateError { detail: String },

    #[error("Config section [{section}] does not exist")]
    SectionNotFound { section: String },

    #[error("Config option {section}.{key} does not exist")]
    KeyNotFound { section: String, key: String },

    #[error("Environment unavailable: {capability} ({reason})")]
    EnvironmentUnavailable { capability: String, reason: String },

    #[error("Backend call {operation} failed with status {status}: {message}")]
    Backend {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Cannot delete {entity}: still referenced by {dependents:?}")]
    DependencyViolation { entity: String, dependents: Vec<String> },

    #[error("Unknown entity: {entity}")]
    UnknownEntity { entity: String },

    #[error("{label} is not running: {detail}")]
    ProcessDied { label: String, detail: String },

    #[error("Failed to spawn {label}: {source}")]
    ProcessSpawn {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{label} did not exit within {timeout:?}")]
    CommandTimeout { label: String, timeout: Duration },

    #[error("Invalid readiness pattern: {0}")]
    InvalidMarker(#[from] regex::Error),

    #[error("Config parse error at line {line}: {message}")]
    ConfigParse { line: usize, message: String },

    #[error("Teardown failed: {}", failures.join("; "))]
    Teardown { failures: Vec<String> },

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    pub fn unavailable(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        HarnessError::EnvironmentUnavailable {
            capability: capability.into(),
            reason: reason.into(),
        }
    }

    /// Only a conflict with an entity that already reached a terminal state
    /// may be dropped during teardown.
    pub fn is_benign_teardown(&self) -> bool {
        matches!(self, HarnessError::EntityConflict { .. })
    }

    /// Why a dependent test should be skipped rather than failed
    pub fn skip_reason(&self) -> Option<String> {
        match self {
            HarnessError::EnvironmentUnavailable { capability, reason } => {
                Some(format!("{capability} unavailable: {reason}"))
            }
            _ => None,
        }
    }
}
