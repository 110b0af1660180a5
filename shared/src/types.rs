//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::SharedError;

/// HOST:PORT of a hawkBit instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendAddr {
    pub host: String,
    pub port: u16,
}

impl BackendAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Base URL for the management API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl FromStr for BackendAddr {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SharedError::InvalidAddress { input: s.to_string() };

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A target (device record) created on the backend
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetHandle {
    /// Controller id, which the harness also uses as the display name
    pub name: String,
    pub security_token: Option<String>,
}

impl TargetHandle {
    /// Fresh controller id for a test target
    pub fn generate_name() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("test-target-{}", &id[..12])
    }
}

impl fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target '{}'", self.name)
    }
}

/// Identifier of a software module
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleHandle(pub u64);

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "software module {}", self.0)
    }
}

/// An artifact always belongs to exactly one software module
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub id: u64,
    pub module: ModuleHandle,
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact {} of {}", self.id, self.module)
    }
}

/// Identifier of a distribution set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistSetHandle(pub u64);

impl fmt::Display for DistSetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "distribution set {}", self.0)
    }
}

/// An action links one distribution set to one target
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionHandle {
    pub id: u64,
    pub target: String,
    pub distribution_set: DistSetHandle,
}

impl fmt::Display for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action {} on target '{}'", self.id, self.target)
    }
}

/// Backend view of an action's lifecycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Canceling,
    Finished,
    Canceled,
    Error,
    Unknown(String),
}

impl ActionStatus {
    /// Maps the backend's `status` field (and detail status when present)
    pub fn from_backend(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "pending" | "scheduled" | "retrieved" => ActionStatus::Pending,
            "running" | "download" | "downloaded" => ActionStatus::Running,
            "canceling" => ActionStatus::Canceling,
            "finished" => ActionStatus::Finished,
            "canceled" | "cancelled" => ActionStatus::Canceled,
            "error" => ActionStatus::Error,
            other => ActionStatus::Unknown(other.to_string()),
        }
    }

    /// Terminal actions can no longer be canceled
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Finished | ActionStatus::Canceled | ActionStatus::Error)
    }
}

/// Bandwidth limit for the throttling proxy, in bytes per second
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RateLimit {
    amount: u64,
    unit: RateUnit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RateUnit {
    Bytes,
    Kilo,
    Mega,
}

impl RateUnit {
    fn multiplier(self) -> u64 {
        match self {
            RateUnit::Bytes => 1,
            RateUnit::Kilo => 1024,
            RateUnit::Mega => 1024 * 1024,
        }
    }
}

impl RateLimit {
    /// Parsing guarantees this fits in a `u64`
    pub fn bytes_per_second(&self) -> u64 {
        self.amount.saturating_mul(self.unit.multiplier())
    }
}

impl FromStr for RateLimit {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SharedError::InvalidRateLimit { input: s.to_string() };

        let trimmed = s.trim();
        let (digits, unit) = match trimmed.char_indices().last() {
            Some((idx, 'k' | 'K')) => (&trimmed[..idx], RateUnit::Kilo),
            Some((idx, 'm' | 'M')) => (&trimmed[..idx], RateUnit::Mega),
            Some(_) => (trimmed, RateUnit::Bytes),
            None => return Err(invalid()),
        };

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount = digits.parse::<u64>().map_err(|_| invalid())?;
        if amount == 0 || amount.checked_mul(unit.multiplier()).is_none() {
            return Err(invalid());
        }

        Ok(Self { amount, unit })
    }
}

/// Renders in the proxy's own rate syntax (`70k`, `1m`, `512`)
impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            RateUnit::Bytes => write!(f, "{}", self.amount),
            RateUnit::Kilo => write!(f, "{}k", self.amount),
            RateUnit::Mega => write!(f, "{}m", self.amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_addr_parsing() {
        let addr: BackendAddr = "localhost:8080".parse().unwrap();
        assert_eq!(addr, BackendAddr::new("localhost", 8080));
        assert_eq!(addr.base_url(), "http://localhost:8080");
        assert_eq!(addr.to_string(), "localhost:8080");
    }

    #[test]
    fn test_backend_addr_rejects_garbage() {
        assert!("localhost".parse::<BackendAddr>().is_err());
        assert!(":8080".parse::<BackendAddr>().is_err());
        assert!("host:notaport".parse::<BackendAddr>().is_err());
        assert!("host:70000".parse::<BackendAddr>().is_err());
    }

    #[test]
    fn test_rate_limit_parsing() {
        let rate: RateLimit = "70k".parse().unwrap();
        assert_eq!(rate.bytes_per_second(), 70 * 1024);
        assert_eq!(rate.to_string(), "70k");

        let rate: RateLimit = "2M".parse().unwrap();
        assert_eq!(rate.bytes_per_second(), 2 * 1024 * 1024);
        assert_eq!(rate.to_string(), "2m");

        let rate: RateLimit = "512".parse().unwrap();
        assert_eq!(rate.bytes_per_second(), 512);
    }

    #[test]
    fn test_rate_limit_rejects_invalid() {
        for input in ["", "k", "0", "0k", "12x", "-5k", "1.5m"] {
            assert!(input.parse::<RateLimit>().is_err(), "accepted '{input}'");
        }
    }

    #[test]
    fn test_rate_limit_rejects_amounts_past_u64() {
        let max = u64::MAX.to_string();
        assert_eq!(max.parse::<RateLimit>().unwrap().bytes_per_second(), u64::MAX);
        assert!(format!("{max}k").parse::<RateLimit>().is_err());
        assert!(format!("{}m", u64::MAX / (1024 * 1024) + 1).parse::<RateLimit>().is_err());

        let largest: RateLimit = format!("{}m", u64::MAX / (1024 * 1024)).parse().unwrap();
        assert_eq!(largest.bytes_per_second(), (u64::MAX / (1024 * 1024)) * 1024 * 1024);
    }

    #[test]
    fn test_generated_target_names_are_unique() {
        let a = TargetHandle::generate_name();
        let b = TargetHandle::generate_name();
        assert!(a.starts_with("test-target-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_action_status_terminal_states() {
        assert!(ActionStatus::from_backend("finished").is_terminal());
        assert!(ActionStatus::from_backend("CANCELED").is_terminal());
        assert!(!ActionStatus::from_backend("running").is_terminal());
        assert_eq!(
            ActionStatus::from_backend("weird"),
            ActionStatus::Unknown("weird".to_string())
        );
    }
}
