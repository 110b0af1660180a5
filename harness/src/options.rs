//! Harness options
//!
//! Every flag can also be given through the environment, which is how test
//! runs pass them through.

use clap::Parser;
use std::path::PathBuf;

use shared::BackendAddr;

pub const DEFAULT_HAWKBIT_INSTANCE: &str = "localhost:8080";
pub const DEFAULT_BUILD_DIR: &str = "./build";

#[derive(Parser, Debug, Clone)]
#[command(name = "harness")]
pub struct HarnessOptions {
    /// Keep generated config files after the run
    #[arg(long, env = "HARNESS_KEEP_CONFIGS")]
    pub keep_configs: bool,

    /// HOST:PORT of the hawkBit instance
    #[arg(long, env = "HAWKBIT_INSTANCE", default_value = DEFAULT_HAWKBIT_INSTANCE)]
    pub hawkbit_instance: BackendAddr,

    /// Directory holding freshly built helper binaries (appended to PATH)
    #[arg(long, env = "HARNESS_BUILD_DIR", default_value = DEFAULT_BUILD_DIR)]
    pub build_dir: PathBuf,

    /// Where generated configs are written (system temp dir if unset)
    #[arg(long, env = "HARNESS_ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "HARNESS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl HarnessOptions {
    /// Options from `.env` and the process environment only
    pub fn from_env() -> Result<Self, clap::Error> {
        dotenv::dotenv().ok();
        Self::try_parse_from(["harness"])
    }

    /// Defaults pointed at `hawkbit_instance`
    pub fn for_instance(hawkbit_instance: BackendAddr) -> Self {
        Self {
            keep_configs: false,
            hawkbit_instance,
            build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
            artifact_dir: None,
            log_level: "info".to_string(),
        }
    }

    pub fn keep_configs(mut self, keep: bool) -> Self {
        self.keep_configs = keep;
        self
    }

    pub fn build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_dir = dir.into();
        self
    }

    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn resolved_artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse() {
        let options = HarnessOptions::try_parse_from([
            "harness",
            "--keep-configs",
            "--hawkbit-instance",
            "hawkbit.local:9090",
            "--build-dir",
            "/opt/build",
        ])
        .unwrap();

        assert!(options.keep_configs);
        assert_eq!(options.hawkbit_instance, BackendAddr::new("hawkbit.local", 9090));
        assert_eq!(options.build_dir, PathBuf::from("/opt/build"));
    }

    #[test]
    fn test_bad_instance_rejected() {
        let result = HarnessOptions::try_parse_from(["harness", "--hawkbit-instance", "nope"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_artifact_dir_falls_back_to_temp() {
        let options = HarnessOptions::for_instance(BackendAddr::new("localhost", 8080));
        assert_eq!(options.resolved_artifact_dir(), std::env::temp_dir());

        let options = options.artifact_dir("/tmp/harness-out");
        assert_eq!(options.resolved_artifact_dir(), PathBuf::from("/tmp/harness-out"));
    }
}
