//! Fake update-execution service
//!
//! Stands in for the installer's D-Bus interface. It is given the bundle the
//! client is expected to download and, optionally, the completion code every
//! install should end with.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::HarnessResult;
use crate::scope::ResourceScope;
use crate::services::command_runner::helper_env;
use crate::services::process_supervisor::{ProcessSpec, SupervisedProcess};

pub const INSTALL_SERVICE_READY_MARKER: &str = "Interface published";
pub const DEFAULT_INSTALL_SERVICE_BINARY: &str = "rauc-dbus-dummy";

#[derive(Debug, Clone)]
pub struct InstallServiceSpec {
    pub binary: PathBuf,
    pub bundle: PathBuf,
    /// Forced completion code; `None` lets installs succeed
    pub completion_code: Option<i32>,
    pub build_dir: PathBuf,
    pub ready_timeout: Duration,
}

impl InstallServiceSpec {
    pub fn new(bundle: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_INSTALL_SERVICE_BINARY),
            bundle: bundle.into(),
            completion_code: None,
            build_dir: build_dir.into(),
            ready_timeout: Duration::from_secs(10),
        }
    }

    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn completion_code(mut self, code: i32) -> Self {
        self.completion_code = Some(code);
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn to_process_spec(&self) -> ProcessSpec {
        let mut spec = ProcessSpec::new("install-service", &self.binary)
            .arg(self.bundle.display().to_string())
            .envs(helper_env(&self.build_dir))
            .ready_timeout(Some(self.ready_timeout));
        if let Some(code) = self.completion_code {
            spec = spec.arg(format!("--completed-code={code}"));
        }
        spec
    }

    /// Spawn the service and wait until its interface is published.
    ///
    /// Teardown checks the service is still alive and kills it, unless the
    /// test already terminated it.
    pub async fn start(&self, scope: &mut ResourceScope) -> HarnessResult<SupervisedProcess> {
        let process = SupervisedProcess::spawn_in(scope, self.to_process_spec(), true)?;
        process.await_marker(INSTALL_SERVICE_READY_MARKER).await?;
        Ok(process)
    }
}
