//! One-shot commands run to completion
//!
//! Used for the client under test and small helper tools. Every run gets the
//! helper environment (session D-Bus, build directory on `PATH`) and its
//! output is logged line by line under the program's name.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{HarnessError, HarnessResult};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Variables every helper process is started with.
///
/// The build directory is appended to the inherited `PATH` so freshly built
/// binaries are found without installing them.
pub fn helper_env(build_dir: &Path) -> Vec<(String, String)> {
    let mut paths: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default();
    paths.push(build_dir.to_path_buf());
    let path = std::env::join_paths(paths)
        .unwrap_or_else(|_| OsString::from(build_dir.as_os_str()))
        .to_string_lossy()
        .into_owned();

    vec![
        ("DBUS_STARTER_BUS_TYPE".to_string(), "session".to_string()),
        ("PATH".to_string(), path),
    ]
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add the helper environment for `build_dir`
    pub fn helper_env(mut self, build_dir: &Path) -> Self {
        self.env.extend(helper_env(build_dir));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was killed by a signal
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command to completion and log what it did.
///
/// # Errors
/// `EnvironmentUnavailable` if the program does not exist, `CommandTimeout`
/// if it outlives its timeout (it is killed).
pub async fn run_command(spec: CommandSpec) -> HarnessResult<CommandOutput> {
    let name = Path::new(&spec.program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| spec.program.clone());

    let changed_env: Vec<String> = spec
        .env
        .iter()
        .filter(|(k, v)| std::env::var(k).ok().as_deref() != Some(v.as_str()))
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    info!("[{}] running: {} {} {}", name, changed_env.join(" "), spec.program, spec.args.join(" "));

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            HarnessError::unavailable(name.clone(), format!("{} not found", spec.program))
        } else {
            HarnessError::ProcessSpawn {
                label: name.clone(),
                source: e,
            }
        }
    })?;

    let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
        .await
        .map_err(|_| HarnessError::CommandTimeout {
            label: name.clone(),
            timeout: spec.timeout,
        })??;

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    };

    for line in result.stdout.lines().filter(|l| !l.is_empty()) {
        info!("[{}] stdout: {}", name, line);
    }
    for line in result.stderr.lines().filter(|l| !l.is_empty()) {
        warn!("[{}] stderr: {}", name, line);
    }
    info!("[{}] exitcode: {}", name, result.exit_code);

    Ok(result)
}
