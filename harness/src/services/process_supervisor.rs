//! Supervised helper processes
//!
//! A helper moves through `Spawned -> WaitingForReady -> Ready` and ends up
//! `Exited` (on its own) or `Terminated` (by us). Until its readiness marker
//! has been seen it must not be treated as usable.
//!
//! Children are spawned with `kill_on_drop`, so a process can never outlive
//! its last handle even if teardown never ran.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::scope::ResourceScope;
use crate::services::output_matcher::{
    MatchOutcome, Marker, OutputMatcher, OutputStream, pump_lines,
};

/// Default time a helper gets to exit after SIGTERM before it is killed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How to launch a helper
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// `None` opts out of a readiness deadline
    pub ready_timeout: Option<Duration>,
    pub grace_period: Duration,
}

impl ProcessSpec {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            ready_timeout: Some(Duration::from_secs(10)),
            grace_period: DEFAULT_GRACE_PERIOD,
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

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Command line as it would be typed, for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Spawned,
    WaitingForReady,
    Ready,
    /// Exited without being asked to; carries the exit code if there was one
    Exited(Option<i32>),
    Terminated,
}

struct Inner {
    label: String,
    pid: Option<u32>,
    ready_timeout: Option<Duration>,
    grace_period: Duration,
    child: Mutex<Child>,
    state: Mutex<ProcessState>,
    matcher: tokio::sync::Mutex<OutputMatcher>,
}

/// Cheaply cloneable handle to one helper process
#[derive(Clone)]
pub struct SupervisedProcess {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SupervisedProcess {
    /// Start the process and begin collecting its output.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `EnvironmentUnavailable` if the program does not exist, `ProcessSpawn`
    /// for any other spawn failure.
    pub fn spawn(spec: ProcessSpec) -> HarnessResult<SupervisedProcess> {
        info!("🚀 Starting {}: {}", spec.label, spec.command_line());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        // Own process group, so signals also reach the helper's children
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HarnessError::unavailable(
                    spec.label.clone(),
                    format!("{} not found", spec.program.display()),
                )
            } else {
                HarnessError::ProcessSpawn {
                    label: spec.label.clone(),
                    source: e,
                }
            }
        })?;

        let pid = child.id();
        let (tx, matcher) = OutputMatcher::channel();
        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, OutputStream::Stdout, spec.label.clone(), tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, OutputStream::Stderr, spec.label.clone(), tx);
        }

        debug!("{} spawned with PID {:?}", spec.label, pid);

        Ok(SupervisedProcess {
            inner: Arc::new(Inner {
                label: spec.label,
                pid,
                ready_timeout: spec.ready_timeout,
                grace_period: spec.grace_period,
                child: Mutex::new(child),
                state: Mutex::new(ProcessState::Spawned),
                matcher: tokio::sync::Mutex::new(matcher),
            }),
        })
    }

    /// Spawn and register liveness-checked termination in `scope`
    pub fn spawn_in(scope: &mut ResourceScope, spec: ProcessSpec, force: bool) -> HarnessResult<SupervisedProcess> {
        let process = Self::spawn(spec)?;
        let handle = process.clone();
        scope.defer(format!("process {}", process.label()), move || async move {
            handle.release(force).await
        });
        Ok(process)
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn state(&self) -> ProcessState {
        lock(&self.inner.state).clone()
    }

    fn set_state(&self, state: ProcessState) {
        *lock(&self.inner.state) = state;
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ProcessState::Ready
    }

    /// Block until a line matching `marker` shows up.
    ///
    /// # Errors
    /// `ReadinessTimeout`, with everything the process printed, when the
    /// deadline passes or the process closes its output first. Not retried.
    pub async fn await_marker(&self, marker: impl Into<Marker>) -> HarnessResult<()> {
        let marker = marker.into();
        let started = Instant::now();
        self.set_state(ProcessState::WaitingForReady);

        let mut matcher = self.inner.matcher.lock().await;
        match matcher.wait_for(&marker, self.inner.ready_timeout).await {
            MatchOutcome::Matched(line) => {
                self.set_state(ProcessState::Ready);
                info!("✅ {} ready after {:?}: {}", self.inner.label, started.elapsed(), line.text);
                Ok(())
            }
            outcome => {
                matcher.drain();
                if outcome == MatchOutcome::Closed {
                    // Output closing usually means the process is gone
                    self.is_alive();
                }
                warn!("⏰ {} never printed '{}'", self.inner.label, marker);
                Err(HarnessError::ReadinessTimeout {
                    label: self.inner.label.clone(),
                    marker: marker.to_string(),
                    waited: started.elapsed(),
                    output: matcher.transcript_text(),
                })
            }
        }
    }

    /// Everything printed so far
    pub async fn output(&self) -> String {
        let mut matcher = self.inner.matcher.lock().await;
        matcher.drain();
        matcher.transcript_text()
    }

    /// Non-blocking liveness probe
    pub fn is_alive(&self) -> bool {
        let status = lock(&self.inner.child).try_wait();
        match status {
            Ok(None) => true,
            Ok(Some(status)) => {
                let mut state = lock(&self.inner.state);
                if *state != ProcessState::Terminated {
                    *state = ProcessState::Exited(status.code());
                }
                false
            }
            Err(e) => {
                warn!("⚠️ Error checking {} status: {}", self.inner.label, e);
                false
            }
        }
    }

    /// Poll until the process exits or `timeout` passes; true if it exited
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Stop the process: SIGTERM (or an immediate kill when `force`),
    /// escalating to SIGKILL after the grace period.
    pub async fn terminate(&self, force: bool) -> HarnessResult<()> {
        if !self.is_alive() {
            debug!("{} already exited", self.inner.label);
            return Ok(());
        }

        if force {
            info!("🔨 Killing {}", self.inner.label);
            self.kill()?;
        } else {
            info!("🛑 Stopping {}", self.inner.label);
            self.signal_terminate()?;
            if !self.wait_for_exit(self.inner.grace_period).await {
                warn!(
                    "🔨 {} didn't respond to SIGTERM within {:?}, killing",
                    self.inner.label, self.inner.grace_period
                );
                self.kill()?;
            }
        }

        if !self.wait_for_exit(self.inner.grace_period).await {
            return Err(HarnessError::CommandTimeout {
                label: self.inner.label.clone(),
                timeout: self.inner.grace_period,
            });
        }
        self.set_state(ProcessState::Terminated);
        Ok(())
    }

    /// Assert the helper is still running, then terminate it.
    ///
    /// A helper that died on its own mid-test is a failure, not a clean exit.
    pub async fn stop(&self, force: bool) -> HarnessResult<()> {
        if !self.is_alive() {
            let output = self.output().await;
            let detail = format!("{:?} before teardown; output:\n{}", self.state(), output);
            return Err(HarnessError::ProcessDied {
                label: self.inner.label.clone(),
                detail,
            });
        }
        self.terminate(force).await
    }

    /// Scope teardown: processes a test already terminated are left alone
    async fn release(&self, force: bool) -> HarnessResult<()> {
        if self.state() == ProcessState::Terminated {
            return Ok(());
        }
        self.stop(force).await
    }

    fn kill(&self) -> HarnessResult<()> {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL)?;
        match lock(&self.inner.child).start_kill() {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&self) -> HarnessResult<()> {
        self.signal_group(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) -> HarnessResult<()> {
        self.kill()
    }

    #[cfg(unix)]
    fn signal_group(&self, sig: nix::sys::signal::Signal) -> HarnessResult<()> {
        use nix::sys::signal;
        use nix::unistd::Pid;

        let Some(pid) = self.inner.pid else {
            return Ok(());
        };
        match signal::killpg(Pid::from_raw(pid as i32), sig) {
            Ok(()) => {
                debug!("📤 Sent {} to {} ({})", sig, self.inner.label, pid);
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(std::io::Error::from(e).into()),
        }
    }
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("label", &self.inner.label)
            .field("pid", &self.inner.pid)
            .field("state", &self.state())
            .finish()
    }
}
