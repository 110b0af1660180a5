//! Bandwidth-limited reverse proxy in front of the backend
//!
//! Tests that exercise slow downloads point the client at the proxy port
//! instead of the backend. The proxy config and process live and die
//! together; a missing proxy binary makes the dependent test skip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use shared::{BackendAddr, RateLimit};

use crate::error::{HarnessError, HarnessResult};
use crate::scope::ResourceScope;
use crate::services::config_composer::substitute;
use crate::services::config_store::ConfigStore;
use crate::services::output_matcher::Marker;
use crate::services::port_allocator::PortAllocator;
use crate::services::process_supervisor::{ProcessSpec, SupervisedProcess};

/// Startup lines that mean the proxy is serving. Stock nginx announces each
/// worker as `start worker process <pid>`.
pub const PROXY_READY_MARKERS: [&str; 2] = ["worker process started", "start worker process"];

/// How long a proxy may stay silent before it counts as unusable
pub const DEFAULT_SIGNATURE_TIMEOUT: Duration = Duration::from_secs(60);

const BIND_CONFLICT: &str = "Address already in use";

const NGINX_TEMPLATE: &str = r#"error_log stderr notice;
pid {scratch}/nginx.pid;

events {{}}

http {{
    access_log off;
    client_body_temp_path {scratch}/client_body;
    proxy_temp_path {scratch}/proxy;
    fastcgi_temp_path {scratch}/fastcgi;
    uwsgi_temp_path {scratch}/uwsgi;
    scgi_temp_path {scratch}/scgi;

    server {{
        listen 127.0.0.1:{port};

        location / {{
            proxy_pass http://{upstream};
            limit_rate {rate};
        }}
    }}
}}
"#;

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub binary: PathBuf,
    pub upstream: BackendAddr,
    pub ready_marker: Marker,
    /// Bound on the otherwise open-ended readiness wait
    pub signature_timeout: Duration,
    pub max_start_attempts: usize,
    pub grace_period: Duration,
}

impl ProxySettings {
    pub fn new(upstream: BackendAddr) -> Self {
        Self {
            binary: PathBuf::from("nginx"),
            upstream,
            ready_marker: Marker::any_of(PROXY_READY_MARKERS),
            signature_timeout: DEFAULT_SIGNATURE_TIMEOUT,
            max_start_attempts: 3,
            grace_period: Duration::from_secs(2),
        }
    }

    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn ready_marker(mut self, marker: impl Into<Marker>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    pub fn signature_timeout(mut self, timeout: Duration) -> Self {
        self.signature_timeout = timeout;
        self
    }
}

/// A running proxy
#[derive(Debug, Clone)]
pub struct ProxyDescriptor {
    pub port: u16,
    pub rate: RateLimit,
    pub config_path: PathBuf,
    pub process: SupervisedProcess,
}

impl ProxyDescriptor {
    /// `host:port` to put into the client config instead of the backend
    pub fn address(&self) -> String {
        format!("localhost:{}", self.port)
    }
}

#[derive(Clone)]
pub struct ProxyController {
    settings: ProxySettings,
    ports: PortAllocator,
    store: ConfigStore,
}

impl ProxyController {
    pub fn new(settings: ProxySettings, ports: PortAllocator, store: ConfigStore) -> Self {
        Self { settings, ports, store }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Render the proxy configuration for one instance
    pub fn render_config(&self, port: u16, rate: RateLimit, scratch: &Path) -> HarnessResult<String> {
        let bindings = HashMap::from([
            ("scratch".to_string(), scratch.display().to_string()),
            ("port".to_string(), port.to_string()),
            ("upstream".to_string(), self.settings.upstream.to_string()),
            ("rate".to_string(), rate.to_string()),
        ]);
        substitute(NGINX_TEMPLATE, &bindings)
    }

    /// Start a proxy limited to `rate` and register its teardown in `scope`.
    ///
    /// # Errors
    /// `EnvironmentUnavailable` when the proxy binary is missing or exits
    /// without ever printing its startup marker.
    pub async fn start_proxy(&self, scope: &mut ResourceScope, rate: RateLimit) -> HarnessResult<ProxyDescriptor> {
        for attempt in 1..=self.settings.max_start_attempts {
            let port = self.ports.allocate()?;
            let scratch = self.scratch_dir(scope).await?;
            let config = self.render_config(port, rate, &scratch)?;
            let config_path = self.store.persist_text(scope, "nginx-", ".conf", &config).await?;

            let spec = ProcessSpec::new(format!("proxy:{port}"), &self.settings.binary)
                .arg("-c")
                .arg(config_path.display().to_string())
                .arg("-p")
                .arg(scratch.display().to_string())
                .args(["-g", "daemon off;"])
                .ready_timeout(None)
                .grace_period(self.settings.grace_period);
            let process = SupervisedProcess::spawn(spec)?;

            // The proxy's own readiness wait has no deadline; only a proxy that
            // prints nothing recognizable at all is cut off here.
            let waited = tokio::time::timeout(
                self.settings.signature_timeout,
                process.await_marker(self.settings.ready_marker.clone()),
            )
            .await;
            let Ok(ready) = waited else {
                let output = process.output().await;
                process.terminate(true).await?;
                return Err(HarnessError::unavailable(
                    "proxy",
                    format!(
                        "no startup signature from {} within {:?}: {}",
                        self.settings.binary.display(),
                        self.settings.signature_timeout,
                        output
                    ),
                ));
            };

            match ready {
                Ok(()) => {
                    let handle = process.clone();
                    scope.defer(format!("proxy on port {port}"), move || async move {
                        handle.stop(true).await
                    });
                    info!("🐢 Proxy on port {} limiting to {}/s", port, rate);
                    return Ok(ProxyDescriptor {
                        port,
                        rate,
                        config_path,
                        process,
                    });
                }
                Err(HarnessError::ReadinessTimeout { output, .. }) if output.contains(BIND_CONFLICT) => {
                    warn!(
                        "⚠️ Port {} taken before the proxy could bind (attempt {}/{})",
                        port, attempt, self.settings.max_start_attempts
                    );
                    process.terminate(true).await?;
                }
                Err(HarnessError::ReadinessTimeout { output, .. }) => {
                    process.terminate(true).await?;
                    return Err(HarnessError::unavailable(
                        "proxy",
                        format!("no startup signature from {}: {}", self.settings.binary.display(), output),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        Err(HarnessError::unavailable(
            "proxy",
            format!("could not bind a port in {} attempts", self.settings.max_start_attempts),
        ))
    }

    /// Per-instance working directory, removed after the proxy is gone
    async fn scratch_dir(&self, scope: &mut ResourceScope) -> HarnessResult<PathBuf> {
        tokio::fs::create_dir_all(self.store.dir()).await?;
        let dir = tempfile::Builder::new()
            .prefix("proxy-")
            .tempdir_in(self.store.dir())?
            .into_path();
        tokio::fs::create_dir_all(dir.join("logs")).await?;

        if !self.store.keeps_artifacts() {
            let cleanup = dir.clone();
            scope.defer(format!("dir {}", dir.display()), move || async move {
                match tokio::fs::remove_dir_all(&cleanup).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                    _ => Ok(()),
                }
            });
        }
        Ok(dir)
    }
}
