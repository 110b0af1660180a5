//! Session capability
//!
//! One `Session` per test run. It owns the backend connection and the
//! session-wide services (port allocator, config store, entity ledger, proxy
//! controller) and hands out per-test fixtures that register their teardown
//! in the caller's `ResourceScope`. Cloning is cheap; clones share state.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use shared::TargetHandle;

use crate::error::HarnessResult;
use crate::options::HarnessOptions;
use crate::scope::ResourceScope;
use crate::services::command_runner::CommandSpec;
use crate::services::config_composer::{
    ComposedConfig, ConfigTemplate, OptionOverride, OptionRemoval, bindings,
};
use crate::services::config_store::ConfigStore;
use crate::services::entity_manager::EntityManager;
use crate::services::hawkbit_client::HawkbitMgmtClient;
use crate::services::install_service::InstallServiceSpec;
use crate::services::port_allocator::PortAllocator;
use crate::services::proxy::{ProxyController, ProxySettings};
use crate::traits::HawkbitBackend;

pub const GATEWAY_TOKEN: &str = "mah4Ooze2Oog5oohae4IeWiCiu9gie4ei";
pub const CLIENT_BINARY: &str = "rauc-hawkbit-updater";

/// Backend-wide settings every session relies on
pub fn backend_settings() -> Vec<(&'static str, Value)> {
    vec![
        ("pollingTime", json!("00:00:30")),
        ("pollingOverdueTime", json!("00:03:00")),
        ("authentication.targettoken.enabled", json!(true)),
        ("authentication.gatewaytoken.enabled", json!(true)),
        ("authentication.gatewaytoken.key", json!(GATEWAY_TOKEN)),
    ]
}

/// Apply [`backend_settings`] to `backend`
pub async fn apply_backend_settings(backend: &dyn HawkbitBackend) -> HarnessResult<()> {
    for (key, value) in backend_settings() {
        backend.set_config(key, value).await?;
    }
    Ok(())
}

/// A persisted client config together with the download location it names
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub config: ComposedConfig,
    pub path: PathBuf,
    pub bundle_location: PathBuf,
}

#[derive(Clone)]
pub struct Session {
    options: HarnessOptions,
    backend: Arc<dyn HawkbitBackend>,
    entities: EntityManager,
    ports: PortAllocator,
    store: ConfigStore,
    proxies: ProxyController,
    template: ConfigTemplate,
}

impl Session {
    /// Connect to the configured hawkBit instance and apply the session settings
    pub async fn connect(options: HarnessOptions) -> HarnessResult<Self> {
        let client = HawkbitMgmtClient::new(options.hawkbit_instance.clone())?;
        Self::with_backend(options, Arc::new(client)).await
    }

    /// Build a session on top of any backend implementation
    pub async fn with_backend(options: HarnessOptions, backend: Arc<dyn HawkbitBackend>) -> HarnessResult<Self> {
        apply_backend_settings(backend.as_ref()).await?;
        info!("🔧 Backend {} configured for this session", options.hawkbit_instance);

        let ports = PortAllocator::new();
        ports.reserve([options.hawkbit_instance.port]);
        let store = ConfigStore::new(options.resolved_artifact_dir(), options.keep_configs);
        let proxies = ProxyController::new(
            ProxySettings::new(options.hawkbit_instance.clone()),
            ports.clone(),
            store.clone(),
        );

        Ok(Self {
            entities: EntityManager::new(backend.clone()),
            template: ConfigTemplate::client_default(),
            options,
            backend,
            ports,
            store,
            proxies,
        })
    }

    /// Replace the proxy settings (binary, readiness marker)
    pub fn with_proxy_settings(mut self, settings: ProxySettings) -> Self {
        self.proxies = ProxyController::new(settings, self.ports.clone(), self.store.clone());
        self
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<dyn HawkbitBackend> {
        &self.backend
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn proxies(&self) -> &ProxyController {
        &self.proxies
    }

    /// Template bindings for `target`
    pub fn bindings_for(&self, target: &TargetHandle, bundle_location: &Path) -> HashMap<String, String> {
        HashMap::from([
            (
                bindings::HAWKBIT_SERVER.to_string(),
                self.options.hawkbit_instance.to_string(),
            ),
            (bindings::TARGET_NAME.to_string(), target.name.clone()),
            (
                bindings::AUTH_TOKEN.to_string(),
                target.security_token.clone().unwrap_or_default(),
            ),
            (
                bindings::BUNDLE_LOCATION.to_string(),
                bundle_location.display().to_string(),
            ),
        ])
    }

    /// Render and persist the client config for `target`.
    ///
    /// The bundle download location is a fresh placeholder file, always
    /// removed at teardown (if the client has not already removed it). Only
    /// the config itself honours `keep_configs`.
    pub async fn client_config(
        &self,
        scope: &mut ResourceScope,
        target: &TargetHandle,
    ) -> HarnessResult<ClientConfig> {
        let bundle_location = self.store.placeholder(scope, "bundle-").await?;
        let config = self.template.render(&self.bindings_for(target, &bundle_location))?;
        let path = self.store.persist(scope, &config).await?;
        info!("📝 Client config for '{}' at {}", target.name, path.display());

        Ok(ClientConfig {
            config,
            path,
            bundle_location,
        })
    }

    /// Apply `overrides`, then `removals`, to `base` and persist the result
    /// as a new file.
    pub async fn adjusted_config(
        &self,
        scope: &mut ResourceScope,
        base: &ComposedConfig,
        overrides: &[OptionOverride],
        removals: &[OptionRemoval],
    ) -> HarnessResult<(ComposedConfig, PathBuf)> {
        let adjusted = base.with_overrides(overrides)?.with_removals(removals)?;
        let path = self.store.persist(scope, &adjusted).await?;
        Ok((adjusted, path))
    }

    /// Zero-filled dummy bundle of `size` bytes, removed at teardown even
    /// when configs are kept
    pub async fn dummy_bundle(&self, scope: &mut ResourceScope, size: usize) -> HarnessResult<PathBuf> {
        self.store
            .scratch_bytes(scope, "bundle-", ".raucb", &vec![0u8; size])
            .await
    }

    /// Fake install service for `bundle`, using this session's build dir
    pub fn install_service(&self, bundle: impl Into<PathBuf>) -> InstallServiceSpec {
        InstallServiceSpec::new(bundle, &self.options.build_dir)
    }

    /// One run of the client under test against `config`
    pub fn client_command(&self, config: &Path) -> CommandSpec {
        CommandSpec::new(CLIENT_BINARY)
            .args(["-c".to_string(), config.display().to_string(), "-r".to_string()])
            .helper_env(&self.options.build_dir)
    }
}
