//! Remote test entity manager
//!
//! Creates and deletes backend entities on behalf of tests and keeps a ledger
//! of what is still alive. The ledger knows which entity depends on which, so
//! deleting a parent while children are alive fails before the backend is
//! even asked.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared::{ActionHandle, ActionStatus, ArtifactHandle, DistSetHandle, ModuleHandle, TargetHandle};

use crate::error::{HarnessError, HarnessResult};
use crate::scope::ResourceScope;
use crate::traits::HawkbitBackend;

pub const DEFAULT_MODULE_VERSION: &str = "0.0.1";
pub const DEFAULT_ARTIFACT_NAME: &str = "bundle.raucb";

/// Ledger key for one live backend entity
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Target(String),
    Module(u64),
    Artifact(u64),
    DistSet(u64),
    Action(u64),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Target(name) => write!(f, "target '{name}'"),
            EntityKey::Module(id) => write!(f, "software module {id}"),
            EntityKey::Artifact(id) => write!(f, "artifact {id}"),
            EntityKey::DistSet(id) => write!(f, "distribution set {id}"),
            EntityKey::Action(id) => write!(f, "action {id}"),
        }
    }
}

/// Live entities, each mapped to the entities it depends on
#[derive(Default, Debug)]
struct Ledger {
    live: HashMap<EntityKey, Vec<EntityKey>>,
}

impl Ledger {
    fn insert(&mut self, key: EntityKey, parents: Vec<EntityKey>) {
        self.live.insert(key, parents);
    }

    fn require(&self, key: &EntityKey) -> HarnessResult<()> {
        if self.live.contains_key(key) {
            Ok(())
        } else {
            Err(HarnessError::UnknownEntity { entity: key.to_string() })
        }
    }

    fn dependents(&self, key: &EntityKey) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .live
            .iter()
            .filter(|(_, parents)| parents.contains(key))
            .map(|(child, _)| child.to_string())
            .collect();
        dependents.sort();
        dependents
    }

    /// Fails if `key` is unknown or still has live dependents
    fn check_deletable(&self, key: &EntityKey) -> HarnessResult<()> {
        self.require(key)?;
        let dependents = self.dependents(key);
        if dependents.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::DependencyViolation {
                entity: key.to_string(),
                dependents,
            })
        }
    }
}

/// Backend entity lifecycle for tests; cheap to clone and share
#[derive(Clone)]
pub struct EntityManager {
    backend: Arc<dyn HawkbitBackend>,
    ledger: Arc<Mutex<Ledger>>,
}

impl EntityManager {
    pub fn new(backend: Arc<dyn HawkbitBackend>) -> Self {
        Self {
            backend,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    pub fn backend(&self) -> &Arc<dyn HawkbitBackend> {
        &self.backend
    }

    /// Whether the ledger still considers `key` alive
    pub async fn is_live(&self, key: &EntityKey) -> bool {
        self.ledger.lock().await.live.contains_key(key)
    }

    pub async fn live_count(&self) -> usize {
        self.ledger.lock().await.live.len()
    }

    pub async fn create_target(&self) -> HarnessResult<TargetHandle> {
        let target = self.backend.add_target(&TargetHandle::generate_name()).await?;
        self.ledger
            .lock()
            .await
            .insert(EntityKey::Target(target.name.clone()), Vec::new());
        info!("🎯 Target '{}' ready", target.name);
        Ok(target)
    }

    pub async fn delete_target(&self, target: &TargetHandle) -> HarnessResult<()> {
        let key = EntityKey::Target(target.name.clone());
        self.delete_checked(key, self.backend.delete_target(&target.name)).await
    }

    pub async fn create_software_module(&self) -> HarnessResult<ModuleHandle> {
        let name = format!("test-module-{}", Uuid::new_v4().simple());
        let module = self
            .backend
            .add_software_module(&name, DEFAULT_MODULE_VERSION)
            .await?;
        self.ledger.lock().await.insert(EntityKey::Module(module.0), Vec::new());
        debug!("📦 Created {}", module);
        Ok(module)
    }

    pub async fn delete_software_module(&self, module: ModuleHandle) -> HarnessResult<()> {
        let key = EntityKey::Module(module.0);
        self.delete_checked(key, self.backend.delete_software_module(module)).await
    }

    /// Upload `content` as an artifact of `module`
    pub async fn attach_artifact(
        &self,
        content: Vec<u8>,
        module: ModuleHandle,
    ) -> HarnessResult<ArtifactHandle> {
        let parent = EntityKey::Module(module.0);
        self.ledger.lock().await.require(&parent)?;

        let size = content.len();
        let artifact = self
            .backend
            .add_artifact(module, DEFAULT_ARTIFACT_NAME, content)
            .await?;
        self.ledger
            .lock()
            .await
            .insert(EntityKey::Artifact(artifact.id), vec![parent]);
        debug!("📎 Attached {} ({} bytes)", artifact, size);
        Ok(artifact)
    }

    pub async fn delete_artifact(&self, artifact: ArtifactHandle) -> HarnessResult<()> {
        let key = EntityKey::Artifact(artifact.id);
        self.delete_checked(key, self.backend.delete_artifact(artifact)).await
    }

    pub async fn create_distribution_set(&self, module: ModuleHandle) -> HarnessResult<DistSetHandle> {
        let parent = EntityKey::Module(module.0);
        self.ledger.lock().await.require(&parent)?;

        let name = format!("test-distribution-{}", Uuid::new_v4().simple());
        let dist = self
            .backend
            .add_distribution_set(&name, DEFAULT_MODULE_VERSION, module)
            .await?;
        self.ledger
            .lock()
            .await
            .insert(EntityKey::DistSet(dist.0), vec![parent]);
        debug!("🗂️ Created {} with {}", dist, module);
        Ok(dist)
    }

    pub async fn delete_distribution_set(&self, dist: DistSetHandle) -> HarnessResult<()> {
        let key = EntityKey::DistSet(dist.0);
        self.delete_checked(key, self.backend.delete_distribution_set(dist)).await
    }

    /// Assign `dist` to `target`, creating an action
    pub async fn assign(&self, dist: DistSetHandle, target: &TargetHandle) -> HarnessResult<ActionHandle> {
        let dist_key = EntityKey::DistSet(dist.0);
        let target_key = EntityKey::Target(target.name.clone());
        {
            let ledger = self.ledger.lock().await;
            ledger.require(&dist_key)?;
            ledger.require(&target_key)?;
        }

        let action = self.backend.assign_target(dist, &target.name).await?;
        self.ledger
            .lock()
            .await
            .insert(EntityKey::Action(action.id), vec![dist_key, target_key]);
        info!("🚀 Assigned {} to target '{}' as action {}", dist, target.name, action.id);
        Ok(action)
    }

    /// Cancel an action.
    ///
    /// A forced cancel, or one that finds the action already terminal, takes
    /// the action out of the ledger. A plain cancel only moves it to
    /// canceling on the backend, so it stays live and keeps its distribution
    /// set and target pinned until a forced cancel settles it.
    ///
    /// # Errors
    /// `EntityConflict` if the action already reached a terminal state.
    pub async fn cancel(&self, action: &ActionHandle, force: bool) -> HarnessResult<()> {
        let key = EntityKey::Action(action.id);
        self.ledger.lock().await.require(&key)?;

        let result = self.backend.cancel_action(action, force).await;
        let settled = match &result {
            Err(e) if !e.is_benign_teardown() => {
                warn!("⚠️ Cancel of {} failed: {}", action, e);
                false
            }
            Err(e) => {
                debug!("{} already terminal: {}", action, e);
                true
            }
            Ok(()) if force => {
                info!("🛑 Canceled {}", action);
                true
            }
            Ok(()) => {
                info!("🛑 Canceling {}", action);
                false
            }
        };
        if settled {
            self.ledger.lock().await.live.remove(&key);
        }
        result
    }

    pub async fn action_status(&self, action: &ActionHandle) -> HarnessResult<ActionStatus> {
        self.backend.action_status(action).await
    }

    async fn delete_checked(
        &self,
        key: EntityKey,
        call: impl std::future::Future<Output = HarnessResult<()>>,
    ) -> HarnessResult<()> {
        self.ledger.lock().await.check_deletable(&key)?;
        call.await?;
        self.ledger.lock().await.live.remove(&key);
        debug!("🗑️ Deleted {}", key);
        Ok(())
    }

    /// Whether a scoped release still has work to do. Entities the test
    /// already deleted or settled itself are left alone.
    async fn still_live(&self, key: &EntityKey) -> bool {
        let live = self.is_live(key).await;
        if !live {
            debug!("{} already released by the test", key);
        }
        live
    }

    // Scoped helpers: each registers the matching delete in `scope`, so the
    // scope's reverse unwinding yields cancel → distribution set → artifact →
    // module → target for the usual acquisition order.

    pub async fn target_in(&self, scope: &mut ResourceScope) -> HarnessResult<TargetHandle> {
        let manager = self.clone();
        scope
            .acquire("target", self.create_target(), move |target: TargetHandle| async move {
                if !manager.still_live(&EntityKey::Target(target.name.clone())).await {
                    return Ok(());
                }
                manager.delete_target(&target).await
            })
            .await
    }

    pub async fn software_module_in(&self, scope: &mut ResourceScope) -> HarnessResult<ModuleHandle> {
        let manager = self.clone();
        scope
            .acquire("software module", self.create_software_module(), move |module: ModuleHandle| async move {
                if !manager.still_live(&EntityKey::Module(module.0)).await {
                    return Ok(());
                }
                manager.delete_software_module(module).await
            })
            .await
    }

    pub async fn artifact_in(
        &self,
        scope: &mut ResourceScope,
        content: Vec<u8>,
        module: ModuleHandle,
    ) -> HarnessResult<ArtifactHandle> {
        let manager = self.clone();
        scope
            .acquire("artifact", self.attach_artifact(content, module), move |artifact: ArtifactHandle| async move {
                if !manager.still_live(&EntityKey::Artifact(artifact.id)).await {
                    return Ok(());
                }
                manager.delete_artifact(artifact).await
            })
            .await
    }

    pub async fn distribution_set_in(
        &self,
        scope: &mut ResourceScope,
        module: ModuleHandle,
    ) -> HarnessResult<DistSetHandle> {
        let manager = self.clone();
        scope
            .acquire(
                "distribution set",
                self.create_distribution_set(module),
                move |dist: DistSetHandle| async move {
                    if !manager.still_live(&EntityKey::DistSet(dist.0)).await {
                        return Ok(());
                    }
                    manager.delete_distribution_set(dist).await
                },
            )
            .await
    }

    /// Assign and register a forced cancel; an action that already finished
    /// surfaces as `EntityConflict`, which the scope swallows. An action the
    /// test plainly canceled is still forced; one it force-canceled is skipped.
    pub async fn assignment_in(
        &self,
        scope: &mut ResourceScope,
        dist: DistSetHandle,
        target: &TargetHandle,
    ) -> HarnessResult<ActionHandle> {
        let manager = self.clone();
        scope
            .acquire("action", self.assign(dist, target), move |action: ActionHandle| async move {
                if !manager.still_live(&EntityKey::Action(action.id)).await {
                    return Ok(());
                }
                manager.cancel(&action, true).await
            })
            .await
    }
}
