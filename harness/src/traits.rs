//! Trait definitions with mockall annotations for testing
//!
//! The management backend is consumed as an opaque capability. Everything
//! above it (entity manager, session fixtures) only talks to this trait, so
//! tests can swap in `MockHawkbitBackend`.

use serde_json::Value;
use shared::{
    ActionHandle, ActionStatus, ArtifactHandle, DistSetHandle, ModuleHandle, TargetHandle,
};

use crate::error::HarnessResult;

/// hawkBit management API abstraction
#[mockall::automock]
#[async_trait::async_trait]
pub trait HawkbitBackend: Send + Sync {
    /// Set a tenant-wide configuration value (polling time, auth modes, ...)
    async fn set_config(&self, key: &str, value: Value) -> HarnessResult<()>;

    /// Create a target; the backend generates its security token
    async fn add_target(&self, name: &str) -> HarnessResult<TargetHandle>;

    async fn delete_target(&self, name: &str) -> HarnessResult<()>;

    async fn add_software_module(&self, name: &str, version: &str) -> HarnessResult<ModuleHandle>;

    async fn delete_software_module(&self, module: ModuleHandle) -> HarnessResult<()>;

    /// Upload `content` as an artifact named `file_name` into `module`
    async fn add_artifact(
        &self,
        module: ModuleHandle,
        file_name: &str,
        content: Vec<u8>,
    ) -> HarnessResult<ArtifactHandle>;

    async fn delete_artifact(&self, artifact: ArtifactHandle) -> HarnessResult<()>;

    async fn add_distribution_set(
        &self,
        name: &str,
        version: &str,
        module: ModuleHandle,
    ) -> HarnessResult<DistSetHandle>;

    async fn delete_distribution_set(&self, dist: DistSetHandle) -> HarnessResult<()>;

    /// Assign a distribution set to a target, returning the created action
    async fn assign_target(&self, dist: DistSetHandle, target: &str) -> HarnessResult<ActionHandle>;

    /// Cancel an action.
    ///
    /// # Errors
    /// `EntityConflict` when the action already reached a terminal state.
    async fn cancel_action(&self, action: &ActionHandle, force: bool) -> HarnessResult<()>;

    async fn action_status(&self, action: &ActionHandle) -> HarnessResult<ActionStatus>;
}
