//! Persisted configuration artifacts
//!
//! Every call writes a brand new file, so a config handed to one process can
//! never be changed underneath it by a later test step. Files are removed when
//! the owning scope closes, unless artifacts are being kept for inspection.
//! Scratch files (download placeholders, dummy bundles) are always removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::HarnessResult;
use crate::scope::ResourceScope;
use crate::services::config_composer::ComposedConfig;

#[derive(Clone)]
pub struct ConfigStore {
    dir: PathBuf,
    keep_artifacts: bool,
    /// Every path this store has written, kept or not
    written: Arc<Mutex<Vec<PathBuf>>>,
}

impl ConfigStore {
    pub fn new(dir: PathBuf, keep_artifacts: bool) -> Self {
        Self {
            dir,
            keep_artifacts,
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Store rooted in the system temp directory
    pub fn in_temp_dir(keep_artifacts: bool) -> Self {
        Self::new(std::env::temp_dir(), keep_artifacts)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn keeps_artifacts(&self) -> bool {
        self.keep_artifacts
    }

    /// Paths written so far, in write order
    pub async fn written(&self) -> Vec<PathBuf> {
        self.written.lock().await.clone()
    }

    /// Write `config` to a fresh `.conf` file and register its deletion
    pub async fn persist(&self, scope: &mut ResourceScope, config: &ComposedConfig) -> HarnessResult<PathBuf> {
        self.persist_text(scope, "hawkbit-updater-", ".conf", &config.to_ini())
            .await
    }

    /// Write arbitrary rendered text (e.g. a proxy config) to a fresh file
    pub async fn persist_text(
        &self,
        scope: &mut ResourceScope,
        prefix: &str,
        suffix: &str,
        contents: &str,
    ) -> HarnessResult<PathBuf> {
        self.persist_bytes(scope, prefix, suffix, contents.as_bytes()).await
    }

    /// Write raw bytes (e.g. a dummy bundle) to a fresh file
    pub async fn persist_bytes(
        &self,
        scope: &mut ResourceScope,
        prefix: &str,
        suffix: &str,
        contents: &[u8],
    ) -> HarnessResult<PathBuf> {
        let path = self.write_new(prefix, suffix, contents).await?;
        if self.keep_artifacts {
            info!("📌 Keeping {}", path.display());
        } else {
            register_removal(scope, path.clone());
        }
        Ok(path)
    }

    /// Write raw bytes to a fresh file that is removed at teardown even when
    /// artifacts are kept
    pub async fn scratch_bytes(
        &self,
        scope: &mut ResourceScope,
        prefix: &str,
        suffix: &str,
        contents: &[u8],
    ) -> HarnessResult<PathBuf> {
        let path = self.write_new(prefix, suffix, contents).await?;
        register_removal(scope, path.clone());
        Ok(path)
    }

    /// Create an empty scratch placeholder (e.g. a bundle download location)
    pub async fn placeholder(&self, scope: &mut ResourceScope, prefix: &str) -> HarnessResult<PathBuf> {
        self.scratch_bytes(scope, prefix, "", &[]).await
    }

    async fn write_new(&self, prefix: &str, suffix: &str, contents: &[u8]) -> HarnessResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.reserve_path(prefix, suffix)?;
        tokio::fs::write(&path, contents).await?;
        self.written.lock().await.push(path.clone());
        debug!("💾 Wrote {}", path.display());
        Ok(path)
    }

    /// Claim a unique file name in the store directory
    fn reserve_path(&self, prefix: &str, suffix: &str) -> HarnessResult<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.dir)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

fn register_removal(scope: &mut ResourceScope, path: PathBuf) {
    scope.defer(format!("file {}", path.display()), move || async move {
        remove_if_present(&path).await
    });
}

/// Delete a file, treating "already gone" as success
pub async fn remove_if_present(path: &Path) -> HarnessResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
