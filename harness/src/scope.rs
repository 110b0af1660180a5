//! Scoped resources with guaranteed release
//!
//! A [`ResourceScope`] is the teardown stack for one test. Every acquisition
//! pushes a release step; [`ResourceScope::close`] runs them strictly in
//! reverse order, exactly once each, and keeps going when one of them fails.
//!
//! Release failures never escape as panics. `EntityConflict` is swallowed,
//! everything else is logged and reported together once the whole stack has
//! been unwound.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, HarnessResult};

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, HarnessResult<()>> + Send>;

/// A registered release step
struct PendingRelease {
    label: String,
    release: ReleaseFn,
}

impl PendingRelease {
    fn new<F, Fut>(label: impl Into<String>, release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            release: Box::new(move || release().boxed()),
        }
    }

    /// Run the step, returning a message for failures that must be reported
    async fn run(self, scope: &str) -> Option<String> {
        debug!("🧹 [{}] releasing {}", scope, self.label);
        match (self.release)().await {
            Ok(()) => None,
            Err(e) if e.is_benign_teardown() => {
                debug!("[{}] ignoring benign teardown failure for {}: {}", scope, self.label, e);
                None
            }
            Err(e) => {
                error!("❌ [{}] failed to release {}: {}", scope, self.label, e);
                Some(format!("{}: {}", self.label, e))
            }
        }
    }
}

/// A single value paired with its release action.
///
/// Dereferences to the value. [`ScopedResource::release`] consumes the
/// resource, so the release action can only ever run once.
pub struct ScopedResource<T> {
    value: T,
    pending: Option<PendingRelease>,
}

impl<T> ScopedResource<T> {
    pub fn new<F, Fut>(label: impl Into<String>, value: T, release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        Self {
            value,
            pending: Some(PendingRelease::new(label, release)),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn label(&self) -> &str {
        self.pending.as_ref().map(|p| p.label.as_str()).unwrap_or_default()
    }

    /// Run the release action now.
    ///
    /// Returns the failure instead of raising it, so callers decide whether it
    /// may mask anything.
    pub async fn release(mut self) -> Option<HarnessError> {
        let pending = self.pending.take()?;
        match (pending.release)().await {
            Ok(()) => None,
            Err(e) if e.is_benign_teardown() => {
                debug!("ignoring benign teardown failure for {}: {}", pending.label, e);
                None
            }
            Err(e) => {
                warn!("⚠️ failed to release {}: {}", pending.label, e);
                Some(e)
            }
        }
    }
}

impl<T: Clone + Send + 'static> ScopedResource<T> {
    /// Run `setup`; only a successful value gets a release action, which
    /// receives its own clone of the value.
    pub async fn acquire<S, F, Fut>(label: impl Into<String>, setup: S, release: F) -> HarnessResult<Self>
    where
        S: Future<Output = HarnessResult<T>>,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        let value = setup.await?;
        let owned = value.clone();
        Ok(Self::new(label, value, move || release(owned)))
    }
}

impl<T> Deref for ScopedResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for ScopedResource<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            warn!("🚨 {} dropped without release", pending.label);
            spawn_release_on_runtime(vec![pending]);
        }
    }
}

/// Per-test teardown stack.
///
/// Always end it with [`ResourceScope::close`] (or run the test through
/// [`ResourceScope::guarded`]); dropping it unclosed is only a best-effort
/// fallback.
pub struct ResourceScope {
    label: String,
    stack: Vec<PendingRelease>,
}

impl ResourceScope {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stack: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of release steps still pending
    pub fn pending(&self) -> usize {
        self.stack.len()
    }

    /// Labels of pending release steps, in the order they will run
    pub fn pending_labels(&self) -> Vec<String> {
        self.stack.iter().rev().map(|p| p.label.clone()).collect()
    }

    /// Run `setup` and, only if it succeeds, register `release` for the value.
    ///
    /// The release closure gets its own clone of the value.
    pub async fn acquire<T, S, F, Fut>(
        &mut self,
        label: impl Into<String>,
        setup: S,
        release: F,
    ) -> HarnessResult<T>
    where
        T: Clone + Send + 'static,
        S: Future<Output = HarnessResult<T>>,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        let label = label.into();
        let value = setup.await?;
        let owned = value.clone();
        debug!("[{}] acquired {}", self.label, label);
        self.stack.push(PendingRelease::new(label, move || release(owned)));
        Ok(value)
    }

    /// Register a release step that is not tied to a value
    pub fn defer<F, Fut>(&mut self, label: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        self.stack.push(PendingRelease::new(label, release));
    }

    /// Unwind the stack in reverse acquisition order.
    ///
    /// Every step runs even if earlier ones failed; non-benign failures are
    /// returned together as `Teardown`.
    pub async fn close(mut self) -> HarnessResult<()> {
        let stack = std::mem::take(&mut self.stack);
        if stack.is_empty() {
            return Ok(());
        }

        info!("🧹 [{}] tearing down {} resources", self.label, stack.len());
        let mut failures = Vec::new();
        for pending in stack.into_iter().rev() {
            if let Some(failure) = pending.run(&self.label).await {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Teardown { failures })
        }
    }

    /// Run `body` with a fresh scope and always close it afterwards.
    ///
    /// The body's own failure (or panic) wins over teardown failures, which
    /// are then only logged.
    pub async fn guarded<T, F>(label: impl Into<String>, body: F) -> HarnessResult<T>
    where
        F: for<'a> FnOnce(&'a mut ResourceScope) -> BoxFuture<'a, HarnessResult<T>>,
    {
        let mut scope = ResourceScope::new(label);
        let outcome = AssertUnwindSafe(body(&mut scope)).catch_unwind().await;
        let label = scope.label.clone();
        let teardown = scope.close().await;

        match outcome {
            Ok(Ok(value)) => teardown.map(|_| value),
            Ok(Err(e)) => {
                if let Err(teardown_err) = teardown {
                    warn!("⚠️ [{}] teardown after failure: {}", label, teardown_err);
                }
                Err(e)
            }
            Err(panic) => {
                if let Err(teardown_err) = teardown {
                    warn!("⚠️ [{}] teardown after panic: {}", label, teardown_err);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        let leaked: Vec<PendingRelease> = std::mem::take(&mut self.stack).into_iter().rev().collect();
        warn!(
            "🚨 [{}] dropped without close, {} releases pending: {:?}",
            self.label,
            leaked.len(),
            leaked.iter().map(|p| p.label.as_str()).collect::<Vec<_>>()
        );
        spawn_release_on_runtime(leaked);
    }
}

/// Last-resort release from a destructor, in the given order.
///
/// On a multi-threaded runtime the steps run to completion before the
/// destructor returns. On a current-thread runtime they can only be spawned,
/// and are lost if that runtime shuts down first (as it does at the end of a
/// `#[tokio::test]`). Only [`ResourceScope::close`] and
/// [`ResourceScope::guarded`] guarantee release.
fn spawn_release_on_runtime(steps: Vec<PendingRelease>) {
    let run_all = async move {
        for step in steps {
            let _ = step.run("drop").await;
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(run_all));
        }
        Ok(handle) => {
            warn!("🚨 releasing on a background task; lost if the runtime shuts down first");
            handle.spawn(run_all);
        }
        Err(_) => {
            error!("❌ no runtime available, releases from a dropped scope are lost");
        }
    }
}
