//! Test helpers for harness scenarios

use std::path::{Path, PathBuf};
use std::sync::Arc;

use harness::{HarnessOptions, HarnessResult, MockHawkbitBackend, Session};

use super::fixtures::TestFixtures;

pub struct TestHelpers;

impl TestHelpers {
    /// Session on a mocked backend, writing artifacts into `dir`
    pub async fn mock_session(dir: &Path, backend: MockHawkbitBackend) -> Session {
        Self::session_with(Self::options_in(dir), backend).await
    }

    /// Like [`TestHelpers::mock_session`], but generated configs are kept
    pub async fn keeping_session(dir: &Path, backend: MockHawkbitBackend) -> Session {
        Self::session_with(Self::options_in(dir).keep_configs(true), backend).await
    }

    fn options_in(dir: &Path) -> HarnessOptions {
        HarnessOptions::for_instance(TestFixtures::backend_addr())
            .artifact_dir(dir)
            .build_dir(dir.join("build"))
    }

    async fn session_with(options: HarnessOptions, backend: MockHawkbitBackend) -> Session {
        shared::logging::init_tracing("debug");
        Session::with_backend(options, Arc::new(backend)).await.unwrap()
    }

    /// Unwrap `result`, or report a skip when the environment lacks what the
    /// scenario needs. Any other error fails the test.
    pub fn skip_if_unavailable<T>(scenario: &str, result: HarnessResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => match e.skip_reason() {
                Some(reason) => {
                    eprintln!("SKIPPED {scenario}: {reason}");
                    None
                }
                None => panic!("{scenario} failed: {e}"),
            },
        }
    }

    /// Executable shell script standing in for a helper binary
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }
}
