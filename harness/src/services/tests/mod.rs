//! Service-level tests
//!
//! One file per service. Helper binaries are stood in for by small `sh`
//! scripts written into a temp dir.

mod command_runner;
mod config_store;
mod output_matcher;

pub mod common {
    use std::path::{Path, PathBuf};

    /// Write an executable shell script named `name` into `dir`
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
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
