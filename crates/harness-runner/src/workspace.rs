//! Build Workspace
//!
//! The temporary directory a session builds into:
//!
//! ```text
//! maestro-build-XXXXXX/
//!   logs/build.log
//!   logs/runner.log
//!   build/            derived output
//! ```
//!
//! Removed exactly once, either explicitly through [`BuildWorkspace::remove`]
//! or when the value is dropped.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

pub struct BuildWorkspace {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl BuildWorkspace {
    /// Create a workspace under the system temp directory
    pub fn create() -> io::Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    /// Create a workspace under `parent`
    pub fn create_in(parent: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("maestro-build-")
            .tempdir_in(parent)?;
        let root = dir.path().to_path_buf();

        std::fs::create_dir_all(root.join("logs"))?;
        std::fs::create_dir_all(root.join("build"))?;

        debug!("Created build workspace {:?}", root);
        Ok(Self { dir: Some(dir), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Derived-output directory handed to the build toolchain
    pub fn derived_output(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn build_log(&self) -> PathBuf {
        self.logs_dir().join("build.log")
    }

    pub fn runner_log(&self) -> PathBuf {
        self.logs_dir().join("runner.log")
    }

    pub fn is_removed(&self) -> bool {
        self.dir.is_none()
    }

    /// Delete the workspace and everything under it. Later calls are no-ops.
    pub fn remove(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                debug!("Removing build workspace {:?}", self.root);
                dir.close()
            }
            None => Ok(()),
        }
    }
}
