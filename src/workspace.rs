//! Per-job scratch directories.
//!
//! Every job gets its own directory, `hlsgrab-<random>` under the manager's
//! root, holding segment buffers and intermediate track files. The directory
//! is removed when the job returns, when it fails, and when its future is
//! dropped: [`Workspace`] cleans up in `Drop`, so no exit path can leak it.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::download::BufferTarget;

/// Prefix of every workspace directory name.
pub const WORKSPACE_PREFIX: &str = "hlsgrab-";

/// Where segment bodies are kept between download and reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// One file per segment inside the workspace.
    #[default]
    Disk,
    /// Owned in-memory buffers; the workspace directory only holds
    /// intermediate track files.
    Memory,
}

/// Errors creating or removing a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("cannot create workspace under {root}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot remove workspace {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Allocates workspaces under a root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl Default for WorkspaceManager {
    /// Workspaces under the system temporary directory.
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl WorkspaceManager {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory new workspaces are created in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, uniquely named workspace.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Create`] if the directory cannot be created.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn create(&self, mode: BufferMode) -> Result<Workspace, WorkspaceError> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|source| WorkspaceError::Create {
                root: self.root.clone(),
                source,
            })?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), ?mode, "created workspace");

        Ok(Workspace {
            path,
            mode,
            dir: Mutex::new(Some(dir)),
        })
    }

    /// Runs `f` with a fresh workspace and removes the workspace afterwards.
    ///
    /// Removal also happens if the returned future is dropped before
    /// completion. A failed removal is logged, not returned: the work itself
    /// already finished.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Create`] if the workspace cannot be created;
    /// `f` is not run in that case.
    pub async fn with_workspace<F, Fut, T>(&self, mode: BufferMode, f: F) -> Result<T, WorkspaceError>
    where
        F: FnOnce(Arc<Workspace>) -> Fut,
        Fut: Future<Output = T>,
    {
        let workspace = Arc::new(self.create(mode)?);
        let output = f(Arc::clone(&workspace)).await;

        if let Err(e) = workspace.cleanup() {
            warn!(error = %e, "workspace cleanup failed");
        }
        Ok(output)
    }
}

/// A job's exclusive scratch directory.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    mode: BufferMode,
    dir: Mutex<Option<TempDir>>,
}

impl Workspace {
    /// Location of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Where segment `index` of `track` is buffered.
    #[must_use]
    pub fn buffer_target(&self, track: &str, index: usize) -> BufferTarget {
        match self.mode {
            BufferMode::Disk => {
                BufferTarget::File(self.path.join(format!("{track}_segment_{index:05}.ts")))
            }
            BufferMode::Memory => BufferTarget::Memory,
        }
    }

    /// Path for an intermediate file inside the workspace.
    #[must_use]
    pub fn scratch_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    /// True until [`Workspace::cleanup`] has removed the directory.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Removes every file in the workspace and then the directory itself.
    ///
    /// Idempotent: files or directories that are already gone are not errors,
    /// and calls after the first successful one do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Cleanup`] if something exists but cannot be removed.
    pub fn cleanup(&self) -> Result<(), WorkspaceError> {
        let Some(dir) = self
            .dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        match dir.close() {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed workspace");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::Cleanup {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!(error = %e, "workspace cleanup on drop failed");
        }
    }
}
