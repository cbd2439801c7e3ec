//! Root confinement for the file-system module.
//!
//! - ".." components are rejected outright
//! - paths are canonicalized, so symlinks pointing outside the root are caught
//! - relative paths are taken relative to the root, not the process cwd
//! - [`Sandbox::resolve_entry`] leaves a final symlink unresolved, for
//!   operations on the link itself

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("path traversal is not allowed: {path}")]
    PathTraversal { path: String },

    #[error("path is outside the workspace root: {path}")]
    OutsideRoot { path: String },

    #[error("no such file or directory: {path}")]
    NotFound { path: String },
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    /// Canonicalized root
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: &Path) -> std::io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn contains_traversal(path: &Path) -> bool {
        path.components().any(|c| matches!(c, Component::ParentDir))
    }

    /// Resolve `requested` to an existing path under the root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, SandboxError> {
        let path = Path::new(requested);
        if Self::contains_traversal(path) {
            return Err(SandboxError::PathTraversal {
                path: requested.to_string(),
            });
        }

        let canonical = self.join(path).canonicalize().map_err(|_| SandboxError::NotFound {
            path: requested.to_string(),
        })?;

        self.confine(canonical, requested)
    }

    /// Like [`resolve`](Self::resolve), but a symlink as the last component
    /// names the link, not its target. Only the parent directory is
    /// canonicalized and confined.
    pub fn resolve_entry(&self, requested: &str) -> Result<PathBuf, SandboxError> {
        let path = Path::new(requested);
        if Self::contains_traversal(path) {
            return Err(SandboxError::PathTraversal {
                path: requested.to_string(),
            });
        }

        let joined = self.join(path);
        let is_link = joined
            .symlink_metadata()
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            return self.resolve(requested);
        }

        let (Some(parent), Some(name)) = (joined.parent(), joined.file_name()) else {
            return Err(SandboxError::NotFound {
                path: requested.to_string(),
            });
        };
        let parent = parent.canonicalize().map_err(|_| SandboxError::NotFound {
            path: requested.to_string(),
        })?;
        self.confine(parent.join(name), requested)
    }

    fn join(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn confine(&self, path: PathBuf, requested: &str) -> Result<PathBuf, SandboxError> {
        if path.starts_with(&self.root) {
            Ok(path)
        } else {
            Err(SandboxError::OutsideRoot {
                path: requested.to_string(),
            })
        }
    }

    /// `path` relative to the root, for output. `.` for the root itself.
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}
