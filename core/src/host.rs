//! Collaborators supplied by the program embedding the core.
//!
//! The core never renders anything. Listing workspace folders, asking the
//! user to choose one, opening a file for editing and showing messages are
//! all delegated to a [`Host`].

use std::path::{Path, PathBuf};

/// A named directory the user has open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    pub name: String,
    pub path: PathBuf,
}

impl WorkspaceRoot {
    /// Root named after the last component of `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self { name, path }
    }
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Info(String),
    Error(String),
}

/// UI services consumed by the core.
#[async_trait::async_trait]
pub trait Host: Send + Sync {
    /// Candidate workspace roots, in display order.
    async fn workspace_roots(&self) -> Vec<WorkspaceRoot>;

    /// Ask the user to choose one of `roots`. `None` means cancelled.
    async fn pick_root(&self, roots: &[WorkspaceRoot]) -> Option<WorkspaceRoot>;

    /// Open `path` for text editing.
    async fn open_for_editing(&self, path: &Path) -> std::io::Result<()>;

    /// Show an informational or error message.
    async fn report(&self, report: Report);
}
