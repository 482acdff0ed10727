use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::events::Project;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Isolates checkouts per issue/MR.
    pub workspace_id: String,
    pub checkout_branch: Option<String>,
    pub base_branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Result of a direct push, which may include an automatic `pull --rebase`.
pub struct PushOutcome {
    pub success: bool,
    pub rebased: bool,
    pub conflicts: Vec<String>,
    pub error: Option<String>,
}

impl PushOutcome {
    pub fn pushed() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.success && !self.conflicts.is_empty()
    }
}

/// Git checkout collaborator: clone, branch, commit, push.
#[async_trait]
pub trait ProjectWorkspace: Send + Sync {
    async fn prepare_project(
        &self,
        project: &Project,
        base_branch: &str,
        options: &PrepareOptions,
    ) -> Result<PathBuf>;

    async fn commit_and_push(&self, path: &Path, message: &str, branch: &str) -> Result<()>;

    async fn commit_and_push_changes(&self, path: &Path, message: &str) -> Result<PushOutcome>;

    async fn push_after_conflict_resolution(&self, path: &Path) -> Result<PushOutcome>;

    async fn switch_to_and_push_branch(
        &self,
        path: &Path,
        branch: &str,
        message: &str,
    ) -> Result<()>;
}
