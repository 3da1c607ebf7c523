use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::WorktreeConfig;
use crate::error::{AppError, Result};
use crate::workspace::git;

/// An isolated checkout where the implementation steps run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: String,
    pub repo_root: PathBuf,
    /// Worktree name as registered with git.
    pub name: String,
}

/// How `create` treats a worktree left behind by an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeMode {
    /// Discard any existing worktree and branch and start from HEAD.
    Fresh,
    /// Keep the existing worktree. It holds the implementation, so a missing
    /// one is an error rather than a fresh checkout.
    Reuse,
}

/// Creates and tears down per-issue worktrees.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    async fn create(
        &self,
        repo_root: &Path,
        issue_number: u64,
        mode: WorktreeMode,
    ) -> Result<Worktree>;

    async fn remove(&self, worktree: &Worktree) -> Result<()>;
}

/// git2-backed worktrees under `<repo root>/<base_dir>`.
pub struct WorktreeManager {
    base_dir: PathBuf,
    branch_prefix: String,
}

impl WorktreeManager {
    pub fn new(config: &WorktreeConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            branch_prefix: config.branch_prefix.clone(),
        }
    }

    fn branch_name(&self, issue_number: u64) -> String {
        format!("{}{issue_number}", self.branch_prefix)
    }

    fn layout(&self, repo_root: &Path, issue_number: u64) -> Worktree {
        let branch = self.branch_name(issue_number);
        let name = branch.replace('/', "-");
        Worktree {
            path: repo_root.join(&self.base_dir).join(&name),
            branch,
            repo_root: repo_root.to_path_buf(),
            name,
        }
    }
}

#[async_trait]
impl WorktreeProvider for WorktreeManager {
    async fn create(
        &self,
        repo_root: &Path,
        issue_number: u64,
        mode: WorktreeMode,
    ) -> Result<Worktree> {
        let worktree = self.layout(repo_root, issue_number);

        if mode == WorktreeMode::Reuse {
            match git::find_worktree(repo_root, &worktree.name).await {
                Ok(Some(path)) => {
                    tracing::info!(path = %path.display(), "Reusing existing worktree");
                    return Ok(Worktree { path, ..worktree });
                }
                Ok(None) => {
                    tracing::warn!(name = %worktree.name, "No worktree to reuse");
                    return Err(AppError::Worktree(
                        "implementation worktree missing".to_string(),
                    ));
                }
                Err(e) => return Err(AppError::Worktree(e.to_string())),
            }
        }

        git::add_worktree(repo_root, &worktree.name, &worktree.path, &worktree.branch)
            .await
            .map_err(|e| AppError::Worktree(e.to_string()))?;

        tracing::info!(
            path = %worktree.path.display(),
            branch = %worktree.branch,
            "Worktree created"
        );
        Ok(worktree)
    }

    async fn remove(&self, worktree: &Worktree) -> Result<()> {
        git::remove_worktree(&worktree.repo_root, &worktree.name, &worktree.branch)
            .await
            .map_err(|e| AppError::Worktree(e.to_string()))?;
        tracing::info!(path = %worktree.path.display(), "Worktree removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::git::tests::init_repo;

    fn manager() -> WorktreeManager {
        WorktreeManager::new(&WorktreeConfig::default())
    }

    #[test]
    fn test_layout() {
        let worktree = manager().layout(Path::new("/repo"), 42);
        assert_eq!(worktree.branch, "change/issue-42");
        assert_eq!(worktree.name, "change-issue-42");
        assert_eq!(
            worktree.path,
            PathBuf::from("/repo/.pdd/worktrees/change-issue-42")
        );
    }

    #[tokio::test]
    async fn test_create_and_remove() {
        let tmp = init_repo();
        let manager = manager();

        let worktree = manager
            .create(tmp.path(), 7, WorktreeMode::Fresh)
            .await
            .unwrap();
        assert!(worktree.path.join("README.md").exists());

        manager.remove(&worktree).await.unwrap();
        assert!(!worktree.path.exists());
    }

    #[tokio::test]
    async fn test_reuse_keeps_existing_files() {
        let tmp = init_repo();
        let manager = manager();

        let first = manager
            .create(tmp.path(), 8, WorktreeMode::Fresh)
            .await
            .unwrap();
        std::fs::write(first.path.join("impl.py"), "print('hi')").unwrap();

        let second = manager
            .create(tmp.path(), 8, WorktreeMode::Reuse)
            .await
            .unwrap();
        assert!(second.path.join("impl.py").exists());
        assert_eq!(second.branch, first.branch);
    }

    #[tokio::test]
    async fn test_reuse_without_worktree_is_an_error() {
        let tmp = init_repo();
        let manager = manager();
        let err = manager
            .create(tmp.path(), 9, WorktreeMode::Reuse)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Worktree error: implementation worktree missing");
        assert!(!manager.layout(tmp.path(), 9).path.exists());
    }

    #[tokio::test]
    async fn test_create_outside_repository_is_worktree_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = manager()
            .create(tmp.path(), 1, WorktreeMode::Fresh)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Worktree(_)));
    }
}
