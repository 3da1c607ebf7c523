use std::path::{Path, PathBuf};

use git2::{BranchType, Repository, WorktreeAddOptions, WorktreePruneOptions};

use crate::error::{AppError, Result};

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    Ok(())
}

/// Top of the working tree containing `cwd`, if it is inside a repository.
pub fn repo_root(cwd: &Path) -> Option<PathBuf> {
    let repo = Repository::discover(cwd).ok()?;
    repo.workdir().map(Path::to_path_buf)
}

/// Prune the named worktree, deleting its working directory, and delete
/// `branch`. Missing worktrees and branches are skipped.
fn prune_worktree(repo: &Repository, name: &str, branch: &str) -> Result<()> {
    if let Ok(worktree) = repo.find_worktree(name) {
        let mut opts = WorktreePruneOptions::new();
        opts.valid(true).locked(false).working_tree(true);
        worktree.prune(Some(&mut opts))?;
    }
    if let Ok(mut existing) = repo.find_branch(branch, BranchType::Local) {
        existing.delete()?;
    }
    Ok(())
}

/// Create `branch` from HEAD and check it out in a new worktree at `path`.
///
/// Any earlier worktree or branch of the same name is removed first.
pub async fn add_worktree(repo_root: &Path, name: &str, path: &Path, branch: &str) -> Result<()> {
    validate_branch_name(branch)?;

    let repo_root = repo_root.to_path_buf();
    let name = name.to_string();
    let path = path.to_path_buf();
    let branch = branch.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_root)?;
        let commit = repo.head()?.peel_to_commit()?;

        prune_worktree(&repo, &name, &branch)?;
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let new_branch = repo.branch(&branch, &commit, false)?;
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(new_branch.get()));
        repo.worktree(&name, &path, Some(&opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-worktree task panicked: {e}")))?
}

/// Path of the named worktree if it exists and is still valid.
pub async fn find_worktree(repo_root: &Path, name: &str) -> Result<Option<PathBuf>> {
    let repo_root = repo_root.to_path_buf();
    let name = name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_root)?;
        let found = match repo.find_worktree(&name) {
            Ok(worktree) if worktree.validate().is_ok() => Some(worktree.path().to_path_buf()),
            _ => None,
        };
        Ok(found)
    })
    .await
    .map_err(|e| AppError::Git(format!("Find-worktree task panicked: {e}")))?
}

/// Remove the named worktree and its branch.
pub async fn remove_worktree(repo_root: &Path, name: &str, branch: &str) -> Result<()> {
    validate_branch_name(branch)?;

    let repo_root = repo_root.to_path_buf();
    let name = name.to_string();
    let branch = branch.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_root)?;
        prune_worktree(&repo, &name, &branch)
    })
    .await
    .map_err(|e| AppError::Git(format!("Remove-worktree task panicked: {e}")))?
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;

    /// A repository with one commit on its default branch.
    pub(crate) fn init_repo() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        fs::write(tmp.path().join("README.md"), "hello\n").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        tmp
    }

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_normal() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("change/issue-42").is_ok());
    }

    #[test]
    fn test_repo_root_from_subdirectory() {
        let tmp = init_repo();
        let nested = tmp.path().join("src/deep");
        fs::create_dir_all(&nested).unwrap();

        let root = repo_root(&nested).unwrap();
        assert_eq!(
            root.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_repo_root_outside_repository() {
        let tmp = tempfile::tempdir().unwrap();
        // A tempdir could sit under a repository on some machines.
        if Repository::discover(tmp.path()).is_err() {
            assert!(repo_root(tmp.path()).is_none());
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_worktree() {
        let tmp = init_repo();
        let path = tmp.path().join(".pdd/worktrees/change-issue-1");

        add_worktree(tmp.path(), "change-issue-1", &path, "change/issue-1")
            .await
            .unwrap();
        assert!(path.join("README.md").exists());
        let found = find_worktree(tmp.path(), "change-issue-1").await.unwrap();
        assert_eq!(
            found.unwrap().canonicalize().unwrap(),
            path.canonicalize().unwrap()
        );

        remove_worktree(tmp.path(), "change-issue-1", "change/issue-1")
            .await
            .unwrap();
        assert!(!path.exists());
        let repo = Repository::open(tmp.path()).unwrap();
        assert!(repo.find_branch("change/issue-1", BranchType::Local).is_err());
        assert!(find_worktree(tmp.path(), "change-issue-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_add_worktree_replaces_stale_one() {
        let tmp = init_repo();
        let path = tmp.path().join(".pdd/worktrees/change-issue-2");

        add_worktree(tmp.path(), "change-issue-2", &path, "change/issue-2")
            .await
            .unwrap();
        fs::write(path.join("scratch.txt"), "left over").unwrap();

        add_worktree(tmp.path(), "change-issue-2", &path, "change/issue-2")
            .await
            .unwrap();
        assert!(!path.join("scratch.txt").exists());
        assert!(path.join("README.md").exists());
    }

    #[tokio::test]
    async fn test_add_worktree_without_commits_fails() {
        let tmp = tempfile::tempdir().unwrap();
        Repository::init(tmp.path()).unwrap();
        let path = tmp.path().join("wt");

        let result = add_worktree(tmp.path(), "wt", &path, "change/issue-3").await;
        assert!(result.is_err());
    }
}
