pub mod git;
pub mod manager;

pub use manager::{Worktree, WorktreeManager, WorktreeMode, WorktreeProvider};
