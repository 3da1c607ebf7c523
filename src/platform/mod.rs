pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Fetch a full issue with comments.
    async fn get_issue(&self, repo_full_name: &str, issue_number: u64) -> Result<Issue>;
}
