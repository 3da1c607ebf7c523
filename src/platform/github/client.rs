use async_trait::async_trait;
use octocrab::Octocrab;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::Platform;

use super::mapper;

pub struct GitHubPlatform {
    client: Octocrab,
}

impl GitHubPlatform {
    /// Authenticate with the configured token, or anonymously without one.
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = &config.token {
            builder = builder.personal_token(token.clone());
        } else {
            tracing::debug!("No GitHub token configured, using anonymous access");
        }
        let client = builder
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;
        Ok(Self { client })
    }

    fn parse_repo(repo_full_name: &str) -> Result<(&str, &str)> {
        let parts: Vec<&str> = repo_full_name.splitn(2, '/').collect();
        if parts.len() != 2 {
            return Err(AppError::GitHubApi(format!(
                "Invalid repo name: {repo_full_name}"
            )));
        }
        Ok((parts[0], parts[1]))
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn get_issue(&self, repo_full_name: &str, issue_number: u64) -> Result<Issue> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;

        let issue = self.client.issues(owner, repo).get(issue_number).await?;

        let first_page = self
            .client
            .issues(owner, repo)
            .list_comments(issue_number)
            .per_page(100)
            .send()
            .await?;
        // Follows the Link headers until the last page.
        let comments = self.client.all_pages(first_page).await?;

        tracing::debug!(
            repo = repo_full_name,
            issue = issue_number,
            comments = comments.len(),
            "Fetched issue"
        );
        Ok(mapper::map_issue(&issue, comments))
    }
}
