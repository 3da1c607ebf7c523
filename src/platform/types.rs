use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::workflow::types::IssueContext;

/// Owner, repository and number parsed from an issue URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl IssueRef {
    /// Parse `https://<host>/<owner>/<repo>/issues/<number>`.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || AppError::Config(format!("Not an issue URL: {url}"));

        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .ok_or_else(invalid)?;
        let rest = rest.split(['?', '#']).next().unwrap_or(rest);
        let parts: Vec<&str> = rest.trim_end_matches('/').split('/').collect();

        match parts.as_slice() {
            [_host, owner, repo, "issues", number] if !owner.is_empty() && !repo.is_empty() => {
                Ok(Self {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    number: number.parse().map_err(|_| invalid())?,
                })
            }
            _ => Err(invalid()),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub url: String,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
}

impl Issue {
    /// Body followed by the comment thread, as shown to the workflow.
    pub fn content(&self) -> String {
        let mut content = self.body.clone();
        for comment in &self.comments {
            content.push_str(&format!("\n\n**@{}:** {}", comment.author, comment.body));
        }
        content
    }

    pub fn into_context(self, issue_ref: &IssueRef) -> IssueContext {
        IssueContext {
            content: self.content(),
            url: self.url,
            repo_owner: issue_ref.owner.clone(),
            repo_name: issue_ref.repo.clone(),
            number: self.number,
            author: self.author,
            title: self.title,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_issue_url() {
        let parsed = IssueRef::parse("https://github.com/promptdriven/pdd/issues/319").unwrap();
        assert_eq!(parsed.owner, "promptdriven");
        assert_eq!(parsed.repo, "pdd");
        assert_eq!(parsed.number, 319);
        assert_eq!(parsed.full_name(), "promptdriven/pdd");
    }

    #[test]
    fn test_parse_ignores_fragment_and_trailing_slash() {
        let parsed =
            IssueRef::parse("https://github.com/o/r/issues/5/#issuecomment-1").unwrap();
        assert_eq!(parsed.number, 5);
        let parsed = IssueRef::parse("https://github.com/o/r/issues/6?x=1").unwrap();
        assert_eq!(parsed.number, 6);
    }

    #[test]
    fn test_parse_rejects_other_urls() {
        assert!(IssueRef::parse("https://github.com/o/r/pull/5").is_err());
        assert!(IssueRef::parse("https://github.com/o/r/issues/abc").is_err());
        assert!(IssueRef::parse("git@github.com:o/r.git").is_err());
        assert!(IssueRef::parse("https://github.com/o/r").is_err());
    }

    #[test]
    fn test_content_includes_comments() {
        let issue = Issue {
            number: 1,
            title: "t".to_string(),
            body: "Body {with braces}".to_string(),
            author: "alice".to_string(),
            url: "https://github.com/o/r/issues/1".to_string(),
            comments: vec![Comment {
                id: 9,
                author: "bob".to_string(),
                body: "+1".to_string(),
            }],
        };
        assert_eq!(issue.content(), "Body {with braces}\n\n**@bob:** +1");

        let context = issue.into_context(&IssueRef::parse("https://github.com/o/r/issues/1").unwrap());
        assert_eq!(context.repo_owner, "o");
        assert_eq!(context.author, "alice");
        assert!(context.content.contains("**@bob:**"));
    }
}
