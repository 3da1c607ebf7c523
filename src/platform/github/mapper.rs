use crate::platform::types;

/// Map octocrab Issue to our platform Issue type.
pub fn map_issue(
    issue: &octocrab::models::issues::Issue,
    comments: Vec<octocrab::models::issues::Comment>,
) -> types::Issue {
    types::Issue {
        number: issue.number,
        title: issue.title.clone(),
        body: issue.body.clone().unwrap_or_default(),
        author: issue.user.login.clone(),
        url: issue.html_url.to_string(),
        comments: comments
            .into_iter()
            .filter(|c| c.body.as_deref().is_some_and(|b| !b.trim().is_empty()))
            .map(map_comment)
            .collect(),
    }
}

fn map_comment(comment: octocrab::models::issues::Comment) -> types::Comment {
    types::Comment {
        id: comment.id.into_inner(),
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
    }
}
