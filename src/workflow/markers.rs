use once_cell::sync::Lazy;
use regex::Regex;

use crate::workflow::types::Step;

/// A recognised stop phrase and the reason reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardStopRule {
    pub step: Step,
    pub phrases: &'static [&'static str],
    pub reason: &'static str,
}

pub const HARD_STOPS: &[HardStopRule] = &[
    HardStopRule {
        step: Step::Duplicate,
        phrases: &["Duplicate of #"],
        reason: "Issue is a duplicate",
    },
    HardStopRule {
        step: Step::Docs,
        phrases: &["Already Implemented"],
        reason: "Already implemented",
    },
    HardStopRule {
        step: Step::Clarify,
        phrases: &["Clarification Needed"],
        reason: "Clarification needed",
    },
    HardStopRule {
        step: Step::Architecture,
        phrases: &[
            "Architectural Decision Needed",
            "STOP_CONDITION: Architectural decision needed",
        ],
        reason: "Architectural decision needed",
    },
];

pub const NO_ISSUES_FOUND: &str = "No Issues Found";

static FILE_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:FILES_MODIFIED|FILES_CREATED):[ \t]*(.*)$").expect("valid regex"));

static PR_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[A-Za-z0-9.\-]+/[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+/pull/\d+")
        .expect("valid regex")
});

/// Return the stop reason if `output` of `step` contains a stop phrase.
pub fn hard_stop(step: Step, output: &str) -> Option<&'static str> {
    HARD_STOPS
        .iter()
        .filter(|rule| rule.step == step)
        .find(|rule| rule.phrases.iter().any(|phrase| output.contains(phrase)))
        .map(|rule| rule.reason)
}

/// Files listed after `FILES_MODIFIED:` / `FILES_CREATED:` markers, in order
/// of first appearance.
pub fn file_list(output: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for caps in FILE_LIST.captures_iter(output) {
        for entry in caps[1].split(',') {
            let name = entry.trim().trim_matches('`').trim();
            if !name.is_empty() && !files.iter().any(|f| f == name) {
                files.push(name.to_string());
            }
        }
    }
    files
}

/// Result of one "identify issues" pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    /// The review reported no issues.
    Clean,
    /// The review reported issues to fix.
    IssuesFound,
    /// The review step itself failed.
    Inconclusive,
}

/// Anything other than an explicit "No Issues Found" counts as issues found.
pub fn review_verdict(output: &str) -> ReviewVerdict {
    if output.contains(NO_ISSUES_FOUND) {
        ReviewVerdict::Clean
    } else {
        ReviewVerdict::IssuesFound
    }
}

/// First pull request URL in `output`.
pub fn pr_url(output: &str) -> Option<&str> {
    PR_URL.find(output).map(|m| m.as_str())
}
