use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A GitHub repository addressed as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse `owner/name`, an HTTPS project or clone URL, or an SSH clone URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        let path = if let Some(rest) = trimmed.strip_prefix("git@") {
            rest.split_once(':').map(|(_, path)| path)
        } else if let Some(rest) = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
        {
            rest.split_once('/').map(|(_, path)| path)
        } else {
            Some(trimmed)
        };

        let path = path
            .map(|p| p.trim_end_matches(".git"))
            .ok_or_else(|| AppError::Config(format!("GitHub project not configured: {raw}")))?;

        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if valid_segment(owner) && valid_segment(name) => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(AppError::Config(format!(
                "GitHub project not configured: {raw}"
            ))),
        }
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Identity of an issue that exists on the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct RemoteIssue {
    pub number: u64,
    pub url: String,
    pub state: IssueState,
}
