pub mod github;
pub mod types;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::error::TrackerError;
use types::*;

/// Command-style interface to the issue tracker.
///
/// Every side effect the reconciler has on the tracker goes through one of
/// these calls, so a recording implementation sees the full interaction.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Open a new issue and return its number and URL.
    async fn create_issue(&self, repo: &RepoRef, issue: &NewIssue) -> Result<IssueRef, TrackerError>;

    /// Post a comment on an issue.
    async fn add_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<(), TrackerError>;

    async fn reopen(&self, repo: &RepoRef, number: u64) -> Result<(), TrackerError>;

    async fn close(&self, repo: &RepoRef, number: u64) -> Result<(), TrackerError>;

    /// Replace the full label set of an issue.
    async fn set_labels(&self, repo: &RepoRef, number: u64, labels: &[String]) -> Result<(), TrackerError>;

    /// Fetch an issue. `Ok(None)` means the issue no longer exists.
    async fn get_issue(&self, repo: &RepoRef, number: u64) -> Result<Option<RemoteIssue>, TrackerError>;
}
