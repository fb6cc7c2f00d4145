pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use file::FileLinkageStore;
pub use memory::MemoryLinkageStore;

/// Transition history kept per job is capped to this many records.
pub const HISTORY_LIMIT: usize = 50;

/// The issue currently representing a job's failure streak, if any.
///
/// Persisted as a plain integer where `0` means no tracked issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct IssueLinkage(Option<u64>);

impl IssueLinkage {
    pub const NONE: IssueLinkage = IssueLinkage(None);

    pub fn tracked(number: u64) -> Self {
        Self::from(number)
    }

    pub fn issue(self) -> Option<u64> {
        self.0
    }

    pub fn is_absent(self) -> bool {
        self.0.is_none()
    }
}

impl From<u64> for IssueLinkage {
    fn from(raw: u64) -> Self {
        if raw == 0 {
            IssueLinkage(None)
        } else {
            IssueLinkage(Some(raw))
        }
    }
}

impl From<IssueLinkage> for u64 {
    fn from(linkage: IssueLinkage) -> Self {
        linkage.0.unwrap_or(0)
    }
}

/// What a transition did to the tracked issue, for the job's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Open,
    Continue,
    Reopen,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Display name of the build that caused the transition.
    pub build: String,
    pub action: HistoryAction,
    pub issue: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub at: DateTime<Utc>,
}

/// A job's record as persisted: `issue_number = 0` means no tracked issue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredLinkage {
    #[serde(rename = "issue_number")]
    pub linkage: IssueLinkage,
    /// Bumped on every save; `0` means the job was never written.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

/// A write against the revision it was decided from.
#[derive(Debug, Clone)]
pub struct LinkageUpdate {
    pub expected_revision: u64,
    pub linkage: IssueLinkage,
    pub record: Option<TransitionRecord>,
}

#[async_trait]
pub trait LinkageStore: Send + Sync {
    /// Read a job's record. Unknown jobs and unreadable records yield the
    /// empty default.
    async fn load(&self, job: &str) -> StoredLinkage;

    /// Write a job's record if nobody else has since `expected_revision`.
    /// Returns the new revision.
    async fn save(&self, job: &str, update: LinkageUpdate) -> Result<u64>;
}

/// Apply an update to a record, enforcing the revision check.
pub(crate) fn apply_update(job: &str, current: &mut StoredLinkage, update: LinkageUpdate) -> Result<u64> {
    if current.revision != update.expected_revision {
        return Err(crate::error::AppError::StoreConflict {
            job: job.to_string(),
            expected: update.expected_revision,
            found: current.revision,
        });
    }

    current.linkage = update.linkage;
    current.revision += 1;
    if let Some(record) = update.record {
        current.history.push(record);
        if current.history.len() > HISTORY_LIMIT {
            let excess = current.history.len() - HISTORY_LIMIT;
            current.history.drain(..excess);
        }
    }

    Ok(current.revision)
}
