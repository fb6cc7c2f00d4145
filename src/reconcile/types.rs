use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::linkage::HistoryAction;

/// Result of a completed build as reported by the job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum BuildOutcome {
    Success,
    Failure,
    Unstable,
    /// Aborted, not built, or anything else the runner reports.
    Other,
}

impl From<String> for BuildOutcome {
    fn from(raw: String) -> Self {
        BuildOutcome::from(raw.as_str())
    }
}

impl From<&str> for BuildOutcome {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => BuildOutcome::Success,
            "failure" => BuildOutcome::Failure,
            "unstable" => BuildOutcome::Unstable,
            _ => BuildOutcome::Other,
        }
    }
}

/// Remote state of the tracked issue.
pub use crate::tracker::types::IssueState as RemoteState;

/// Why a build needed no tracker action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    /// Build passed and nothing is tracked.
    Passing,
    /// Build passed but the tracked issue was already closed.
    AlreadyClosed,
    /// Still failing and the open issue is not appended to.
    AlreadyReported,
    /// Unstable or other outcomes neither open nor close issues.
    IgnoredOutcome,
}

/// The single action taken in response to one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// File a new issue. `supersedes` is the previously tracked issue that
    /// was closed or has disappeared.
    CreateIssue { supersedes: Option<u64> },
    CommentOpen { issue: u64 },
    ReopenAndComment { issue: u64 },
    CloseIssue { issue: u64 },
    NoOp { reason: NoOpReason },
}

impl Transition {
    /// Whether executing this transition needs a rendered title and body.
    pub fn needs_text(&self) -> bool {
        matches!(
            self,
            Transition::CreateIssue { .. }
                | Transition::CommentOpen { .. }
                | Transition::ReopenAndComment { .. }
        )
    }

    /// History entry recorded when this transition completes.
    pub fn history_action(&self) -> Option<HistoryAction> {
        match self {
            Transition::CreateIssue { .. } => Some(HistoryAction::Open),
            Transition::CommentOpen { .. } => Some(HistoryAction::Continue),
            Transition::ReopenAndComment { .. } => Some(HistoryAction::Reopen),
            Transition::CloseIssue { .. } => Some(HistoryAction::Close),
            Transition::NoOp {
                reason: NoOpReason::AlreadyReported,
            } => Some(HistoryAction::Continue),
            Transition::NoOp { .. } => None,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::CreateIssue { supersedes: None } => write!(f, "create-issue"),
            Transition::CreateIssue {
                supersedes: Some(old),
            } => write!(f, "create-issue (supersedes #{old})"),
            Transition::CommentOpen { issue } => write!(f, "comment #{issue}"),
            Transition::ReopenAndComment { issue } => write!(f, "reopen #{issue}"),
            Transition::CloseIssue { issue } => write!(f, "close #{issue}"),
            Transition::NoOp { .. } => write!(f, "no-op"),
        }
    }
}

/// Effective per-job settings after layering job overrides on the defaults.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Reopen a closed tracked issue instead of filing a new one.
    pub reopen_existing: bool,
    /// Comment on the open issue for every repeated failure.
    pub append_on_repeat_failure: bool,
    /// Trust the stored linkage for repeated failures without asking the
    /// tracker, when neither reopen nor append is enabled.
    pub skip_remote_check: bool,
    pub title_template: String,
    pub body_template: String,
    pub labels: BTreeSet<String>,
    /// Job-level repository, wins over the one the runner reports.
    pub repository_override: Option<String>,
    /// Global fallback repository.
    pub default_repository: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parsing() {
        assert_eq!(BuildOutcome::from("SUCCESS"), BuildOutcome::Success);
        assert_eq!(BuildOutcome::from("failure"), BuildOutcome::Failure);
        assert_eq!(BuildOutcome::from(" Unstable "), BuildOutcome::Unstable);
        assert_eq!(BuildOutcome::from("ABORTED"), BuildOutcome::Other);
    }

    #[test]
    fn test_outcome_deserializes_from_any_string() {
        let outcome: BuildOutcome = serde_json::from_str("\"NOT_BUILT\"").unwrap();
        assert_eq!(outcome, BuildOutcome::Other);
        let outcome: BuildOutcome = serde_json::from_str("\"FAILURE\"").unwrap();
        assert_eq!(outcome, BuildOutcome::Failure);
    }

    #[test]
    fn test_repeat_failure_without_comment_is_recorded_as_continue() {
        let transition = Transition::NoOp {
            reason: NoOpReason::AlreadyReported,
        };
        assert_eq!(transition.history_action(), Some(HistoryAction::Continue));
        assert!(!transition.needs_text());
        assert_eq!(
            Transition::NoOp {
                reason: NoOpReason::Passing
            }
            .history_action(),
            None
        );
    }
}
