use std::collections::BTreeSet;

use crate::error::{TrackerError, TrackerStep};
use crate::linkage::IssueLinkage;
use crate::tracker::types::{IssueRef, NewIssue, RepoRef};
use crate::tracker::Tracker;

use super::types::Transition;

/// Comment posted on the tracked issue right before it is closed.
pub const FIXED_COMMENT: &str = "Build was fixed!";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedText {
    pub title: String,
    pub body: String,
}

/// What a completed transition leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub linkage: IssueLinkage,
    /// The issue filed by a `CreateIssue` transition.
    pub created: Option<IssueRef>,
}

/// Perform the tracker calls for a transition.
///
/// Steps run in order and stop at the first failure; nothing is rolled back.
/// In particular a reopened issue stays open when the follow-up comment fails.
pub async fn execute(
    transition: &Transition,
    text: Option<&RenderedText>,
    labels: &BTreeSet<String>,
    repo: &RepoRef,
    linkage: IssueLinkage,
    tracker: &dyn Tracker,
) -> Result<Execution, TrackerError> {
    let labels: Vec<String> = labels.iter().cloned().collect();

    match *transition {
        Transition::CreateIssue { .. } => {
            let text = require_text(text, TrackerStep::CreateIssue)?;
            let created = tracker
                .create_issue(
                    repo,
                    &NewIssue {
                        title: text.title.clone(),
                        body: text.body.clone(),
                        labels,
                    },
                )
                .await?;

            Ok(Execution {
                linkage: IssueLinkage::tracked(created.number),
                created: Some(created),
            })
        }
        Transition::CommentOpen { issue } => {
            let text = require_text(text, TrackerStep::AddComment)?;
            tracker.add_comment(repo, issue, &text.body).await?;

            Ok(Execution {
                linkage,
                created: None,
            })
        }
        Transition::ReopenAndComment { issue } => {
            let text = require_text(text, TrackerStep::Reopen)?;
            tracker.reopen(repo, issue).await?;
            tracker.add_comment(repo, issue, &text.body).await?;
            if !labels.is_empty() {
                tracker.set_labels(repo, issue, &labels).await?;
            }

            Ok(Execution {
                linkage: IssueLinkage::tracked(issue),
                created: None,
            })
        }
        Transition::CloseIssue { issue } => {
            tracker.add_comment(repo, issue, FIXED_COMMENT).await?;
            tracker.close(repo, issue).await?;

            Ok(Execution {
                linkage: IssueLinkage::NONE,
                created: None,
            })
        }
        Transition::NoOp { .. } => Ok(Execution {
            linkage,
            created: None,
        }),
    }
}

fn require_text(text: Option<&RenderedText>, step: TrackerStep) -> Result<&RenderedText, TrackerError> {
    text.ok_or_else(|| TrackerError::invalid_request(step, "no rendered issue text supplied"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::types::NoOpReason;
    use crate::tracker::fake::{FakeTracker, TrackerCall};
    use crate::tracker::types::IssueState;

    fn repo() -> RepoRef {
        RepoRef::parse("acme/api").unwrap()
    }

    fn text() -> RenderedText {
        RenderedText {
            title: "api #7 failed".to_string(),
            body: "Build 'api' is failing!".to_string(),
        }
    }

    fn labels(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_returns_new_linkage() {
        let tracker = FakeTracker::new().with_next_number(42);
        let execution = execute(
            &Transition::CreateIssue { supersedes: None },
            Some(&text()),
            &labels(&["ci"]),
            &repo(),
            IssueLinkage::NONE,
            &tracker,
        )
        .await
        .unwrap();

        assert_eq!(execution.linkage, IssueLinkage::tracked(42));
        assert_eq!(execution.created.unwrap().number, 42);
        assert_eq!(
            tracker.calls(),
            vec![TrackerCall::CreateIssue {
                title: "api #7 failed".to_string(),
                body: "Build 'api' is failing!".to_string(),
                labels: vec!["ci".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn test_reopen_comments_then_relabels_in_order() {
        let tracker = FakeTracker::new().with_issue(42, IssueState::Closed);
        let execution = execute(
            &Transition::ReopenAndComment { issue: 42 },
            Some(&text()),
            &labels(&["ci", "regression"]),
            &repo(),
            IssueLinkage::tracked(42),
            &tracker,
        )
        .await
        .unwrap();

        assert_eq!(execution.linkage, IssueLinkage::tracked(42));
        assert_eq!(
            tracker.calls(),
            vec![
                TrackerCall::Reopen(42),
                TrackerCall::AddComment(42, "Build 'api' is failing!".to_string()),
                TrackerCall::SetLabels(42, vec!["ci".to_string(), "regression".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_reopen_without_labels_skips_relabel() {
        let tracker = FakeTracker::new().with_issue(42, IssueState::Closed);
        execute(
            &Transition::ReopenAndComment { issue: 42 },
            Some(&text()),
            &BTreeSet::new(),
            &repo(),
            IssueLinkage::tracked(42),
            &tracker,
        )
        .await
        .unwrap();

        assert!(!tracker
            .calls()
            .iter()
            .any(|c| matches!(c, TrackerCall::SetLabels(..))));
    }

    #[tokio::test]
    async fn test_reopen_is_kept_when_comment_fails() {
        let tracker = FakeTracker::new().with_issue(42, IssueState::Closed);
        tracker.fail_on(TrackerStep::AddComment, 502);

        let err = execute(
            &Transition::ReopenAndComment { issue: 42 },
            Some(&text()),
            &labels(&["ci"]),
            &repo(),
            IssueLinkage::tracked(42),
            &tracker,
        )
        .await
        .unwrap_err();

        assert_eq!(err.step, TrackerStep::AddComment);
        assert_eq!(err.status, Some(502));
        assert_eq!(tracker.issue_state(42), Some(IssueState::Open));
        assert_eq!(tracker.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_close_comments_then_closes() {
        let tracker = FakeTracker::new().with_issue(42, IssueState::Open);
        let execution = execute(
            &Transition::CloseIssue { issue: 42 },
            None,
            &BTreeSet::new(),
            &repo(),
            IssueLinkage::tracked(42),
            &tracker,
        )
        .await
        .unwrap();

        assert!(execution.linkage.is_absent());
        assert_eq!(
            tracker.calls(),
            vec![
                TrackerCall::AddComment(42, FIXED_COMMENT.to_string()),
                TrackerCall::Close(42),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_close_reports_step() {
        let tracker = FakeTracker::new().with_issue(42, IssueState::Open);
        tracker.fail_on(TrackerStep::Close, 403);

        let err = execute(
            &Transition::CloseIssue { issue: 42 },
            None,
            &BTreeSet::new(),
            &repo(),
            IssueLinkage::tracked(42),
            &tracker,
        )
        .await
        .unwrap_err();

        assert_eq!(err.step, TrackerStep::Close);
        assert_eq!(tracker.issue_state(42), Some(IssueState::Open));
    }

    #[tokio::test]
    async fn test_noop_makes_no_calls() {
        let tracker = FakeTracker::new();
        let execution = execute(
            &Transition::NoOp {
                reason: NoOpReason::AlreadyReported,
            },
            None,
            &labels(&["ci"]),
            &repo(),
            IssueLinkage::tracked(42),
            &tracker,
        )
        .await
        .unwrap();

        assert_eq!(execution.linkage, IssueLinkage::tracked(42));
        assert!(tracker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_comment_needs_text() {
        let tracker = FakeTracker::new();
        let err = execute(
            &Transition::CommentOpen { issue: 42 },
            None,
            &BTreeSet::new(),
            &repo(),
            IssueLinkage::tracked(42),
            &tracker,
        )
        .await
        .unwrap_err();

        assert_eq!(err.step, TrackerStep::AddComment);
        assert!(tracker.calls().is_empty());
    }
}
