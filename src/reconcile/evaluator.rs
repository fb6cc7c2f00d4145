use crate::linkage::IssueLinkage;

use super::types::{BuildOutcome, NoOpReason, Policy, RemoteState, Transition};

/// Whether deciding for this build needs the tracked issue's remote state.
///
/// Nothing is fetched when no issue is tracked, for outcomes that never
/// touch the tracker, and for repeated failures when `skip_remote_check`
/// is set and no policy asks for a repeat action.
pub fn needs_remote_state(outcome: BuildOutcome, linkage: IssueLinkage, policy: &Policy) -> bool {
    if linkage.is_absent() {
        return false;
    }

    match outcome {
        BuildOutcome::Success => true,
        BuildOutcome::Failure => !repeat_failure_fast_path(policy),
        BuildOutcome::Unstable | BuildOutcome::Other => false,
    }
}

fn repeat_failure_fast_path(policy: &Policy) -> bool {
    policy.skip_remote_check && !policy.reopen_existing && !policy.append_on_repeat_failure
}

/// Decide the single transition for a build.
///
/// `remote` is `None` when nothing is tracked, when the fetch was skipped,
/// or when the tracked issue no longer exists. A tracked issue that has
/// disappeared is treated as if nothing were tracked.
pub fn decide(
    outcome: BuildOutcome,
    linkage: IssueLinkage,
    remote: Option<RemoteState>,
    policy: &Policy,
) -> Transition {
    match outcome {
        BuildOutcome::Success => match (linkage.issue(), remote) {
            (Some(issue), Some(RemoteState::Open)) => Transition::CloseIssue { issue },
            (Some(_), Some(RemoteState::Closed)) => Transition::NoOp {
                reason: NoOpReason::AlreadyClosed,
            },
            _ => Transition::NoOp {
                reason: NoOpReason::Passing,
            },
        },
        BuildOutcome::Failure => match (linkage.issue(), remote) {
            (None, _) => Transition::CreateIssue { supersedes: None },
            (Some(_), None) if repeat_failure_fast_path(policy) => Transition::NoOp {
                reason: NoOpReason::AlreadyReported,
            },
            (Some(issue), None) => Transition::CreateIssue {
                supersedes: Some(issue),
            },
            (Some(issue), Some(RemoteState::Open)) => {
                if policy.append_on_repeat_failure {
                    Transition::CommentOpen { issue }
                } else {
                    Transition::NoOp {
                        reason: NoOpReason::AlreadyReported,
                    }
                }
            }
            (Some(issue), Some(RemoteState::Closed)) => {
                if policy.reopen_existing {
                    Transition::ReopenAndComment { issue }
                } else {
                    Transition::CreateIssue {
                        supersedes: Some(issue),
                    }
                }
            }
        },
        BuildOutcome::Unstable | BuildOutcome::Other => Transition::NoOp {
            reason: NoOpReason::IgnoredOutcome,
        },
    }
}
