use octocrab::models::issues::Issue;

use crate::error::{TrackerError, TrackerStep};
use crate::tracker::types::{self, IssueRef, RemoteIssue};

/// Map an octocrab issue to the identity we keep in history.
pub fn map_issue_ref(issue: &Issue) -> IssueRef {
    IssueRef {
        number: issue.number,
        url: issue.html_url.to_string(),
    }
}

pub fn map_remote_issue(issue: &Issue) -> RemoteIssue {
    let state = match issue.state {
        octocrab::models::IssueState::Closed => types::IssueState::Closed,
        _ => types::IssueState::Open,
    };

    RemoteIssue {
        number: issue.number,
        url: issue.html_url.to_string(),
        state,
    }
}

/// Map an octocrab failure to a tracker error for the given step, keeping the
/// HTTP status when GitHub answered.
pub fn map_error(step: TrackerStep, error: octocrab::Error) -> TrackerError {
    match &error {
        octocrab::Error::GitHub { source, .. } => {
            TrackerError::from_status(step, source.status_code.as_u16(), source.message.clone())
        }
        _ => TrackerError::network(step, error.to_string()),
    }
}

/// Whether a failed fetch means the issue is gone rather than unreachable.
pub fn is_missing(error: &TrackerError) -> bool {
    matches!(error.status, Some(404) | Some(410))
}
