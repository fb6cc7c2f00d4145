//! In-memory tracker that records every call, for deterministic tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{TrackerError, TrackerStep};
use crate::tracker::types::*;
use crate::tracker::Tracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    GetIssue(u64),
    CreateIssue { title: String, body: String, labels: Vec<String> },
    AddComment(u64, String),
    Reopen(u64),
    Close(u64),
    SetLabels(u64, Vec<String>),
}

#[derive(Default)]
struct FakeState {
    issues: HashMap<u64, IssueState>,
    next_number: u64,
    calls: Vec<TrackerCall>,
    fail_on: Option<(TrackerStep, u16)>,
}

#[derive(Default)]
pub struct FakeTracker {
    state: Mutex<FakeState>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next created issue gets this number.
    pub fn with_next_number(self, number: u64) -> Self {
        self.state.lock().unwrap().next_number = number;
        self
    }

    pub fn with_issue(self, number: u64, state: IssueState) -> Self {
        self.state.lock().unwrap().issues.insert(number, state);
        self
    }

    /// Make every call at `step` fail with the given HTTP status.
    pub fn fail_on(&self, step: TrackerStep, status: u16) {
        self.state.lock().unwrap().fail_on = Some((step, status));
    }

    pub fn clear_failure(&self) {
        self.state.lock().unwrap().fail_on = None;
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change something on the tracker.
    pub fn mutations(&self) -> Vec<TrackerCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, TrackerCall::GetIssue(_)))
            .collect()
    }

    pub fn issue_state(&self, number: u64) -> Option<IssueState> {
        self.state.lock().unwrap().issues.get(&number).copied()
    }

    fn record(&self, step: TrackerStep, call: TrackerCall) -> Result<(), TrackerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.fail_on {
            Some((failing, status)) if failing == step => {
                Err(TrackerError::from_status(step, status, "injected failure"))
            }
            _ => Ok(()),
        }
    }

    fn url(number: u64) -> String {
        format!("https://github.com/acme/api/issues/{number}")
    }
}

#[async_trait]
impl Tracker for FakeTracker {
    async fn create_issue(&self, _repo: &RepoRef, issue: &NewIssue) -> Result<IssueRef, TrackerError> {
        self.record(
            TrackerStep::CreateIssue,
            TrackerCall::CreateIssue {
                title: issue.title.clone(),
                body: issue.body.clone(),
                labels: issue.labels.clone(),
            },
        )?;

        let mut state = self.state.lock().unwrap();
        let number = state.next_number.max(1);
        state.next_number = number + 1;
        state.issues.insert(number, IssueState::Open);

        Ok(IssueRef {
            number,
            url: Self::url(number),
        })
    }

    async fn add_comment(&self, _repo: &RepoRef, number: u64, body: &str) -> Result<(), TrackerError> {
        self.record(TrackerStep::AddComment, TrackerCall::AddComment(number, body.to_string()))
    }

    async fn reopen(&self, _repo: &RepoRef, number: u64) -> Result<(), TrackerError> {
        self.record(TrackerStep::Reopen, TrackerCall::Reopen(number))?;
        self.state.lock().unwrap().issues.insert(number, IssueState::Open);
        Ok(())
    }

    async fn close(&self, _repo: &RepoRef, number: u64) -> Result<(), TrackerError> {
        self.record(TrackerStep::Close, TrackerCall::Close(number))?;
        self.state.lock().unwrap().issues.insert(number, IssueState::Closed);
        Ok(())
    }

    async fn set_labels(&self, _repo: &RepoRef, number: u64, labels: &[String]) -> Result<(), TrackerError> {
        self.record(TrackerStep::SetLabels, TrackerCall::SetLabels(number, labels.to_vec()))
    }

    async fn get_issue(&self, _repo: &RepoRef, number: u64) -> Result<Option<RemoteIssue>, TrackerError> {
        self.record(TrackerStep::GetIssue, TrackerCall::GetIssue(number))?;
        let state = self.state.lock().unwrap();
        Ok(state.issues.get(&number).map(|s| RemoteIssue {
            number,
            url: Self::url(number),
            state: *s,
        }))
    }
}
