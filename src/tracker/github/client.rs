use async_trait::async_trait;
use octocrab::models::IssueState as GhIssueState;
use octocrab::Octocrab;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result, TrackerError, TrackerStep};
use crate::tracker::types::*;
use crate::tracker::Tracker;

use super::mapper;

pub struct GitHubTracker {
    client: Octocrab,
}

impl GitHubTracker {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(AppError::Config(
                "GitHub token is not set; configure github.token".to_string(),
            ));
        }

        let mut builder = Octocrab::builder().personal_token(config.token.clone());
        if let Some(api_url) = &config.api_url {
            builder = builder
                .base_uri(api_url.as_str())
                .map_err(|e| AppError::Config(format!("Invalid GitHub API URL {api_url}: {e}")))?;
        }

        let client = builder
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self { client })
    }

    async fn set_state(
        &self,
        repo: &RepoRef,
        number: u64,
        state: GhIssueState,
        step: TrackerStep,
    ) -> std::result::Result<(), TrackerError> {
        self.client
            .issues(&repo.owner, &repo.name)
            .update(number)
            .state(state)
            .send()
            .await
            .map_err(|e| mapper::map_error(step, e))?;

        Ok(())
    }
}

#[async_trait]
impl Tracker for GitHubTracker {
    async fn create_issue(
        &self,
        repo: &RepoRef,
        issue: &NewIssue,
    ) -> std::result::Result<IssueRef, TrackerError> {
        let issues = self.client.issues(&repo.owner, &repo.name);
        let mut request = issues.create(&issue.title).body(&issue.body);
        if !issue.labels.is_empty() {
            request = request.labels(issue.labels.clone());
        }

        let created = request
            .send()
            .await
            .map_err(|e| mapper::map_error(TrackerStep::CreateIssue, e))?;

        Ok(mapper::map_issue_ref(&created))
    }

    async fn add_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> std::result::Result<(), TrackerError> {
        self.client
            .issues(&repo.owner, &repo.name)
            .create_comment(number, body)
            .await
            .map_err(|e| mapper::map_error(TrackerStep::AddComment, e))?;

        Ok(())
    }

    async fn reopen(&self, repo: &RepoRef, number: u64) -> std::result::Result<(), TrackerError> {
        self.set_state(repo, number, GhIssueState::Open, TrackerStep::Reopen)
            .await
    }

    async fn close(&self, repo: &RepoRef, number: u64) -> std::result::Result<(), TrackerError> {
        self.set_state(repo, number, GhIssueState::Closed, TrackerStep::Close)
            .await
    }

    async fn set_labels(
        &self,
        repo: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> std::result::Result<(), TrackerError> {
        self.client
            .issues(&repo.owner, &repo.name)
            .replace_all_labels(number, labels)
            .await
            .map_err(|e| mapper::map_error(TrackerStep::SetLabels, e))?;

        Ok(())
    }

    async fn get_issue(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> std::result::Result<Option<RemoteIssue>, TrackerError> {
        match self.client.issues(&repo.owner, &repo.name).get(number).await {
            Ok(issue) => Ok(Some(mapper::map_remote_issue(&issue))),
            Err(e) => {
                let error = mapper::map_error(TrackerStep::GetIssue, e);
                if mapper::is_missing(&error) {
                    tracing::debug!(repo = %repo, issue = number, "Tracked issue no longer exists");
                    Ok(None)
                } else {
                    Err(error)
                }
            }
        }
    }
}
