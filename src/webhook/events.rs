use serde::Deserialize;

use crate::reconcile::types::BuildOutcome;
use crate::reconcile::{BuildCompletion, PreviousBuild};
use crate::render::{BuildContext, Change};

/// Payload the job runner posts when a build finishes.
#[derive(Debug, Deserialize)]
pub struct BuildCompletedEvent {
    pub job: String,
    pub outcome: BuildOutcome,
    pub build: BuildPayload,
    /// Repository the runner associates with the job (`owner/name` or URL).
    #[serde(default)]
    pub repository: Option<String>,
    /// Trailing lines of build output.
    #[serde(default)]
    pub log_tail: Vec<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
    /// Earlier builds, newest first.
    #[serde(default)]
    pub previous_builds: Vec<PreviousBuild>,
}

#[derive(Debug, Deserialize)]
pub struct BuildPayload {
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl BuildCompletedEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn into_completion(self) -> BuildCompletion {
        BuildCompletion {
            context: BuildContext {
                job_name: self.job.clone(),
                build_number: self.build.number,
                display_name: self.build.display_name.unwrap_or_default(),
                url: self.build.url.unwrap_or_default(),
                log_tail: self.log_tail,
                changes: self.changes,
            },
            job: self.job,
            outcome: self.outcome,
            repository: self.repository,
            previous_builds: self.previous_builds,
        }
    }
}
