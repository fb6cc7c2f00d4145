pub mod evaluator;
pub mod executor;
pub mod lock;
pub mod types;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::{AppError, Result, TrackerStep};
use crate::linkage::{FileLinkageStore, IssueLinkage, LinkageStore, LinkageUpdate, StoredLinkage, TransitionRecord};
use crate::render::{render_or_raw, BuildContext, TextRenderer, TokenRenderer};
use crate::tracker::github::GitHubTracker;
use crate::tracker::types::RepoRef;
use crate::tracker::Tracker;

use evaluator::{decide, needs_remote_state};
use executor::{execute, RenderedText};
use lock::JobLocks;
use types::{BuildOutcome, NoOpReason, Policy, Transition};

/// A build record from the runner, used to recover linkage for jobs that
/// were tracked before linkage was stored per job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreviousBuild {
    pub number: u64,
    #[serde(default)]
    pub issue_number: Option<u64>,
}

/// A completed build as handed over by the job runner.
#[derive(Debug, Clone)]
pub struct BuildCompletion {
    pub job: String,
    pub outcome: BuildOutcome,
    pub context: BuildContext,
    /// Repository the runner associates with the job, if any.
    pub repository: Option<String>,
    /// Earlier builds, newest first.
    pub previous_builds: Vec<PreviousBuild>,
}

/// What happened for one build.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub job: String,
    pub build: String,
    pub outcome: BuildOutcome,
    pub transition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NoOpReason>,
    /// Issue tracked after this build.
    pub issue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl ReconcileReport {
    /// Report for a build whose reconciliation was abandoned.
    pub fn skipped(build: &BuildCompletion, error: &AppError) -> Self {
        Self {
            job: build.job.clone(),
            build: build.context.display(),
            outcome: build.outcome,
            transition: "skipped".to_string(),
            reason: None,
            issue: None,
            skipped_reason: Some(error.to_string()),
        }
    }
}

/// Pick the repository issues are filed in: the job's own setting, then the
/// one the runner reported, then the global default.
pub fn resolve_repository(policy: &Policy, reported: Option<&str>) -> Result<RepoRef> {
    let raw = policy
        .repository_override
        .as_deref()
        .or(reported.filter(|r| !r.trim().is_empty()))
        .or(policy.default_repository.as_deref())
        .ok_or_else(|| AppError::Config("GitHub project not configured".to_string()))?;

    RepoRef::parse(raw)
}

/// The issue recorded by the most recent earlier build, if any.
pub fn legacy_issue(previous_builds: &[PreviousBuild]) -> Option<u64> {
    previous_builds
        .iter()
        .find_map(|b| b.issue_number.filter(|n| *n > 0))
}

pub struct Reconciler {
    tracker: Arc<dyn Tracker>,
    store: Arc<dyn LinkageStore>,
    renderer: Arc<dyn TextRenderer>,
    locks: JobLocks,
}

impl Reconciler {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        store: Arc<dyn LinkageStore>,
        renderer: Arc<dyn TextRenderer>,
    ) -> Self {
        Self {
            tracker,
            store,
            renderer,
            locks: JobLocks::new(),
        }
    }

    /// Wire up the GitHub tracker, the on-disk store and the token renderer.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let tracker = GitHubTracker::new(&config.github)?;
        let store = FileLinkageStore::open(&config.store.dir).await?;

        Ok(Self::new(
            Arc::new(tracker),
            Arc::new(store),
            Arc::new(TokenRenderer),
        ))
    }

    /// Current record for a job.
    pub async fn linkage(&self, job: &str) -> StoredLinkage {
        self.store.load(job).await
    }

    /// Reconcile the job's tracked issue with a completed build.
    ///
    /// Evaluations of the same job are serialized. A store conflict is
    /// retried once from a fresh read.
    pub async fn on_build_complete(&self, build: &BuildCompletion, policy: &Policy) -> Result<ReconcileReport> {
        let _guard = self.locks.acquire(&build.job).await;

        match self.reconcile(build, policy).await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(job = %build.job, error = %e, "Linkage changed underneath us, re-evaluating");
                self.reconcile(build, policy).await
            }
            result => result,
        }
    }

    async fn reconcile(&self, build: &BuildCompletion, policy: &Policy) -> Result<ReconcileReport> {
        let build_name = build.context.display();
        let repo = resolve_repository(policy, build.repository.as_deref())?;
        let stored = self.store.load(&build.job).await;

        let mut linkage = stored.linkage;
        if linkage.is_absent() {
            if let Some(issue) = legacy_issue(&build.previous_builds) {
                tracing::info!(job = %build.job, issue = issue, "Recovered linkage from earlier build records");
                linkage = IssueLinkage::tracked(issue);
            }
        }

        let mut remote_url = None;
        let mut vanished = false;
        let remote = match linkage.issue() {
            Some(number) if needs_remote_state(build.outcome, linkage, policy) => {
                match self.tracker.get_issue(&repo, number).await? {
                    Some(issue) => {
                        remote_url = Some(issue.url);
                        Some(issue.state)
                    }
                    None => {
                        tracing::warn!(
                            job = %build.job,
                            repo = %repo,
                            issue = number,
                            "Tracked issue no longer exists, treating job as untracked"
                        );
                        vanished = true;
                        None
                    }
                }
            }
            _ => None,
        };

        let transition = decide(build.outcome, linkage, remote, policy);
        let text = transition.needs_text().then(|| RenderedText {
            title: render_or_raw(self.renderer.as_ref(), &policy.title_template, &build.context),
            body: render_or_raw(self.renderer.as_ref(), &policy.body_template, &build.context),
        });

        let execution = match execute(
            &transition,
            text.as_ref(),
            &policy.labels,
            &repo,
            linkage,
            self.tracker.as_ref(),
        )
        .await
        {
            Ok(execution) => execution,
            Err(e) => {
                tracing::warn!(
                    job = %build.job,
                    build = %build_name,
                    transition = %transition,
                    error = %e,
                    "Tracker call failed, linkage left unchanged"
                );
                if let Transition::ReopenAndComment { issue } = transition {
                    if e.step != TrackerStep::Reopen {
                        self.record_partial_reopen(build, &stored, issue, remote_url).await;
                    }
                }
                return Err(e.into());
            }
        };

        // A closed or vanished issue is nothing left to track.
        let new_linkage = match transition {
            Transition::NoOp { .. } if vanished => IssueLinkage::NONE,
            Transition::NoOp {
                reason: NoOpReason::AlreadyClosed,
            } => IssueLinkage::NONE,
            _ => execution.linkage,
        };

        let record = transition.history_action().and_then(|action| {
            let (issue, url) = match transition {
                Transition::CreateIssue { .. } => {
                    let created = execution.created.as_ref()?;
                    (created.number, Some(created.url.clone()))
                }
                Transition::CommentOpen { issue }
                | Transition::ReopenAndComment { issue }
                | Transition::CloseIssue { issue } => (issue, remote_url.clone()),
                Transition::NoOp { .. } => (linkage.issue()?, remote_url.clone()),
            };
            Some(TransitionRecord {
                build: build_name.clone(),
                action,
                issue,
                url,
                at: chrono::Utc::now(),
            })
        });

        if new_linkage != stored.linkage || record.is_some() {
            let update = LinkageUpdate {
                expected_revision: stored.revision,
                linkage: new_linkage,
                record,
            };
            match self.store.save(&build.job, update.clone()).await {
                Ok(_) => {}
                Err(e) if e.is_retryable() && !matches!(transition, Transition::NoOp { .. }) => {
                    self.commit_after_conflict(build, &stored, &transition, update, e)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }

        let reason = match transition {
            Transition::NoOp { reason } => Some(reason),
            _ => None,
        };

        tracing::info!(
            job = %build.job,
            build = %build_name,
            outcome = ?build.outcome,
            transition = %transition,
            issue = ?new_linkage.issue(),
            "Reconciled build"
        );

        Ok(ReconcileReport {
            job: build.job.clone(),
            build: build_name,
            outcome: build.outcome,
            transition: transition.to_string(),
            reason,
            issue: new_linkage.issue(),
            skipped_reason: None,
        })
    }

    /// The tracker calls went through but another writer bumped the record.
    ///
    /// When the linkage is still the one this build decided from, the result
    /// is saved against the fresh revision so the calls are not repeated.
    /// Otherwise the conflict is returned for a full re-evaluation, and an
    /// issue filed by this build is logged since nothing links to it.
    async fn commit_after_conflict(
        &self,
        build: &BuildCompletion,
        stored: &StoredLinkage,
        transition: &Transition,
        mut update: LinkageUpdate,
        conflict: AppError,
    ) -> Result<()> {
        let fresh = self.store.load(&build.job).await;
        if fresh.linkage == stored.linkage {
            tracing::info!(
                job = %build.job,
                revision = fresh.revision,
                "Linkage unchanged by concurrent writer, saving against new revision"
            );
            update.expected_revision = fresh.revision;
            self.store.save(&build.job, update).await?;
            return Ok(());
        }

        if let Transition::CreateIssue { .. } = transition {
            tracing::error!(
                job = %build.job,
                issue = ?update.linkage.issue(),
                current = ?fresh.linkage.issue(),
                "Filed issue is not linked to the job, another writer changed the linkage"
            );
        } else {
            tracing::warn!(
                job = %build.job,
                transition = %transition,
                current = ?fresh.linkage.issue(),
                "Linkage changed while applying transition"
            );
        }
        Err(conflict)
    }

    /// The issue was reopened before a later step failed; keep the linkage
    /// and note the reopen so the history matches the tracker.
    async fn record_partial_reopen(
        &self,
        build: &BuildCompletion,
        stored: &StoredLinkage,
        issue: u64,
        url: Option<String>,
    ) {
        let update = LinkageUpdate {
            expected_revision: stored.revision,
            linkage: IssueLinkage::tracked(issue),
            record: Some(TransitionRecord {
                build: build.context.display(),
                action: crate::linkage::HistoryAction::Reopen,
                issue,
                url,
                at: chrono::Utc::now(),
            }),
        };

        if let Err(e) = self.store.save(&build.job, update).await {
            tracing::error!(job = %build.job, issue = issue, error = %e, "Failed to record partial reopen");
        }
    }
}
