use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::reconcile::{BuildCompletion, ReconcileReport, Reconciler};

pub struct AppState {
    pub config: AppConfig,
    pub reconciler: Reconciler,
}

impl AppState {
    pub async fn new(config: AppConfig) -> crate::error::Result<Self> {
        let reconciler = Reconciler::from_config(&config).await?;
        Ok(Self::with_reconciler(config, reconciler))
    }

    pub fn with_reconciler(config: AppConfig, reconciler: Reconciler) -> Self {
        Self { config, reconciler }
    }

    /// Reconcile one completed build with the job's effective policy.
    ///
    /// Failures are logged and reported, never propagated: issue tracking
    /// must not fail the build.
    pub async fn handle_completion(&self, build: &BuildCompletion) -> ReconcileReport {
        let policy = self.config.policy_for(&build.job);

        match self.reconciler.on_build_complete(build, &policy).await {
            Ok(report) => report,
            Err(e) => {
                match &e {
                    AppError::Config(_) => tracing::warn!(
                        job = %build.job,
                        error = %e,
                        "No GitHub config available for this job, skipping issue tracking"
                    ),
                    AppError::Tracker(_) => tracing::warn!(
                        job = %build.job,
                        error = %e,
                        "Tracker unavailable, will retry on the next build"
                    ),
                    _ => tracing::error!(
                        job = %build.job,
                        error = %e,
                        "Reconciliation failed"
                    ),
                }
                ReconcileReport::skipped(build, &e)
            }
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/webhooks/build",
            post(crate::webhook::handler::handle_build_webhook),
        )
        .route("/jobs/:job/issue", get(crate::webhook::handler::get_job_issue))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
