use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::server::AppState;
use crate::webhook::events::BuildCompletedEvent;
use crate::webhook::signature::{verify_signature, SIGNATURE_HEADER};

/// `POST /webhooks/build`: the runner reports a completed build.
///
/// Reconciliation problems never turn into an error status; the report says
/// why the build was skipped instead.
pub async fn handle_build_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(sig) => sig.to_string(),
        None => {
            tracing::warn!("Missing {SIGNATURE_HEADER} header");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    if let Err(e) = verify_signature(state.config.webhook_secret(), &body, &signature) {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let event = match BuildCompletedEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse build event");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    tracing::info!(job = %event.job, outcome = ?event.outcome, "Received build completion");

    let report = state.handle_completion(&event.into_completion()).await;
    (StatusCode::OK, Json(report)).into_response()
}

/// `GET /jobs/:job/issue`: the job's tracked issue and transition history.
pub async fn get_job_issue(State(state): State<Arc<AppState>>, Path(job): Path<String>) -> Response {
    let stored = state.reconciler.linkage(&job).await;
    Json(serde_json::json!({
        "job": job,
        "issue_number": stored.linkage.issue(),
        "revision": stored.revision,
        "history": stored.history,
    }))
    .into_response()
}
