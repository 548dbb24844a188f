use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use garde::Validate;
use std::convert::Infallible;

use crate::app_state::AppState;
use crate::models::job::VerificationJobState;
use crate::models::verification::{JobStatusResponse, ManualReviewRequest};
use crate::services::job_state::JobError;

fn status_for(error: &JobError) -> StatusCode {
    match error {
        JobError::TerminalState(_)
        | JobError::ConcurrentModification { .. }
        | JobError::LeaseHeld { .. } => StatusCode::CONFLICT,
        JobError::JobVanished { .. } => StatusCode::NOT_FOUND,
        JobError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
        JobError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/v1/entities/{entity_id}/verification: start a verification job.
///
/// Replaces any existing job for the entity.
pub async fn submit_verification(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<(StatusCode, Json<VerificationJobState>), StatusCode> {
    let job = state.jobs.initialize(&entity_id).await.map_err(|e| {
        tracing::error!(entity_id = %entity_id, error = %e, "Failed to initialize verification job");
        status_for(&e)
    })?;

    state.queue.enqueue(&entity_id).await.map_err(|e| {
        tracing::error!(entity_id = %entity_id, error = %e, "Failed to enqueue verification job");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/entities/{entity_id}/verification: job state and time to expiry.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    match state.jobs.status_with_expiry(&entity_id).await {
        Ok(Some(status)) => Ok(Json(status)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(entity_id = %entity_id, error = %e, "Error getting job status");
            Err(status_for(&e))
        }
    }
}

/// POST /api/v1/entities/{entity_id}/verification/manual-review
pub async fn mark_for_manual_review(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(request): Json<ManualReviewRequest>,
) -> Result<Json<VerificationJobState>, StatusCode> {
    request
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    match state
        .orchestrator
        .mark_for_manual_review(&entity_id, &request.reason)
        .await
    {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::warn!(entity_id = %entity_id, error = %e, "Manual review rejected");
            Err(status_for(&e))
        }
    }
}

/// GET /api/v1/verification/events: live job lifecycle events.
pub async fn job_events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let events = state.events.subscribe().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to subscribe to verification events");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let stream = events.filter_map(|event| async move {
        match Event::default()
            .event(event.event_type.to_string())
            .json_data(&event)
        {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode SSE event");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
