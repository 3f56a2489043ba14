//! Report generation handlers
//!
//! Dispatch is fire-and-forget: the POST returns as soon as every chapter
//! job is on the queue, and clients poll the progress endpoint until the
//! report completes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use reportcraft_common::{
    auth::AuthContext,
    db::Repository,
    errors::{AppError, Result},
    pipeline::{dispatch_report, report_progress},
};

/// Request to start report generation
#[derive(Debug, Deserialize, Validate)]
pub struct GenerationRequest {
    #[validate(length(min = 1, max = 128))]
    pub token: String,
}

#[derive(Serialize)]
pub struct GenerationResponse {
    pub status: String,
    pub report_id: Uuid,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub progress: i32,
    pub total: i64,
    pub status: String,
}

/// Start asynchronous generation for the report purchased under `token`
pub async fn start_generation(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<GenerationResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("token".to_string()),
    })?;

    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable {
            message: "Report generation queue is not configured".to_string(),
        })?;

    let repo = Repository::new(state.db.clone());

    let report_id = dispatch_report(&repo, queue.as_ref(), auth.user_id, &request.token).await?;

    tracing::info!(
        report_id = %report_id,
        user_id = %auth.user_id,
        "Report generation started"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerationResponse {
            status: "started".to_string(),
            report_id,
        }),
    ))
}

/// Progress snapshot for polling clients
pub async fn get_progress(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(token): Path<String>,
) -> Result<Json<ProgressResponse>> {
    let repo = Repository::new(state.db.clone());

    let snapshot = report_progress(&repo, auth.user_id, &token).await?;

    Ok(Json(ProgressResponse {
        progress: snapshot.progress,
        total: snapshot.total,
        status: snapshot.status,
    }))
}
