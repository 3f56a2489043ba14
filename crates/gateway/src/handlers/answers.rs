//! Questionnaire answer handlers
//!
//! Answers are autosaved one at a time as the user types. The first
//! autosave without a session id creates the input session; the client
//! holds onto the returned id for the rest of the questionnaire.

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
    db::{Repository, SavedAnswer},
    errors::{AppError, Result},
};

/// One autosaved answer
#[derive(Debug, Deserialize, Validate)]
pub struct AutosaveRequest {
    /// Absent on the first answer of a fresh questionnaire run
    #[serde(default)]
    pub input_session_id: Option<Uuid>,

    pub question_id: Uuid,

    #[validate(length(min = 1, max = 50000))]
    pub answer_text: String,

    pub report_type_id: Uuid,

    /// When present, the (possibly new) session is attached to this access
    /// grant so generation can later find the answers
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Serialize)]
pub struct AutosaveResponse {
    pub status: String,
    pub input_session_id: Uuid,
}

#[derive(Serialize)]
pub struct SavedAnswersResponse {
    pub status: String,
    pub answers: Vec<SavedAnswer>,
}

/// Autosave one answer, creating the input session on first use
pub async fn autosave_answer(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<AutosaveRequest>,
) -> Result<(StatusCode, Json<AutosaveResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let repo = Repository::new(state.db.clone());

    let (session_id, created) = match request.input_session_id {
        Some(id) => {
            let session = repo
                .find_input_session(id)
                .await?
                .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;
            if session.user_id != auth.user_id {
                return Err(AppError::SessionNotFound { id: id.to_string() });
            }
            (id, false)
        }
        None => {
            let session = repo
                .create_input_session(auth.user_id, request.report_type_id)
                .await?;
            tracing::info!(session_id = %session.id, "Input session created");
            (session.id, true)
        }
    };

    // Link the session to the purchase so dispatch can find it later
    if created {
        if let Some(ref token) = request.access_token {
            let grant = repo
                .find_access_token(token, auth.user_id)
                .await?
                .ok_or(AppError::AccessTokenNotFound)?;
            repo.attach_input_session(grant.id, session_id).await?;
        }
    }

    repo.save_answer(session_id, request.question_id, &request.answer_text)
        .await?;

    Ok((
        StatusCode::OK,
        Json(AutosaveResponse {
            status: "ok".to_string(),
            input_session_id: session_id,
        }),
    ))
}

/// Saved answers for a session, for questionnaire resume
pub async fn get_saved_answers(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SavedAnswersResponse>> {
    let repo = Repository::new(state.db.clone());

    let session = repo
        .find_input_session(session_id)
        .await?
        .ok_or_else(|| AppError::SessionNotFound {
            id: session_id.to_string(),
        })?;

    // A foreign session looks identical to a missing one
    if session.user_id != auth.user_id {
        return Err(AppError::SessionNotFound {
            id: session_id.to_string(),
        });
    }

    let answers = repo.saved_answers(session_id).await?;

    Ok(Json(SavedAnswersResponse {
        status: "ok".to_string(),
        answers,
    }))
}
