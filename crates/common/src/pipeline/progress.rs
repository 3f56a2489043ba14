//! Progress reads
//!
//! Read-only view of a report's generation state, keyed by the access token
//! the client already holds. Backed by the same committed counters the
//! workers write, so polling never observes progress ahead of persisted
//! chapter content.

use crate::errors::{AppError, Result};
use crate::pipeline::ReportStore;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

/// One poll's worth of report state
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Chapters persisted so far
    pub progress: i32,
    /// Chapters the report will have when done
    pub total: i64,
    /// `generating` or `completed`
    pub status: String,
}

/// Resolve the report behind `token` and return its current progress.
///
/// Fails with [`AppError::AccessTokenNotFound`] when the token is unknown or
/// owned by another user, and [`AppError::ReportNotFound`] when generation
/// has not been dispatched for it yet.
#[instrument(skip(store, token), fields(user_id = %user_id))]
pub async fn report_progress<S: ReportStore>(
    store: &S,
    user_id: Uuid,
    token: &str,
) -> Result<ProgressSnapshot> {
    let grant = store
        .find_token_for_user(token, user_id)
        .await?
        .ok_or(AppError::AccessTokenNotFound)?;

    let report_id = grant.report_id.ok_or(AppError::ReportNotFound {
        id: "not yet dispatched".to_string(),
    })?;

    let report = store
        .find_report(report_id)
        .await?
        .ok_or_else(|| AppError::ReportNotFound {
            id: report_id.to_string(),
        })?;

    let total = store.chapter_total(report.report_type_id).await?;

    Ok(ProgressSnapshot {
        progress: report.progress,
        total,
        status: report.status,
    })
}
