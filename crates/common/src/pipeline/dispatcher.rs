//! Job dispatcher
//!
//! Turns a validated access token plus a completed input session into one
//! report row and one queued job per catalog chapter, then returns without
//! waiting on any worker.

use crate::db::models::TokenStatus;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::pipeline::ReportStore;
use crate::queue::{ChapterJobMessage, JobQueue};
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Dispatch generation for the report purchased under `token`.
///
/// Effects, in order: mark the token generating, insert the report row,
/// link token to report, snapshot answers and the latest prompt version per
/// chapter, and enqueue one independent job per chapter. Jobs may run in
/// any order on any worker.
///
/// Returns the new report id immediately.
#[instrument(skip(store, queue, token), fields(user_id = %user_id))]
pub async fn dispatch_report<S, Q>(
    store: &S,
    queue: &Q,
    user_id: Uuid,
    token: &str,
) -> Result<Uuid>
where
    S: ReportStore,
    Q: JobQueue + ?Sized,
{
    // Resolve the grant; a token owned by someone else is indistinguishable
    // from a missing one.
    let grant = store
        .find_token_for_user(token, user_id)
        .await?
        .ok_or(AppError::AccessTokenNotFound)?;

    // A grant covers exactly one generation; a consumed one cannot be
    // re-dispatched
    if grant.is_terminal() {
        return Err(AppError::Duplicate {
            message: "Access token has already been consumed".to_string(),
        });
    }

    let session_id = grant.input_session_id.ok_or_else(|| AppError::Validation {
        message: "Access token has no input session attached".to_string(),
        field: Some("input_session_id".to_string()),
    })?;

    store
        .set_token_status(grant.id, TokenStatus::Generating)
        .await?;

    let report = store
        .create_report(grant.report_type_id, session_id)
        .await?;

    store.set_token_report(grant.id, report.id).await?;

    // Snapshot the answers once; every chapter job carries the full list.
    // Pairs with an empty question or answer are dropped here.
    let answers: Vec<_> = store
        .session_answers(session_id)
        .await?
        .into_iter()
        .filter(|pair| !pair.question.trim().is_empty() && !pair.answer.trim().is_empty())
        .collect();

    let chapters = store.chapters_for_type(grant.report_type_id).await?;

    if chapters.is_empty() {
        // The report exists but can never auto-complete. Deployment/data
        // error, not a user error: scream in the logs and keep the 200 path
        // consistent with a normal dispatch.
        error!(
            report_id = %report.id,
            report_type_id = %grant.report_type_id,
            "Report type has no chapters configured; report will stall at 0%"
        );
        metrics::record_dispatch_config_error("no_chapters");
        metrics::record_dispatch(0);
        return Ok(report.id);
    }

    let mut enqueued = 0usize;
    for chapter in &chapters {
        let prompt = store.latest_prompt(chapter.id).await?.ok_or_else(|| {
            error!(
                chapter_id = %chapter.id,
                report_id = %report.id,
                "Chapter has no prompt version"
            );
            metrics::record_dispatch_config_error("missing_prompt");
            AppError::Configuration {
                message: format!("Chapter {} has no prompt version", chapter.id),
            }
        })?;

        let job = ChapterJobMessage {
            report_id: report.id,
            report_type_id: grant.report_type_id,
            input_session_id: session_id,
            chapter_id: chapter.id,
            chapter_prompt_id: prompt.id,
            order_index: chapter.order_index,
            prompt_template: prompt.prompt_text,
            answers: answers.clone(),
        };

        queue.enqueue(&job).await?;
        enqueued += 1;
    }

    metrics::record_dispatch(enqueued);
    info!(
        report_id = %report.id,
        chapters = enqueued,
        answers = answers.len(),
        "Report dispatched"
    );

    Ok(report.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{MemoryQueue, MemoryStore};
    use crate::queue::AnswerPair;

    #[tokio::test]
    async fn dispatch_creates_report_and_one_job_per_chapter() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let user_id = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        store.seed_chapter(report_type_id, 0, &[(1, "Intro: {{answers}}")]);
        store.seed_chapter(report_type_id, 1, &[(1, "Body: {{answers}}")]);
        store.seed_chapter(report_type_id, 2, &[(1, "Close: {{answers}}")]);

        let session_id = store.seed_session(
            user_id,
            report_type_id,
            &[("What matters?", "Family"), ("What next?", "Rest")],
        );
        let token = store.seed_token(user_id, report_type_id, Some(session_id));

        let report_id = dispatch_report(&store, &queue, user_id, &token)
            .await
            .unwrap();

        let report = store.find_report(report_id).await.unwrap().unwrap();
        assert_eq!(report.status, "generating");
        assert_eq!(report.progress, 0);
        assert_eq!(report.version, 1);

        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 3);
        for job in &jobs {
            assert_eq!(job.report_id, report_id);
            assert_eq!(job.answers.len(), 2);
        }

        // Token marked generating and linked to the report
        let grant = store
            .find_token_for_user(&token, user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.status, "generating");
        assert_eq!(grant.report_id, Some(report_id));
    }

    #[tokio::test]
    async fn dispatch_picks_highest_prompt_version_per_chapter() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let user_id = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        let chapter_a =
            store.seed_chapter(report_type_id, 0, &[(1, "A v1 {{answers}}"), (2, "A v2 {{answers}}")]);
        let chapter_b = store.seed_chapter(report_type_id, 1, &[(1, "B v1 {{answers}}")]);

        let session_id = store.seed_session(user_id, report_type_id, &[("Q", "A")]);
        let token = store.seed_token(user_id, report_type_id, Some(session_id));

        dispatch_report(&store, &queue, user_id, &token)
            .await
            .unwrap();

        let jobs = queue.jobs();
        let job_a = jobs.iter().find(|j| j.chapter_id == chapter_a).unwrap();
        let job_b = jobs.iter().find(|j| j.chapter_id == chapter_b).unwrap();

        assert_eq!(job_a.prompt_template, "A v2 {{answers}}");
        assert_eq!(job_b.prompt_template, "B v1 {{answers}}");
    }

    #[tokio::test]
    async fn dispatch_filters_empty_answer_pairs_but_still_fans_out() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let user_id = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        store.seed_chapter(report_type_id, 0, &[(1, "One {{answers}}")]);
        store.seed_chapter(report_type_id, 1, &[(1, "Two {{answers}}")]);

        // Only blank pairs: whitespace answers and an empty question
        let session_id = store.seed_session(
            user_id,
            report_type_id,
            &[("What matters?", "   "), ("", "orphaned")],
        );
        let token = store.seed_token(user_id, report_type_id, Some(session_id));

        dispatch_report(&store, &queue, user_id, &token)
            .await
            .unwrap();

        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.answers.is_empty()));
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_and_foreign_tokens() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        let session_id = store.seed_session(owner, report_type_id, &[("Q", "A")]);
        let token = store.seed_token(owner, report_type_id, Some(session_id));

        let missing = dispatch_report(&store, &queue, owner, "rt_no_such_token").await;
        assert!(matches!(missing, Err(AppError::AccessTokenNotFound)));

        let foreign = dispatch_report(&store, &queue, stranger, &token).await;
        assert!(matches!(foreign, Err(AppError::AccessTokenNotFound)));

        assert!(queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn dispatch_rejects_consumed_tokens() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let user_id = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        store.seed_chapter(report_type_id, 0, &[(1, "One {{answers}}")]);
        let session_id = store.seed_session(user_id, report_type_id, &[("Q", "A")]);
        let token = store.seed_token(user_id, report_type_id, Some(session_id));

        // Operator marked the grant done after delivery
        let grant = store
            .find_token_for_user(&token, user_id)
            .await
            .unwrap()
            .unwrap();
        store
            .set_token_status(grant.id, TokenStatus::Done)
            .await
            .unwrap();

        let result = dispatch_report(&store, &queue, user_id, &token).await;
        assert!(matches!(result, Err(AppError::Duplicate { .. })));
        assert!(queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn dispatch_with_zero_chapters_creates_report_and_no_jobs() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let user_id = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        let session_id = store.seed_session(user_id, report_type_id, &[("Q", "A")]);
        let token = store.seed_token(user_id, report_type_id, Some(session_id));

        let report_id = dispatch_report(&store, &queue, user_id, &token)
            .await
            .unwrap();

        assert!(queue.jobs().is_empty());
        let report = store.find_report(report_id).await.unwrap().unwrap();
        assert_eq!(report.status, "generating");
    }

    #[tokio::test]
    async fn dispatch_fails_loudly_when_a_chapter_has_no_prompt() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let user_id = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        store.seed_chapter(report_type_id, 0, &[]);

        let session_id = store.seed_session(user_id, report_type_id, &[("Q", "A")]);
        let token = store.seed_token(user_id, report_type_id, Some(session_id));

        let result = dispatch_report(&store, &queue, user_id, &token).await;
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[tokio::test]
    async fn dispatch_requires_an_attached_session() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let user_id = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        store.seed_chapter(report_type_id, 0, &[(1, "One {{answers}}")]);
        let token = store.seed_token(user_id, report_type_id, None);

        let result = dispatch_report(&store, &queue, user_id, &token).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert!(queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn dispatched_jobs_validate_cleanly() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let user_id = Uuid::new_v4();
        let report_type_id = Uuid::new_v4();

        store.seed_chapter(report_type_id, 0, &[(1, "One {{answers}}")]);
        let session_id = store.seed_session(user_id, report_type_id, &[("Q", "A")]);
        let token = store.seed_token(user_id, report_type_id, Some(session_id));

        dispatch_report(&store, &queue, user_id, &token)
            .await
            .unwrap();

        for job in queue.jobs() {
            job.validate().unwrap();
            assert_eq!(
                job.answers,
                vec![AnswerPair {
                    question: "Q".to_string(),
                    answer: "A".to_string()
                }]
            );
        }
    }
}
