//! Chapter worker
//!
//! Executes exactly one chapter-generation job to completion or terminal
//! failure and atomically reflects the result in shared report state.
//! Workers for the same report run fully in parallel; nothing here assumes
//! chapter order.

use crate::errors::Result;
use crate::generation::Generator;
use crate::metrics;
use crate::pipeline::store::{NewReportChapter, ReportStore};
use crate::pipeline::ANSWERS_PLACEHOLDER;
use crate::queue::{AnswerPair, ChapterJobMessage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Outcome of one job delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// Content generated and persisted by this delivery
    Completed {
        /// Committed chapter count after this insert
        progress: i32,
        /// Whether this delivery performed the terminal status transition
        report_completed: bool,
    },
    /// The chapter row already existed (job redelivery); nothing written
    Duplicate,
}

/// Consumes one chapter job: renders the prompt, calls the generation
/// service once, persists the chapter, and folds the result into report
/// progress.
pub struct ChapterWorker<S> {
    store: S,
    generator: Arc<dyn Generator>,
}

impl<S: ReportStore> ChapterWorker<S> {
    pub fn new(store: S, generator: Arc<dyn Generator>) -> Self {
        Self { store, generator }
    }

    /// Process one delivery of a chapter job.
    ///
    /// The generation call is made at most once per delivery; transient
    /// failures propagate to the consume loop, which leaves the message for
    /// queue redelivery. Duplicate deliveries are detected both before the
    /// generation call (cheap existence check) and at insert time (unique
    /// index), and skip generation — but still re-run the progress and
    /// completion writes: a redelivery may be repairing a crash that landed
    /// between the chapter insert and the progress write, and those writes
    /// are idempotent.
    #[instrument(skip(self, job), fields(report_id = %job.report_id, chapter_id = %job.chapter_id))]
    pub async fn process(&self, job: &ChapterJobMessage) -> Result<ChapterOutcome> {
        job.validate()?;

        // Redelivery guard before any billable work
        if self
            .store
            .chapter_exists(job.report_id, job.chapter_id)
            .await?
        {
            warn!("Chapter already persisted, skipping redelivered job");
            metrics::record_duplicate_delivery();
            self.settle_progress(job).await?;
            return Ok(ChapterOutcome::Duplicate);
        }

        let prompt = render_prompt(&job.prompt_template, &job.answers);

        let start = Instant::now();
        let content = match self.generator.generate(&prompt).await {
            Ok(content) => {
                metrics::record_generation(
                    start.elapsed().as_secs_f64(),
                    self.generator.model_name(),
                    true,
                );
                content
            }
            Err(e) => {
                metrics::record_generation(
                    start.elapsed().as_secs_f64(),
                    self.generator.model_name(),
                    false,
                );
                return Err(e);
            }
        };

        let inserted = self
            .store
            .insert_report_chapter(NewReportChapter {
                report_id: job.report_id,
                chapter_id: job.chapter_id,
                chapter_prompt_id: job.chapter_prompt_id,
                order_index: job.order_index,
                content,
            })
            .await?;

        if !inserted {
            // Lost the race against a concurrent delivery of the same job
            warn!("Chapter row appeared during generation, discarding duplicate content");
            metrics::record_duplicate_delivery();
            self.settle_progress(job).await?;
            return Ok(ChapterOutcome::Duplicate);
        }

        info!("Chapter persisted");

        let (progress, report_completed) = self.settle_progress(job).await?;

        Ok(ChapterOutcome::Completed {
            progress,
            report_completed,
        })
    }

    /// Recompute progress from committed rows and drive the completion CAS.
    ///
    /// Runs on every delivery, duplicate or not: the count-and-set and the
    /// CAS are both idempotent, so replaying them here is what heals a
    /// report whose previous delivery died after the chapter insert but
    /// before the progress write.
    async fn settle_progress(&self, job: &ChapterJobMessage) -> Result<(i32, bool)> {
        // Atomic count-and-set; safe under concurrent workers
        let progress = self.store.record_progress(job.report_id).await?;
        let total = self.store.chapter_total(job.report_type_id).await?;

        let mut report_completed = false;
        if total > 0 && i64::from(progress) >= total {
            // CAS: of all workers observing count == total, exactly one
            // performs the transition
            report_completed = self.store.complete_report(job.report_id).await?;
            if report_completed {
                metrics::record_report_completed();
                info!(progress, total, "Report completed");
            }
        }

        Ok((progress, report_completed))
    }
}

/// Render the final prompt: answers formatted as "question: answer" lines,
/// newline-joined, substituted for the template's answers placeholder.
fn render_prompt(template: &str, answers: &[AnswerPair]) -> String {
    let answers_text = answers
        .iter()
        .map(|pair| format!("{}: {}", pair.question, pair.answer))
        .collect::<Vec<_>>()
        .join("\n");

    template.replace(ANSWERS_PLACEHOLDER, &answers_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::pipeline::testing::{MemoryQueue, MemoryStore, StubGenerator};
    use crate::pipeline::{dispatch_report, report_progress};
    use uuid::Uuid;

    fn worker(store: &MemoryStore) -> ChapterWorker<MemoryStore> {
        ChapterWorker::new(store.clone(), Arc::new(StubGenerator::ok("generated text")))
    }

    /// Dispatch a 3-chapter report and return (token, jobs).
    async fn dispatched_report(
        store: &MemoryStore,
        user_id: Uuid,
    ) -> (String, Vec<ChapterJobMessage>) {
        let report_type_id = Uuid::new_v4();
        store.seed_chapter(report_type_id, 0, &[(1, "Intro\n{{answers}}")]);
        store.seed_chapter(report_type_id, 1, &[(1, "Body\n{{answers}}")]);
        store.seed_chapter(report_type_id, 2, &[(1, "Close\n{{answers}}")]);

        let session_id =
            store.seed_session(user_id, report_type_id, &[("Why?", "Because"), ("How?", "Slowly")]);
        let token = store.seed_token(user_id, report_type_id, Some(session_id));

        let queue = MemoryQueue::new();
        dispatch_report(store, &queue, user_id, &token)
            .await
            .unwrap();

        (token, queue.jobs())
    }

    #[test]
    fn render_prompt_substitutes_answer_block() {
        let answers = vec![
            AnswerPair {
                question: "Why?".to_string(),
                answer: "Because".to_string(),
            },
            AnswerPair {
                question: "How?".to_string(),
                answer: "Slowly".to_string(),
            },
        ];

        let rendered = render_prompt("Context:\n{{answers}}\nGo.", &answers);
        assert_eq!(rendered, "Context:\nWhy?: Because\nHow?: Slowly\nGo.");
    }

    #[test]
    fn render_prompt_with_no_answers_leaves_empty_block() {
        let rendered = render_prompt("Context:\n{{answers}}\nGo.", &[]);
        assert_eq!(rendered, "Context:\n\nGo.");
    }

    #[tokio::test]
    async fn completing_all_chapters_completes_report_in_any_order() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let (token, mut jobs) = dispatched_report(&store, user_id).await;
        let worker = worker(&store);

        // Finish chapters in reverse catalog order
        jobs.reverse();
        let report_id = jobs[0].report_id;

        for (i, job) in jobs.iter().enumerate() {
            let outcome = worker.process(job).await.unwrap();
            match outcome {
                ChapterOutcome::Completed {
                    progress,
                    report_completed,
                } => {
                    assert_eq!(progress, (i + 1) as i32);
                    assert_eq!(report_completed, i == jobs.len() - 1);
                }
                ChapterOutcome::Duplicate => panic!("unexpected duplicate"),
            }
        }

        let report = store.find_report(report_id).await.unwrap().unwrap();
        assert_eq!(report.status, "completed");
        assert_eq!(report.progress, 3);

        let snapshot = report_progress(&store, user_id, &token).await.unwrap();
        assert_eq!(snapshot.progress, 3);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.status, "completed");
    }

    #[tokio::test]
    async fn redelivered_job_is_a_noop_success() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let (_token, jobs) = dispatched_report(&store, user_id).await;
        let worker = worker(&store);

        let job = &jobs[0];
        let first = worker.process(job).await.unwrap();
        assert!(matches!(first, ChapterOutcome::Completed { progress: 1, .. }));

        let second = worker.process(job).await.unwrap();
        assert_eq!(second, ChapterOutcome::Duplicate);

        // No second row, no double-counted progress
        let report = store.find_report(job.report_id).await.unwrap().unwrap();
        assert_eq!(report.progress, 1);
        assert_eq!(store.chapter_row_count(job.report_id), 1);
    }

    #[tokio::test]
    async fn redelivery_heals_crash_between_insert_and_progress() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let (_token, jobs) = dispatched_report(&store, user_id).await;
        let worker = worker(&store);

        worker.process(&jobs[0]).await.unwrap();
        worker.process(&jobs[1]).await.unwrap();

        // The last worker died right after its insert: the row is committed
        // but progress was never recomputed and the report never completed
        let crashed = &jobs[2];
        store
            .insert_report_chapter(NewReportChapter {
                report_id: crashed.report_id,
                chapter_id: crashed.chapter_id,
                chapter_prompt_id: crashed.chapter_prompt_id,
                order_index: crashed.order_index,
                content: "text".to_string(),
            })
            .await
            .unwrap();

        let report = store.find_report(crashed.report_id).await.unwrap().unwrap();
        assert_eq!(report.progress, 2);
        assert_eq!(report.status, "generating");

        // Visibility timeout expires, the message comes back
        let outcome = worker.process(crashed).await.unwrap();
        assert_eq!(outcome, ChapterOutcome::Duplicate);

        // All three rows existed, so the redelivery must finish the report
        let report = store.find_report(crashed.report_id).await.unwrap().unwrap();
        assert_eq!(report.progress, 3);
        assert_eq!(report.status, "completed");
        assert_eq!(store.chapter_row_count(crashed.report_id), 3);
        assert_eq!(store.completion_transitions(crashed.report_id), 1);
    }

    #[tokio::test]
    async fn redelivery_repairs_progress_without_premature_completion() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let (_token, jobs) = dispatched_report(&store, user_id).await;
        let worker = worker(&store);

        // First worker crashed after its insert; only one of three rows
        let crashed = &jobs[0];
        store
            .insert_report_chapter(NewReportChapter {
                report_id: crashed.report_id,
                chapter_id: crashed.chapter_id,
                chapter_prompt_id: crashed.chapter_prompt_id,
                order_index: crashed.order_index,
                content: "text".to_string(),
            })
            .await
            .unwrap();

        let outcome = worker.process(crashed).await.unwrap();
        assert_eq!(outcome, ChapterOutcome::Duplicate);

        let report = store.find_report(crashed.report_id).await.unwrap().unwrap();
        assert_eq!(report.progress, 1);
        assert_eq!(report.status, "generating");
    }

    #[tokio::test]
    async fn concurrent_final_chapters_produce_one_completion() {
        // Repeat to give the race a chance to actually interleave
        for _ in 0..25 {
            let store = MemoryStore::new();
            let user_id = Uuid::new_v4();
            let (_token, jobs) = dispatched_report(&store, user_id).await;
            let worker = worker(&store);

            let report_id = jobs[0].report_id;
            worker.process(&jobs[0]).await.unwrap();

            // Last two chapters finish in the same window
            let worker_a =
                ChapterWorker::new(store.clone(), Arc::new(StubGenerator::ok("text a")));
            let worker_b =
                ChapterWorker::new(store.clone(), Arc::new(StubGenerator::ok("text b")));

            let job_a = jobs[1].clone();
            let job_b = jobs[2].clone();

            let (ra, rb) = tokio::join!(
                tokio::spawn(async move { worker_a.process(&job_a).await }),
                tokio::spawn(async move { worker_b.process(&job_b).await }),
            );

            let outcome_a = ra.unwrap().unwrap();
            let outcome_b = rb.unwrap().unwrap();

            let completions = [outcome_a, outcome_b]
                .iter()
                .filter(|o| {
                    matches!(
                        o,
                        ChapterOutcome::Completed {
                            report_completed: true,
                            ..
                        }
                    )
                })
                .count();
            assert_eq!(completions, 1, "exactly one worker may complete the report");

            let report = store.find_report(report_id).await.unwrap().unwrap();
            assert_eq!(report.status, "completed");
            assert_eq!(report.progress, 3);
            assert_eq!(store.completion_transitions(report_id), 1);
        }
    }

    #[tokio::test]
    async fn generation_failure_leaves_no_partial_state() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let (_token, jobs) = dispatched_report(&store, user_id).await;

        let failing =
            ChapterWorker::new(store.clone(), Arc::new(StubGenerator::failing("llm down")));

        let result = failing.process(&jobs[0]).await;
        assert!(matches!(result, Err(AppError::Generation { .. })));

        let report = store.find_report(jobs[0].report_id).await.unwrap().unwrap();
        assert_eq!(report.progress, 0);
        assert_eq!(report.status, "generating");
        assert_eq!(store.chapter_row_count(jobs[0].report_id), 0);
    }

    #[tokio::test]
    async fn failed_chapter_does_not_corrupt_other_chapters() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let (_token, jobs) = dispatched_report(&store, user_id).await;

        let ok_worker = worker(&store);
        let failing =
            ChapterWorker::new(store.clone(), Arc::new(StubGenerator::failing("llm down")));

        ok_worker.process(&jobs[0]).await.unwrap();
        let _ = failing.process(&jobs[1]).await;
        ok_worker.process(&jobs[2]).await.unwrap();

        let report = store.find_report(jobs[0].report_id).await.unwrap().unwrap();
        // Stuck below 100%: two of three chapters done, still generating
        assert_eq!(report.progress, 2);
        assert_eq!(report.status, "generating");
        assert_eq!(store.chapter_row_count(jobs[0].report_id), 2);
    }

    #[tokio::test]
    async fn malformed_job_is_rejected_before_generation() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let (_token, jobs) = dispatched_report(&store, user_id).await;

        // Generator that panics if called proves validation short-circuits
        let worker = ChapterWorker::new(store.clone(), Arc::new(StubGenerator::unreachable()));

        let mut job = jobs[0].clone();
        job.prompt_template = String::new();

        let result = worker.process(&job).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }
}
