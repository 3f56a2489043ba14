//! In-memory fakes for pipeline tests
//!
//! [`MemoryStore`] mirrors the Postgres atomicity contract exactly: the
//! idempotent chapter insert, the count-and-set progress write, and the
//! completion CAS all happen under one lock, so the concurrency tests
//! exercise the same guarantees the real store provides.

use crate::auth::generate_access_token;
use crate::db::models::{AccessToken, Chapter, ChapterPrompt, Report, TokenStatus};
use crate::errors::{AppError, Result};
use crate::generation::Generator;
use crate::pipeline::store::{NewReportChapter, ReportStore};
use crate::queue::{AnswerPair, ChapterJobMessage, JobQueue};
use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn now() -> DateTimeWithTimeZone {
    chrono::Utc::now().fixed_offset()
}

#[derive(Default)]
struct Inner {
    tokens: Vec<AccessToken>,
    /// session_id -> answers in questionnaire order
    answers: HashMap<Uuid, Vec<AnswerPair>>,
    chapters: Vec<Chapter>,
    prompts: Vec<ChapterPrompt>,
    reports: HashMap<Uuid, Report>,
    /// (report_id, chapter_id) pairs persisted so far
    chapter_rows: Vec<(Uuid, Uuid)>,
    /// How many times each report transitioned to completed; must stay <= 1
    completions: HashMap<Uuid, u32>,
}

/// Shared in-memory [`ReportStore`]
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chapter with the given prompt versions; returns the chapter id.
    pub fn seed_chapter(
        &self,
        report_type_id: Uuid,
        order_index: i32,
        prompts: &[(i32, &str)],
    ) -> Uuid {
        let chapter_id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap();
        inner.chapters.push(Chapter {
            id: chapter_id,
            report_type_id,
            title: format!("Chapter {}", order_index + 1),
            order_index,
        });
        for (version, text) in prompts {
            inner.prompts.push(ChapterPrompt {
                id: Uuid::new_v4(),
                chapter_id,
                version: *version,
                prompt_text: (*text).to_string(),
                created_at: now(),
            });
        }
        chapter_id
    }

    /// Add an input session with answered questions; returns the session id.
    pub fn seed_session(
        &self,
        _user_id: Uuid,
        _report_type_id: Uuid,
        answers: &[(&str, &str)],
    ) -> Uuid {
        let session_id = Uuid::new_v4();
        let pairs = answers
            .iter()
            .map(|(q, a)| AnswerPair {
                question: (*q).to_string(),
                answer: (*a).to_string(),
            })
            .collect();
        self.inner.lock().unwrap().answers.insert(session_id, pairs);
        session_id
    }

    /// Add an access-grant token; returns the opaque token string.
    pub fn seed_token(
        &self,
        user_id: Uuid,
        report_type_id: Uuid,
        input_session_id: Option<Uuid>,
    ) -> String {
        let token = generate_access_token();
        self.inner.lock().unwrap().tokens.push(AccessToken {
            id: Uuid::new_v4(),
            user_id,
            report_type_id,
            access_token: token.clone(),
            status: String::from(TokenStatus::NotStarted),
            input_session_id,
            report_id: None,
            granted_by: "test".to_string(),
            payment_reference: None,
            granted_at: now(),
        });
        token
    }

    /// Persisted chapter rows for a report.
    pub fn chapter_row_count(&self, report_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .chapter_rows
            .iter()
            .filter(|(r, _)| *r == report_id)
            .count()
    }

    /// How many callers performed the generating -> completed transition.
    pub fn completion_transitions(&self, report_id: Uuid) -> u32 {
        *self
            .inner
            .lock()
            .unwrap()
            .completions
            .get(&report_id)
            .unwrap_or(&0)
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn find_token_for_user(
        &self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<AccessToken>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tokens
            .iter()
            .find(|t| t.access_token == token && t.user_id == user_id)
            .cloned())
    }

    async fn set_token_status(&self, token_id: Uuid, status: TokenStatus) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.tokens.iter_mut().find(|t| t.id == token_id) {
            t.status = String::from(status);
        }
        Ok(())
    }

    async fn set_token_report(&self, token_id: Uuid, report_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.tokens.iter_mut().find(|t| t.id == token_id) {
            t.report_id = Some(report_id);
        }
        Ok(())
    }

    async fn create_report(&self, report_type_id: Uuid, input_session_id: Uuid) -> Result<Report> {
        let report = Report {
            id: Uuid::new_v4(),
            report_type_id,
            input_session_id,
            status: "generating".to_string(),
            progress: 0,
            version: 1,
            generated_at: now(),
        };
        self.inner
            .lock()
            .unwrap()
            .reports
            .insert(report.id, report.clone());
        Ok(report)
    }

    async fn find_report(&self, report_id: Uuid) -> Result<Option<Report>> {
        Ok(self.inner.lock().unwrap().reports.get(&report_id).cloned())
    }

    async fn session_answers(&self, session_id: Uuid) -> Result<Vec<AnswerPair>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .answers
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn chapters_for_type(&self, report_type_id: Uuid) -> Result<Vec<Chapter>> {
        let inner = self.inner.lock().unwrap();
        let mut chapters: Vec<_> = inner
            .chapters
            .iter()
            .filter(|c| c.report_type_id == report_type_id)
            .cloned()
            .collect();
        chapters.sort_by_key(|c| c.order_index);
        Ok(chapters)
    }

    async fn latest_prompt(&self, chapter_id: Uuid) -> Result<Option<ChapterPrompt>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .prompts
            .iter()
            .filter(|p| p.chapter_id == chapter_id)
            .max_by_key(|p| p.version)
            .cloned())
    }

    async fn chapter_exists(&self, report_id: Uuid, chapter_id: Uuid) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .chapter_rows
            .iter()
            .any(|(r, c)| *r == report_id && *c == chapter_id))
    }

    async fn insert_report_chapter(&self, chapter: NewReportChapter) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let exists = inner
            .chapter_rows
            .iter()
            .any(|(r, c)| *r == chapter.report_id && *c == chapter.chapter_id);
        if exists {
            return Ok(false);
        }
        inner
            .chapter_rows
            .push((chapter.report_id, chapter.chapter_id));
        Ok(true)
    }

    async fn record_progress(&self, report_id: Uuid) -> Result<i32> {
        let mut inner = self.inner.lock().unwrap();
        let count = inner
            .chapter_rows
            .iter()
            .filter(|(r, _)| *r == report_id)
            .count() as i32;
        let report = inner
            .reports
            .get_mut(&report_id)
            .ok_or_else(|| AppError::ReportNotFound {
                id: report_id.to_string(),
            })?;
        report.progress = count;
        Ok(count)
    }

    async fn complete_report(&self, report_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let swapped = match inner.reports.get_mut(&report_id) {
            Some(report) if report.status == "generating" => {
                report.status = "completed".to_string();
                true
            }
            _ => false,
        };
        if swapped {
            *inner.completions.entry(report_id).or_insert(0) += 1;
        }
        Ok(swapped)
    }

    async fn chapter_total(&self, report_type_id: Uuid) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .chapters
            .iter()
            .filter(|c| c.report_type_id == report_type_id)
            .count() as i64)
    }
}

/// Collecting [`JobQueue`] fake
#[derive(Clone, Default)]
pub(crate) struct MemoryQueue {
    jobs: Arc<Mutex<Vec<ChapterJobMessage>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<ChapterJobMessage> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &ChapterJobMessage) -> Result<String> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job.clone());
        Ok(format!("msg-{}", jobs.len()))
    }
}

enum StubMode {
    Ok(String),
    Failing(String),
    Unreachable,
}

/// Canned [`Generator`]
pub(crate) struct StubGenerator {
    mode: StubMode,
}

impl StubGenerator {
    /// Always succeeds with `content`.
    pub fn ok(content: &str) -> Self {
        Self {
            mode: StubMode::Ok(content.to_string()),
        }
    }

    /// Always fails with a generation error.
    pub fn failing(message: &str) -> Self {
        Self {
            mode: StubMode::Failing(message.to_string()),
        }
    }

    /// Panics if called; asserts the generation path is never reached.
    pub fn unreachable() -> Self {
        Self {
            mode: StubMode::Unreachable,
        }
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        match &self.mode {
            StubMode::Ok(content) => Ok(content.clone()),
            StubMode::Failing(message) => Err(AppError::Generation {
                message: message.clone(),
            }),
            StubMode::Unreachable => panic!("generator must not be called"),
        }
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}
