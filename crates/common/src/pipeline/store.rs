//! Storage seam for the pipeline
//!
//! Every core operation receives a `ReportStore` explicitly. The production
//! implementation is the SeaORM [`crate::db::Repository`]; tests use an
//! in-memory store with the same atomicity guarantees.

use crate::db::models::{AccessToken, Chapter, ChapterPrompt, Report, TokenStatus};
use crate::errors::Result;
use crate::queue::AnswerPair;
use async_trait::async_trait;
use uuid::Uuid;

/// A chapter row about to be persisted by a worker
#[derive(Debug, Clone)]
pub struct NewReportChapter {
    pub report_id: Uuid,
    pub chapter_id: Uuid,
    pub chapter_prompt_id: Uuid,
    pub order_index: i32,
    pub content: String,
}

/// Persistence operations the pipeline depends on.
///
/// Contract notes:
/// - `insert_report_chapter` must be idempotent per (report_id, chapter_id):
///   a second insert returns `false` and writes nothing.
/// - `record_progress` must recompute the committed chapter count and write
///   it in one atomic step, safe under concurrent workers.
/// - `complete_report` must be a compare-and-swap from `generating` to
///   `completed`: exactly one of any set of racing callers gets `true`.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Look up an access token by its opaque string, scoped to its owner.
    async fn find_token_for_user(&self, token: &str, user_id: Uuid)
        -> Result<Option<AccessToken>>;

    /// Update a token's lifecycle status.
    async fn set_token_status(&self, token_id: Uuid, status: TokenStatus) -> Result<()>;

    /// Link a token to the report dispatched from it.
    async fn set_token_report(&self, token_id: Uuid, report_id: Uuid) -> Result<()>;

    /// Insert a fresh report row (status generating, progress 0, version 1).
    async fn create_report(&self, report_type_id: Uuid, input_session_id: Uuid) -> Result<Report>;

    /// Fetch a report row. Must observe the latest committed worker writes.
    async fn find_report(&self, report_id: Uuid) -> Result<Option<Report>>;

    /// All answers for a session joined with their question text, in
    /// questionnaire order. Includes empty pairs; callers filter.
    async fn session_answers(&self, session_id: Uuid) -> Result<Vec<AnswerPair>>;

    /// Chapter catalog for a report type, ordered by `order_index`.
    async fn chapters_for_type(&self, report_type_id: Uuid) -> Result<Vec<Chapter>>;

    /// Highest-version prompt for a chapter, if any exists.
    async fn latest_prompt(&self, chapter_id: Uuid) -> Result<Option<ChapterPrompt>>;

    /// Whether content already exists for (report_id, chapter_id).
    async fn chapter_exists(&self, report_id: Uuid, chapter_id: Uuid) -> Result<bool>;

    /// Idempotent chapter insert; `false` means the row already existed.
    async fn insert_report_chapter(&self, chapter: NewReportChapter) -> Result<bool>;

    /// Atomically recompute and persist `reports.progress`; returns the
    /// committed count.
    async fn record_progress(&self, report_id: Uuid) -> Result<i32>;

    /// CAS `status: generating -> completed`; `true` only for the caller
    /// that performed the transition.
    async fn complete_report(&self, report_id: Uuid) -> Result<bool>;

    /// Size of the chapter catalog for a report type.
    async fn chapter_total(&self, report_type_id: Uuid) -> Result<i64>;
}
