//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations. The pipeline's
//! atomicity-sensitive writes (chapter insert, progress, completion) go
//! through raw statements so the database, not application code, arbitrates
//! races between concurrent workers.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::pipeline::{NewReportChapter, ReportStore};
use crate::queue::AnswerPair;
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, Statement,
};
use uuid::Uuid;

/// One saved answer, as returned to a resuming questionnaire client
#[derive(Debug, Clone, serde::Serialize)]
pub struct SavedAnswer {
    pub question_id: Uuid,
    pub answer_text: String,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Access Token Operations
    // ========================================================================

    /// Grant a report access token, normally driven by a billing webhook.
    pub async fn create_access_token(
        &self,
        user_id: Uuid,
        report_type_id: Uuid,
        granted_by: &str,
        payment_reference: Option<String>,
    ) -> Result<AccessToken> {
        let token = AccessTokenActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            report_type_id: Set(report_type_id),
            access_token: Set(crate::auth::generate_access_token()),
            status: Set(String::from(TokenStatus::NotStarted)),
            input_session_id: Set(None),
            report_id: Set(None),
            granted_by: Set(granted_by.to_string()),
            payment_reference: Set(payment_reference),
            granted_at: Set(chrono::Utc::now().into()),
        };

        token.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find a token by its opaque string, scoped to its owner.
    pub async fn find_access_token(
        &self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<AccessToken>> {
        AccessTokenEntity::find()
            .filter(AccessTokenColumn::AccessToken.eq(token))
            .filter(AccessTokenColumn::UserId.eq(user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Attach an input session to a token and mark the questionnaire started.
    pub async fn attach_input_session(&self, token_id: Uuid, session_id: Uuid) -> Result<()> {
        let token = AccessTokenEntity::find_by_id(token_id)
            .one(self.write_conn())
            .await?
            .ok_or(AppError::AccessTokenNotFound)?;

        let mut active: AccessTokenActiveModel = token.into();
        active.input_session_id = Set(Some(session_id));
        active.status = Set(String::from(TokenStatus::InProgress));
        active.update(self.write_conn()).await?;

        let session = InputSessionEntity::find_by_id(session_id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        let mut active: InputSessionActiveModel = session.into();
        active.access_token_id = Set(Some(token_id));
        active.update(self.write_conn()).await?;

        Ok(())
    }

    // ========================================================================
    // Input Session / Answer Operations
    // ========================================================================

    /// Create a fresh input session for a questionnaire run.
    pub async fn create_input_session(
        &self,
        user_id: Uuid,
        report_type_id: Uuid,
    ) -> Result<InputSession> {
        let session = InputSessionActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            report_type_id: Set(report_type_id),
            access_token_id: Set(None),
            created_at: Set(chrono::Utc::now().into()),
        };

        session.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find an input session by ID
    pub async fn find_input_session(&self, id: Uuid) -> Result<Option<InputSession>> {
        InputSessionEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Upsert one answer. Re-answering the same question replaces the prior
    /// text instead of inserting a second row.
    pub async fn save_answer(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        answer_text: &str,
    ) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO user_answers (id, input_session_id, question_id, answer_text, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (input_session_id, question_id)
            DO UPDATE SET answer_text = EXCLUDED.answer_text, created_at = NOW()
            "#,
            vec![
                Uuid::new_v4().into(),
                session_id.into(),
                question_id.into(),
                answer_text.into(),
            ],
        );

        use sea_orm::ConnectionTrait;
        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    /// Saved answers for a session, in questionnaire order.
    pub async fn saved_answers(&self, session_id: Uuid) -> Result<Vec<SavedAnswer>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT a.question_id, a.answer_text
            FROM user_answers a
            JOIN questions q ON q.id = a.question_id
            WHERE a.input_session_id = $1
            ORDER BY q.order_index ASC
            "#,
            vec![session_id.into()],
        );

        use sea_orm::ConnectionTrait;
        let rows = self.read_conn().query_all(stmt).await?;
        let mut answers = Vec::with_capacity(rows.len());
        for row in rows {
            answers.push(SavedAnswer {
                question_id: row.try_get("", "question_id")?,
                answer_text: row.try_get("", "answer_text")?,
            });
        }
        Ok(answers)
    }

    /// Question catalog for a report type, in questionnaire order.
    pub async fn questions_for_type(&self, report_type_id: Uuid) -> Result<Vec<Question>> {
        QuestionEntity::find()
            .filter(QuestionColumn::ReportTypeId.eq(report_type_id))
            .order_by_asc(QuestionColumn::OrderIndex)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl ReportStore for Repository {
    async fn find_token_for_user(
        &self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<AccessToken>> {
        // Read from primary: dispatch and progress both key off fields the
        // dispatcher itself just wrote.
        AccessTokenEntity::find()
            .filter(AccessTokenColumn::AccessToken.eq(token))
            .filter(AccessTokenColumn::UserId.eq(user_id))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn set_token_status(&self, token_id: Uuid, status: TokenStatus) -> Result<()> {
        let token = AccessTokenEntity::find_by_id(token_id)
            .one(self.write_conn())
            .await?
            .ok_or(AppError::AccessTokenNotFound)?;

        let mut active: AccessTokenActiveModel = token.into();
        active.status = Set(String::from(status));
        active.update(self.write_conn()).await?;
        Ok(())
    }

    async fn set_token_report(&self, token_id: Uuid, report_id: Uuid) -> Result<()> {
        let token = AccessTokenEntity::find_by_id(token_id)
            .one(self.write_conn())
            .await?
            .ok_or(AppError::AccessTokenNotFound)?;

        let mut active: AccessTokenActiveModel = token.into();
        active.report_id = Set(Some(report_id));
        active.update(self.write_conn()).await?;
        Ok(())
    }

    async fn create_report(&self, report_type_id: Uuid, input_session_id: Uuid) -> Result<Report> {
        let report = ReportActiveModel {
            id: Set(Uuid::new_v4()),
            report_type_id: Set(report_type_id),
            input_session_id: Set(input_session_id),
            status: Set(String::from(ReportStatus::Generating)),
            progress: Set(0),
            version: Set(1),
            generated_at: Set(chrono::Utc::now().into()),
        };

        report.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_report(&self, report_id: Uuid) -> Result<Option<Report>> {
        // Progress polls must observe the latest committed worker writes,
        // so bypass any replica lag.
        ReportEntity::find_by_id(report_id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn session_answers(&self, session_id: Uuid) -> Result<Vec<AnswerPair>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT q.question_text, a.answer_text
            FROM user_answers a
            JOIN questions q ON q.id = a.question_id
            WHERE a.input_session_id = $1
            ORDER BY q.order_index ASC
            "#,
            vec![session_id.into()],
        );

        use sea_orm::ConnectionTrait;
        let rows = self.write_conn().query_all(stmt).await?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            pairs.push(AnswerPair {
                question: row.try_get("", "question_text")?,
                answer: row.try_get("", "answer_text")?,
            });
        }
        Ok(pairs)
    }

    async fn chapters_for_type(&self, report_type_id: Uuid) -> Result<Vec<Chapter>> {
        ChapterEntity::find()
            .filter(ChapterColumn::ReportTypeId.eq(report_type_id))
            .order_by_asc(ChapterColumn::OrderIndex)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn latest_prompt(&self, chapter_id: Uuid) -> Result<Option<ChapterPrompt>> {
        ChapterPromptEntity::find()
            .filter(ChapterPromptColumn::ChapterId.eq(chapter_id))
            .order_by_desc(ChapterPromptColumn::Version)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn chapter_exists(&self, report_id: Uuid, chapter_id: Uuid) -> Result<bool> {
        let count = ReportChapterEntity::find()
            .filter(ReportChapterColumn::ReportId.eq(report_id))
            .filter(ReportChapterColumn::ChapterId.eq(chapter_id))
            .count(self.write_conn())
            .await?;
        Ok(count > 0)
    }

    async fn insert_report_chapter(&self, chapter: NewReportChapter) -> Result<bool> {
        // The unique index on (report_id, chapter_id) is the real duplicate
        // arbiter; rows_affected tells us whether this delivery won.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO report_chapters
                (id, report_id, chapter_id, chapter_prompt_id, order_index, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (report_id, chapter_id) DO NOTHING
            "#,
            vec![
                Uuid::new_v4().into(),
                chapter.report_id.into(),
                chapter.chapter_id.into(),
                chapter.chapter_prompt_id.into(),
                chapter.order_index.into(),
                chapter.content.into(),
            ],
        );

        use sea_orm::ConnectionTrait;
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_progress(&self, report_id: Uuid) -> Result<i32> {
        // Count and set in one statement so concurrent workers can never
        // write a stale read-modify-write value.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE reports
            SET progress = (
                SELECT COUNT(*) FROM report_chapters WHERE report_id = $1
            )
            WHERE id = $1
            RETURNING progress
            "#,
            vec![report_id.into()],
        );

        use sea_orm::ConnectionTrait;
        let row = self
            .write_conn()
            .query_one(stmt)
            .await?
            .ok_or_else(|| AppError::ReportNotFound {
                id: report_id.to_string(),
            })?;

        row.try_get("", "progress").map_err(Into::into)
    }

    async fn complete_report(&self, report_id: Uuid) -> Result<bool> {
        // CAS on status: only one of any set of racing workers observes a
        // nonzero row count.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE reports
            SET status = 'completed'
            WHERE id = $1 AND status = 'generating'
            "#,
            vec![report_id.into()],
        );

        use sea_orm::ConnectionTrait;
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn chapter_total(&self, report_type_id: Uuid) -> Result<i64> {
        let count = ChapterEntity::find()
            .filter(ChapterColumn::ReportTypeId.eq(report_type_id))
            .count(self.read_conn())
            .await?;
        Ok(count as i64)
    }
}
