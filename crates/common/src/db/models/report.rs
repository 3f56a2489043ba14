//! Report entity
//!
//! `progress` and `status` are the only fields mutated after creation, and
//! only by chapter workers.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Report status enum
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Generating,
    Completed,
}

impl From<String> for ReportStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => ReportStatus::Completed,
            _ => ReportStatus::Generating,
        }
    }
}

impl From<ReportStatus> for String {
    fn from(status: ReportStatus) -> Self {
        match status {
            ReportStatus::Generating => "generating".to_string(),
            ReportStatus::Completed => "completed".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reports")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub report_type_id: Uuid,

    pub input_session_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Count of completed chapters, recomputed by workers
    pub progress: i32,

    pub version: i32,

    pub generated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the report status as an enum
    pub fn report_status(&self) -> ReportStatus {
        ReportStatus::from(self.status.clone())
    }

    /// Check if the report reached its terminal state
    pub fn is_completed(&self) -> bool {
        self.report_status() == ReportStatus::Completed
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::report_chapter::Entity")]
    ReportChapters,

    #[sea_orm(
        belongs_to = "super::input_session::Entity",
        from = "Column::InputSessionId",
        to = "super::input_session::Column::Id"
    )]
    InputSession,
}

impl Related<super::report_chapter::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReportChapters.def()
    }
}

impl Related<super::input_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InputSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
