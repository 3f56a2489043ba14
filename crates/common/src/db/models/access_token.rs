//! Access-grant token entity
//!
//! One row per purchased report. The token string is the opaque credential
//! the user presents to trigger and poll generation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Token lifecycle status.
///
/// Monotonic in normal operation; operator correction is the only path
/// backwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    NotStarted,
    InProgress,
    Generating,
    Done,
}

impl From<String> for TokenStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "not_started" => TokenStatus::NotStarted,
            "in_progress" => TokenStatus::InProgress,
            "generating" => TokenStatus::Generating,
            "done" => TokenStatus::Done,
            _ => TokenStatus::NotStarted,
        }
    }
}

impl From<TokenStatus> for String {
    fn from(status: TokenStatus) -> Self {
        match status {
            TokenStatus::NotStarted => "not_started".to_string(),
            TokenStatus::InProgress => "in_progress".to_string(),
            TokenStatus::Generating => "generating".to_string(),
            TokenStatus::Done => "done".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "report_access_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub report_type_id: Uuid,

    /// Opaque, unguessable credential string (unique)
    #[sea_orm(column_type = "Text", unique)]
    pub access_token: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Input session currently attached to this grant, if any
    pub input_session_id: Option<Uuid>,

    /// Report created from this grant; set at dispatch time
    pub report_id: Option<Uuid>,

    /// Who granted this token ("stripe", "operator", ...)
    #[sea_orm(column_type = "Text")]
    pub granted_by: String,

    /// External payment reference for support/reconciliation
    #[sea_orm(column_type = "Text", nullable)]
    pub payment_reference: Option<String>,

    pub granted_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the token status as an enum
    pub fn token_status(&self) -> TokenStatus {
        TokenStatus::from(self.status.clone())
    }

    /// Check if generation has already been consumed
    pub fn is_terminal(&self) -> bool {
        matches!(self.token_status(), TokenStatus::Done)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::input_session::Entity",
        from = "Column::InputSessionId",
        to = "super::input_session::Column::Id"
    )]
    InputSession,

    #[sea_orm(
        belongs_to = "super::report::Entity",
        from = "Column::ReportId",
        to = "super::report::Column::Id"
    )]
    Report,
}

impl Related<super::input_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InputSession.def()
    }
}

impl Related<super::report::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Report.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
