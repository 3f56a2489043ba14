//! User answer entity
//!
//! Unique per (input_session_id, question_id); re-answering a question
//! updates the row in place rather than inserting a duplicate.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_answers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub input_session_id: Uuid,

    pub question_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub answer_text: String,

    pub created_at: DateTimeWithTimeZone,
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
        belongs_to = "super::question::Entity",
        from = "Column::QuestionId",
        to = "super::question::Column::Id"
    )]
    Question,
}

impl Related<super::input_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InputSession.def()
    }
}

impl Related<super::question::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Question.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
