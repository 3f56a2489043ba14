//! Chapter catalog entity (immutable per report type)
//!
//! `order_index` is a display/assembly attribute only; chapter jobs run in
//! any order.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chapters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub report_type_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    pub order_index: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chapter_prompt::Entity")]
    Prompts,

    #[sea_orm(has_many = "super::report_chapter::Entity")]
    ReportChapters,
}

impl Related<super::chapter_prompt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Prompts.def()
    }
}

impl Related<super::report_chapter::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReportChapters.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
