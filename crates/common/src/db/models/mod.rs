//! SeaORM entity models
//!
//! Database entities for the ReportCraft pipeline

mod access_token;
mod answer;
mod chapter;
mod chapter_prompt;
mod input_session;
mod question;
mod report;
mod report_chapter;

pub use access_token::{
    ActiveModel as AccessTokenActiveModel, Column as AccessTokenColumn, Entity as AccessTokenEntity,
    Model as AccessToken, TokenStatus,
};

pub use input_session::{
    ActiveModel as InputSessionActiveModel, Column as InputSessionColumn,
    Entity as InputSessionEntity, Model as InputSession,
};

pub use answer::{
    ActiveModel as AnswerActiveModel, Column as AnswerColumn, Entity as AnswerEntity,
    Model as Answer,
};

pub use question::{
    ActiveModel as QuestionActiveModel, Column as QuestionColumn, Entity as QuestionEntity,
    Model as Question,
};

pub use report::{
    ActiveModel as ReportActiveModel, Column as ReportColumn, Entity as ReportEntity,
    Model as Report, ReportStatus,
};

pub use chapter::{
    ActiveModel as ChapterActiveModel, Column as ChapterColumn, Entity as ChapterEntity,
    Model as Chapter,
};

pub use chapter_prompt::{
    ActiveModel as ChapterPromptActiveModel, Column as ChapterPromptColumn,
    Entity as ChapterPromptEntity, Model as ChapterPrompt,
};

pub use report_chapter::{
    ActiveModel as ReportChapterActiveModel, Column as ReportChapterColumn,
    Entity as ReportChapterEntity, Model as ReportChapter,
};
