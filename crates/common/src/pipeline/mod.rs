//! Report-generation pipeline
//!
//! The core of ReportCraft: dispatching one job per chapter onto a durable
//! queue, executing those jobs concurrently against an LLM, and folding the
//! results back into shared report progress/completion state.
//!
//! All operations take their storage context explicitly (a [`ReportStore`]
//! parameter) rather than reaching for ambient connection state, so the
//! same code runs against Postgres in production and an in-memory store in
//! tests.

mod dispatcher;
mod progress;
mod store;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::dispatch_report;
pub use progress::{report_progress, ProgressSnapshot};
pub use store::{NewReportChapter, ReportStore};
pub use worker::{ChapterOutcome, ChapterWorker};

/// Placeholder in prompt templates replaced by the rendered answer block
pub const ANSWERS_PLACEHOLDER: &str = "{{answers}}";
