//! ReportCraft Common Library
//!
//! Shared code for the ReportCraft services including:
//! - Database models and repository patterns
//! - Report generation pipeline (dispatcher, chapter worker, progress)
//! - LLM generation client abstraction
//! - SQS job queue integration
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod generation;
pub mod metrics;
pub mod pipeline;
pub mod queue;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Repository;
pub use errors::{AppError, Result};
pub use generation::Generator;
pub use pipeline::ReportStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default generation model
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";

/// Name of the queue chapter jobs are routed to
pub const REPORTS_QUEUE: &str = "reports";
