//! SQS queue integration for chapter-generation jobs
//!
//! Provides:
//! - The `JobQueue` trait the dispatcher fans out through
//! - SQS client wrapper with send retry and long polling
//! - Typed, validated chapter job payloads
//! - Dead letter queue handling via receive-count policy

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// One question/answer pair collected from an input session.
///
/// Carried verbatim in every chapter job of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPair {
    pub question: String,
    pub answer: String,
}

/// Chapter-generation job payload.
///
/// Built once at dispatch; the prompt template is frozen here so later
/// prompt edits never affect in-flight reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterJobMessage {
    pub report_id: Uuid,
    pub report_type_id: Uuid,
    pub input_session_id: Uuid,
    pub chapter_id: Uuid,
    pub chapter_prompt_id: Uuid,
    pub order_index: i32,
    pub prompt_template: String,
    pub answers: Vec<AnswerPair>,
}

impl ChapterJobMessage {
    /// Validate the payload at the queue boundary.
    ///
    /// Rejects malformed jobs before a worker begins billable generation
    /// work. An empty answer list is allowed; an empty prompt is not.
    pub fn validate(&self) -> Result<()> {
        if self.report_id.is_nil()
            || self.report_type_id.is_nil()
            || self.chapter_id.is_nil()
            || self.chapter_prompt_id.is_nil()
        {
            return Err(AppError::Validation {
                message: "chapter job carries a nil id".to_string(),
                field: None,
            });
        }

        if self.prompt_template.trim().is_empty() {
            return Err(AppError::Validation {
                message: "chapter job carries an empty prompt template".to_string(),
                field: Some("prompt_template".to_string()),
            });
        }

        Ok(())
    }
}

/// Durable queue abstraction the dispatcher enqueues through.
///
/// Implementations must guarantee at-least-once delivery; consumers carry
/// the matching idempotency.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit one independent chapter job. Returns the broker message id.
    async fn enqueue(&self, job: &ChapterJobMessage) -> Result<String>;
}

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue URL
    pub url: String,
    /// Dead letter queue URL (optional)
    pub dlq_url: Option<String>,
    /// Maximum receive count before moving to DLQ
    pub max_receive_count: u32,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Wait time for long polling (seconds)
    pub wait_time_seconds: i32,
    /// Maximum number of messages per poll
    pub max_messages: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            dlq_url: None,
            max_receive_count: 3,
            visibility_timeout: 300,
            wait_time_seconds: 20,
            max_messages: 10,
        }
    }
}

/// SQS queue client wrapper
pub struct Queue {
    client: SqsClient,
    config: QueueConfig,
}

impl Queue {
    /// Create a new queue client
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, config })
    }

    /// Create with existing AWS config
    pub fn with_client(client: SqsClient, config: QueueConfig) -> Self {
        Self { client, config }
    }

    /// Send a message to the queue, retrying transient failures with
    /// exponential backoff. Dispatch has no queue behind it to re-drive the
    /// caller, so the send itself must absorb blips.
    pub async fn send<T: Serialize + Sync>(&self, message: &T) -> Result<String> {
        let body = serde_json::to_string(message).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.client
                .send_message()
                .queue_url(&self.config.url)
                .message_body(&body)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(e))
        })
        .await
        .map_err(|e| AppError::QueueError {
            message: format!("Failed to send message: {}", e),
        })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(message_id)
    }

    /// Receive messages from the queue
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(self.config.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        Ok(messages)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    /// Change visibility timeout (extend processing time)
    pub async fn extend_visibility(
        &self,
        receipt_handle: &str,
        additional_seconds: i32,
    ) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(additional_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to extend visibility: {}", e),
            })?;

        debug!(additional_seconds, "Extended message visibility");
        Ok(())
    }

    /// Parse message body as JSON
    pub fn parse_message<T: DeserializeOwned>(message: &Message) -> Result<T> {
        let body = message.body.as_ref().ok_or_else(|| AppError::QueueError {
            message: "Message has no body".to_string(),
        })?;

        serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse message: {}", e),
        })
    }
}

#[async_trait]
impl JobQueue for Queue {
    async fn enqueue(&self, job: &ChapterJobMessage) -> Result<String> {
        self.send(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> ChapterJobMessage {
        ChapterJobMessage {
            report_id: Uuid::new_v4(),
            report_type_id: Uuid::new_v4(),
            input_session_id: Uuid::new_v4(),
            chapter_id: Uuid::new_v4(),
            chapter_prompt_id: Uuid::new_v4(),
            order_index: 2,
            prompt_template: "Write the chapter.\n\n{{answers}}".to_string(),
            answers: vec![AnswerPair {
                question: "What drives you?".to_string(),
                answer: "Curiosity".to_string(),
            }],
        }
    }

    #[test]
    fn test_job_message_serialization() {
        let msg = sample_job();

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ChapterJobMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.report_id, parsed.report_id);
        assert_eq!(msg.chapter_prompt_id, parsed.chapter_prompt_id);
        assert_eq!(msg.answers, parsed.answers);
    }

    #[test]
    fn test_validate_accepts_empty_answers() {
        let mut msg = sample_job();
        msg.answers.clear();
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_nil_ids() {
        let mut msg = sample_job();
        msg.chapter_id = Uuid::nil();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_prompt() {
        let mut msg = sample_job();
        msg.prompt_template = "   ".to_string();
        assert!(msg.validate().is_err());
    }
}
