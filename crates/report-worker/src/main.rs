//! ReportCraft Report Worker
//!
//! Processes chapter generation jobs from the SQS queue:
//! 1. Receives one chapter job per message
//! 2. Renders the prompt and calls the LLM
//! 3. Persists the chapter row idempotently
//! 4. Updates report progress and completion state
//!
//! Failed jobs are left on the queue for redelivery; the queue's
//! max-receive policy moves repeat offenders to the DLQ. Malformed
//! payloads can never succeed, so they are logged and deleted.

use reportcraft_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    generation::create_generator,
    metrics,
    pipeline::{ChapterOutcome, ChapterWorker},
    queue::{ChapterJobMessage, Queue, QueueConfig},
    VERSION,
};
use reportcraft_common::errors::AppError;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting ReportCraft Report Worker v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    // Initialize metrics
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    // Initialize the LLM client
    let generator = create_generator(&config.generation);
    info!(model = %generator.model_name(), "Generator initialized");

    let worker = ChapterWorker::new(Repository::new(db), generator);

    // Connect the chapter-job queue
    let reports_queue = match config.queue.reports_queue_url {
        Some(ref url) => {
            info!(url = %url, "Connecting to reports queue...");
            let queue_config = QueueConfig {
                url: url.clone(),
                dlq_url: config.queue.dlq_url.clone(),
                max_receive_count: config.queue.max_receive_count,
                visibility_timeout: config.queue.visibility_timeout_secs as i32,
                ..Default::default()
            };
            Queue::new(queue_config).await?
        }
        None => {
            warn!("No reports queue URL configured, waiting for shutdown signal...");
            tokio::signal::ctrl_c().await?;
            info!("Report worker shutting down");
            return Ok(());
        }
    };

    info!("Report worker ready, starting queue polling...");

    // Circuit breaker state
    let mut consecutive_failures = 0u32;
    const MAX_FAILURES: u32 = 5;
    const CIRCUIT_BREAK_DURATION: std::time::Duration = std::time::Duration::from_secs(30);

    // Start polling loop
    loop {
        // Circuit breaker check
        if consecutive_failures >= MAX_FAILURES {
            warn!(
                failures = consecutive_failures,
                "Circuit breaker open, pausing..."
            );
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = reports_queue.receive() => {
                match result {
                    Ok(messages) => {
                        for message in messages {
                            let Some(receipt_handle) = message.receipt_handle.clone() else {
                                warn!("Message without receipt handle, skipping");
                                continue;
                            };

                            // A payload that cannot parse will never succeed
                            // on redelivery either
                            let job: ChapterJobMessage = match Queue::parse_message(&message) {
                                Ok(job) => job,
                                Err(e) => {
                                    error!(error = %e, "Malformed chapter job, dropping message");
                                    metrics::record_poison_message();
                                    if let Err(e) = reports_queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete poison message");
                                    }
                                    continue;
                                }
                            };

                            info!(
                                report_id = %job.report_id,
                                chapter_id = %job.chapter_id,
                                "Received chapter job"
                            );

                            match worker.process(&job).await {
                                Ok(outcome) => {
                                    consecutive_failures = 0;
                                    match &outcome {
                                        ChapterOutcome::Completed { progress, report_completed } => {
                                            info!(
                                                report_id = %job.report_id,
                                                progress,
                                                report_completed,
                                                "Chapter job completed"
                                            );
                                            metrics::record_queue_message("completed");
                                        }
                                        ChapterOutcome::Duplicate => {
                                            metrics::record_queue_message("duplicate");
                                        }
                                    }
                                    // Delete on success or duplicate
                                    if let Err(e) = reports_queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete message");
                                    }
                                }
                                // An invalid payload cannot succeed on redelivery
                                Err(e @ AppError::Validation { .. }) => {
                                    error!(
                                        report_id = %job.report_id,
                                        chapter_id = %job.chapter_id,
                                        error = %e,
                                        "Invalid chapter job, dropping message"
                                    );
                                    metrics::record_poison_message();
                                    if let Err(e) = reports_queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete poison message");
                                    }
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    metrics::record_queue_message("failed");
                                    error!(
                                        report_id = %job.report_id,
                                        chapter_id = %job.chapter_id,
                                        error = %e,
                                        failures = consecutive_failures,
                                        "Failed to process chapter job"
                                    );
                                    // Message will be re-delivered or moved to DLQ
                                }
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("Report worker shutting down");
    Ok(())
}
