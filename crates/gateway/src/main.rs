//! ReportCraft API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Answer autosave and questionnaire resume
//! - Report generation dispatch
//! - Progress polling
//! - Rate limiting and observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use reportcraft_common::{
    config::AppConfig,
    db::DbPool,
    metrics,
    queue::{Queue, QueueConfig},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    /// Chapter-job queue; absent when no queue URL is configured, in which
    /// case dispatch requests are rejected with 503
    pub queue: Option<Arc<Queue>>,
}

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

    info!(
        "Starting ReportCraft API Gateway v{}",
        reportcraft_common::VERSION
    );

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    info!("Metrics exporter listening on {}", metrics_addr);

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    // Connect the chapter-job queue
    let queue = match config.queue.reports_queue_url {
        Some(ref url) => {
            let queue = Queue::new(QueueConfig {
                url: url.clone(),
                dlq_url: config.queue.dlq_url.clone(),
                max_receive_count: config.queue.max_receive_count,
                visibility_timeout: config.queue.visibility_timeout_secs as i32,
                ..QueueConfig::default()
            })
            .await?;
            Some(Arc::new(queue))
        }
        None => {
            warn!("No reports queue URL configured; generation dispatch disabled");
            None
        }
    };

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        queue,
    };

    // Build the router
    let app = create_router(state, &config);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState, config: &AppConfig) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Questionnaire endpoints
        .route("/reports/answers", post(handlers::answers::autosave_answer))
        .route(
            "/reports/answers/{session_id}",
            get(handlers::answers::get_saved_answers),
        )
        // Generation endpoints
        .route("/reports/generate", post(handlers::reports::start_generation))
        .route(
            "/reports/progress/{token}",
            get(handlers::reports::get_progress),
        );

    let mut app = Router::new()
        .nest("/v1", api_routes)
        // Health endpoints (no auth, no version prefix)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready));

    if config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );
        app = app.layer(axum::middleware::from_fn(move |req, next| {
            let limiter = limiter.clone();
            middleware::rate_limit::rate_limit_middleware(req, next, limiter)
        }));
    }

    app.layer(axum::middleware::from_fn(
        middleware::request_metrics::track_requests,
    ))
    .layer(TraceLayer::new_for_http())
    .layer(cors)
    .layer(request_id)
    .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
