//! Per-request metrics middleware
//!
//! Records request count and latency labelled by method, route template,
//! and status. The matched route template keeps label cardinality bounded;
//! unmatched requests fall back to their raw path.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use reportcraft_common::metrics::RequestMetrics;

/// Track one request through the router
pub async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let timer = RequestMetrics::start(request.method().as_str(), &endpoint);

    let response = next.run(request).await;
    timer.finish(response.status().as_u16());

    response
}
