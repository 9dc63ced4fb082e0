/**
 * LINKWATCH STATUS API
 *
 * Read-only JSON view over the running kernel:
 * - GET /health              liveness, always open
 * - GET /system/health       transport state and emission counters
 * - GET /network             latest network snapshot
 * - GET /sources             per-topic history summary
 * - GET /sources/{*topic}    one topic
 *
 * When LINKWATCH_API_KEY is set every route except /health requires a
 * matching x-api-key header.
 */

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::derived::{self, DEFAULT_WINDOW};
use crate::emitter::Aggregator;
use crate::health::KernelHealth;
use crate::history::HistoryView;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        let api_key = std::env::var("LINKWATCH_API_KEY").ok().filter(|k| !k.is_empty());
        Self { aggregator, api_key }
    }
}

#[derive(Debug, Serialize)]
struct NetworkView {
    rtt_ms: f64,
    rtt_samples: Vec<f64>,
    throughput_bps: f64,
    interface_errors: u64,
    link_speed_mbps: u64,
    retransmissions: u64,
    buffer_status: f64,
}

#[derive(Debug, Serialize)]
struct SourceView {
    topic: String,
    message_count: u64,
    failed_deliveries: u64,
    last_latency_ms: Option<f64>,
    moving_avg_latency_ms: f64,
    jitter_ms: f64,
}

fn to_view(topic: String, h: &HistoryView) -> SourceView {
    SourceView {
        topic,
        message_count: h.message_count,
        failed_deliveries: h.failed_deliveries,
        last_latency_ms: h.latencies.last().copied(),
        moving_avg_latency_ms: derived::moving_average(&h.latencies, DEFAULT_WINDOW),
        jitter_ms: derived::jitter(&h.latencies),
    }
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid API key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/network", get(get_network))
        .route("/sources", get(get_sources))
        .route("/sources/{*topic}", get(get_source))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let agg = &app.aggregator;
    Json(agg.status().get_health(agg.history().len()))
}

// GET /network
async fn get_network(State(app): State<AppState>) -> Json<NetworkView> {
    let snap = app.aggregator.network().current();
    Json(NetworkView {
        rtt_ms: snap.rtt_ms(),
        rtt_samples: snap.rtt_history.iter().copied().collect(),
        throughput_bps: snap.throughput_bps,
        interface_errors: snap.interface_errors,
        link_speed_mbps: snap.link_speed_mbps,
        retransmissions: snap.retransmissions,
        buffer_status: snap.buffer_status,
    })
}

// GET /sources
async fn get_sources(State(app): State<AppState>) -> Json<Vec<SourceView>> {
    let list = app
        .aggregator
        .history()
        .snapshot()
        .into_iter()
        .map(|(topic, h)| to_view(topic, &h))
        .collect();
    Json(list)
}

// GET /sources/{*topic}
async fn get_source(
    State(app): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<SourceView>, StatusCode> {
    let topic = topic.trim_start_matches('/').to_string();
    let history = app.aggregator.history();
    if !history.contains(&topic) {
        return Err(StatusCode::NOT_FOUND);
    }
    let view = history.view(&topic);
    Ok(Json(to_view(topic, &view)))
}
