//! HTTP surface for the dashboard: a one-shot metrics endpoint and an SSE
//! stream that pushes a new snapshot whenever the logs change.

use crate::config::ClawtricsConfig;
use crate::engine::{EngineError, MetricsEngine, SnapshotCache};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct AppState {
    engine: Arc<MetricsEngine>,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    days: Option<u32>,
}

impl AppState {
    fn window(&self, query: &WindowQuery) -> u32 {
        query.days.unwrap_or(self.engine.config().window.days)
    }
}

pub async fn run(config: ClawtricsConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind = config.serve.bind.clone();
    let port = config.serve.port;
    let poll_interval = Duration::from_secs(config.serve.poll_interval_secs.max(1));
    let engine = MetricsEngine::new(config)?;

    let app = router(Arc::new(engine), poll_interval);

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("serve listening on {local_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

fn router(engine: Arc<MetricsEngine>, poll_interval: Duration) -> Router {
    let state = AppState {
        engine,
        poll_interval,
    };
    Router::new()
        .route("/api/health", get(health))
        .route("/api/metrics", get(api_metrics))
        .route("/api/stream", get(api_stream))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn api_metrics(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<crate::metrics::MetricsSnapshot>, (StatusCode, Json<serde_json::Value>)> {
    let days = state.window(&query);
    state.engine.snapshot(days).await.map(Json).map_err(|e| {
        let status = match e {
            EngineError::InvalidWindow(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(error = %e, days, "metrics request failed");
        (status, Json(serde_json::json!({"error": e.to_string()})))
    })
}

async fn api_stream(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let days = state.window(&query);
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(stream_loop(state, days, tx));
    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

/// Per-connection producer. Owns its own cache so clients never share
/// detector state. Ends when the client goes away.
async fn stream_loop(state: AppState, days: u32, tx: mpsc::Sender<Result<Event, Infallible>>) {
    let mut cache = SnapshotCache::new(&state.engine);
    let mut first = true;
    tracing::debug!(days, "stream client connected");

    loop {
        if !first {
            tokio::time::sleep(state.poll_interval).await;
        }
        let payload = stream_message(&mut cache, &state.engine, days, first).await;
        first = false;

        if tx.send(Ok(Event::default().data(payload.to_string()))).await.is_err() {
            tracing::debug!("stream client disconnected");
            return;
        }
    }
}

/// The next stream message: a snapshot on the first tick or after a change,
/// otherwise a heartbeat.
async fn stream_message(
    cache: &mut SnapshotCache,
    engine: &MetricsEngine,
    days: u32,
    first: bool,
) -> serde_json::Value {
    match cache.get(engine, days).await {
        Ok((snapshot, fresh)) if fresh || first => {
            serde_json::json!({"type": "metrics", "data": &*snapshot})
        }
        Ok(_) => serde_json::json!({
            "type": "heartbeat",
            "timestamp": chrono::Utc::now().timestamp_millis(),
        }),
        Err(e) => {
            tracing::warn!(error = %e, "stream snapshot failed");
            serde_json::json!({"type": "error", "error": e.to_string()})
        }
    }
}
