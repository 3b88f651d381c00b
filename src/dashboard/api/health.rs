//! Health Check API
//!
//! Liveness and readiness endpoints shared by both dashboards.

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::db::Database;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub version: &'static str,
    /// Checked by the readiness probe when present
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
            db: None,
        }
    }

    pub fn with_db(db: Arc<Database>) -> Self {
        Self {
            db: Some(db),
            ..Self::new()
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// ISO 8601
    pub timestamp: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: state.version,
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 503 when the database stops answering
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    let Some(ref db) = state.db else {
        return StatusCode::OK;
    };
    match db.conn().query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// `/health`, `/healthz` and `/readyz`
pub fn health_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .with_state(state)
}
