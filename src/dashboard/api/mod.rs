//! Dashboard API Endpoints
//!
//! JSON endpoints for the stats dashboard. The ops dashboard reuses the
//! error shape and the health router.

pub mod health;
pub mod stats;

use axum::{http::StatusCode, response::Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::db::Database;

pub use health::{health_router, AppState};
pub use stats::{recent_activity, stats_router, ActivityItem, StatsResponse, StatsState};

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error,
            message: message.into(),
            details: None,
        }),
    )
}

/// Health routes at the root plus the stats API under `/api`
///
/// Routes:
/// - GET /health, /healthz, /readyz
/// - GET /api/stats - user, image and todo counters
/// - GET /api/activity - ten most recent images and tasks
pub fn api_router(db: Arc<Database>) -> Router {
    health_router(Arc::new(AppState::with_db(db.clone())))
        .nest("/api", stats_router(Arc::new(StatsState::new(db))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn db() -> Arc<Database> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_stats_on_empty_database() {
        let app = api_router(db());
        let response = app
            .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["total_users"], 0);
        assert_eq!(json["active_users"], 0);
        assert_eq!(json["total_images"], 0);
        assert_eq!(json["completed_todos"], 0);
        assert!(json["last_updated"].is_string());
    }

    #[tokio::test]
    async fn test_activity_empty_list() {
        let app = api_router(db());
        let response = app
            .oneshot(Request::builder().uri("/api/activity").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["activities"], serde_json::json!([]));
    }

    #[test]
    fn test_error_response_omits_empty_details() {
        let (status, Json(body)) = api_error(StatusCode::BAD_REQUEST, "bad_request", "Invalid action");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["message"], "Invalid action");
        assert!(json.get("details").is_none());
    }
}
