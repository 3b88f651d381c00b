//! Dashboard HTTP Server
//!
//! Axum-based server with embedded static files, CORS, and graceful shutdown.

use crate::dashboard::api::api_router;
use crate::dashboard::config::ServerConfig;
use crate::db::Database;
use axum::{
    body::Body,
    extract::Path,
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use rust_embed::{Embed, RustEmbed};
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Embedded static files for the stats dashboard
#[derive(Embed)]
#[folder = "src/dashboard/static/"]
struct StaticAssets;

/// Stats dashboard server
pub struct DashboardServer {
    config: ServerConfig,
    db: Arc<Database>,
}

impl DashboardServer {
    pub fn new(config: ServerConfig, db: Arc<Database>) -> Self {
        Self { config, db }
    }

    /// Build the router with all routes and middleware
    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET])
            .allow_headers([header::CONTENT_TYPE]);

        let mut router = Router::new()
            .route("/", get(index_handler))
            .route("/{*path}", get(static_handler))
            .merge(api_router(self.db.clone()))
            .layer(cors);

        if self.config.log_requests {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server and run until shutdown signal
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.build_router();
        serve("stats dashboard", &self.config, router).await
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Bind and serve `router` until Ctrl+C or SIGTERM
pub async fn serve(name: &str, config: &ServerConfig, router: Router) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    info!("Starting {} on {}", name, addr);
    if !config.is_localhost() {
        warn!("{} bound to {} - reachable from the network", name, addr);
    }
    info!("{} available at {}", name, config.base_url());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("{} shut down gracefully", name);
    Ok(())
}

/// `index.html` from `A`, or `fallback` when it was not embedded
pub fn embedded_index<A: RustEmbed>(fallback: &'static str) -> Response {
    match A::get("index.html") {
        Some(content) => Html(content.data.into_owned()).into_response(),
        None => Html(fallback).into_response(),
    }
}

/// A single embedded asset with its guessed content type
pub fn embedded_file<A: RustEmbed>(path: &str) -> Response {
    let path = path.trim_start_matches('/');

    if path.contains("..") {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match A::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string();

            (
                [
                    (header::CONTENT_TYPE, mime),
                    (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
                ],
                Body::from(content.data.into_owned()),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn index_handler() -> Response {
    embedded_index::<StaticAssets>(FALLBACK_INDEX)
}

async fn static_handler(Path(path): Path<String>) -> Response {
    embedded_file::<StaticAssets>(&path)
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Bot Stats</title></head>
<body>
    <h1>Bot Stats</h1>
    <p>The dashboard UI is not installed. Raw data: <a href="/api/stats">/api/stats</a></p>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn server() -> DashboardServer {
        let db = Arc::new(Database::open_in_memory().unwrap());
        DashboardServer::new(ServerConfig::new(8080), db)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = server().build_router();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let app = server().build_router();

        let response = app
            .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_index_returns_html() {
        let app = server().build_router();

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains("Bot Stats"));
    }

    #[tokio::test]
    async fn test_path_traversal_blocked() {
        let app = server().build_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/..%2F..%2Fetc/passwd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_file_returns_404() {
        let app = server().build_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nonexistent.js")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
