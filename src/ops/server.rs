//! Ops dashboard HTTP server
//!
//! Service status and control, GitHub commit list with rollback, and a
//! websocket journal tail.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, Request, State,
    },
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rust_embed::Embed;
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::process::Stdio;
use std::sync::Arc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::git::{GitInfo, GitRepo};
use super::logs::LogFollower;
use super::releases::{Release, ReleasesClient};
use super::service::{ServiceAction, ServiceManager, ServiceStatus, Systemctl};
use crate::dashboard::api::{api_error, health_router, ApiError, AppState};
use crate::dashboard::config::{DashboardConfig, OpsSettings, ServerConfig};
use crate::dashboard::server::{embedded_file, embedded_index, serve};

const RECENT_LINES: usize = 20;

#[derive(Embed)]
#[folder = "src/ops/static/"]
struct OpsAssets;

pub struct OpsState {
    pub settings: OpsSettings,
    pub service: Arc<dyn ServiceManager>,
    pub logs: Arc<LogFollower>,
    pub releases: Option<ReleasesClient>,
}

impl OpsState {
    pub fn from_settings(settings: OpsSettings) -> Self {
        let releases = settings
            .github_repo
            .as_deref()
            .map(|repo| ReleasesClient::new(repo, settings.github_token.clone()));
        Self {
            service: Arc::new(Systemctl::new(settings.service_name.clone())),
            logs: Arc::new(LogFollower::new(settings.service_name.clone())),
            releases,
            settings,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub service: ServiceStatus,
    pub last_log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub commit_sha: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// Ops dashboard server
pub struct OpsServer {
    config: ServerConfig,
    state: Arc<OpsState>,
}

impl OpsServer {
    pub fn new(config: &DashboardConfig) -> Self {
        Self::with_state(
            config.ops.clone(),
            Arc::new(OpsState::from_settings(config.ops_settings.clone())),
        )
    }

    pub fn with_state(config: ServerConfig, state: Arc<OpsState>) -> Self {
        Self { config, state }
    }

    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        let protected = Router::new()
            .route("/api/status", get(status_handler))
            .route("/api/control", post(control_handler))
            .route("/api/releases", get(releases_handler))
            .route("/api/rollback", post(rollback_handler))
            .route("/ws/logs", get(ws_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_token,
            ))
            .with_state(self.state.clone());

        let mut router = Router::new()
            .route("/", get(index_handler))
            .route("/{*path}", get(static_handler))
            .merge(protected)
            .merge(health_router(Arc::new(AppState::new())))
            .layer(cors);

        if self.config.log_requests {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    pub async fn run(self) -> anyhow::Result<()> {
        if !self.config.is_localhost() && self.state.settings.access_token.is_none() {
            warn!("Ops dashboard is reachable from the network without OPS_DASHBOARD_TOKEN");
        }
        info!(
            "Managing service {} in {}",
            self.state.settings.service_name,
            self.state.settings.repo_path.display()
        );
        let router = self.build_router();
        serve("ops dashboard", &self.config, router).await
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Byte comparison whose running time does not depend on where the inputs differ
fn tokens_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Bearer token from the Authorization header or `?token=`
async fn require_token(State(state): State<Arc<OpsState>>, req: Request, next: Next) -> Response {
    let Some(ref expected) = state.settings.access_token else {
        return next.run(req).await;
    };

    let header_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let query_token = Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.token);

    let authorized = header_token
        .or(query_token)
        .is_some_and(|token| tokens_match(&token, expected));
    if authorized {
        next.run(req).await
    } else {
        api_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Missing or invalid token",
        )
        .into_response()
    }
}

fn internal(context: &str, e: impl std::fmt::Display) -> ApiError {
    error!("{}: {}", context, e);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        format!("{}: {}", context, e),
    )
}

async fn git_info(repo_path: std::path::PathBuf) -> Result<GitInfo, String> {
    tokio::task::spawn_blocking(move || GitRepo::open(&repo_path).and_then(|r| r.head_info()))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

async fn status_handler(State(state): State<Arc<OpsState>>) -> Result<Json<StatusResponse>, ApiError> {
    let service = state
        .service
        .status()
        .await
        .map_err(|e| internal("Failed to read service status", e))?;

    let last_log = match state.service.recent_logs(1).await {
        Ok(lines) => lines.last().cloned(),
        Err(e) => {
            warn!("Failed to read journal: {}", e);
            None
        }
    }
    .unwrap_or_else(|| "No logs available".to_string());

    let (git, git_error) = match git_info(state.settings.repo_path.clone()).await {
        Ok(info) => (Some(info), None),
        Err(e) => (None, Some(e)),
    };

    Ok(Json(StatusResponse {
        service,
        last_log,
        git,
        git_error,
    }))
}

async fn control_handler(
    State(state): State<Arc<OpsState>>,
    Json(req): Json<ControlRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action: ServiceAction = req
        .action
        .parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "bad_request", "Invalid action"))?;

    state
        .service
        .control(action)
        .await
        .map_err(|e| internal("Service control failed", e))?;

    Ok(ActionResponse::ok(format!("Bot {} successfully", action.done())))
}

async fn releases_handler(State(state): State<Arc<OpsState>>) -> Result<Json<Vec<Release>>, ApiError> {
    let Some(ref client) = state.releases else {
        return Ok(Json(Vec::new()));
    };
    client.recent().await.map(Json).map_err(|e| {
        warn!("Failed to fetch releases: {}", e);
        api_error(
            StatusCode::BAD_GATEWAY,
            "upstream_error",
            format!("Failed to fetch releases: {}", e),
        )
    })
}

async fn rollback_handler(
    State(state): State<Arc<OpsState>>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let sha = req
        .commit_sha
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "bad_request", "Commit SHA required"))?;

    info!("Rolling back {} to {}", state.settings.service_name, sha);
    match perform_rollback(&state, &sha).await {
        Ok(info) => Ok(ActionResponse::ok(format!(
            "Successfully rolled back to commit {}",
            info.hash
        ))),
        Err(e) => {
            error!("Rollback to {} failed: {:#}", sha, e);
            if let Err(start_err) = state.service.control(ServiceAction::Start).await {
                error!("Restart after failed rollback also failed: {}", start_err);
            }
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "rollback_failed",
                format!("Rollback failed: {}", e),
            ))
        }
    }
}

async fn perform_rollback(state: &OpsState, sha: &str) -> anyhow::Result<GitInfo> {
    state.service.control(ServiceAction::Stop).await?;

    let repo_path = state.settings.repo_path.clone();
    let token = state.settings.github_token.clone();
    let target = sha.to_string();
    let info = tokio::task::spawn_blocking(move || {
        let repo = GitRepo::open(&repo_path)?;
        repo.fetch("origin", token.as_deref())?;
        repo.reset_hard(&target)
    })
    .await??;

    if let Some(ref cmd) = state.settings.post_rollback_cmd {
        run_post_rollback(cmd, &state.settings.repo_path).await?;
    }

    state.service.control(ServiceAction::Start).await?;
    Ok(info)
}

async fn run_post_rollback(cmd: &str, dir: &FsPath) -> anyhow::Result<()> {
    info!("Running post-rollback command: {}", cmd);
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        anyhow::bail!(
            "post-rollback command exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<OpsState>>) -> Response {
    ws.on_upgrade(move |socket| stream_logs(socket, state))
}

type LogSink = SplitSink<WebSocket, Message>;

async fn send_json(sink: &mut LogSink, value: serde_json::Value) -> Result<(), axum::Error> {
    sink.send(Message::Text(value.to_string().into())).await
}

async fn send_line(sink: &mut LogSink, line: &str) -> Result<(), axum::Error> {
    send_json(sink, serde_json::json!({"type": "log_line", "line": line})).await
}

async fn stream_logs(socket: WebSocket, state: Arc<OpsState>) {
    // Subscribe before replaying history so no live line falls in between.
    let mut live = BroadcastStream::new(state.logs.subscribe());
    let (mut sink, mut incoming) = socket.split();

    if send_json(&mut sink, serde_json::json!({"type": "connected"})).await.is_err() {
        return;
    }

    match state.service.recent_logs(RECENT_LINES).await {
        Ok(lines) => {
            for line in lines {
                if send_line(&mut sink, &format!("[RECENT] {}", line)).await.is_err() {
                    return;
                }
            }
        }
        Err(e) => {
            let _ = send_line(&mut sink, &format!("Error getting recent logs: {}", e)).await;
        }
    }

    if send_line(&mut sink, "--- Following live logs ---").await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            line = live.next() => match line {
                Some(Ok(line)) => {
                    if send_line(&mut sink, &line).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!("Log client lagged, skipped {} lines", skipped);
                }
                None => break,
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
}

async fn index_handler() -> Response {
    embedded_index::<OpsAssets>(FALLBACK_INDEX)
}

async fn static_handler(Path(path): Path<String>) -> Response {
    embedded_file::<OpsAssets>(&path)
}

const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Bot Ops</title></head>
<body><h1>Bot Ops</h1><p>See <a href="/api/status">/api/status</a>.</p></body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::service::ServiceResult;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeService {
        actions: Mutex<Vec<ServiceAction>>,
    }

    #[async_trait]
    impl ServiceManager for FakeService {
        async fn status(&self) -> ServiceResult<ServiceStatus> {
            Ok(ServiceStatus::parse(
                "Active: active (running) since Mon 2024-01-01 10:00:00 UTC; 5min ago\nMemory: 12.0M",
            ))
        }

        async fn control(&self, action: ServiceAction) -> ServiceResult<()> {
            self.actions.lock().push(action);
            Ok(())
        }

        async fn recent_logs(&self, n: usize) -> ServiceResult<Vec<String>> {
            Ok(vec!["bot started".to_string()].into_iter().take(n).collect())
        }
    }

    fn setup(token: Option<&str>, repo: &FsPath) -> (Router, Arc<FakeService>) {
        let fake = Arc::new(FakeService::default());
        let settings = OpsSettings {
            repo_path: repo.to_path_buf(),
            access_token: token.map(str::to_string),
            ..Default::default()
        };
        let state = Arc::new(OpsState {
            logs: Arc::new(LogFollower::new(settings.service_name.clone())),
            service: fake.clone(),
            releases: None,
            settings,
        });
        let server = OpsServer::with_state(ServerConfig::new(9000), state);
        (server.build_router(), fake)
    }

    fn post_json(uri: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_service_and_git_error() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = setup(None, dir.path());

        let response = app
            .oneshot(axum::http::Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["active"], true);
        assert_eq!(json["uptime"], "5min");
        assert_eq!(json["memory_usage"], "12.0M");
        assert_eq!(json["last_log"], "bot started");
        assert!(json["git_error"].is_string());
    }

    #[tokio::test]
    async fn test_control_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (app, fake) = setup(None, dir.path());

        let response = app
            .oneshot(post_json("/api/control", r#"{"action":"restart"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "Bot restarted successfully");
        assert_eq!(*fake.actions.lock(), vec![ServiceAction::Restart]);
    }

    #[tokio::test]
    async fn test_control_invalid_action() {
        let dir = tempfile::tempdir().unwrap();
        let (app, fake) = setup(None, dir.path());

        let response = app
            .oneshot(post_json("/api/control", r#"{"action":"reboot"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Invalid action");
        assert!(fake.actions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_requires_sha() {
        let dir = tempfile::tempdir().unwrap();
        let (app, fake) = setup(None, dir.path());

        let response = app.oneshot(post_json("/api/rollback", "{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Commit SHA required");
        assert!(fake.actions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_restarts_service() {
        let dir = tempfile::tempdir().unwrap();
        GitRepo::init(dir.path()).unwrap();
        let (app, fake) = setup(None, dir.path());

        let response = app
            .oneshot(post_json("/api/rollback", r#"{"commit_sha":"abcdef12"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert!(json["message"]
            .as_str()
            .unwrap()
            .starts_with("Rollback failed: "));
        assert_eq!(
            *fake.actions.lock(),
            vec![ServiceAction::Stop, ServiceAction::Start]
        );
    }

    #[tokio::test]
    async fn test_releases_empty_without_repo() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = setup(None, dir.path());

        let response = app
            .oneshot(axum::http::Request::builder().uri("/api/releases").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_token_guard() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = setup(Some("s3cret"), dir.path());

        let denied = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/api/releases").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/releases")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);

        let by_query = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/releases?token=s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(by_query.status(), StatusCode::OK);

        let health = app
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_token_is_percent_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = setup(Some("a&b=c/d"), dir.path());

        let encoded = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/releases?token=a%26b%3Dc%2Fd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(encoded.status(), StatusCode::OK);

        let truncated = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/releases?token=a%26b")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(truncated.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3creT", "s3cret"));
        assert!(!tokens_match("s3cre", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
    }
}
