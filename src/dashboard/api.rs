use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::warn;

use super::service::DashboardHandle;
use crate::errors::{DashboardError, TunnelError};

/// Shared state for all route handlers.
pub struct AppState {
    pub dashboard: DashboardHandle,
    /// Per-viewer queue capacity for WebSocket connections.
    pub viewer_queue: usize,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DocumentQuery {
    pub path: String,
}

// ── Error type ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    BadGateway(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        let msg = err.to_string();
        match err {
            DashboardError::WorkspaceNotFound { .. } | DashboardError::DocumentNotFound { .. } => {
                ApiError::NotFound(msg)
            }
            DashboardError::InvalidDocumentPath { .. } => ApiError::BadRequest(msg),
            DashboardError::Tunnel(TunnelError::NotConfigured) => ApiError::BadRequest(msg),
            DashboardError::Tunnel(_) => {
                warn!(error = %msg, "tunnel request failed");
                ApiError::BadGateway(msg)
            }
            DashboardError::ServiceStopped => ApiError::Unavailable(msg),
            DashboardError::Workspace(_) | DashboardError::Other(_) => ApiError::Internal(msg),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/workspaces", get(list_workspaces))
        .route("/api/workspaces/{id}", get(get_workspace))
        .route("/api/workspaces/{id}/specs", get(list_specs))
        .route("/api/workspaces/{id}/bugs", get(list_bugs))
        .route("/api/workspaces/{id}/document", get(get_document))
        .route("/api/sessions", get(list_sessions))
        .route("/api/tunnel", get(tunnel_status))
        .route("/api/tunnel/start", post(start_tunnel))
        .route("/api/tunnel/stop", post(stop_tunnel))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn list_workspaces(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboard.workspaces().await?))
}

async fn get_workspace(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboard.project(&id).await?))
}

async fn list_specs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.dashboard.project(&id).await?;
    Ok(Json(project.specs))
}

async fn list_bugs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.dashboard.project(&id).await?;
    Ok(Json(project.bugs))
}

async fn get_document(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<DocumentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let content = state.dashboard.document(&id, &query.path).await?;
    Ok(Json(serde_json::json!({"path": query.path, "content": content})))
}

async fn list_sessions(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboard.sessions().await?))
}

async fn tunnel_status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.dashboard.tunnel_status())
}

async fn start_tunnel(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboard.start_tunnel().await?))
}

async fn stop_tunnel(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    state.dashboard.stop_tunnel().await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::testing::{running_dashboard, write_workspace};
    use crate::tunnel::TunnelManager;
    use crate::tunnel::TunnelOptions;
    use crate::tunnel::testing::FakeTunnelProvider;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_app(tunnel: TunnelManager) -> (Router, DashboardHandle, TempDir) {
        let tmp = TempDir::new().unwrap();
        write_workspace(tmp.path());
        let (dashboard, _task) = running_dashboard(vec![tmp.path().to_path_buf()], Arc::new(tunnel)).await;
        let state = Arc::new(AppState {
            dashboard: dashboard.clone(),
            viewer_queue: 16,
        });
        (api_router().with_state(state), dashboard, tmp)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn first_workspace_id(app: &Router) -> String {
        let response = app.clone().oneshot(get_request("/api/workspaces")).await.unwrap();
        let workspaces: Vec<serde_json::Value> = body_json(response.into_body()).await;
        workspaces[0]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _dashboard, _tmp) = test_app(TunnelManager::disabled()).await;
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_list_workspaces() {
        let (app, _dashboard, _tmp) = test_app(TunnelManager::disabled()).await;
        let response = app.oneshot(get_request("/api/workspaces")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let workspaces: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0]["hasActiveSession"], true);
        assert_eq!(workspaces[0]["specCount"], 1);
    }

    #[tokio::test]
    async fn test_get_workspace_specs_and_bugs() {
        let (app, _dashboard, _tmp) = test_app(TunnelManager::disabled()).await;
        let id = first_workspace_id(&app).await;

        let response = app
            .clone()
            .oneshot(get_request(&format!("/api/workspaces/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let project: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(project["id"], id.as_str());
        assert_eq!(project["specs"][0]["displayName"], "User Auth");

        let response = app
            .clone()
            .oneshot(get_request(&format!("/api/workspaces/{}/specs", id)))
            .await
            .unwrap();
        let specs: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(specs[0]["status"], "in-progress");

        let response = app
            .oneshot(get_request(&format!("/api/workspaces/{}/bugs", id)))
            .await
            .unwrap();
        let bugs: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(bugs[0]["name"], "login-crash");
        assert_eq!(bugs[0]["severity"], "high");
    }

    #[tokio::test]
    async fn test_get_workspace_not_found() {
        let (app, _dashboard, _tmp) = test_app(TunnelManager::disabled()).await;
        let response = app
            .oneshot(get_request("/api/workspaces/000000000000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_get_document_and_traversal_rejection() {
        let (app, _dashboard, _tmp) = test_app(TunnelManager::disabled()).await;
        let id = first_workspace_id(&app).await;

        let response = app
            .clone()
            .oneshot(get_request(&format!(
                "/api/workspaces/{}/document?path=specs/user-auth/tasks.md",
                id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let doc: serde_json::Value = body_json(response.into_body()).await;
        assert!(doc["content"].as_str().unwrap().contains("2.3 Wire the API"));

        let response = app
            .clone()
            .oneshot(get_request(&format!(
                "/api/workspaces/{}/document?path=../../etc/passwd",
                id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(get_request(&format!(
                "/api/workspaces/{}/document?path=specs/missing.md",
                id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let (app, _dashboard, _tmp) = test_app(TunnelManager::disabled()).await;
        let response = app.oneshot(get_request("/api/sessions")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let sessions: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["type"], "spec");
        assert_eq!(sessions[0]["task"]["id"], "2.3");
        assert_eq!(sessions[0]["isCurrentlyActive"], true);
    }

    #[tokio::test]
    async fn test_tunnel_not_configured_is_bad_request() {
        let (app, _dashboard, _tmp) = test_app(TunnelManager::disabled()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/tunnel/start")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get_request("/api/tunnel")).await.unwrap();
        let status: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(status["active"], false);
    }

    #[tokio::test]
    async fn test_tunnel_start_and_stop() {
        let provider = Arc::new(FakeTunnelProvider::new());
        let tunnel = TunnelManager::new(provider.clone(), TunnelOptions { port: 5173 });
        let (app, _dashboard, _tmp) = test_app(tunnel).await;

        let start = Request::builder()
            .method("POST")
            .uri("/api/tunnel/start")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(start).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let info: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(info["url"], "https://fake.example/5173");

        let stop = Request::builder()
            .method("POST")
            .uri("/api/tunnel/stop")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(stop).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(get_request("/api/tunnel")).await.unwrap();
        let status: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(status["active"], false);
    }

    #[tokio::test]
    async fn test_tunnel_provider_failure_is_bad_gateway() {
        let provider = Arc::new(FakeTunnelProvider::new());
        *provider.fail_with.lock().unwrap() = Some("quota exceeded".into());
        let tunnel = TunnelManager::new(provider, TunnelOptions { port: 5173 });
        let (app, _dashboard, _tmp) = test_app(tunnel).await;

        let start = Request::builder()
            .method("POST")
            .uri("/api/tunnel/start")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(start).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_stopped_service_is_unavailable() {
        let (app, dashboard, _tmp) = test_app(TunnelManager::disabled()).await;
        dashboard.shutdown().await.unwrap();

        let response = app.oneshot(get_request("/api/workspaces")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
