use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::api::{self, AppState};
use super::service::{self, Collaborators, Dashboard, ServiceConfig};
use super::ws;
use crate::tunnel::{TunnelManager, TunnelOptions, TunnelProvider};

/// Configuration for the dashboard server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Consecutive ports to try, starting at `port`, before giving up.
    pub port_attempts: u16,
    pub open_browser: bool,
    pub viewer_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            port_attempts: 10,
            open_browser: false,
            viewer_queue: 256,
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not found"})),
    )
}

/// Bind the first free port in `port..port + attempts`. Port 0 asks the OS.
pub async fn bind_listener(host: &str, port: u16, attempts: u16) -> Result<TcpListener> {
    let attempts = if port == 0 { 1 } else { attempts.max(1) };
    let mut last_error = None;
    for offset in 0..attempts {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        let addr = format!("{}:{}", host, candidate);
        match TcpListener::bind(&addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(%addr, error = %e, "port unavailable");
                last_error = Some(e);
            }
        }
    }
    let last = port.saturating_add(attempts - 1);
    match last_error {
        Some(e) => Err(e).with_context(|| format!("Failed to bind to {}:{}-{}", host, port, last)),
        None => anyhow::bail!("No usable port in {}:{}-{}", host, port, last),
    }
}

/// Start the dashboard server and run until Ctrl+C.
pub async fn start_server(
    config: ServerConfig,
    collaborators: Collaborators,
    service_config: ServiceConfig,
    tunnel_provider: Option<Arc<dyn TunnelProvider>>,
) -> Result<()> {
    let listener = bind_listener(&config.host, config.port, config.port_attempts).await?;
    let local_addr = listener.local_addr()?;

    let tunnel = match tunnel_provider {
        Some(provider) => TunnelManager::new(
            provider,
            TunnelOptions {
                port: local_addr.port(),
            },
        ),
        None => TunnelManager::disabled(),
    };

    let (mut dashboard, events) = Dashboard::new(collaborators, service_config, Arc::new(tunnel));
    if let Err(e) = dashboard.initialize().await {
        warn!(error = %e, "initial discovery failed; retrying on the next reconciliation");
    }
    let (handle, task) = service::spawn(dashboard, events);

    let state = Arc::new(AppState {
        dashboard: handle.clone(),
        viewer_queue: config.viewer_queue,
    });
    let app = build_router(state).layer(CorsLayer::permissive());

    let url = format!("http://{}", local_addr);
    info!(%url, "dashboard listening");
    println!("Spec dashboard running at {}", url);

    if config.open_browser
        && let Err(e) = open::that(&url)
    {
        warn!(error = %e, "could not open browser");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "dashboard service already stopped");
    }
    task.await.context("Dashboard service task failed")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::testing::{running_dashboard, write_workspace};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_router() -> (Router, TempDir) {
        let tmp = TempDir::new().unwrap();
        write_workspace(tmp.path());
        let (dashboard, _task) =
            running_dashboard(vec![tmp.path().to_path_buf()], Arc::new(TunnelManager::disabled()))
                .await;
        let state = Arc::new(AppState {
            dashboard,
            viewer_queue: 16,
        });
        (build_router(state), tmp)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let (app, _tmp) = test_router().await;
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let (app, _tmp) = test_router().await;
        let req = Request::builder()
            .uri("/api/sessions")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let (app, _tmp) = test_router().await;
        let req = Request::builder()
            .uri("/ws")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (app, _tmp) = test_router().await;
        let req = Request::builder()
            .uri("/no/such/route")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Not found");
    }

    #[tokio::test]
    async fn test_bind_listener_skips_busy_port() {
        let busy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = busy.local_addr().unwrap().port();
        if port == u16::MAX {
            return;
        }

        let listener = bind_listener("127.0.0.1", port, 20).await.unwrap();
        let bound = listener.local_addr().unwrap().port();
        assert_ne!(bound, port);
        assert!(bound > port);
    }

    #[tokio::test]
    async fn test_bind_listener_fails_when_all_ports_busy() {
        let busy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = busy.local_addr().unwrap().port();

        let err = bind_listener("127.0.0.1", port, 1).await.unwrap_err();
        assert!(err.to_string().contains("Failed to bind"));
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5000);
        assert_eq!(config.port_attempts, 10);
        assert!(!config.open_browser);
    }
}
