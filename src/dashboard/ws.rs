use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::api::AppState;
use super::models::{ActiveSession, ProjectSnapshot, Workspace};
use crate::parser::{BugRecord, SpecRecord, SteeringStatus};
use crate::tunnel::{TunnelEvent, TunnelInfo, TunnelMetrics, TunnelStatus};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum WsMessage {
    /// Full snapshot, sent once to each viewer on connect.
    Initial {
        projects: Vec<ProjectSnapshot>,
        active_sessions: Vec<ActiveSession>,
        operator: String,
        tunnel: TunnelStatus,
    },

    // Per-workspace deltas
    ProjectUpdate {
        project_id: String,
        specs: Vec<SpecRecord>,
    },
    GitUpdate {
        project_id: String,
        git_branch: Option<String>,
        git_commit: Option<String>,
    },
    SteeringUpdate {
        project_id: String,
        steering_status: SteeringStatus,
    },
    BugUpdate {
        project_id: String,
        bugs: Vec<BugRecord>,
    },

    // Registry lifecycle
    WorkspaceAdded {
        project: ProjectSnapshot,
    },
    WorkspaceRemoved {
        project_id: String,
        path: PathBuf,
    },
    WorkspaceDegraded {
        workspace: Workspace,
        error: String,
    },

    ActiveSessionsUpdate {
        sessions: Vec<ActiveSession>,
    },

    // Tunnel relay
    TunnelStarted {
        info: TunnelInfo,
    },
    TunnelStopped {
        reason: String,
    },
    TunnelMetricsUpdated {
        metrics: TunnelMetrics,
    },
    TunnelVisitorNew {
        visitor: String,
    },
    TunnelRecoveryStart {
        attempt: u32,
    },
    TunnelRecoverySuccess {
        info: TunnelInfo,
    },
    TunnelRecoveryFailed {
        attempt: u32,
        error: String,
    },
}

impl From<TunnelEvent> for WsMessage {
    fn from(event: TunnelEvent) -> Self {
        match event {
            TunnelEvent::Started(info) => Self::TunnelStarted { info },
            TunnelEvent::Stopped { reason } => Self::TunnelStopped { reason },
            TunnelEvent::MetricsUpdated(metrics) => Self::TunnelMetricsUpdated { metrics },
            TunnelEvent::VisitorNew { visitor } => Self::TunnelVisitorNew { visitor },
            TunnelEvent::RecoveryStart { attempt } => Self::TunnelRecoveryStart { attempt },
            TunnelEvent::RecoverySuccess(info) => Self::TunnelRecoverySuccess { info },
            TunnelEvent::RecoveryFailed { attempt, error } => {
                Self::TunnelRecoveryFailed { attempt, error }
            }
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, receiver) = socket.split();
    let (tx, rx) = mpsc::channel(state.viewer_queue);

    let viewer = match state.dashboard.connect(tx).await {
        Ok(Some(id)) => id,
        Ok(None) | Err(_) => {
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    run_socket_loop(sender, receiver, rx).await;

    // The service may already be gone during shutdown.
    let _ = state.dashboard.disconnect(viewer).await;
    debug!(viewer = viewer.0, "socket closed");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards queued hub messages, watches client frames, and pings on a
/// fixed interval. If no Pong arrives within [`PONG_TIMEOUT`] after a Ping,
/// or the hub drops this viewer's queue, the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: mpsc::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Hub forwarding ──────────────────────────────────────
            queued = rx.recv() => {
                match queued {
                    Some(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // ── Client messages (pong, close, etc.) ─────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Viewing is read-only; ignore anything else.
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> TunnelInfo {
        TunnelInfo {
            provider: "cmd".into(),
            url: "https://demo.example".into(),
            active: true,
        }
    }

    #[test]
    fn test_message_types_are_kebab_case_with_data() {
        let msg = WsMessage::GitUpdate {
            project_id: "abc".into(),
            git_branch: Some("main".into()),
            git_commit: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "git-update");
        assert_eq!(json["data"]["projectId"], "abc");
        assert_eq!(json["data"]["gitBranch"], "main");
        assert!(json["data"]["gitCommit"].is_null());
    }

    #[test]
    fn test_initial_message_fields() {
        let msg = WsMessage::Initial {
            projects: vec![],
            active_sessions: vec![],
            operator: "dana".into(),
            tunnel: TunnelStatus::default(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "initial");
        assert_eq!(json["data"]["operator"], "dana");
        assert_eq!(json["data"]["activeSessions"], serde_json::json!([]));
        assert_eq!(json["data"]["tunnel"]["active"], false);
    }

    #[test]
    fn test_tunnel_events_relay_one_to_one() {
        let cases = vec![
            (TunnelEvent::Started(info()), "tunnel-started"),
            (
                TunnelEvent::Stopped {
                    reason: "bye".into(),
                },
                "tunnel-stopped",
            ),
            (
                TunnelEvent::MetricsUpdated(TunnelMetrics {
                    visitors: 2,
                    requests: 9,
                }),
                "tunnel-metrics-updated",
            ),
            (
                TunnelEvent::VisitorNew {
                    visitor: "1.2.3.4".into(),
                },
                "tunnel-visitor-new",
            ),
            (TunnelEvent::RecoveryStart { attempt: 1 }, "tunnel-recovery-start"),
            (TunnelEvent::RecoverySuccess(info()), "tunnel-recovery-success"),
            (
                TunnelEvent::RecoveryFailed {
                    attempt: 3,
                    error: "gave up".into(),
                },
                "tunnel-recovery-failed",
            ),
        ];
        for (event, expected) in cases {
            let json = serde_json::to_value(WsMessage::from(event)).unwrap();
            assert_eq!(json["type"], expected);
        }
    }

    #[test]
    fn test_tunnel_payload_is_forwarded_unchanged() {
        let msg = WsMessage::from(TunnelEvent::Started(info()));
        assert_eq!(msg, WsMessage::TunnelStarted { info: info() });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["data"]["info"]["url"], "https://demo.example");
    }

    #[test]
    fn test_round_trip_workspace_removed() {
        let msg = WsMessage::WorkspaceRemoved {
            project_id: "p".into(),
            path: PathBuf::from("/w"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
