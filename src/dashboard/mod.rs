//! Dashboard server — live multi-workspace view over WebSocket.
//!
//! ## Overview
//!
//! Every workspace found under the configured roots is registered with its
//! own change notifier. Notifier events and a periodic discovery pass keep the
//! registry current; after each change the active session of every attached
//! workspace is recomputed and fanned out to all connected viewers.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Viewer  │ ───────> │  server.rs  (axum Router, ServerConfig, bind)    │
//! │          │ <─────── │    ├─ api.rs  (query routes, AppState)           │
//! └──────────┘ WebSocket│    └─ ws.rs   (WsMessage, socket loop)           │
//!                       │         │                                        │
//!                       │         │ DashboardHandle (command queue)        │
//!                       │         v                                        │
//!                       │  service.rs  (Dashboard actor, reconcile loop)   │
//!                       │    ├─ registry.rs  (path → WorkspaceState)       │
//!                       │    ├─ resolver.rs  (active-session selection)    │
//!                       │    └─ hub.rs       (viewer queues, fan-out)      │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module   | Responsibility                                              |
//! |----------|-------------------------------------------------------------|
//! | `models` | `Workspace`, `ProjectSnapshot`, `ActiveSession` wire types  |

pub mod api;
pub mod hub;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod service;
pub mod ws;

pub use models::{ActiveSession, ProjectSnapshot, Workspace};
pub use server::{ServerConfig, start_server};
pub use service::{Collaborators, Dashboard, DashboardHandle, ReconcileReport, ServiceConfig};

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use super::service::{self, Collaborators, Dashboard, DashboardHandle, ServiceConfig};
    use crate::discovery::FsDiscovery;
    use crate::parser::{MarkdownParser, WORKFLOW_DIR};
    use crate::tunnel::TunnelManager;
    use crate::watcher::NotifyChangeNotifier;

    /// A workspace at `root` with one spec (task 2.3 in progress), one bug
    /// under analysis and a live session marker.
    pub fn write_workspace(root: &Path) {
        let workflow = root.join(WORKFLOW_DIR);
        let spec = workflow.join("specs").join("user-auth");
        std::fs::create_dir_all(&spec).unwrap();
        std::fs::write(
            spec.join("tasks.md"),
            "- [x] 1. Set up\n- [ ] 2. Build\n  - [-] 2.3 Wire the API\n",
        )
        .unwrap();

        let bug = workflow.join("bugs").join("login-crash");
        std::fs::create_dir_all(&bug).unwrap();
        std::fs::write(bug.join("report.md"), "# Login crash\n\n**Severity**: high\n").unwrap();
        std::fs::write(bug.join("analysis.md"), "Root cause pending\n").unwrap();

        std::fs::write(
            workflow.join("session.json"),
            format!("{{\"pid\": {}}}", std::process::id()),
        )
        .unwrap();
    }

    /// Initialize and spawn a dashboard over `roots` with the on-disk
    /// collaborators.
    pub async fn running_dashboard(
        roots: Vec<std::path::PathBuf>,
        tunnel: Arc<TunnelManager>,
    ) -> (DashboardHandle, JoinHandle<()>) {
        let (mut dashboard, events) = Dashboard::new(
            Collaborators {
                discovery: Arc::new(FsDiscovery::new(roots, 3)),
                parser: Arc::new(MarkdownParser),
                notifier: Arc::new(NotifyChangeNotifier),
            },
            ServiceConfig {
                reconcile_interval: Duration::from_secs(3600),
                collaborator_timeout: Duration::from_secs(5),
                operator: "tester".into(),
            },
            tunnel,
        );
        dashboard.initialize().await.unwrap();
        service::spawn(dashboard, events)
    }
}
