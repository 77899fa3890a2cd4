//! The dashboard service.
//!
//! One task owns the registry, the viewer hub and the tunnel relay. Commands
//! from the HTTP layer, change-notifier events, reconciliation ticks and
//! tunnel events are all consumed by that task's loop, one at a time, so a
//! registry mutation, the session recompute and the fan-out that follow it
//! happen as a single step.
//!
//! Every call into an external collaborator runs on the blocking pool under
//! a timeout. A failure or expiry is charged to the workspace involved and
//! never stops the loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::hub::{BroadcastHub, ViewerId};
use super::models::{ActiveSession, Documents, ProjectSnapshot, Workspace};
use super::registry::{Registry, WorkspaceState};
use super::resolver::{order_sessions, resolve};
use super::ws::WsMessage;
use crate::discovery::{DiscoveredWorkspace, WorkspaceDiscovery};
use crate::errors::{DashboardError, WorkspaceError};
use crate::parser::{DocumentParser, confine_document_path};
use crate::tunnel::{TunnelEvent, TunnelInfo, TunnelManager, TunnelStatus};
use crate::vcs::{self, VcsState};
use crate::watcher::{ChangeKind, ChangeNotifier, EventSink, NotifierEvent};

/// Capacity of the command queue between handles and the service task.
const COMMAND_QUEUE: usize = 64;

/// The external collaborators the service reads the world through.
#[derive(Clone)]
pub struct Collaborators {
    pub discovery: Arc<dyn WorkspaceDiscovery>,
    pub parser: Arc<dyn DocumentParser>,
    pub notifier: Arc<dyn ChangeNotifier>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub reconcile_interval: Duration,
    /// Upper bound on any single collaborator call.
    pub collaborator_timeout: Duration,
    /// Name shown to viewers in the initial snapshot.
    pub operator: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(10),
            collaborator_timeout: Duration::from_secs(5),
            operator: "operator".to_string(),
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    /// Workspaces discovery reported but that could not be initialized.
    pub failed: Vec<PathBuf>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct Dashboard {
    collaborators: Collaborators,
    config: ServiceConfig,
    registry: Registry,
    hub: BroadcastHub,
    tunnel: Arc<TunnelManager>,
    events: EventSink,
    last_sessions: Vec<ActiveSession>,
}

impl Dashboard {
    /// Build the service. The returned receiver carries every notifier
    /// event and must be handed to [`spawn`] alongside the service.
    pub fn new(
        collaborators: Collaborators,
        config: ServiceConfig,
        tunnel: Arc<TunnelManager>,
    ) -> (Self, mpsc::UnboundedReceiver<NotifierEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let dashboard = Self {
            collaborators,
            config,
            registry: Registry::new(),
            hub: BroadcastHub::new(),
            tunnel,
            events,
            last_sessions: Vec::new(),
        };
        (dashboard, events_rx)
    }

    // ── Collaborator calls ──────────────────────────────────────────

    async fn bounded<T, F>(&self, operation: &'static str, path: &Path, f: F) -> Result<T, WorkspaceError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let limit = self.config.collaborator_timeout;
        match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => Err(WorkspaceError::Collaborator {
                path: path.to_path_buf(),
                operation,
                source,
            }),
            Ok(Err(join)) => Err(WorkspaceError::Collaborator {
                path: path.to_path_buf(),
                operation,
                source: anyhow::Error::new(join),
            }),
            Err(_) => Err(WorkspaceError::Timeout {
                path: path.to_path_buf(),
                operation,
                secs: limit.as_secs(),
            }),
        }
    }

    async fn parse<T, F>(&self, operation: &'static str, root: &Path, f: F) -> Result<T, WorkspaceError>
    where
        F: FnOnce(&dyn DocumentParser, &Path) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let parser = self.collaborators.parser.clone();
        let owned = root.to_path_buf();
        self.bounded(operation, root, move || f(parser.as_ref(), &owned))
            .await
    }

    async fn read_vcs(&self, root: &Path) -> Result<VcsState, WorkspaceError> {
        let owned = root.to_path_buf();
        self.bounded("git head lookup", root, move || Ok(vcs::read_head(&owned)))
            .await
    }

    async fn load_documents(&self, root: &Path) -> Result<Documents, WorkspaceError> {
        self.parse("document parsing", root, |parser, root| {
            Ok(Documents {
                specs: parser.list_specs(root)?,
                bugs: parser.list_bugs(root)?,
                steering: parser.steering_status(root)?,
            })
        })
        .await
    }

    async fn discover(&self) -> Result<Vec<DiscoveredWorkspace>, DashboardError> {
        let discovery = self.collaborators.discovery.clone();
        let limit = self.config.collaborator_timeout;
        match tokio::time::timeout(limit, tokio::task::spawn_blocking(move || discovery.discover())).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(anyhow::Error::new(join).context("Workspace discovery panicked").into()),
            Err(_) => Err(anyhow::anyhow!(
                "Workspace discovery timed out after {}s",
                limit.as_secs()
            )
            .into()),
        }
    }

    /// Read everything for a new workspace and start watching it.
    async fn load_workspace(&self, found: &DiscoveredWorkspace) -> Result<WorkspaceState, WorkspaceError> {
        let path = found.path.clone();
        tokio::fs::metadata(&path)
            .await
            .map_err(|source| WorkspaceError::RootUnreadable {
                path: path.clone(),
                source,
            })?;

        let documents = self.load_documents(&path).await?;
        let vcs = self.read_vcs(&path).await?;

        let notifier = self.collaborators.notifier.clone();
        let sink = self.events.clone();
        let root = path.clone();
        let handle = self
            .bounded("change notifier start", &path, move || notifier.start(&root, sink))
            .await?;

        Ok(WorkspaceState::new(
            Workspace::from_discovered(found, vcs),
            handle,
            documents,
        ))
    }

    // ── Registry & reconciliation ───────────────────────────────────

    /// Populate the registry from a first discovery scan.
    pub async fn initialize(&mut self) -> Result<ReconcileReport, DashboardError> {
        let report = self.reconcile().await?;
        info!(
            workspaces = self.registry.len(),
            failed = report.failed.len(),
            sessions = self.last_sessions.len(),
            "registry initialized"
        );
        Ok(report)
    }

    /// Re-run discovery, apply the difference, and always republish the
    /// active-session snapshot.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, DashboardError> {
        let discovered = match self.discover().await {
            Ok(found) => found,
            Err(e) => {
                self.broadcast_sessions();
                return Err(e);
            }
        };

        let diff = self.registry.diff(&discovered);
        let mut report = ReconcileReport::default();

        for path in diff.removed {
            if let Some(workspace) = self.registry.remove(&path) {
                info!(path = %path.display(), "workspace removed");
                self.hub.broadcast(&WsMessage::WorkspaceRemoved {
                    project_id: workspace.id,
                    path: path.clone(),
                });
                report.removed.push(path);
            }
        }

        for found in &diff.retained {
            self.refresh_workspace(found).await;
        }

        for found in diff.added {
            match self.load_workspace(&found).await {
                Ok(state) => {
                    info!(path = %found.path.display(), "workspace added");
                    let project = state.snapshot();
                    self.registry.insert(state);
                    self.hub.broadcast(&WsMessage::WorkspaceAdded { project });
                    report.added.push(found.path);
                }
                Err(e) => {
                    warn!(path = %found.path.display(), error = %e, "workspace skipped");
                    report.failed.push(found.path);
                }
            }
        }

        self.broadcast_sessions();
        if !report.is_unchanged() {
            debug!(
                added = report.added.len(),
                removed = report.removed.len(),
                "reconciliation applied changes"
            );
        }
        Ok(report)
    }

    /// Refresh a registered workspace during reconciliation. HEAD is always
    /// re-read. A degraded workspace reloads its documents, and the notifier
    /// is restarted when it is degraded or a repository has appeared since it
    /// started (so `.git` gets watched).
    async fn refresh_workspace(&mut self, found: &DiscoveredWorkspace) {
        let root = found.path.clone();
        let Some(state) = self.registry.get_mut(&root) else {
            return;
        };
        state.workspace.apply_discovered(found);
        let project_id = state.workspace.id.clone();
        let degraded = state.workspace.degraded;
        let previous = VcsState {
            branch: state.workspace.git_branch.clone(),
            commit: state.workspace.git_commit.clone(),
        };

        let vcs = match self.read_vcs(&root).await {
            Ok(vcs) => vcs,
            Err(e) => return self.mark_degraded(&root, e.to_string()),
        };
        let repo_appeared = previous == VcsState::default() && vcs != VcsState::default();
        if vcs != previous {
            if let Some(state) = self.registry.get_mut(&root) {
                state.workspace.apply_vcs(vcs.clone());
            }
            self.hub.broadcast(&WsMessage::GitUpdate {
                project_id: project_id.clone(),
                git_branch: vcs.branch,
                git_commit: vcs.commit,
            });
        }

        if !degraded && !repo_appeared {
            return;
        }

        let notifier = self.collaborators.notifier.clone();
        let sink = self.events.clone();
        let watch_root = root.clone();
        match self
            .bounded("change notifier start", &root, move || notifier.start(&watch_root, sink))
            .await
        {
            Ok(handle) => {
                if let Some(state) = self.registry.get_mut(&root) {
                    state.replace_notifier(handle);
                }
                debug!(path = %root.display(), "change notifier restarted");
            }
            Err(e) => return self.mark_degraded(&root, e.to_string()),
        }

        if !degraded {
            return;
        }
        match self.load_documents(&root).await {
            Ok(documents) => {
                let Some(state) = self.registry.get_mut(&root) else {
                    return;
                };
                state.documents = documents.clone();
                state.workspace.degraded = false;
                info!(path = %root.display(), "workspace recovered");
                self.hub.broadcast(&WsMessage::ProjectUpdate {
                    project_id: project_id.clone(),
                    specs: documents.specs,
                });
                self.hub.broadcast(&WsMessage::BugUpdate {
                    project_id: project_id.clone(),
                    bugs: documents.bugs,
                });
                self.hub.broadcast(&WsMessage::SteeringUpdate {
                    project_id,
                    steering_status: documents.steering,
                });
            }
            Err(e) => self.mark_degraded(&root, e.to_string()),
        }
    }

    // ── Push path ───────────────────────────────────────────────────

    pub async fn handle_event(&mut self, event: NotifierEvent) {
        let Some(state) = self.registry.get(&event.root) else {
            debug!(root = %event.root.display(), "event for unregistered workspace dropped");
            return;
        };
        let project_id = state.workspace.id.clone();
        let root = event.root;

        match event.kind {
            ChangeKind::Vcs => match self.read_vcs(&root).await {
                Ok(vcs) => {
                    if let Some(state) = self.registry.get_mut(&root) {
                        state.workspace.apply_vcs(vcs.clone());
                    }
                    self.hub.broadcast(&WsMessage::GitUpdate {
                        project_id,
                        git_branch: vcs.branch,
                        git_commit: vcs.commit,
                    });
                }
                Err(e) => self.mark_degraded(&root, e.to_string()),
            },
            ChangeKind::Document { .. } => {
                match self.parse("spec parsing", &root, |p, r| p.list_specs(r)).await {
                    Ok(specs) => {
                        if let Some(state) = self.registry.get_mut(&root) {
                            state.documents.specs = specs.clone();
                            state.workspace.degraded = false;
                        }
                        self.hub
                            .broadcast(&WsMessage::ProjectUpdate { project_id, specs });
                    }
                    Err(e) => self.mark_degraded(&root, e.to_string()),
                }
            }
            ChangeKind::Bug { .. } => {
                match self.parse("bug parsing", &root, |p, r| p.list_bugs(r)).await {
                    Ok(bugs) => {
                        if let Some(state) = self.registry.get_mut(&root) {
                            state.documents.bugs = bugs.clone();
                            state.workspace.degraded = false;
                        }
                        self.hub.broadcast(&WsMessage::BugUpdate { project_id, bugs });
                    }
                    Err(e) => self.mark_degraded(&root, e.to_string()),
                }
            }
            ChangeKind::Steering => {
                match self
                    .parse("steering parsing", &root, |p, r| p.steering_status(r))
                    .await
                {
                    Ok(steering_status) => {
                        if let Some(state) = self.registry.get_mut(&root) {
                            state.documents.steering = steering_status.clone();
                            state.workspace.degraded = false;
                        }
                        self.hub.broadcast(&WsMessage::SteeringUpdate {
                            project_id,
                            steering_status,
                        });
                    }
                    Err(e) => self.mark_degraded(&root, e.to_string()),
                }
            }
            ChangeKind::Error(message) => self.mark_degraded(&root, message),
        }

        self.broadcast_sessions();
    }

    fn mark_degraded(&mut self, root: &Path, error: String) {
        let Some(state) = self.registry.get_mut(root) else {
            return;
        };
        warn!(path = %root.display(), error = %error, "workspace degraded");
        state.workspace.degraded = true;
        let workspace = state.workspace.clone();
        self.hub
            .broadcast(&WsMessage::WorkspaceDegraded { workspace, error });
    }

    // ── Sessions & snapshots ────────────────────────────────────────

    fn compute_sessions(&self) -> Vec<ActiveSession> {
        let mut sessions: Vec<ActiveSession> = self
            .registry
            .iter()
            .filter_map(|s| resolve(&s.workspace, &s.documents.specs, &s.documents.bugs))
            .collect();
        order_sessions(&mut sessions);
        sessions
    }

    fn broadcast_sessions(&mut self) {
        self.last_sessions = self.compute_sessions();
        self.hub.broadcast(&WsMessage::ActiveSessionsUpdate {
            sessions: self.last_sessions.clone(),
        });
    }

    fn projects(&self) -> Vec<ProjectSnapshot> {
        self.registry.iter().map(WorkspaceState::snapshot).collect()
    }

    fn initial_message(&self) -> WsMessage {
        WsMessage::Initial {
            projects: self.projects(),
            active_sessions: self.last_sessions.clone(),
            operator: self.config.operator.clone(),
            tunnel: self.tunnel.status(),
        }
    }

    pub fn connect_viewer(&mut self, queue: mpsc::Sender<String>) -> Option<ViewerId> {
        let initial = self.initial_message();
        self.hub.register(queue, &initial)
    }

    fn relay_tunnel_event(&mut self, event: TunnelEvent) {
        debug!(event = ?event, "relaying tunnel event");
        self.hub.broadcast(&WsMessage::from(event));
    }

    // ── Queries ─────────────────────────────────────────────────────

    fn project(&self, id: &str) -> Result<ProjectSnapshot, DashboardError> {
        self.registry
            .find_by_id(id)
            .map(WorkspaceState::snapshot)
            .ok_or_else(|| DashboardError::WorkspaceNotFound { id: id.to_string() })
    }

    async fn read_document(&self, id: &str, path: &str) -> Result<String, DashboardError> {
        let relative = confine_document_path(path)?;
        let root = self
            .registry
            .find_by_id(id)
            .map(|s| s.workspace.path.clone())
            .ok_or_else(|| DashboardError::WorkspaceNotFound { id: id.to_string() })?;
        let text = self
            .parse("document read", &root, move |p, r| p.read_document(r, &relative))
            .await?;
        text.ok_or_else(|| DashboardError::DocumentNotFound {
            path: path.to_string(),
        })
    }

    // ── Service loop ────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { queue, reply } => {
                let _ = reply.send(self.connect_viewer(queue));
            }
            Command::Disconnect { viewer } => self.hub.unregister(viewer),
            Command::Workspaces { reply } => {
                let workspaces = self.registry.iter().map(|s| s.workspace.clone()).collect();
                let _ = reply.send(workspaces);
            }
            Command::Project { id, reply } => {
                let _ = reply.send(self.project(&id));
            }
            Command::Sessions { reply } => {
                let _ = reply.send(self.last_sessions.clone());
            }
            Command::Document { id, path, reply } => {
                let _ = reply.send(self.read_document(&id, &path).await);
            }
            Command::Reconcile { reply } => {
                let _ = reply.send(self.reconcile().await);
            }
            // Handled by the loop itself.
            Command::Shutdown { .. } => {}
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<NotifierEvent>,
    ) {
        let mut tunnel_events = self.tunnel.subscribe();
        let mut timer = tokio::time::interval(self.config.reconcile_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and initialize() already ran.
        timer.tick().await;

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                Some(event) = events.recv() => Step::Event(event),
                _ = timer.tick() => Step::Reconcile,
                event = next_tunnel_event(&mut tunnel_events) => Step::Tunnel(event),
            };

            match step {
                Step::Command(Some(Command::Shutdown { reply })) => {
                    self.teardown(&mut events, timer).await;
                    let _ = reply.send(());
                    return;
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Command(None) => {
                    self.teardown(&mut events, timer).await;
                    return;
                }
                Step::Event(event) => self.handle_event(event).await,
                Step::Reconcile => {
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "reconciliation failed");
                    }
                }
                Step::Tunnel(Some(event)) => self.relay_tunnel_event(event),
                Step::Tunnel(None) => {
                    debug!("tunnel event stream closed");
                    tunnel_events = None;
                }
            }
        }
    }

    /// Release everything in order: notifiers (discarding events already
    /// queued), the timer, the tunnel, viewer queues, then the registry.
    /// Each step runs regardless of the ones before it.
    async fn teardown(&mut self, events: &mut mpsc::UnboundedReceiver<NotifierEvent>, timer: Interval) {
        self.registry.stop_notifiers();
        let mut drained = 0usize;
        while events.try_recv().is_ok() {
            drained += 1;
        }

        drop(timer);

        if let Err(e) = self.tunnel.stop().await {
            warn!(error = %e, "failed to stop tunnel during shutdown");
        }

        self.hub.close_all();
        self.registry.clear();
        info!(drained, "dashboard stopped");
    }
}

enum Step {
    Command(Option<Command>),
    Event(NotifierEvent),
    Reconcile,
    Tunnel(Option<TunnelEvent>),
}

/// Next relayed tunnel event; pending forever when there is no provider.
async fn next_tunnel_event(
    events: &mut Option<broadcast::Receiver<TunnelEvent>>,
) -> Option<TunnelEvent> {
    let Some(receiver) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "tunnel events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

// ── Handle ───────────────────────────────────────────────────────────

enum Command {
    Connect {
        queue: mpsc::Sender<String>,
        reply: oneshot::Sender<Option<ViewerId>>,
    },
    Disconnect {
        viewer: ViewerId,
    },
    Workspaces {
        reply: oneshot::Sender<Vec<Workspace>>,
    },
    Project {
        id: String,
        reply: oneshot::Sender<Result<ProjectSnapshot, DashboardError>>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<ActiveSession>>,
    },
    Document {
        id: String,
        path: String,
        reply: oneshot::Sender<Result<String, DashboardError>>,
    },
    Reconcile {
        reply: oneshot::Sender<Result<ReconcileReport, DashboardError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable access to a running [`Dashboard`].
#[derive(Clone)]
pub struct DashboardHandle {
    commands: mpsc::Sender<Command>,
    tunnel: Arc<TunnelManager>,
}

impl DashboardHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DashboardError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| DashboardError::ServiceStopped)?;
        rx.await.map_err(|_| DashboardError::ServiceStopped)
    }

    /// Register a viewer queue; its first message is the full snapshot.
    pub async fn connect(&self, queue: mpsc::Sender<String>) -> Result<Option<ViewerId>, DashboardError> {
        self.request(|reply| Command::Connect { queue, reply }).await
    }

    pub async fn disconnect(&self, viewer: ViewerId) -> Result<(), DashboardError> {
        self.commands
            .send(Command::Disconnect { viewer })
            .await
            .map_err(|_| DashboardError::ServiceStopped)
    }

    pub async fn workspaces(&self) -> Result<Vec<Workspace>, DashboardError> {
        self.request(|reply| Command::Workspaces { reply }).await
    }

    pub async fn project(&self, id: &str) -> Result<ProjectSnapshot, DashboardError> {
        let id = id.to_string();
        self.request(|reply| Command::Project { id, reply }).await?
    }

    pub async fn sessions(&self) -> Result<Vec<ActiveSession>, DashboardError> {
        self.request(|reply| Command::Sessions { reply }).await
    }

    pub async fn document(&self, id: &str, path: &str) -> Result<String, DashboardError> {
        let (id, path) = (id.to_string(), path.to_string());
        self.request(|reply| Command::Document { id, path, reply })
            .await?
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport, DashboardError> {
        self.request(|reply| Command::Reconcile { reply }).await?
    }

    pub fn tunnel_status(&self) -> TunnelStatus {
        self.tunnel.status()
    }

    pub async fn start_tunnel(&self) -> Result<TunnelInfo, DashboardError> {
        Ok(self.tunnel.start().await?)
    }

    pub async fn stop_tunnel(&self) -> Result<(), DashboardError> {
        Ok(self.tunnel.stop().await?)
    }

    /// Tear the service down and wait for it to finish.
    pub async fn shutdown(&self) -> Result<(), DashboardError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Run the service on its own task.
pub fn spawn(
    dashboard: Dashboard,
    events: mpsc::UnboundedReceiver<NotifierEvent>,
) -> (DashboardHandle, JoinHandle<()>) {
    let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE);
    let handle = DashboardHandle {
        commands,
        tunnel: dashboard.tunnel.clone(),
    };
    let task = tokio::spawn(dashboard.run(commands_rx, events));
    (handle, task)
}
