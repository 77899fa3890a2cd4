//! Typed error hierarchy for the dashboard.
//!
//! Three top-level enums cover the three failure domains:
//! - `WorkspaceError` — failures local to one workspace (init, parsing, timeouts)
//! - `TunnelError` — secure-tunnel provider failures
//! - `DashboardError` — service-level and query failures surfaced to callers

use std::path::PathBuf;

use thiserror::Error;

/// Failures scoped to a single workspace. These never stop the
/// reconciliation loop; the workspace is skipped or marked degraded.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace root {path} is not readable: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed for {path}: {source}")]
    Collaborator {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} for {path} timed out after {secs}s")]
    Timeout {
        path: PathBuf,
        operation: &'static str,
        secs: u64,
    },
}

impl WorkspaceError {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::RootUnreadable { path, .. }
            | Self::Collaborator { path, .. }
            | Self::Timeout { path, .. } => path,
        }
    }
}

/// Errors from the secure-tunnel provider. Messages are meant to be shown
/// to the operator as-is.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("No tunnel provider configured; set `command` under [tunnel] in the config file")]
    NotConfigured,

    #[error("Failed to launch tunnel command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tunnel command '{command}' did not report a public URL within {secs}s")]
    NoUrl { command: String, secs: u64 },

    #[error("Tunnel process exited before it was ready ({status})")]
    ExitedEarly { status: String },

    #[error("Tunnel provider error: {0}")]
    Provider(String),
}

/// Errors surfaced by the dashboard service to API and CLI callers.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Dashboard service is not running")]
    ServiceStopped,

    #[error("Workspace {id} not found")]
    WorkspaceNotFound { id: String },

    #[error("Invalid document path '{path}': {reason}")]
    InvalidDocumentPath { path: String, reason: &'static str },

    #[error("Document '{path}' not found")]
    DocumentNotFound { path: String },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
