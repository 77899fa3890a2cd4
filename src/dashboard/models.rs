use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::discovery::DiscoveredWorkspace;
use crate::parser::{BugRecord, BugSeverity, BugStatus, SpecRecord, SteeringStatus};
use crate::vcs::VcsState;

/// Stable short id for a workspace path, safe to use in URLs.
pub fn workspace_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    format!("{:x}", digest).chars().take(12).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub path: PathBuf,
    pub display_name: String,
    pub depth: usize,
    /// A long-running process is attached to this workspace.
    pub has_active_session: bool,
    pub git_branch: Option<String>,
    pub git_commit: Option<String>,
    pub spec_count: usize,
    pub bug_count: usize,
    /// The change notifier reported a failure; data may be stale until the
    /// next successful reload.
    pub degraded: bool,
}

impl Workspace {
    pub fn from_discovered(found: &DiscoveredWorkspace, vcs: VcsState) -> Self {
        Self {
            id: workspace_id(&found.path),
            path: found.path.clone(),
            display_name: found.display_name.clone(),
            depth: found.depth,
            has_active_session: found.has_attached_process,
            git_branch: vcs.branch,
            git_commit: vcs.commit,
            spec_count: found.spec_count,
            bug_count: found.bug_count,
            degraded: false,
        }
    }

    /// Refresh the fields discovery is authoritative for.
    pub fn apply_discovered(&mut self, found: &DiscoveredWorkspace) {
        self.display_name = found.display_name.clone();
        self.depth = found.depth;
        self.has_active_session = found.has_attached_process;
        self.spec_count = found.spec_count;
        self.bug_count = found.bug_count;
    }

    pub fn apply_vcs(&mut self, vcs: VcsState) {
        self.git_branch = vcs.branch;
        self.git_commit = vcs.commit;
    }
}

/// Parsed documents of one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Documents {
    pub specs: Vec<SpecRecord>,
    pub bugs: Vec<BugRecord>,
    pub steering: SteeringStatus,
}

/// A workspace with its documents, as sent to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub specs: Vec<SpecRecord>,
    pub bugs: Vec<BugRecord>,
    pub steering_status: SteeringStatus,
}

impl ProjectSnapshot {
    pub fn new(workspace: Workspace, documents: Documents) -> Self {
        Self {
            workspace,
            specs: documents.specs,
            bugs: documents.bugs,
            steering_status: documents.steering,
        }
    }
}

// ── Active sessions ──────────────────────────────────────────────────

/// Fields shared by both session variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    pub project_id: String,
    pub project_path: PathBuf,
    pub project_name: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_currently_active: bool,
    pub has_active_session: bool,
    pub git_branch: Option<String>,
    pub git_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTask {
    pub id: String,
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecSession {
    #[serde(flatten)]
    pub header: SessionHeader,
    pub spec_name: String,
    pub spec_display_name: String,
    pub task: SessionTask,
    /// No real work item backs this session.
    pub is_ad_hoc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BugSession {
    #[serde(flatten)]
    pub header: SessionHeader,
    pub bug_name: String,
    pub bug_display_name: String,
    pub status: BugStatus,
    pub severity: Option<BugSeverity>,
    pub next_command: String,
}

/// The single work item representing a workspace's current focus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActiveSession {
    Spec(SpecSession),
    Bug(BugSession),
}

impl ActiveSession {
    pub fn header(&self) -> &SessionHeader {
        match self {
            Self::Spec(s) => &s.header,
            Self::Bug(b) => &b.header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SpecStatus;

    fn workspace() -> Workspace {
        Workspace {
            id: workspace_id(Path::new("/work/a")),
            path: PathBuf::from("/work/a"),
            display_name: "a".into(),
            depth: 0,
            has_active_session: true,
            git_branch: Some("main".into()),
            git_commit: Some("abc1234".into()),
            spec_count: 1,
            bug_count: 0,
            degraded: false,
        }
    }

    #[test]
    fn workspace_id_is_stable_and_short() {
        let a = workspace_id(Path::new("/work/a"));
        assert_eq!(a, workspace_id(Path::new("/work/a")));
        assert_ne!(a, workspace_id(Path::new("/work/b")));
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn apply_discovered_keeps_vcs_fields() {
        let mut ws = workspace();
        ws.apply_discovered(&DiscoveredWorkspace {
            path: ws.path.clone(),
            display_name: "renamed".into(),
            depth: 1,
            has_attached_process: false,
            spec_count: 3,
            bug_count: 2,
        });
        assert_eq!(ws.display_name, "renamed");
        assert!(!ws.has_active_session);
        assert_eq!(ws.spec_count, 3);
        assert_eq!(ws.git_branch.as_deref(), Some("main"));
    }

    #[test]
    fn project_snapshot_flattens_workspace_fields() {
        let snapshot = ProjectSnapshot::new(
            workspace(),
            Documents {
                specs: vec![SpecRecord {
                    name: "auth".into(),
                    display_name: "Auth".into(),
                    status: SpecStatus::Tasks,
                    tasks: vec![],
                    task_progress: Default::default(),
                    last_modified: Utc::now(),
                }],
                ..Documents::default()
            },
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["displayName"], "a");
        assert_eq!(json["hasActiveSession"], true);
        assert_eq!(json["specs"][0]["name"], "auth");
        assert_eq!(json["steeringStatus"]["exists"], false);
    }

    #[test]
    fn active_session_is_tagged_by_variant() {
        let session = ActiveSession::Bug(BugSession {
            header: SessionHeader {
                project_id: "id".into(),
                project_path: PathBuf::from("/work/a"),
                project_name: "a".into(),
                last_modified: None,
                is_currently_active: true,
                has_active_session: true,
                git_branch: None,
                git_commit: None,
            },
            bug_name: "crash".into(),
            bug_display_name: "Crash".into(),
            status: BugStatus::Fixing,
            severity: Some(BugSeverity::High),
            next_command: "fix".into(),
        });
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["type"], "bug");
        assert_eq!(json["isCurrentlyActive"], true);
        assert_eq!(json["nextCommand"], "fix");
        assert_eq!(json["severity"], "high");

        let back: ActiveSession = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }
}
