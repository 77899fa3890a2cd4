//! Workspace discovery.
//!
//! A workspace is any directory under a configured root that contains a
//! `.spec-workflow/` directory. Discovery is a side-effect-free snapshot; the
//! reconciliation loop diffs successive snapshots against the registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::parser::{BUGS_DIR, SPECS_DIR, WORKFLOW_DIR};

/// Marker written by an attached long-running process.
pub const SESSION_MARKER: &str = "session.json";

/// Directories never descended into while scanning.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "vendor"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredWorkspace {
    pub path: PathBuf,
    pub display_name: String,
    pub depth: usize,
    pub has_attached_process: bool,
    pub spec_count: usize,
    pub bug_count: usize,
}

/// Point-in-time scan returning the current set of valid workspaces.
pub trait WorkspaceDiscovery: Send + Sync {
    fn discover(&self) -> Result<Vec<DiscoveredWorkspace>>;
}

#[derive(Debug, Deserialize)]
struct SessionMarker {
    pid: u32,
}

/// Scans configured roots with `walkdir`.
#[derive(Debug, Clone)]
pub struct FsDiscovery {
    roots: Vec<PathBuf>,
    max_depth: usize,
}

impl FsDiscovery {
    pub fn new(roots: Vec<PathBuf>, max_depth: usize) -> Self {
        Self { roots, max_depth }
    }

    fn scan_root(&self, root: &Path, found: &mut BTreeMap<PathBuf, DiscoveredWorkspace>) {
        let root = match root.canonicalize() {
            Ok(root) => root,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "skipping unreadable discovery root");
                return;
            }
        };

        let walker = WalkDir::new(&root)
            .max_depth(self.max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping entry during discovery");
                    continue;
                }
            };
            if !entry.file_type().is_dir() || !entry.path().join(WORKFLOW_DIR).is_dir() {
                continue;
            }
            let Ok(path) = entry.path().canonicalize() else {
                continue;
            };
            if found.contains_key(&path) {
                continue;
            }
            let workspace = describe(&root, &path, entry.depth());
            found.insert(path, workspace);
        }
    }
}

impl WorkspaceDiscovery for FsDiscovery {
    fn discover(&self) -> Result<Vec<DiscoveredWorkspace>> {
        let mut found = BTreeMap::new();
        for root in &self.roots {
            self.scan_root(root, &mut found);
        }
        Ok(found.into_values().collect())
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

fn describe(root: &Path, path: &Path, depth: usize) -> DiscoveredWorkspace {
    let workflow = path.join(WORKFLOW_DIR);
    DiscoveredWorkspace {
        path: path.to_path_buf(),
        display_name: workspace_display_name(root, path),
        depth,
        has_attached_process: has_attached_process(&workflow),
        spec_count: count_dirs(&workflow.join(SPECS_DIR)),
        bug_count: count_dirs(&workflow.join(BUGS_DIR)),
    }
}

/// Path relative to the scan root, or the root's own name for the root.
pub fn workspace_display_name(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/"),
        _ => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string()),
    }
}

fn count_dirs(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir())
                .count()
        })
        .unwrap_or(0)
}

/// True when the workflow directory carries a session marker whose pid is
/// still alive.
pub fn has_attached_process(workflow_dir: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(workflow_dir.join(SESSION_MARKER)) else {
        return false;
    };
    match serde_json::from_str::<SessionMarker>(&content) {
        Ok(marker) => process_alive(marker.pid),
        Err(e) => {
            debug!(dir = %workflow_dir.display(), error = %e, "ignoring malformed session marker");
            false
        }
    }
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks for existence and permission.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    pid != 0
}
