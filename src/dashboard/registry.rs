//! Authoritative map from canonical workspace path to live workspace state.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::path::{Path, PathBuf};

use crate::discovery::DiscoveredWorkspace;
use crate::watcher::NotifierHandle;

use super::models::{Documents, ProjectSnapshot, Workspace};

/// Everything the dashboard holds for one registered workspace.
pub struct WorkspaceState {
    pub workspace: Workspace,
    notifier: Option<Box<dyn NotifierHandle>>,
    /// Last successfully parsed documents.
    pub documents: Documents,
}

impl WorkspaceState {
    pub fn new(
        workspace: Workspace,
        notifier: Box<dyn NotifierHandle>,
        documents: Documents,
    ) -> Self {
        Self {
            workspace,
            notifier: Some(notifier),
            documents,
        }
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot::new(self.workspace.clone(), self.documents.clone())
    }

    /// Swap in a fresh notifier, stopping the current one.
    pub fn replace_notifier(&mut self, notifier: Box<dyn NotifierHandle>) {
        self.stop_notifier();
        self.notifier = Some(notifier);
    }

    fn stop_notifier(&mut self) {
        if let Some(handle) = self.notifier.take() {
            handle.stop();
        }
    }
}

impl std::fmt::Debug for WorkspaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceState")
            .field("workspace", &self.workspace)
            .field("watching", &self.notifier.is_some())
            .field("specs", &self.documents.specs.len())
            .field("bugs", &self.documents.bugs.len())
            .finish()
    }
}

/// Result of comparing a discovery scan against the registry's key set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryDiff {
    pub added: Vec<DiscoveredWorkspace>,
    pub removed: Vec<PathBuf>,
    pub retained: Vec<DiscoveredWorkspace>,
}

impl RegistryDiff {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    workspaces: BTreeMap<PathBuf, WorkspaceState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.workspaces.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<&WorkspaceState> {
        self.workspaces.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut WorkspaceState> {
        self.workspaces.get_mut(path)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&WorkspaceState> {
        self.workspaces.values().find(|s| s.workspace.id == id)
    }

    pub fn iter(&self) -> btree_map::Values<'_, PathBuf, WorkspaceState> {
        self.workspaces.values()
    }

    /// Insert a workspace. A previous state at the same path has its
    /// notifier stopped.
    pub fn insert(&mut self, state: WorkspaceState) {
        let path = state.workspace.path.clone();
        if let Some(mut previous) = self.workspaces.insert(path, state) {
            previous.stop_notifier();
        }
    }

    /// Remove a workspace and release its notifier.
    pub fn remove(&mut self, path: &Path) -> Option<Workspace> {
        let mut state = self.workspaces.remove(path)?;
        state.stop_notifier();
        Some(state.workspace)
    }

    /// Stop every notifier without dropping the registered workspaces.
    pub fn stop_notifiers(&mut self) {
        for state in self.workspaces.values_mut() {
            state.stop_notifier();
        }
    }

    /// Stop every notifier and forget every workspace.
    pub fn clear(&mut self) {
        self.stop_notifiers();
        self.workspaces.clear();
    }

    pub fn diff(&self, discovered: &[DiscoveredWorkspace]) -> RegistryDiff {
        let mut diff = RegistryDiff::default();
        let mut seen = std::collections::BTreeSet::new();
        for found in discovered {
            if !seen.insert(found.path.clone()) {
                continue;
            }
            if self.contains(&found.path) {
                diff.retained.push(found.clone());
            } else {
                diff.added.push(found.clone());
            }
        }
        diff.removed = self
            .workspaces
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        diff
    }
}
