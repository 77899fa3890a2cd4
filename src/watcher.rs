//! Per-workspace change notifier.
//!
//! Each registered workspace gets its own `notify` watcher. Raw filesystem
//! events are classified into the four change kinds the dashboard cares
//! about and pushed onto the dashboard's single event queue, so events from
//! one workspace are consumed in the order the watcher produced them.

use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::debug;

use crate::parser::{BUGS_DIR, SPECS_DIR, STEERING_DIR, WORKFLOW_DIR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// A spec document changed. `spec` is the spec directory name when known.
    Document { spec: Option<String> },
    /// HEAD or a ref moved.
    Vcs,
    Steering,
    Bug { bug: Option<String> },
    /// The watcher itself reported a failure.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierEvent {
    pub root: PathBuf,
    pub kind: ChangeKind,
}

pub type EventSink = mpsc::UnboundedSender<NotifierEvent>;

/// A running watcher. Stopping it releases the underlying OS watches.
pub trait NotifierHandle: Send + Sync {
    fn stop(self: Box<Self>);
}

/// Starts a watcher for one workspace root.
pub trait ChangeNotifier: Send + Sync {
    fn start(&self, root: &Path, sink: EventSink) -> Result<Box<dyn NotifierHandle>>;
}

/// Map a changed path to the change kind it represents, if any.
pub fn classify(root: &Path, path: &Path) -> Option<ChangeKind> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    match parts.first().map(String::as_str) {
        Some(".git") => match parts.get(1).map(String::as_str) {
            Some("HEAD") if parts.len() == 2 => Some(ChangeKind::Vcs),
            Some("refs") => Some(ChangeKind::Vcs),
            _ => None,
        },
        Some(WORKFLOW_DIR) => match parts.get(1).map(String::as_str) {
            Some(STEERING_DIR) => Some(ChangeKind::Steering),
            Some(BUGS_DIR) => Some(ChangeKind::Bug {
                bug: parts.get(2).cloned(),
            }),
            Some(SPECS_DIR) => Some(ChangeKind::Document {
                spec: parts.get(2).cloned(),
            }),
            _ => None,
        },
        _ => None,
    }
}

/// `notify`-backed notifier.
#[derive(Debug, Default, Clone)]
pub struct NotifyChangeNotifier;

struct NotifyHandle {
    _watcher: Mutex<RecommendedWatcher>,
}

impl NotifierHandle for NotifyHandle {
    fn stop(self: Box<Self>) {
        // Dropping the watcher unregisters every watch.
    }
}

impl ChangeNotifier for NotifyChangeNotifier {
    fn start(&self, root: &Path, sink: EventSink) -> Result<Box<dyn NotifierHandle>> {
        let event_root = root.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => forward(&event_root, &event, &sink),
                Err(e) => {
                    let _ = sink.send(NotifierEvent {
                        root: event_root.clone(),
                        kind: ChangeKind::Error(e.to_string()),
                    });
                }
            }
        })
        .context("Failed to create file watcher")?;

        let workflow = root.join(WORKFLOW_DIR);
        watcher
            .watch(&workflow, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", workflow.display()))?;

        let git_dir = root.join(".git");
        if git_dir.is_dir() {
            watcher
                .watch(&git_dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", git_dir.display()))?;
            let refs = git_dir.join("refs");
            if refs.is_dir() {
                watcher
                    .watch(&refs, RecursiveMode::Recursive)
                    .with_context(|| format!("Failed to watch {}", refs.display()))?;
            }
        }

        debug!(root = %root.display(), "change notifier started");
        Ok(Box::new(NotifyHandle {
            _watcher: Mutex::new(watcher),
        }))
    }
}

fn forward(root: &Path, event: &Event, sink: &EventSink) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    let mut sent: Vec<ChangeKind> = Vec::new();
    for path in &event.paths {
        let Some(kind) = classify(root, path) else {
            continue;
        };
        if sent.contains(&kind) {
            continue;
        }
        sent.push(kind.clone());
        let _ = sink.send(NotifierEvent {
            root: root.to_path_buf(),
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/work/proj")
    }

    #[test]
    fn classifies_spec_documents() {
        let kind = classify(&root(), Path::new("/work/proj/.spec-workflow/specs/auth/tasks.md"));
        assert_eq!(
            kind,
            Some(ChangeKind::Document {
                spec: Some("auth".into())
            })
        );
    }

    #[test]
    fn classifies_bugs_and_steering() {
        assert_eq!(
            classify(&root(), Path::new("/work/proj/.spec-workflow/bugs/crash/report.md")),
            Some(ChangeKind::Bug {
                bug: Some("crash".into())
            })
        );
        assert_eq!(
            classify(&root(), Path::new("/work/proj/.spec-workflow/steering/tech.md")),
            Some(ChangeKind::Steering)
        );
    }

    #[test]
    fn classifies_git_head_and_refs() {
        assert_eq!(
            classify(&root(), Path::new("/work/proj/.git/HEAD")),
            Some(ChangeKind::Vcs)
        );
        assert_eq!(
            classify(&root(), Path::new("/work/proj/.git/refs/heads/main")),
            Some(ChangeKind::Vcs)
        );
        assert_eq!(classify(&root(), Path::new("/work/proj/.git/index")), None);
    }

    #[test]
    fn ignores_unrelated_paths() {
        assert_eq!(classify(&root(), Path::new("/work/proj/src/main.rs")), None);
        assert_eq!(classify(&root(), Path::new("/elsewhere/file")), None);
        assert_eq!(
            classify(&root(), Path::new("/work/proj/.spec-workflow/session.json")),
            None
        );
    }

    #[test]
    fn forward_deduplicates_kinds_within_one_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = Event::new(EventKind::Any)
            .add_path(PathBuf::from("/work/proj/.spec-workflow/specs/a/tasks.md"))
            .add_path(PathBuf::from("/work/proj/.spec-workflow/specs/a/design.md"))
            .add_path(PathBuf::from("/work/proj/.spec-workflow/bugs/b/report.md"));
        forward(&root(), &event, &tx);
        drop(tx);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert_eq!(kinds.len(), 2);
    }

    #[tokio::test]
    async fn notify_watcher_reports_spec_changes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let spec_dir = root.join(WORKFLOW_DIR).join(SPECS_DIR).join("alpha");
        std::fs::create_dir_all(&spec_dir).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = NotifyChangeNotifier.start(&root, tx).unwrap();
        std::fs::write(spec_dir.join("tasks.md"), "- [ ] 1. One\n").unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher event")
            .expect("channel open");
        assert_eq!(event.root, root);
        assert!(matches!(event.kind, ChangeKind::Document { .. }));
        handle.stop();
    }
}
