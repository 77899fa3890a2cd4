//! Document parsing for spec and bug workflows.
//!
//! A workspace keeps its documents under `.spec-workflow/`:
//!
//! ```text
//! .spec-workflow/
//! ├── specs/<name>/{requirements,design,tasks}.md
//! ├── bugs/<name>/{report,analysis,fix,verification}.md
//! ├── steering/{product,tech,structure}.md
//! └── session.json        (attached process marker, see discovery)
//! ```
//!
//! [`DocumentParser`] is the seam the dashboard reads through;
//! [`MarkdownParser`] is the on-disk implementation.

pub mod tasks;
pub mod types;

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::errors::DashboardError;
pub use types::{
    BugRecord, BugSeverity, BugStatus, SpecRecord, SpecStatus, SteeringStatus, Task, TaskProgress,
};

pub const WORKFLOW_DIR: &str = ".spec-workflow";
pub const SPECS_DIR: &str = "specs";
pub const BUGS_DIR: &str = "bugs";
pub const STEERING_DIR: &str = "steering";

/// Bug documents, latest workflow stage first.
const BUG_DOCUMENTS: [&str; 4] = ["verification.md", "fix.md", "analysis.md", "report.md"];

static STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*[-*]?\s*\**status\**\s*:\s*\**\s*([a-z]+)").unwrap()
});

static SEVERITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*[-*]?\s*\**severity\**\s*:\s*\**\s*([a-z]+)").unwrap()
});

/// Reads structured records out of a workspace root.
pub trait DocumentParser: Send + Sync {
    fn list_specs(&self, root: &Path) -> Result<Vec<SpecRecord>>;

    fn list_bugs(&self, root: &Path) -> Result<Vec<BugRecord>>;

    fn steering_status(&self, root: &Path) -> Result<SteeringStatus>;

    /// Raw text of a document, `relative` to the workspace's workflow
    /// directory. Callers validate `relative` with [`confine_document_path`].
    fn read_document(&self, root: &Path, relative: &Path) -> Result<Option<String>>;
}

/// Parser for the markdown layout described in the module docs.
#[derive(Debug, Default, Clone)]
pub struct MarkdownParser;

impl DocumentParser for MarkdownParser {
    fn list_specs(&self, root: &Path) -> Result<Vec<SpecRecord>> {
        let specs_dir = root.join(WORKFLOW_DIR).join(SPECS_DIR);
        let mut specs = Vec::new();
        for dir in child_dirs(&specs_dir)? {
            specs.push(parse_spec(&dir)?);
        }
        Ok(specs)
    }

    fn list_bugs(&self, root: &Path) -> Result<Vec<BugRecord>> {
        let bugs_dir = root.join(WORKFLOW_DIR).join(BUGS_DIR);
        let mut bugs = Vec::new();
        for dir in child_dirs(&bugs_dir)? {
            bugs.push(parse_bug(&dir)?);
        }
        Ok(bugs)
    }

    fn steering_status(&self, root: &Path) -> Result<SteeringStatus> {
        let dir = root.join(WORKFLOW_DIR).join(STEERING_DIR);
        if !dir.is_dir() {
            return Ok(SteeringStatus::default());
        }
        let product = dir.join("product.md");
        let tech = dir.join("tech.md");
        let structure = dir.join("structure.md");
        let last_modified = [&product, &tech, &structure]
            .into_iter()
            .filter_map(|p| modified_at(p))
            .max();
        Ok(SteeringStatus {
            exists: true,
            product: product.is_file(),
            tech: tech.is_file(),
            structure: structure.is_file(),
            last_modified,
        })
    }

    fn read_document(&self, root: &Path, relative: &Path) -> Result<Option<String>> {
        let path = root.join(WORKFLOW_DIR).join(relative);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(content))
    }
}

/// Validate a viewer-supplied document path: relative, no `..`, no root or
/// prefix components.
pub fn confine_document_path(relative: &str) -> Result<PathBuf, DashboardError> {
    let invalid = |reason| DashboardError::InvalidDocumentPath {
        path: relative.to_string(),
        reason,
    };
    if relative.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    let path = Path::new(relative);
    let mut confined = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => confined.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory references are not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"));
            }
        }
    }
    if confined.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }
    Ok(confined)
}

/// `user-auth_flow` → `User Auth Flow`.
pub fn display_name(name: &str) -> String {
    name.split(['-', '_', ' '])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn child_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Newest mtime among the files directly inside `dir`, falling back to the
/// directory's own mtime.
fn latest_modified(dir: &Path) -> DateTime<Utc> {
    let newest = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| modified_at(&entry.path()))
        .max();
    newest
        .or_else(|| modified_at(dir))
        .unwrap_or_else(|| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}

fn parse_spec(dir: &Path) -> Result<SpecRecord> {
    let name = dir_name(dir);
    let tasks_path = dir.join("tasks.md");
    let tasks = if tasks_path.is_file() {
        let content = std::fs::read_to_string(&tasks_path)
            .with_context(|| format!("Failed to read {}", tasks_path.display()))?;
        tasks::parse_tasks(&content)
    } else {
        Vec::new()
    };
    let task_progress = tasks::task_progress(&tasks);

    let any_started = types::flatten_tasks(&tasks)
        .iter()
        .any(|t| t.completed || t.in_progress);
    let status = if task_progress.total > 0 && task_progress.completed == task_progress.total {
        SpecStatus::Completed
    } else if any_started {
        SpecStatus::InProgress
    } else if tasks_path.is_file() {
        SpecStatus::Tasks
    } else if dir.join("design.md").is_file() {
        SpecStatus::Design
    } else {
        SpecStatus::Requirements
    };

    Ok(SpecRecord {
        display_name: display_name(&name),
        name,
        status,
        tasks,
        task_progress,
        last_modified: latest_modified(dir),
    })
}

fn parse_bug(dir: &Path) -> Result<BugRecord> {
    let name = dir_name(dir);
    let mut explicit_status = None;
    let mut severity = None;
    let mut inferred_status = BugStatus::Reported;
    let mut inferred = false;

    for document in BUG_DOCUMENTS {
        let path = dir.join(document);
        if !path.is_file() {
            continue;
        }
        if !inferred {
            inferred_status = match document {
                "verification.md" => BugStatus::Verifying,
                "fix.md" => BugStatus::Fixing,
                "analysis.md" => BugStatus::Analyzing,
                _ => BugStatus::Reported,
            };
            inferred = true;
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if explicit_status.is_none() {
            explicit_status = STATUS_REGEX
                .captures(&content)
                .and_then(|caps| caps[1].parse::<BugStatus>().ok());
        }
        if severity.is_none() {
            severity = SEVERITY_REGEX
                .captures(&content)
                .and_then(|caps| caps[1].parse::<BugSeverity>().ok());
        }
    }

    Ok(BugRecord {
        display_name: display_name(&name),
        name,
        status: explicit_status.unwrap_or(inferred_status),
        severity,
        last_modified: latest_modified(dir),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(WORKFLOW_DIR)).unwrap();
        dir
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(WORKFLOW_DIR).join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn spec_status_follows_documents_and_tasks() {
        let ws = workspace();
        write(ws.path(), "specs/alpha/requirements.md", "# R");
        write(ws.path(), "specs/beta/requirements.md", "# R");
        write(ws.path(), "specs/beta/design.md", "# D");
        write(ws.path(), "specs/gamma/tasks.md", "- [ ] 1. One\n");
        write(ws.path(), "specs/delta/tasks.md", "- [x] 1. One\n- [-] 2. Two\n");
        write(ws.path(), "specs/epsilon/tasks.md", "- [x] 1. One\n  - [x] 1.1 Sub\n");

        let specs = MarkdownParser.list_specs(ws.path()).unwrap();
        let status = |name: &str| specs.iter().find(|s| s.name == name).unwrap().status;
        assert_eq!(status("alpha"), SpecStatus::Requirements);
        assert_eq!(status("beta"), SpecStatus::Design);
        assert_eq!(status("gamma"), SpecStatus::Tasks);
        assert_eq!(status("delta"), SpecStatus::InProgress);
        assert_eq!(status("epsilon"), SpecStatus::Completed);
    }

    #[test]
    fn specs_are_sorted_and_display_named() {
        let ws = workspace();
        write(ws.path(), "specs/user-auth/requirements.md", "");
        write(ws.path(), "specs/api_v2/requirements.md", "");
        let specs = MarkdownParser.list_specs(ws.path()).unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["api_v2", "user-auth"]);
        assert_eq!(specs[1].display_name, "User Auth");
    }

    #[test]
    fn missing_workflow_dirs_yield_empty_lists() {
        let dir = TempDir::new().unwrap();
        assert!(MarkdownParser.list_specs(dir.path()).unwrap().is_empty());
        assert!(MarkdownParser.list_bugs(dir.path()).unwrap().is_empty());
        assert!(!MarkdownParser.steering_status(dir.path()).unwrap().exists);
    }

    #[test]
    fn bug_status_prefers_explicit_marker() {
        let ws = workspace();
        write(
            ws.path(),
            "bugs/login-crash/report.md",
            "# Bug\n\n**Status**: fixing\n**Severity**: High\n",
        );
        let bugs = MarkdownParser.list_bugs(ws.path()).unwrap();
        assert_eq!(bugs[0].status, BugStatus::Fixing);
        assert_eq!(bugs[0].severity, Some(BugSeverity::High));
        assert_eq!(bugs[0].display_name, "Login Crash");
    }

    #[test]
    fn bug_status_inferred_from_latest_document() {
        let ws = workspace();
        write(ws.path(), "bugs/a/report.md", "# Report");
        write(ws.path(), "bugs/b/report.md", "# Report");
        write(ws.path(), "bugs/b/analysis.md", "# Analysis");
        write(ws.path(), "bugs/c/report.md", "# Report");
        write(ws.path(), "bugs/c/verification.md", "# Verification");
        let bugs = MarkdownParser.list_bugs(ws.path()).unwrap();
        assert_eq!(bugs[0].status, BugStatus::Reported);
        assert_eq!(bugs[1].status, BugStatus::Analyzing);
        assert_eq!(bugs[2].status, BugStatus::Verifying);
        assert_eq!(bugs[0].severity, None);
    }

    #[test]
    fn explicit_status_in_later_stage_wins() {
        let ws = workspace();
        write(ws.path(), "bugs/x/report.md", "Status: reported\n");
        write(ws.path(), "bugs/x/verification.md", "- **Status:** resolved\n");
        let bugs = MarkdownParser.list_bugs(ws.path()).unwrap();
        assert_eq!(bugs[0].status, BugStatus::Resolved);
    }

    #[test]
    fn steering_reports_present_documents() {
        let ws = workspace();
        write(ws.path(), "steering/product.md", "# Product");
        write(ws.path(), "steering/tech.md", "# Tech");
        let steering = MarkdownParser.steering_status(ws.path()).unwrap();
        assert!(steering.exists);
        assert!(steering.product);
        assert!(steering.tech);
        assert!(!steering.structure);
        assert!(steering.last_modified.is_some());
    }

    #[test]
    fn read_document_returns_none_for_missing_file() {
        let ws = workspace();
        write(ws.path(), "specs/a/design.md", "# Design\nbody");
        let text = MarkdownParser
            .read_document(ws.path(), Path::new("specs/a/design.md"))
            .unwrap();
        assert_eq!(text.as_deref(), Some("# Design\nbody"));
        let missing = MarkdownParser
            .read_document(ws.path(), Path::new("specs/a/tasks.md"))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn confine_rejects_escapes() {
        assert!(confine_document_path("../secrets").is_err());
        assert!(confine_document_path("specs/../../etc/passwd").is_err());
        assert!(confine_document_path("/etc/passwd").is_err());
        assert!(confine_document_path("").is_err());
        assert!(confine_document_path("./").is_err());
        assert_eq!(
            confine_document_path("./specs/a/tasks.md").unwrap(),
            PathBuf::from("specs/a/tasks.md")
        );
    }

    #[test]
    fn display_name_title_cases_segments() {
        assert_eq!(display_name("user-auth_flow"), "User Auth Flow");
        assert_eq!(display_name("x"), "X");
        assert_eq!(display_name("--"), "");
    }
}
