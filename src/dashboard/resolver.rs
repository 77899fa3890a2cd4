//! Active-session selection.
//!
//! For each workspace with an attached process, pick at most one work item
//! and render it for display:
//!
//! | Candidate                                   | Priority |
//! |---------------------------------------------|----------|
//! | Spec with exactly one in-progress task      | 100      |
//! | Bug that is analyzing / fixing / verifying  | 90       |
//! | Any unfinished spec or bug (fallback only)  | 10       |
//!
//! Ties break on newest `last_modified`, then name ascending, then specs
//! before bugs. With no candidate at all an ad-hoc session is produced.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::models::{
    ActiveSession, BugSession, SessionHeader, SessionTask, SpecSession, Workspace,
};
use crate::parser::{BugRecord, BugStatus, SpecRecord, SpecStatus};

pub const PRIORITY_IN_PROGRESS_SPEC: u32 = 100;
pub const PRIORITY_ACTIVE_BUG: u32 = 90;
pub const PRIORITY_FALLBACK: u32 = 10;

pub const FALLBACK_TASK_ID: &str = "session";
pub const AD_HOC_TASK_ID: &str = "ad-hoc";
pub const AD_HOC_DESCRIPTION: &str = "Ad-hoc session";

/// A spec or bug considered for active status.
#[derive(Debug, Clone, Copy)]
pub enum WorkItem<'a> {
    Spec(&'a SpecRecord),
    Bug(&'a BugRecord),
}

impl WorkItem<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Spec(s) => &s.name,
            Self::Bug(b) => &b.name,
        }
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        match self {
            Self::Spec(s) => s.last_modified,
            Self::Bug(b) => b.last_modified,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Spec(_) => 0,
            Self::Bug(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    item: WorkItem<'a>,
    priority: u32,
}

fn compare_candidates(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.item.last_modified().cmp(&a.item.last_modified()))
        .then_with(|| a.item.name().cmp(b.item.name()))
        .then_with(|| a.item.kind_rank().cmp(&b.item.kind_rank()))
}

fn live_candidates<'a>(specs: &'a [SpecRecord], bugs: &'a [BugRecord]) -> Vec<Candidate<'a>> {
    let specs = specs
        .iter()
        .filter(|s| s.in_progress_task().is_some())
        .map(|s| Candidate {
            item: WorkItem::Spec(s),
            priority: PRIORITY_IN_PROGRESS_SPEC,
        });
    let bugs = bugs.iter().filter(|b| b.status.is_active()).map(|b| Candidate {
        item: WorkItem::Bug(b),
        priority: PRIORITY_ACTIVE_BUG,
    });
    specs.chain(bugs).collect()
}

fn fallback_candidates<'a>(specs: &'a [SpecRecord], bugs: &'a [BugRecord]) -> Vec<Candidate<'a>> {
    let specs = specs
        .iter()
        .filter(|s| s.status != SpecStatus::Completed)
        .map(|s| Candidate {
            item: WorkItem::Spec(s),
            priority: PRIORITY_FALLBACK,
        });
    let bugs = bugs
        .iter()
        .filter(|b| b.status != BugStatus::Resolved)
        .map(|b| Candidate {
            item: WorkItem::Bug(b),
            priority: PRIORITY_FALLBACK,
        });
    specs.chain(bugs).collect()
}

/// Choose and render the active session for one workspace.
pub fn resolve(
    workspace: &Workspace,
    specs: &[SpecRecord],
    bugs: &[BugRecord],
) -> Option<ActiveSession> {
    if !workspace.has_active_session {
        return None;
    }

    let mut candidates = live_candidates(specs, bugs);
    if candidates.is_empty() {
        candidates = fallback_candidates(specs, bugs);
    }
    candidates.sort_by(compare_candidates);

    let session = match candidates.first() {
        Some(chosen) => render(workspace, chosen),
        None => ad_hoc(workspace),
    };
    Some(session)
}

fn header(workspace: &Workspace, last_modified: Option<DateTime<Utc>>, live: bool) -> SessionHeader {
    SessionHeader {
        project_id: workspace.id.clone(),
        project_path: workspace.path.clone(),
        project_name: workspace.display_name.clone(),
        last_modified,
        is_currently_active: live,
        has_active_session: workspace.has_active_session,
        git_branch: workspace.git_branch.clone(),
        git_commit: workspace.git_commit.clone(),
    }
}

fn render(workspace: &Workspace, chosen: &Candidate<'_>) -> ActiveSession {
    let live = chosen.priority >= PRIORITY_ACTIVE_BUG;
    let header = header(workspace, Some(chosen.item.last_modified()), live);
    match chosen.item {
        WorkItem::Spec(spec) => {
            let task = spec
                .in_progress_task()
                .map(|t| SessionTask {
                    id: t.id.clone(),
                    description: t.description.clone(),
                    completed: t.completed,
                })
                .unwrap_or_else(|| SessionTask {
                    id: FALLBACK_TASK_ID.to_string(),
                    description: spec.display_name.clone(),
                    completed: false,
                });
            ActiveSession::Spec(SpecSession {
                header,
                spec_name: spec.name.clone(),
                spec_display_name: spec.display_name.clone(),
                task,
                is_ad_hoc: false,
            })
        }
        WorkItem::Bug(bug) => ActiveSession::Bug(BugSession {
            header,
            bug_name: bug.name.clone(),
            bug_display_name: bug.display_name.clone(),
            status: bug.status,
            severity: bug.severity,
            next_command: bug.status.next_command().to_string(),
        }),
    }
}

fn ad_hoc(workspace: &Workspace) -> ActiveSession {
    ActiveSession::Spec(SpecSession {
        header: header(workspace, None, false),
        spec_name: AD_HOC_TASK_ID.to_string(),
        spec_display_name: AD_HOC_DESCRIPTION.to_string(),
        task: SessionTask {
            id: AD_HOC_TASK_ID.to_string(),
            description: AD_HOC_DESCRIPTION.to_string(),
            completed: false,
        },
        is_ad_hoc: true,
    })
}

/// Sort sessions for display: live sessions first, then by project name
/// (case-sensitive, byte-wise), then by path.
pub fn order_sessions(sessions: &mut [ActiveSession]) {
    sessions.sort_by(|a, b| {
        let (a, b) = (a.header(), b.header());
        b.is_currently_active
            .cmp(&a.is_currently_active)
            .then_with(|| a.project_name.cmp(&b.project_name))
            .then_with(|| a.project_path.cmp(&b.project_path))
    });
}
