//! One-shot discovery and session report — `specdash scan`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use specdash::config::DashboardConfig;
use specdash::dashboard::resolver::{order_sessions, resolve};
use specdash::dashboard::{ActiveSession, Workspace};
use specdash::discovery::{FsDiscovery, WorkspaceDiscovery};
use specdash::parser::{DocumentParser, MarkdownParser};
use specdash::vcs;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanReport {
    workspaces: Vec<Workspace>,
    active_sessions: Vec<ActiveSession>,
}

pub fn cmd_scan(config: &DashboardConfig, roots: &[PathBuf], json: bool) -> Result<()> {
    let roots = super::effective_roots(config, roots)?;
    let discovery = FsDiscovery::new(roots, config.discovery.max_depth);
    let parser = MarkdownParser;

    let found = discovery.discover().context("Workspace discovery failed")?;

    let mut workspaces = Vec::with_capacity(found.len());
    let mut sessions = Vec::new();
    for entry in &found {
        let workspace = Workspace::from_discovered(entry, vcs::read_head(&entry.path));
        let specs = parser.list_specs(&entry.path).unwrap_or_else(|e| {
            tracing::warn!(path = %entry.path.display(), error = %e, "could not read specs");
            Vec::new()
        });
        let bugs = parser.list_bugs(&entry.path).unwrap_or_else(|e| {
            tracing::warn!(path = %entry.path.display(), error = %e, "could not read bugs");
            Vec::new()
        });
        sessions.extend(resolve(&workspace, &specs, &bugs));
        workspaces.push(workspace);
    }
    order_sessions(&mut sessions);

    if json {
        let report = ScanReport {
            workspaces,
            active_sessions: sessions,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if workspaces.is_empty() {
        println!("No workspaces found.");
        return Ok(());
    }

    println!();
    println!("Workspaces");
    println!("==========");
    for ws in &workspaces {
        let marker = if ws.has_active_session { "*" } else { " " };
        let branch = ws.git_branch.as_deref().unwrap_or("-");
        println!(
            " {} {:<32} {:>3} specs {:>3} bugs  [{}]",
            marker, ws.display_name, ws.spec_count, ws.bug_count, branch
        );
    }

    println!();
    println!("Active sessions");
    println!("===============");
    if sessions.is_empty() {
        println!("  (none)");
    }
    for session in &sessions {
        let header = session.header();
        let detail = match session {
            ActiveSession::Spec(s) => format!(
                "spec {} / task {}: {}",
                s.spec_display_name, s.task.id, s.task.description
            ),
            ActiveSession::Bug(b) => format!("bug {} ({})", b.bug_display_name, b.next_command),
        };
        let active = if header.is_currently_active { "active" } else { "idle" };
        println!("  {:<24} {:<6} {}", header.project_name, active, detail);
    }
    println!();

    Ok(())
}
