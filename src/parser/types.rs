use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle stage of a spec, derived from which documents exist and how far
/// its task list has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecStatus {
    Requirements,
    Design,
    Tasks,
    InProgress,
    Completed,
}

/// A node of a spec's task tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub description: String,
    pub completed: bool,
    pub in_progress: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Task>,
}

/// Flatten a task forest in document order.
pub fn flatten_tasks(tasks: &[Task]) -> Vec<&Task> {
    let mut out = Vec::new();
    let mut stack: Vec<&Task> = tasks.iter().rev().collect();
    while let Some(task) = stack.pop() {
        out.push(task);
        stack.extend(task.subtasks.iter().rev());
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecRecord {
    pub name: String,
    pub display_name: String,
    pub status: SpecStatus,
    pub tasks: Vec<Task>,
    pub task_progress: TaskProgress,
    pub last_modified: DateTime<Utc>,
}

impl SpecRecord {
    /// The in-progress task, only when exactly one task in the whole tree
    /// carries the flag. Ids are not unique, so the flagged node itself is
    /// returned rather than its id.
    pub fn in_progress_task(&self) -> Option<&Task> {
        let mut flagged = flatten_tasks(&self.tasks)
            .into_iter()
            .filter(|t| t.in_progress);
        match (flagged.next(), flagged.next()) {
            (Some(task), None) => Some(task),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugStatus {
    Reported,
    Analyzing,
    Fixing,
    Fixed,
    Verifying,
    Resolved,
}

impl BugStatus {
    /// Statuses in which someone is actively working the bug.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Analyzing | Self::Fixing | Self::Verifying)
    }

    /// Workflow command a viewer should suggest next.
    pub fn next_command(&self) -> &'static str {
        match self {
            Self::Reported | Self::Analyzing => "analyze",
            Self::Fixing => "fix",
            Self::Fixed | Self::Verifying => "verify",
            Self::Resolved => "",
        }
    }
}

impl FromStr for BugStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reported" => Ok(Self::Reported),
            "analyzing" | "analysing" => Ok(Self::Analyzing),
            "fixing" => Ok(Self::Fixing),
            "fixed" => Ok(Self::Fixed),
            "verifying" => Ok(Self::Verifying),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("Invalid bug status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for BugSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("Invalid severity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BugRecord {
    pub name: String,
    pub display_name: String,
    pub status: BugStatus,
    pub severity: Option<BugSeverity>,
    pub last_modified: DateTime<Utc>,
}

/// Which steering documents a workspace has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SteeringStatus {
    pub exists: bool,
    pub product: bool,
    pub tech: bool,
    pub structure: bool,
    pub last_modified: Option<DateTime<Utc>>,
}
