//! Task-list parsing for `tasks.md`.
//!
//! ## Expected Format
//!
//! ```markdown
//! - [x] 1. Set up project skeleton
//!   - [x] 1.1 Create crate layout
//! - [-] 2. Implement the API
//!   - [ ] 2.1 Routes
//!     - _Requirements: 1.2_
//! ```
//!
//! `[ ]` is pending, `[x]` is done and `[-]` is in progress. Nesting follows
//! indentation (two spaces or one tab per level). Lines that are not
//! checkboxes are ignored. Tasks without a leading dotted id get a positional
//! one (`3`, `3.1`, ...).

use regex::Regex;
use std::sync::LazyLock;

use super::types::{Task, TaskProgress, flatten_tasks};

static CHECKBOX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)[-*+]\s+\[([ xX\-])\]\s+(.*?)\s*$").unwrap());

static TASK_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+(.*)$").unwrap());

struct OpenTask {
    level: usize,
    task: Task,
}

fn indent_level(indent: &str) -> usize {
    let tabs = indent.chars().filter(|c| *c == '\t').count();
    let spaces = indent.chars().filter(|c| *c == ' ').count();
    tabs + spaces / 2
}

/// Parse the checkbox task tree out of a `tasks.md` document.
pub fn parse_tasks(content: &str) -> Vec<Task> {
    let mut roots: Vec<Task> = Vec::new();
    let mut stack: Vec<OpenTask> = Vec::new();

    for line in content.lines() {
        let Some(caps) = CHECKBOX_REGEX.captures(line) else {
            continue;
        };
        let level = indent_level(&caps[1]);
        let marker = &caps[2];
        let text = caps[3].trim_matches('*').trim();

        let (id, description) = match TASK_ID_REGEX.captures(text) {
            Some(id_caps) => (id_caps[1].to_string(), id_caps[2].trim().to_string()),
            None => (String::new(), text.to_string()),
        };

        while stack.last().is_some_and(|open| open.level >= level) {
            if let Some(done) = stack.pop() {
                attach(&mut stack, &mut roots, done.task);
            }
        }

        stack.push(OpenTask {
            level,
            task: Task {
                id,
                description,
                completed: marker.eq_ignore_ascii_case("x"),
                in_progress: marker == "-",
                subtasks: Vec::new(),
            },
        });
    }

    while let Some(done) = stack.pop() {
        attach(&mut stack, &mut roots, done.task);
    }

    assign_missing_ids(&mut roots, "");
    roots
}

fn attach(stack: &mut [OpenTask], roots: &mut Vec<Task>, task: Task) {
    match stack.last_mut() {
        Some(parent) => parent.task.subtasks.push(task),
        None => roots.push(task),
    }
}

fn assign_missing_ids(tasks: &mut [Task], prefix: &str) {
    for (index, task) in tasks.iter_mut().enumerate() {
        if task.id.is_empty() {
            task.id = if prefix.is_empty() {
                (index + 1).to_string()
            } else {
                format!("{}.{}", prefix, index + 1)
            };
        }
        let id = task.id.clone();
        assign_missing_ids(&mut task.subtasks, &id);
    }
}

pub fn task_progress(tasks: &[Task]) -> TaskProgress {
    let all = flatten_tasks(tasks);
    TaskProgress {
        total: all.len(),
        completed: all.iter().filter(|t| t.completed).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Tasks

- [x] 1. Set up project skeleton
  - [x] 1.1 Create crate layout
  - [x] 1.2 Wire CI
- [ ] 2. Implement the API
  - [x] 2.1 Routes
  - [-] 2.3 Error mapping
    - _Requirements: 1.2_
  - [ ] 2.4 Pagination
- [ ] 3. Docs
";

    #[test]
    fn parses_nested_tree_with_ids() {
        let tasks = parse_tasks(SAMPLE);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, "1");
        assert_eq!(tasks[0].description, "Set up project skeleton");
        assert_eq!(tasks[0].subtasks.len(), 2);
        assert_eq!(tasks[1].subtasks[1].id, "2.3");
        assert!(tasks[1].subtasks[1].in_progress);
        assert!(!tasks[1].subtasks[1].completed);
        assert_eq!(tasks[2].description, "Docs");
    }

    #[test]
    fn ignores_non_checkbox_lines() {
        let tasks = parse_tasks(SAMPLE);
        let error_mapping = &tasks[1].subtasks[1];
        assert!(error_mapping.subtasks.is_empty());
    }

    #[test]
    fn assigns_positional_ids_when_missing() {
        let content = "- [ ] Alpha\n  - [ ] Beta\n  - [x] Gamma\n- [ ] Delta\n";
        let tasks = parse_tasks(content);
        assert_eq!(tasks[0].id, "1");
        assert_eq!(tasks[0].subtasks[0].id, "1.1");
        assert_eq!(tasks[0].subtasks[1].id, "1.2");
        assert!(tasks[0].subtasks[1].completed);
        assert_eq!(tasks[1].id, "2");
    }

    #[test]
    fn tab_indentation_nests() {
        let content = "- [ ] 1 Parent\n\t- [-] 1.1 Child\n";
        let tasks = parse_tasks(content);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].subtasks[0].id, "1.1");
        assert!(tasks[0].subtasks[0].in_progress);
    }

    #[test]
    fn bold_wrapped_text_is_unwrapped() {
        let tasks = parse_tasks("- [x] **4. Ship it**\n");
        assert_eq!(tasks[0].id, "4");
        assert_eq!(tasks[0].description, "Ship it");
    }

    #[test]
    fn progress_counts_every_level() {
        let progress = task_progress(&parse_tasks(SAMPLE));
        assert_eq!(progress.total, 8);
        assert_eq!(progress.completed, 4);
    }

    #[test]
    fn empty_document_has_no_tasks() {
        assert!(parse_tasks("# Tasks\n\nNothing yet.\n").is_empty());
    }
}
