//! Checklist parsing for `tasks.md`.
//!
//! Only lines of the form `- [ ] title` or `- [x] title` (also with `*`)
//! count as tasks. Headings, prose and nested notes are ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static TASK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s+\[( |x|X)\]\s+(.+?)\s*$").expect("task line pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub title: String,
    pub completed: bool,
    /// 1-based position among the checklist items.
    pub ordinal: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub completed: usize,
    pub total: usize,
}

impl TaskCounts {
    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }

    pub fn all_done(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

impl std::fmt::Display for TaskCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskList {
    pub tasks: Vec<Task>,
}

impl TaskList {
    pub fn parse(content: &str) -> Self {
        let tasks = content
            .lines()
            .filter_map(|line| TASK_LINE.captures(line))
            .enumerate()
            .map(|(i, caps)| Task {
                title: caps[2].to_string(),
                completed: !caps[1].trim().is_empty(),
                ordinal: i + 1,
            })
            .collect();
        Self { tasks }
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts {
            completed: self.tasks.iter().filter(|t| t.completed).count(),
            total: self.tasks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn has_incomplete(&self) -> bool {
        self.tasks.iter().any(|t| !t.completed)
    }

    /// Unchecked tasks in file order.
    pub fn incomplete(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| !t.completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Tasks

Some context the planner wrote.

- [x] Set up project skeleton
- [ ] Add config loader
  - [ ] nested items count too
* [X] Write README
- [] not a task
-[ ] also not a task
";

    #[test]
    fn parses_checklist_items_only() {
        let list = TaskList::parse(SAMPLE);
        let titles: Vec<_> = list.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Set up project skeleton",
                "Add config loader",
                "nested items count too",
                "Write README"
            ]
        );
        assert_eq!(list.tasks[3].ordinal, 4);
    }

    #[test]
    fn counts_are_derived_from_checkboxes() {
        let counts = TaskList::parse(SAMPLE).counts();
        assert_eq!(counts, TaskCounts { completed: 2, total: 4 });
        assert_eq!(counts.remaining(), 2);
        assert!(!counts.all_done());
        assert_eq!(counts.to_string(), "2/4");
    }

    #[test]
    fn empty_list_is_not_done() {
        let list = TaskList::parse("# Tasks\n\n");
        assert!(list.is_empty());
        assert!(!list.has_incomplete());
        assert!(!list.counts().all_done());
    }

    #[test]
    fn incomplete_keeps_file_order() {
        let list = TaskList::parse("- [ ] b\n- [x] a\n- [ ] c\n");
        let next: Vec<_> = list.incomplete().map(|t| t.title.as_str()).collect();
        assert_eq!(next, vec!["b", "c"]);
    }
}
