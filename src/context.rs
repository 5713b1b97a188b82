//! The run context: the one mutable record of a run.
//!
//! The orchestrator owns the only live [`RunContext`]. Everything else gets a
//! shared reference or hands back a value the orchestrator applies. Operators
//! change settings mid-run by sending a [`ContextPatch`], which is applied at
//! the next boundary between stage calls.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifacts::QaPair;
use crate::review::ReviewCategory;
use crate::stage::{ProviderSelection, StageId};

/// Pause points for one stage while debug mode is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Breakpoint {
    pub pause_before: bool,
    pub pause_after: bool,
}

impl Breakpoint {
    pub const NONE: Breakpoint = Breakpoint {
        pause_before: false,
        pause_after: false,
    };

    pub fn before() -> Self {
        Self {
            pause_before: true,
            pause_after: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSettings {
    pub enabled: bool,
    #[serde(default)]
    pub breakpoints: BTreeMap<StageId, Breakpoint>,
}

impl Default for DebugSettings {
    /// Off, with a pause before every stage once switched on.
    fn default() -> Self {
        Self {
            enabled: false,
            breakpoints: StageId::ALL
                .into_iter()
                .map(|stage| (stage, Breakpoint::before()))
                .collect(),
        }
    }
}

impl DebugSettings {
    /// Effective breakpoint for a stage, folding in the global switch.
    pub fn breakpoint(&self, stage: StageId) -> Breakpoint {
        if !self.enabled {
            return Breakpoint::NONE;
        }
        self.breakpoints.get(&stage).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSettings {
    /// Enabled categories, kept in declared order.
    pub categories: Vec<ReviewCategory>,
    pub unit_test_prep: bool,
    pub max_iterations: u32,
    #[serde(default)]
    pub current_iteration: u32,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            categories: vec![ReviewCategory::General],
            unit_test_prep: false,
            max_iterations: 1,
            current_iteration: 0,
        }
    }
}

impl ReviewSettings {
    /// Review runs only with at least one category and a non-zero limit.
    pub fn is_enabled(&self) -> bool {
        !self.categories.is_empty() && self.max_iterations > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSettings {
    pub max_questions: u32,
    /// Batches allowed per run. Zero skips clarification entirely.
    pub max_batches: u32,
    #[serde(default)]
    pub batches_completed: u32,
    #[serde(default)]
    pub answered: bool,
    #[serde(default)]
    pub qa_pairs: Vec<QaPair>,
}

impl Default for QuestionSettings {
    fn default() -> Self {
        Self {
            max_questions: 5,
            max_batches: 1,
            batches_completed: 0,
            answered: false,
            qa_pairs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitMode {
    Off,
    #[default]
    Local,
    Push,
}

impl GitMode {
    pub fn commits(self) -> bool {
        self != GitMode::Off
    }
}

impl std::fmt::Display for GitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GitMode::Off => "off",
            GitMode::Local => "local",
            GitMode::Push => "push",
        })
    }
}

impl FromStr for GitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "false" => Ok(GitMode::Off),
            "local" | "commit" => Ok(GitMode::Local),
            "push" | "remote" => Ok(GitMode::Push),
            other => Err(format!(
                "Unknown git mode '{}'. Valid values: off, local, push",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSettings {
    pub mode: GitMode,
    pub remote: String,
    pub change_log_max_lines: usize,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            mode: GitMode::Local,
            remote: "origin".to_string(),
            change_log_max_lines: 200,
        }
    }
}

/// A message the operator sent while the run was busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: Uuid,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub working_dir: PathBuf,
    pub current_iteration: u32,
    pub max_main_iterations: u32,
    pub tasks_per_iteration: u32,
    /// Set once the operator chose to finalize; no further execution iterations.
    #[serde(default)]
    pub finalizing: bool,
    pub stages: BTreeMap<StageId, ProviderSelection>,
    pub debug: DebugSettings,
    pub review: ReviewSettings,
    pub questions: QuestionSettings,
    #[serde(default)]
    pub pending_messages: VecDeque<PendingMessage>,
    pub git: GitSettings,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl RunContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            current_iteration: 0,
            max_main_iterations: 10,
            tasks_per_iteration: 1,
            finalizing: false,
            stages: StageId::ALL
                .into_iter()
                .map(|stage| (stage, stage.default_selection()))
                .collect(),
            debug: DebugSettings::default(),
            review: ReviewSettings::default(),
            questions: QuestionSettings::default(),
            pending_messages: VecDeque::new(),
            git: GitSettings::default(),
            last_error: None,
        }
    }

    /// Provider for a stage, falling back to the built-in default.
    pub fn selection(&self, stage: StageId) -> ProviderSelection {
        self.stages
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| stage.default_selection())
    }

    pub fn iteration_budget_left(&self) -> bool {
        self.current_iteration < self.max_main_iterations
    }

    pub fn apply(&mut self, patch: ContextPatch) {
        tracing::info!(?patch, "applying context patch");
        if let Some(max) = patch.max_main_iterations {
            self.max_main_iterations = max;
        }
        if let Some(n) = patch.tasks_per_iteration {
            self.tasks_per_iteration = n.max(1);
        }
        for (stage, selection) in patch.stages {
            self.stages.insert(stage, selection);
        }
        if let Some(categories) = patch.review_categories {
            self.review.categories = ReviewCategory::in_declared_order(&categories);
        }
        if let Some(limit) = patch.review_iterations {
            self.review.max_iterations = limit;
        }
        if let Some(prep) = patch.unit_test_prep {
            self.review.unit_test_prep = prep;
        }
        if let Some(enabled) = patch.debug_enabled {
            self.debug.enabled = enabled;
        }
        for (stage, breakpoint) in patch.breakpoints {
            self.debug.breakpoints.insert(stage, breakpoint);
        }
        if let Some(mode) = patch.git_mode {
            self.git.mode = mode;
        }
    }
}

/// Live reconfiguration request. `None` leaves a setting untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextPatch {
    pub max_main_iterations: Option<u32>,
    pub tasks_per_iteration: Option<u32>,
    pub stages: Vec<(StageId, ProviderSelection)>,
    pub review_categories: Option<Vec<ReviewCategory>>,
    pub review_iterations: Option<u32>,
    pub unit_test_prep: Option<bool>,
    pub debug_enabled: Option<bool>,
    pub breakpoints: Vec<(StageId, Breakpoint)>,
    pub git_mode: Option<GitMode>,
}
