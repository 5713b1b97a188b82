//! Configuration loaded from `.harness/harness.toml`.
//!
//! Layered: file, then environment, then CLI flags. Every section is optional
//! and falls back to the built-in defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [defaults]
//! max_iterations = 10
//! tasks_per_iteration = 1
//! max_questions = 5
//! question_batches = 1
//!
//! [providers]
//! claude = "/usr/local/bin/claude"
//!
//! [stages.execution]
//! provider = "claude"
//! model = "sonnet"
//!
//! [review]
//! categories = ["general", "security", "tests"]
//! iterations = 2
//! unit_test_prep = true
//!
//! [debug]
//! enabled = false
//!
//! [debug.breakpoints.execution]
//! pause_before = true
//! pause_after = true
//!
//! [git]
//! mode = "push"
//! remote = "origin"
//!
//! [timeouts]
//! standard_secs = 300
//! extended_secs = 600
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::artifacts::CONFIG_FILE;
use crate::context::{Breakpoint, GitMode, RunContext};
use crate::review::ReviewCategory;
use crate::stage::{ProviderSelection, RetryPolicy, StageId, StageTimeouts};

pub const ENV_MAX_ITERATIONS: &str = "HARNESS_MAX_ITERATIONS";
pub const ENV_GIT_MODE: &str = "HARNESS_GIT_MODE";
pub const ENV_DEBUG: &str = "HARNESS_DEBUG";

const KNOWN_PROVIDERS: &[&str] = &["claude", "codex", "gemini"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessToml {
    #[serde(default)]
    pub defaults: DefaultsSection,
    /// Program override per provider id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stages: BTreeMap<String, StageSection>,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub debug: DebugSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_tasks_per_iteration")]
    pub tasks_per_iteration: u32,
    #[serde(default = "default_max_questions")]
    pub max_questions: u32,
    #[serde(default = "default_question_batches")]
    pub question_batches: u32,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_tasks_per_iteration() -> u32 {
    1
}

fn default_max_questions() -> u32 {
    5
}

fn default_question_batches() -> u32 {
    1
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tasks_per_iteration: default_tasks_per_iteration(),
            max_questions: default_max_questions(),
            question_batches: default_question_batches(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSection {
    #[serde(default = "default_review_categories")]
    pub categories: Vec<ReviewCategory>,
    #[serde(default = "default_review_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub unit_test_prep: bool,
}

fn default_review_categories() -> Vec<ReviewCategory> {
    vec![ReviewCategory::General]
}

fn default_review_iterations() -> u32 {
    1
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            categories: default_review_categories(),
            iterations: default_review_iterations(),
            unit_test_prep: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugSection {
    #[serde(default)]
    pub enabled: bool,
    /// Per-stage overrides; stages not listed pause before only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub breakpoints: BTreeMap<String, Breakpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default)]
    pub mode: GitMode,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_change_log_max_lines")]
    pub change_log_max_lines: usize,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_change_log_max_lines() -> usize {
    200
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            mode: GitMode::default(),
            remote: default_remote(),
            change_log_max_lines: default_change_log_max_lines(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_standard_secs")]
    pub standard_secs: u64,
    #[serde(default = "default_extended_secs")]
    pub extended_secs: u64,
    #[serde(default = "default_auxiliary_secs")]
    pub auxiliary_secs: u64,
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_standard_secs() -> u64 {
    300
}

fn default_extended_secs() -> u64 {
    600
}

fn default_auxiliary_secs() -> u64 {
    30
}

fn default_cancel_grace_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    5
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            standard_secs: default_standard_secs(),
            extended_secs: default_extended_secs(),
            auxiliary_secs: default_auxiliary_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl HarnessToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse harness.toml")
    }

    /// Load `.harness/harness.toml`, or defaults if the file does not exist.
    pub fn load_or_default(harness_dir: &Path) -> Result<Self> {
        let config_path = harness_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize harness.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `HARNESS_*` environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Vec<String> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Returns warnings for values that did not parse.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            match raw.trim().parse() {
                Ok(n) => self.defaults.max_iterations = n,
                Err(_) => warnings.push(format!("Ignoring {}='{}': not a number", ENV_MAX_ITERATIONS, raw)),
            }
        }
        if let Some(raw) = lookup(ENV_GIT_MODE) {
            match raw.parse::<GitMode>() {
                Ok(mode) => self.git.mode = mode,
                Err(e) => warnings.push(format!("Ignoring {}: {}", ENV_GIT_MODE, e)),
            }
        }
        if let Some(raw) = lookup(ENV_DEBUG) {
            self.debug.enabled = !matches!(raw.trim().to_lowercase().as_str(), "" | "0" | "false" | "off");
        }
        warnings
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.defaults.max_iterations == 0 {
            warnings.push("defaults.max_iterations is 0: no task will ever run".to_string());
        }
        if self.defaults.tasks_per_iteration == 0 {
            warnings.push("defaults.tasks_per_iteration must be at least 1".to_string());
        }

        for (name, section) in &self.stages {
            if name.parse::<StageId>().is_err() {
                warnings.push(format!("Unknown stage '{}' in [stages]", name));
            }
            if let Some(provider) = &section.provider
                && !KNOWN_PROVIDERS.contains(&provider.as_str())
                && !self.providers.contains_key(provider)
            {
                warnings.push(format!(
                    "Unknown provider '{}' for stage '{}'. Valid values: {}",
                    provider,
                    name,
                    KNOWN_PROVIDERS.join(", ")
                ));
            }
        }

        for name in self.debug.breakpoints.keys() {
            if name.parse::<StageId>().is_err() {
                warnings.push(format!("Unknown stage '{}' in [debug.breakpoints]", name));
            }
        }

        if self.review.iterations > 0 && self.review.categories.is_empty() {
            warnings.push("review.iterations is set but no categories are enabled".to_string());
        }

        let t = &self.timeouts;
        if t.standard_secs == 0 || t.extended_secs == 0 || t.auxiliary_secs == 0 {
            warnings.push("Timeouts must be greater than 0 seconds".to_string());
        }
        if t.extended_secs < t.standard_secs {
            warnings.push("timeouts.extended_secs is shorter than standard_secs".to_string());
        }

        warnings
    }

    pub fn stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            standard: Duration::from_secs(self.timeouts.standard_secs),
            extended: Duration::from_secs(self.timeouts.extended_secs),
            auxiliary: Duration::from_secs(self.timeouts.auxiliary_secs),
            cancel_grace: Duration::from_secs(self.timeouts.cancel_grace_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.timeouts.max_retries,
            delay: Duration::from_secs(self.timeouts.retry_delay_secs),
        }
    }

    /// Fresh run context for `working_dir` with this configuration applied.
    pub fn to_run_context(&self, working_dir: impl Into<PathBuf>) -> RunContext {
        let mut ctx = RunContext::new(working_dir);
        ctx.max_main_iterations = self.defaults.max_iterations;
        ctx.tasks_per_iteration = self.defaults.tasks_per_iteration.max(1);
        ctx.questions.max_questions = self.defaults.max_questions;
        ctx.questions.max_batches = self.defaults.question_batches;

        for (name, section) in &self.stages {
            let Ok(stage) = name.parse::<StageId>() else {
                tracing::warn!(stage = %name, "ignoring unknown stage in config");
                continue;
            };
            let default = stage.default_selection();
            ctx.stages.insert(
                stage,
                ProviderSelection {
                    provider: section.provider.clone().unwrap_or(default.provider),
                    model: section.model.clone().or(default.model),
                },
            );
        }

        ctx.review.categories = ReviewCategory::in_declared_order(&self.review.categories);
        ctx.review.max_iterations = self.review.iterations;
        ctx.review.unit_test_prep = self.review.unit_test_prep;

        ctx.debug.enabled = self.debug.enabled;
        for (name, breakpoint) in &self.debug.breakpoints {
            if let Ok(stage) = name.parse::<StageId>() {
                ctx.debug.breakpoints.insert(stage, *breakpoint);
            }
        }

        ctx.git.mode = self.git.mode;
        ctx.git.remote = self.git.remote.clone();
        ctx.git.change_log_max_lines = self.git.change_log_max_lines;
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() {
        let config = HarnessToml::parse("").unwrap();
        assert_eq!(config, HarnessToml::default());
        assert_eq!(config.defaults.max_iterations, 10);
        assert_eq!(config.git.mode, GitMode::Local);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_full_file() {
        let config = HarnessToml::parse(
            r#"
[defaults]
max_iterations = 4
tasks_per_iteration = 2

[providers]
claude = "/opt/claude"

[stages.execution]
provider = "claude"
model = "sonnet"

[stages.reviewer]
model = "gpt-5"

[review]
categories = ["security", "general", "tests"]
iterations = 2
unit_test_prep = true

[debug]
enabled = true

[debug.breakpoints.git_commit]
pause_before = false
pause_after = true

[git]
mode = "push"
remote = "upstream"

[timeouts]
extended_secs = 900
"#,
        )
        .unwrap();
        assert!(config.validate().is_empty(), "{:?}", config.validate());

        let ctx = config.to_run_context("/work");
        assert_eq!(ctx.max_main_iterations, 4);
        assert_eq!(ctx.tasks_per_iteration, 2);
        assert_eq!(ctx.selection(StageId::Execution), ProviderSelection::new("claude", "sonnet"));
        // Provider falls back to the stage default when only the model is set
        assert_eq!(ctx.selection(StageId::Reviewer).provider, "codex");
        assert_eq!(ctx.selection(StageId::Reviewer).model.as_deref(), Some("gpt-5"));
        assert_eq!(
            ctx.review.categories,
            vec![ReviewCategory::General, ReviewCategory::Safety, ReviewCategory::Testing]
        );
        assert!(ctx.debug.enabled);
        assert_eq!(
            ctx.debug.breakpoint(StageId::CommitMessage),
            Breakpoint {
                pause_before: false,
                pause_after: true
            }
        );
        assert_eq!(ctx.git.mode, GitMode::Push);
        assert_eq!(ctx.git.remote, "upstream");
        assert_eq!(config.stage_timeouts().extended, Duration::from_secs(900));
        assert_eq!(config.stage_timeouts().standard, Duration::from_secs(300));
    }

    #[test]
    fn validate_flags_unknown_names() {
        let config = HarnessToml::parse(
            r#"
[stages.deploy]
provider = "claude"

[stages.fixer]
provider = "llama"

[debug.breakpoints.nowhere]
pause_before = true
"#,
        )
        .unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3, "{:?}", warnings);
        assert!(warnings.iter().any(|w| w.contains("deploy")));
        assert!(warnings.iter().any(|w| w.contains("llama")));
        assert!(warnings.iter().any(|w| w.contains("nowhere")));
    }

    #[test]
    fn custom_provider_ids_are_valid_when_declared() {
        let config = HarnessToml::parse(
            r#"
[providers]
local = "/usr/bin/my-model"

[stages.fixer]
provider = "local"
"#,
        )
        .unwrap();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn env_overrides_apply_and_report_bad_values() {
        let mut config = HarnessToml::default();
        let warnings = config.apply_env_from(|key| match key {
            ENV_MAX_ITERATIONS => Some("3".into()),
            ENV_GIT_MODE => Some("push".into()),
            ENV_DEBUG => Some("1".into()),
            _ => None,
        });
        assert!(warnings.is_empty());
        assert_eq!(config.defaults.max_iterations, 3);
        assert_eq!(config.git.mode, GitMode::Push);
        assert!(config.debug.enabled);

        let warnings = config.apply_env_from(|key| match key {
            ENV_MAX_ITERATIONS => Some("many".into()),
            ENV_DEBUG => Some("false".into()),
            _ => None,
        });
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.defaults.max_iterations, 3);
        assert!(!config.debug.enabled);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut config = HarnessToml::default();
        config.review.categories = vec![ReviewCategory::Safety, ReviewCategory::UiUx];
        config.stages.insert(
            "execution".into(),
            StageSection {
                provider: Some("gemini".into()),
                model: None,
            },
        );
        let path = dir.path().join(CONFIG_FILE);
        config.save(&path).unwrap();

        let loaded = HarnessToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let config = HarnessToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, HarnessToml::default());
    }
}
