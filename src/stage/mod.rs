//! Stage identifiers and the stage invocation seam.
//!
//! A stage is one opaque call to an external model: a rendered prompt goes in,
//! text and side-effect files come out. The orchestrator never looks inside a
//! call; it only sees a [`StageResponse`] or a classified
//! [`StageFailure`](crate::errors::StageFailure).
//!
//! - [`StageInvoker`] is the seam. [`ProcessInvoker`] runs a provider CLI;
//!   tests substitute fakes.
//! - [`provider`] holds the provider trait and the registry resolved at
//!   dispatch time.

pub mod process;
pub mod provider;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::StageFailure;

pub use process::ProcessInvoker;
pub use provider::{Provider, ProviderCommand, ProviderRegistry};

/// Every kind of external call the engine can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    QuestionGeneration,
    DescriptionMolding,
    TaskPlanning,
    Execution,
    UnitTestPrep,
    Reviewer,
    Fixer,
    CommitMessage,
    /// Gate-only stage around `git push`; no model is called.
    GitPush,
    ErrorFix,
    ClientMessage,
}

/// Which timeout budget a stage gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Standard,
    Extended,
    Auxiliary,
}

impl StageId {
    pub const ALL: [StageId; 11] = [
        StageId::QuestionGeneration,
        StageId::DescriptionMolding,
        StageId::TaskPlanning,
        StageId::Execution,
        StageId::UnitTestPrep,
        StageId::Reviewer,
        StageId::Fixer,
        StageId::CommitMessage,
        StageId::GitPush,
        StageId::ErrorFix,
        StageId::ClientMessage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::QuestionGeneration => "question_generation",
            StageId::DescriptionMolding => "description_molding",
            StageId::TaskPlanning => "task_planning",
            StageId::Execution => "execution",
            StageId::UnitTestPrep => "unit_test_prep",
            StageId::Reviewer => "reviewer",
            StageId::Fixer => "fixer",
            StageId::CommitMessage => "commit_message",
            StageId::GitPush => "git_push",
            StageId::ErrorFix => "error_fix",
            StageId::ClientMessage => "client_message",
        }
    }

    pub fn timeout_class(self) -> TimeoutClass {
        match self {
            StageId::Execution | StageId::Fixer | StageId::ErrorFix => TimeoutClass::Extended,
            StageId::GitPush => TimeoutClass::Auxiliary,
            _ => TimeoutClass::Standard,
        }
    }

    /// Whether the stage calls a model (everything except the push gate).
    pub fn calls_model(self) -> bool {
        self != StageId::GitPush
    }

    /// Provider and model used when the config does not say otherwise.
    pub fn default_selection(self) -> ProviderSelection {
        let (provider, model) = match self {
            StageId::QuestionGeneration => ("codex", "gpt-5-codex"),
            StageId::DescriptionMolding => ("claude", "opus"),
            StageId::TaskPlanning => ("claude", "opus"),
            StageId::Execution => ("codex", "gpt-5-codex"),
            StageId::UnitTestPrep => ("codex", "gpt-5-codex"),
            StageId::Reviewer => ("codex", "gpt-5-codex"),
            StageId::Fixer => ("claude", "sonnet"),
            StageId::CommitMessage => ("codex", "gpt-5-codex"),
            StageId::GitPush => ("none", ""),
            StageId::ErrorFix => ("claude", "sonnet"),
            StageId::ClientMessage => ("codex", "gpt-5-codex"),
        };
        ProviderSelection::new(provider, model)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            // Breakpoint names used by older configs
            "git_commit" => Ok(StageId::CommitMessage),
            "coder" => Ok(StageId::Execution),
            other => StageId::ALL
                .into_iter()
                .find(|s| s.as_str() == other)
                .ok_or_else(|| format!("Unknown stage '{}'", s)),
        }
    }
}

/// Provider id plus optional model name for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSelection {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderSelection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            provider: provider.into(),
            model: if model.is_empty() { None } else { Some(model) },
        }
    }
}

impl std::fmt::Display for ProviderSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}/{}", self.provider, model),
            None => f.write_str(&self.provider),
        }
    }
}

/// Everything an invoker needs for one call.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: StageId,
    pub prompt: String,
    pub provider: ProviderSelection,
    pub timeout: Duration,
    pub working_dir: PathBuf,
}

/// What a finished call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageResponse {
    pub output: String,
    /// Files under the working directory modified while the call ran.
    pub files_written: Vec<PathBuf>,
    /// `None` when the call was not backed by a process.
    pub exit_code: Option<i32>,
}

/// Executes one stage call. Implementations must honour `cancel`.
#[async_trait]
pub trait StageInvoker: Send + Sync {
    async fn invoke(
        &self,
        request: &StageRequest,
        cancel: &CancellationToken,
    ) -> Result<StageResponse, StageFailure>;
}

/// Timeout budgets per [`TimeoutClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub standard: Duration,
    pub extended: Duration,
    pub auxiliary: Duration,
    /// How long a cancelled process gets to exit after the kill signal.
    pub cancel_grace: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            standard: Duration::from_secs(300),
            extended: Duration::from_secs(600),
            auxiliary: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: StageId) -> Duration {
        match stage.timeout_class() {
            TimeoutClass::Standard => self.standard,
            TimeoutClass::Extended => self.extended,
            TimeoutClass::Auxiliary => self.auxiliary,
        }
    }
}

/// Bounded retry for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(5),
        }
    }
}
