//! Typed error hierarchy for the harness workflow engine.
//!
//! One enum per subsystem:
//! - `InvalidTransition`: state machine contract violations
//! - `StageFailure`: a classified failure of one external stage call
//! - `DispatchError`: the stage dispatcher refused to start a call
//! - `ArtifactError`: working-directory file I/O
//! - `VcsError`: version control operations
//! - `SessionError`: snapshot persistence and resume validation
//! - `OrchestratorError`: everything the top-level driver can surface

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::phase::Phase;
use crate::stage::StageId;

/// A caller asked for a phase change the transition table does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: Phase,
    pub to: Phase,
}

/// How the orchestrator must react to a failed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeout or launch failure; eligible for a bounded retry.
    Transient,
    /// The stage claimed completion but the expected artifact is missing or unparseable.
    MalformedOutput,
    /// Required tool missing or working directory unusable. Never retried blindly.
    Environment,
    /// Operator cancelled the run while the stage was pending or in flight.
    Cancelled,
    /// Transient retries ran out.
    Exhausted,
}

impl FailureClass {
    /// Fatal classes move the run to `Error` without asking anyone.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Environment | Self::Exhausted)
    }
}

/// Failure of a single stage call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFailure {
    #[error("Stage timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Failed to launch '{program}': {message}")]
    Launch { program: String, message: String },

    #[error("Malformed output from {stage}: {detail}")]
    MalformedOutput { stage: StageId, detail: String },

    #[error("Environment problem: {message} ({hint})")]
    Environment { message: String, hint: String },

    #[error("Stage was cancelled")]
    Cancelled,

    #[error("Stage {stage} failed after {attempts} attempts: {last}")]
    Exhausted {
        stage: StageId,
        attempts: u32,
        last: String,
    },
}

impl StageFailure {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout(_) | Self::Launch { .. } => FailureClass::Transient,
            Self::MalformedOutput { .. } => FailureClass::MalformedOutput,
            Self::Environment { .. } => FailureClass::Environment,
            Self::Cancelled => FailureClass::Cancelled,
            Self::Exhausted { .. } => FailureClass::Exhausted,
        }
    }

    pub fn malformed(stage: StageId, detail: impl Into<String>) -> Self {
        Self::MalformedOutput {
            stage,
            detail: detail.into(),
        }
    }

    pub fn environment(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
            hint: hint.into(),
        }
    }
}

/// The dispatcher refused to start a stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Stage {requested} rejected: {active} is already in flight")]
    ConcurrentStage { active: StageId, requested: StageId },
}

/// Errors from reading or writing working-directory artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ArtifactError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from version control operations.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("{0} is not a git repository")]
    NotARepository(PathBuf),

    #[error("Nothing to commit")]
    NothingToCommit,

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Push failed: {0}")]
    Push(String),

    #[error("Git command timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Errors from session snapshot persistence.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No session snapshot at {0}")]
    Missing(PathBuf),

    #[error("Session snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Session snapshot for phase {phase} is stale: {missing} no longer exists")]
    Stale { phase: Phase, missing: PathBuf },

    #[error("Failed to write session snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the workflow orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("Stage failed during {phase}: {failure}")]
    Stage { phase: Phase, failure: StageFailure },

    #[error("Another run holds the lock on {0}")]
    AlreadyRunning(PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
