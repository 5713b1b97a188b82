//! Session snapshots for pause and resume.
//!
//! A snapshot is `{version, saved_at, phase, sub_phase, context}` written
//! atomically to `.harness/session.json`. On resume the snapshot is only
//! trusted if the working directory still holds the artifacts its phase
//! implies; anything else falls back to a fresh run in `Idle`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifacts::{ArtifactStore, write_atomic};
use crate::context::RunContext;
use crate::errors::{ArtifactError, SessionError};
use crate::phase::{Phase, SubPhase};

pub const SESSION_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: String,
    pub saved_at: DateTime<Utc>,
    pub phase: Phase,
    pub sub_phase: Option<SubPhase>,
    pub context: RunContext,
}

/// One-line summary for `harness status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub saved_at: DateTime<Utc>,
    pub phase: Phase,
    pub iteration: u32,
    pub max_iterations: u32,
    pub pending_messages: usize,
    pub last_error: Option<String>,
}

/// Where a run starts from.
#[derive(Debug, Clone, PartialEq)]
pub struct Restored {
    pub phase: Phase,
    pub sub_phase: Option<SubPhase>,
    pub context: RunContext,
    /// `None` when the snapshot was used; otherwise why it was not.
    pub discarded: Option<String>,
}

pub struct SessionPersister {
    store: ArtifactStore,
}

impl SessionPersister {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn path(&self) -> PathBuf {
        self.store.session_path()
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    pub fn save(
        &self,
        phase: Phase,
        sub_phase: Option<SubPhase>,
        context: &RunContext,
    ) -> Result<SessionSnapshot, SessionError> {
        let snapshot = SessionSnapshot {
            version: SESSION_VERSION.to_string(),
            saved_at: Utc::now(),
            phase,
            sub_phase,
            context: context.clone(),
        };
        let path = self.path();
        let json = serde_json::to_string_pretty(&snapshot).map_err(|e| SessionError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &json).map_err(|e| match e {
            ArtifactError::Io { path, source } => SessionError::Write { path, source },
            ArtifactError::Parse { path, message } => SessionError::Corrupt {
                path,
                reason: message,
            },
        })?;
        tracing::info!(%phase, path = %path.display(), "saved session snapshot");
        Ok(snapshot)
    }

    /// Load and validate the snapshot of this persister's working directory.
    pub fn load(&self) -> Result<SessionSnapshot, SessionError> {
        let snapshot = Self::load_from(&self.path())?;
        self.validate(&snapshot)?;
        Ok(snapshot)
    }

    /// Parse a snapshot file without checking it against any directory.
    pub fn load_from(path: &Path) -> Result<SessionSnapshot, SessionError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::Missing(path.to_path_buf()));
            }
            Err(e) => {
                return Err(SessionError::Corrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        let snapshot: SessionSnapshot =
            serde_json::from_str(&raw).map_err(|e| SessionError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if snapshot.version != SESSION_VERSION {
            return Err(SessionError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("unsupported version '{}'", snapshot.version),
            });
        }
        Ok(snapshot)
    }

    fn validate(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        let stale = |missing: PathBuf| SessionError::Stale {
            phase: snapshot.phase,
            missing,
        };

        let dir = &snapshot.context.working_dir;
        if !dir.is_dir() {
            return Err(stale(dir.clone()));
        }

        let parse_err = |e: ArtifactError| SessionError::Corrupt {
            path: self.path(),
            reason: e.to_string(),
        };

        match snapshot.phase {
            Phase::AwaitingAnswers => {
                let has_questions = self
                    .store
                    .read_questions()
                    .map_err(parse_err)?
                    .is_some_and(|set| !set.is_empty());
                if !has_questions {
                    return Err(stale(self.store.questions_path()));
                }
            }
            Phase::TaskPlanning => {
                // ensure_layout leaves an empty description behind
                let description = self.store.read_description().map_err(parse_err)?;
                if description.trim().is_empty() {
                    return Err(stale(self.store.description_path()));
                }
            }
            Phase::MainExecution | Phase::Review | Phase::GitOperations => {
                if self.store.read_tasks().map_err(parse_err)?.is_empty() {
                    return Err(stale(self.store.tasks_path()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Resume from the snapshot, or start fresh in `Idle` with `fresh`.
    ///
    /// Never fails: a missing, corrupt or stale snapshot is logged and discarded.
    pub fn restore(&self, fresh: RunContext) -> Restored {
        match self.load() {
            Ok(snapshot) if !snapshot.phase.is_terminal() => Restored {
                phase: snapshot.phase,
                sub_phase: snapshot.sub_phase,
                context: snapshot.context,
                discarded: None,
            },
            Ok(snapshot) => Self::fresh(
                fresh,
                format!("snapshot ended in {}", snapshot.phase),
            ),
            Err(SessionError::Missing(_)) => Restored {
                phase: Phase::Idle,
                sub_phase: None,
                context: fresh,
                discarded: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "discarding session snapshot");
                Self::fresh(fresh, e.to_string())
            }
        }
    }

    fn fresh(context: RunContext, reason: String) -> Restored {
        Restored {
            phase: Phase::Idle,
            sub_phase: None,
            context,
            discarded: Some(reason),
        }
    }

    pub fn delete(&self) -> Result<(), SessionError> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Write { path, source }),
        }
    }

    /// Summary of the saved snapshot, validated or not.
    pub fn info(&self) -> Option<SessionInfo> {
        let snapshot = Self::load_from(&self.path()).ok()?;
        Some(SessionInfo {
            saved_at: snapshot.saved_at,
            phase: snapshot.phase,
            iteration: snapshot.context.current_iteration,
            max_iterations: snapshot.context.max_main_iterations,
            pending_messages: snapshot.context.pending_messages.len(),
            last_error: snapshot.context.last_error,
        })
    }
}
