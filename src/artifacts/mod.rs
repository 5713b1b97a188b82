//! Working-directory artifacts.
//!
//! Stages communicate with the engine through files, not through their text
//! output. [`ArtifactStore`] owns the file layout of one run:
//!
//! | File                              | Written by                 |
//! |-----------------------------------|----------------------------|
//! | `tasks.md`                        | planning, execution        |
//! | `recent-changes.md`               | execution, fixers          |
//! | `review/<category>.md`            | reviewers                  |
//! | `product-description.md`          | molding                    |
//! | `questions.json`                  | question generation        |
//! | `.harness/git-commit-message.txt` | commit message stage       |
//! | `.harness/session.json`           | session persister          |
//!
//! All writes go through a temp file and a rename so a crash never leaves a
//! half-written artifact behind.

pub mod questions;
pub mod tasks;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs2::FileExt;
use walkdir::WalkDir;

use crate::errors::{ArtifactError, OrchestratorError};
use crate::review::ReviewCategory;

pub use questions::{QaPair, Question, QuestionSet};
pub use tasks::{Task, TaskCounts, TaskList};

pub const HARNESS_DIR: &str = ".harness";
pub const TASKS_FILE: &str = "tasks.md";
pub const CHANGE_LOG_FILE: &str = "recent-changes.md";
pub const DESCRIPTION_FILE: &str = "product-description.md";
pub const QUESTIONS_FILE: &str = "questions.json";
pub const REVIEW_DIR: &str = "review";
pub const COMMIT_MESSAGE_FILE: &str = "git-commit-message.txt";
pub const SESSION_FILE: &str = "session.json";
pub const CONFIG_FILE: &str = "harness.toml";
pub const LOCK_FILE: &str = "run.lock";
pub const LOG_DIR: &str = "logs";

const TASKS_TEMPLATE: &str = "# Tasks\n\n";
const CHANGE_LOG_HEADER: &str = "# Recent Changes";

/// Directories never reported as stage output.
const SCAN_SKIP: &[&str] = &[".git", "target", "node_modules"];

/// Typed access to the artifact files under one working directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn harness_dir(&self) -> PathBuf {
        self.root.join(HARNESS_DIR)
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    pub fn change_log_path(&self) -> PathBuf {
        self.root.join(CHANGE_LOG_FILE)
    }

    pub fn description_path(&self) -> PathBuf {
        self.root.join(DESCRIPTION_FILE)
    }

    pub fn questions_path(&self) -> PathBuf {
        self.root.join(QUESTIONS_FILE)
    }

    pub fn findings_path(&self, category: ReviewCategory) -> PathBuf {
        self.root.join(category.findings_file())
    }

    pub fn commit_message_path(&self) -> PathBuf {
        self.harness_dir().join(COMMIT_MESSAGE_FILE)
    }

    pub fn session_path(&self) -> PathBuf {
        self.harness_dir().join(SESSION_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.harness_dir().join(CONFIG_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.harness_dir().join(LOG_DIR)
    }

    /// Path relative to the working directory, for prompts.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Create any missing artifact file with its empty template.
    ///
    /// Existing files are left alone, so this is safe to call on every run start.
    pub fn ensure_layout(&self, categories: &[ReviewCategory]) -> Result<(), ArtifactError> {
        let harness = self.harness_dir();
        create_dir(&harness)?;
        create_dir(&self.root.join(REVIEW_DIR))?;

        self.create_if_missing(&harness.join(".gitignore"), "*\n")?;
        self.create_if_missing(&self.tasks_path(), TASKS_TEMPLATE)?;
        self.create_if_missing(&self.change_log_path(), &format!("{}\n\n", CHANGE_LOG_HEADER))?;
        self.create_if_missing(&self.description_path(), "")?;
        self.create_if_missing(&self.commit_message_path(), "")?;
        for category in categories {
            self.create_if_missing(&self.findings_path(*category), "")?;
        }
        Ok(())
    }

    fn create_if_missing(&self, path: &Path, content: &str) -> Result<(), ArtifactError> {
        if path.exists() {
            return Ok(());
        }
        write_atomic(path, content)
    }

    pub fn read_tasks(&self) -> Result<TaskList, ArtifactError> {
        Ok(TaskList::parse(&self.read_or_empty(&self.tasks_path())?))
    }

    /// The task list as written, for prompts.
    pub fn read_tasks_raw(&self) -> Result<String, ArtifactError> {
        self.read_or_empty(&self.tasks_path())
    }

    pub fn task_counts(&self) -> Result<TaskCounts, ArtifactError> {
        Ok(self.read_tasks()?.counts())
    }

    pub fn read_description(&self) -> Result<String, ArtifactError> {
        self.read_or_empty(&self.description_path())
    }

    pub fn write_description(&self, content: &str) -> Result<(), ArtifactError> {
        write_atomic(&self.description_path(), content)
    }

    /// Delete and recreate `questions.json` empty so a stale batch can never be
    /// mistaken for fresh output.
    pub fn reset_questions(&self) -> Result<(), ArtifactError> {
        let path = self.questions_path();
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ArtifactError::io(&path, e)),
        }
        write_atomic(&path, "")
    }

    /// `None` when the file is missing or blank.
    pub fn read_questions(&self) -> Result<Option<QuestionSet>, ArtifactError> {
        let path = self.questions_path();
        let raw = self.read_or_empty(&path)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ArtifactError::Parse {
                path,
                message: e.to_string(),
            })
    }

    pub fn read_findings(&self, category: ReviewCategory) -> Result<String, ArtifactError> {
        self.read_or_empty(&self.findings_path(category))
    }

    pub fn truncate_findings(&self, category: ReviewCategory) -> Result<(), ArtifactError> {
        write_atomic(&self.findings_path(category), "")
    }

    pub fn read_commit_message(&self) -> Result<String, ArtifactError> {
        Ok(self
            .read_or_empty(&self.commit_message_path())?
            .trim()
            .to_string())
    }

    pub fn clear_commit_message(&self) -> Result<(), ArtifactError> {
        write_atomic(&self.commit_message_path(), "")
    }

    pub fn read_change_log(&self) -> Result<String, ArtifactError> {
        self.read_or_empty(&self.change_log_path())
    }

    /// Keep the header and the newest `max_lines` entry lines.
    ///
    /// Returns the number of lines dropped.
    pub fn cap_change_log(&self, max_lines: usize) -> Result<usize, ArtifactError> {
        let path = self.change_log_path();
        let content = self.read_or_empty(&path)?;
        let (capped, dropped) = cap_lines(&content, max_lines);
        if dropped > 0 {
            write_atomic(&path, &capped)?;
        }
        Ok(dropped)
    }

    /// Acquire the exclusive per-directory run lock.
    pub fn lock_run(&self) -> Result<RunLock, OrchestratorError> {
        let harness = self.harness_dir();
        create_dir(&harness)?;
        let path = harness.join(LOCK_FILE);
        let file = File::create(&path).map_err(|e| ArtifactError::io(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| OrchestratorError::AlreadyRunning(self.root.clone()))?;
        Ok(RunLock { file, path })
    }

    fn read_or_empty(&self, path: &Path) -> Result<String, ArtifactError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(ArtifactError::io(path, e)),
        }
    }
}

/// Held for the lifetime of a run; the lock is released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn create_dir(path: &Path) -> Result<(), ArtifactError> {
    fs::create_dir_all(path).map_err(|e| ArtifactError::io(path, e))
}

/// Write through a sibling temp file and rename over the target.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, content).map_err(|e| ArtifactError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| ArtifactError::io(path, e))
}

fn cap_lines(content: &str, max_lines: usize) -> (String, usize) {
    let mut header = Vec::new();
    let mut entries = Vec::new();
    for line in content.lines() {
        if entries.is_empty() && (line.starts_with("# ") || line.trim().is_empty()) {
            header.push(line);
        } else {
            entries.push(line);
        }
    }
    if entries.len() <= max_lines {
        return (content.to_string(), 0);
    }
    let dropped = entries.len() - max_lines;
    let mut out: Vec<&str> = header;
    out.extend(&entries[dropped..]);
    let mut capped = out.join("\n");
    capped.push('\n');
    (capped, dropped)
}

/// Files under `root` modified at or after `since`.
///
/// Skips VCS metadata, build output and the harness's own log directory.
pub fn files_modified_since(root: &Path, since: SystemTime) -> Vec<PathBuf> {
    let logs = root.join(HARNESS_DIR).join(LOG_DIR);
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && SCAN_SKIP.contains(&name.as_ref()))
                && entry.path() != logs
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .is_some_and(|modified| modified >= since)
        })
        .map(|entry| entry.into_path())
        .collect()
}
