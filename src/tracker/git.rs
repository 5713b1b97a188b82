use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use git2::{
    DiffFormat, DiffOptions, IndexAddOption, Repository, Signature, Status, StatusOptions,
};

use crate::errors::VcsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

impl ChangeKind {
    fn code(self) -> &'static str {
        match self {
            ChangeKind::Added => "A ",
            ChangeKind::Modified => "M ",
            ChangeKind::Deleted => "D ",
            ChangeKind::Renamed => "R ",
            ChangeKind::Untracked => "??",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub kind: ChangeKind,
}

/// Working tree status relative to HEAD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub entries: Vec<StatusEntry>,
}

impl RepoStatus {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    /// Short-format listing, one `XY path` line per entry.
    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} {}", e.kind.code(), e.path))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The git operations the engine needs. Everything deterministic lives here;
/// models never run git themselves.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Create a repository if the working directory is not inside one.
    /// Returns `true` when a repository was created.
    async fn init_if_needed(&self) -> Result<bool, VcsError>;

    async fn status(&self) -> Result<RepoStatus, VcsError>;

    /// Unified diff of the working tree (untracked files included) against HEAD.
    async fn diff(&self) -> Result<String, VcsError>;

    async fn add_all(&self) -> Result<(), VcsError>;

    /// Commit the index. Returns the new commit id.
    async fn commit(&self, message: &str) -> Result<String, VcsError>;

    async fn push(&self, remote: &str) -> Result<(), VcsError>;
}

/// [`VersionControl`] backed by `git2`, with `git push` run as a process.
///
/// The repository is opened per call; `git2::Repository` is not `Sync`.
#[derive(Debug, Clone)]
pub struct GitTracker {
    root: PathBuf,
    push_timeout: Duration,
}

impl GitTracker {
    pub fn new(root: impl Into<PathBuf>, push_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            push_timeout,
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, VcsError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, VcsError> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(&root))
            .await
            .map_err(|e| VcsError::Git(git2::Error::from_str(&format!("git task failed: {}", e))))?
    }
}

fn open(root: &Path) -> Result<Repository, VcsError> {
    Repository::discover(root).map_err(|e| match e.code() {
        git2::ErrorCode::NotFound => VcsError::NotARepository(root.to_path_buf()),
        _ => VcsError::Git(e),
    })
}

fn head_tree(repo: &Repository) -> Option<git2::Tree<'_>> {
    repo.head().ok().and_then(|head| head.peel_to_tree().ok())
}

fn classify(status: Status) -> Option<ChangeKind> {
    if status.is_wt_new() && !status.is_index_new() {
        Some(ChangeKind::Untracked)
    } else if status.intersects(Status::INDEX_NEW) {
        Some(ChangeKind::Added)
    } else if status.intersects(Status::INDEX_DELETED | Status::WT_DELETED) {
        Some(ChangeKind::Deleted)
    } else if status.intersects(Status::INDEX_RENAMED | Status::WT_RENAMED) {
        Some(ChangeKind::Renamed)
    } else if status.intersects(
        Status::INDEX_MODIFIED | Status::WT_MODIFIED | Status::INDEX_TYPECHANGE | Status::WT_TYPECHANGE,
    ) {
        Some(ChangeKind::Modified)
    } else {
        None
    }
}

fn read_status(repo: &Repository) -> Result<RepoStatus, VcsError> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let statuses = repo.statuses(Some(&mut opts))?;
    let entries = statuses
        .iter()
        .filter_map(|entry| {
            let kind = classify(entry.status())?;
            let path = entry.path()?.to_string();
            Some(StatusEntry { path, kind })
        })
        .collect();
    Ok(RepoStatus { entries })
}

fn signature(repo: &Repository) -> Result<Signature<'static>, VcsError> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Ok(Signature::now("harness", "harness@localhost")?),
    }
}

#[async_trait]
impl VersionControl for GitTracker {
    async fn init_if_needed(&self) -> Result<bool, VcsError> {
        self.blocking(|root| match open(root) {
            Ok(_) => Ok(false),
            Err(VcsError::NotARepository(_)) => {
                Repository::init(root)?;
                tracing::info!(path = %root.display(), "initialized git repository");
                Ok(true)
            }
            Err(e) => Err(e),
        })
        .await
    }

    async fn status(&self) -> Result<RepoStatus, VcsError> {
        self.blocking(|root| read_status(&open(root)?)).await
    }

    async fn diff(&self) -> Result<String, VcsError> {
        self.blocking(|root| {
            let repo = open(root)?;
            let tree = head_tree(&repo);
            let mut opts = DiffOptions::new();
            opts.include_untracked(true)
                .recurse_untracked_dirs(true)
                .show_untracked_content(true);
            let diff = repo.diff_tree_to_workdir_with_index(tree.as_ref(), Some(&mut opts))?;

            let mut buf = Vec::new();
            diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
                if matches!(line.origin(), '+' | '-' | ' ') {
                    buf.push(line.origin() as u8);
                }
                buf.extend_from_slice(line.content());
                true
            })?;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        })
        .await
    }

    async fn add_all(&self) -> Result<(), VcsError> {
        self.blocking(|root| {
            let repo = open(root)?;
            let mut index = repo.index()?;
            index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
            // Picks up deletions that add_all leaves in the index
            index.update_all(["*"].iter(), None)?;
            index.write()?;
            Ok(())
        })
        .await
    }

    async fn commit(&self, message: &str) -> Result<String, VcsError> {
        let message = message.to_string();
        self.blocking(move |root| {
            let repo = open(root)?;
            let mut index = repo.index()?;
            let tree_id = index.write_tree()?;
            let tree = repo.find_tree(tree_id)?;

            let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            if let Some(parent) = &parent
                && parent.tree_id() == tree_id
            {
                return Err(VcsError::NothingToCommit);
            }
            if parent.is_none() && tree.is_empty() {
                return Err(VcsError::NothingToCommit);
            }

            let sig = signature(&repo)?;
            let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
            let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;
            tracing::info!(commit = %oid, "created commit");
            Ok(oid.to_string())
        })
        .await
    }

    async fn push(&self, remote: &str) -> Result<(), VcsError> {
        let child = tokio::process::Command::new("git")
            .args(["push", remote, "HEAD"])
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.push_timeout, child)
            .await
            .map_err(|_| VcsError::Timeout(self.push_timeout))?
            .map_err(|e| VcsError::Push(e.to_string()))?;

        if output.status.success() {
            tracing::info!(remote, "pushed HEAD");
            Ok(())
        } else {
            Err(VcsError::Push(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let tracker = GitTracker::new(dir.path(), Duration::from_secs(5));
        (tracker, dir)
    }

    #[tokio::test]
    async fn init_if_needed_creates_repo_once() {
        let dir = tempdir().unwrap();
        let tracker = GitTracker::new(dir.path(), Duration::from_secs(5));
        assert!(tracker.init_if_needed().await.unwrap());
        assert!(!tracker.init_if_needed().await.unwrap());
        assert!(dir.path().join(".git").exists());
    }

    #[tokio::test]
    async fn status_on_missing_repo_is_typed() {
        let dir = tempdir().unwrap();
        let tracker = GitTracker::new(dir.path(), Duration::from_secs(5));
        // tempdir may itself sit inside a repo on some machines
        if Repository::discover(dir.path()).is_err() {
            assert!(matches!(
                tracker.status().await,
                Err(VcsError::NotARepository(_))
            ));
        }
    }

    #[tokio::test]
    async fn commit_cycle_on_unborn_branch() {
        let (tracker, dir) = setup_repo();
        assert!(tracker.status().await.unwrap().is_clean());

        fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        let status = tracker.status().await.unwrap();
        assert_eq!(status.entries[0].kind, ChangeKind::Untracked);
        assert!(status.summary().contains("?? main.rs"));

        let diff = tracker.diff().await.unwrap();
        assert!(diff.contains("+fn main() {}"));

        tracker.add_all().await.unwrap();
        let sha = tracker.commit("Add entry point").await.unwrap();
        assert_eq!(sha.len(), 40);
        assert!(tracker.status().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn commit_without_changes_is_nothing_to_commit() {
        let (tracker, dir) = setup_repo();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        tracker.add_all().await.unwrap();
        tracker.commit("first").await.unwrap();

        tracker.add_all().await.unwrap();
        assert!(matches!(
            tracker.commit("again").await,
            Err(VcsError::NothingToCommit)
        ));
    }

    #[tokio::test]
    async fn add_all_stages_deletions() {
        let (tracker, dir) = setup_repo();
        fs::write(dir.path().join("gone.txt"), "x\n").unwrap();
        tracker.add_all().await.unwrap();
        tracker.commit("add").await.unwrap();

        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        let status = tracker.status().await.unwrap();
        assert_eq!(status.entries[0].kind, ChangeKind::Deleted);
        tracker.add_all().await.unwrap();
        tracker.commit("remove").await.unwrap();
        assert!(tracker.status().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn push_without_remote_fails_softly() {
        let (tracker, dir) = setup_repo();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        tracker.add_all().await.unwrap();
        tracker.commit("first").await.unwrap();
        assert!(tracker.push("nowhere").await.is_err());
    }
}
