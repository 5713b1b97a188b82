//! Version control: the git trait, its `git2` implementation and the commit
//! coordinator that wraps one model-authored message in deterministic git calls.

pub mod commit;
pub mod git;

pub use commit::{CommitCoordinator, CommitReport};
pub use git::{ChangeKind, GitTracker, RepoStatus, StatusEntry, VersionControl};
