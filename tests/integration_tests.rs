//! CLI integration tests for harness
//!
//! These run the real binary against temporary project directories. None of
//! them reach a model provider.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use harness::artifacts::ArtifactStore;
use harness::context::RunContext;
use harness::phase::Phase;
use harness::session::SessionPersister;

/// Helper to create a harness Command
fn harness() -> Command {
    cargo_bin_cmd!("harness")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir) {
    harness()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        harness()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("status"));
    }

    #[test]
    fn test_version() {
        harness().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_layout() {
        let dir = create_temp_project();

        harness()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized harness"));

        let root = dir.path();
        assert!(root.join(".harness").is_dir());
        assert!(root.join(".harness/harness.toml").is_file());
        assert!(root.join(".harness/git-commit-message.txt").is_file());
        assert!(root.join("tasks.md").is_file());
        assert!(root.join("recent-changes.md").is_file());
        assert!(root.join("product-description.md").is_file());
        assert!(root.join("review/general.md").is_file());
    }

    #[test]
    fn test_init_twice_keeps_existing_files() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(dir.path().join("tasks.md"), "# Tasks\n\n- [ ] keep me\n").unwrap();

        harness()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));

        let tasks = fs::read_to_string(dir.path().join("tasks.md")).unwrap();
        assert!(tasks.contains("keep me"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        harness()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("init")
            .assert()
            .success();
        assert!(dir.path().join(".harness").is_dir());
    }

    #[test]
    fn test_unknown_git_mode_is_rejected() {
        let dir = create_temp_project();
        harness()
            .current_dir(dir.path())
            .args(["run", "--git", "sometimes"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Status
// =============================================================================

mod status {
    use super::*;

    #[test]
    fn test_status_not_initialized() {
        let dir = create_temp_project();
        harness()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not initialized"));
    }

    #[test]
    fn test_status_shows_task_counts() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join("tasks.md"),
            "# Tasks\n\n- [x] one\n- [ ] two\n- [ ] three\n",
        )
        .unwrap();

        harness()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized"))
            .stdout(predicate::str::contains("1/3"))
            .stdout(predicate::str::contains("[ ] two"))
            .stdout(predicate::str::contains("Saved session: none"));
    }

    #[test]
    fn test_status_reports_saved_session() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(dir.path().join("tasks.md"), "# Tasks\n\n- [ ] two\n").unwrap();

        let store = ArtifactStore::new(dir.path());
        let mut ctx = RunContext::new(dir.path());
        ctx.current_iteration = 2;
        SessionPersister::new(store)
            .save(Phase::MainExecution, None, &ctx)
            .unwrap();

        harness()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Saved session:"))
            .stdout(predicate::str::contains("Iteration: 2/"));
    }
}

// =============================================================================
// Config
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        harness()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("Stage providers:"))
            .stdout(predicate::str::contains("execution"));
    }

    #[test]
    fn test_config_show_applies_env_override() {
        let dir = create_temp_project();
        harness()
            .current_dir(dir.path())
            .args(["config", "show"])
            .env("HARNESS_MAX_ITERATIONS", "42")
            .assert()
            .success()
            .stdout(predicate::str::contains("max_iterations = 42"));
    }

    #[test]
    fn test_config_init_then_refuses_to_overwrite() {
        let dir = create_temp_project();
        harness()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created harness.toml"));
        assert!(dir.path().join(".harness/harness.toml").is_file());

        harness()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_unknown_provider() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".harness")).unwrap();
        fs::write(
            dir.path().join(".harness/harness.toml"),
            "[stages.execution]\nprovider = \"nonexistent\"\n",
        )
        .unwrap();

        harness()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("nonexistent"));
    }

    #[test]
    fn test_config_validate_rejects_broken_toml() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".harness")).unwrap();
        fs::write(dir.path().join(".harness/harness.toml"), "[defaults\n").unwrap();

        harness()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("harness.toml"));
    }
}

// =============================================================================
// Reset and run
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn test_reset_force_deletes_session() {
        let dir = create_temp_project();
        init_project(&dir);
        let store = ArtifactStore::new(dir.path());
        SessionPersister::new(store)
            .save(Phase::TaskPlanning, None, &RunContext::new(dir.path()))
            .unwrap();
        fs::write(dir.path().join(".harness/git-commit-message.txt"), "feat: x").unwrap();

        harness()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset complete"));

        assert!(!dir.path().join(".harness/session.json").exists());
        let message =
            fs::read_to_string(dir.path().join(".harness/git-commit-message.txt")).unwrap();
        assert!(message.is_empty());
    }

    #[test]
    fn test_reset_force_without_init_is_harmless() {
        let dir = create_temp_project();
        harness()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success();
        assert!(!dir.path().join(".harness").exists());
    }

    #[test]
    fn test_run_with_nothing_to_do_fails() {
        let dir = create_temp_project();
        harness()
            .current_dir(dir.path())
            .args(["--yes", "run", "--git", "off"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Nothing to do"));

        // run creates the layout even when it has nothing to do
        assert!(dir.path().join("tasks.md").is_file());
    }

    #[test]
    fn test_run_with_missing_provider_ends_in_error() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".harness")).unwrap();
        fs::write(
            dir.path().join(".harness/harness.toml"),
            "[providers]\nclaude = \"definitely-not-a-real-binary-xyz\"\n",
        )
        .unwrap();

        harness()
            .current_dir(dir.path())
            .args(["--yes", "run", "--git", "off", "-d", "A todo app"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("definitely-not-a-real-binary-xyz"));

        let description =
            fs::read_to_string(dir.path().join("product-description.md")).unwrap();
        assert_eq!(description.trim(), "A todo app");
    }
}
