//! End-to-end workflow runs against scripted stages.
//!
//! Stages are played by a [`ScriptedInvoker`] that edits artifacts the way a
//! real model would, and git is played by [`FakeVcs`]. Nothing here spawns a
//! process.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use harness::artifacts::ArtifactStore;
use harness::context::{Breakpoint, GitMode, RunContext};
use harness::errors::{DispatchError, StageFailure, VcsError};
use harness::gates::{AutoOperator, GateState};
use harness::orchestrator::{Orchestrator, OrchestratorDeps};
use harness::phase::Phase;
use harness::review::ReviewCategory;
use harness::stage::{
    RetryPolicy, StageId, StageInvoker, StageRequest, StageResponse, StageTimeouts,
};
use harness::tracker::{ChangeKind, RepoStatus, StatusEntry, VersionControl};

type Script = dyn Fn(&Path, &StageRequest) -> Result<StageResponse, StageFailure> + Send + Sync;

/// Records every call and runs a script against the working directory.
struct ScriptedInvoker {
    root: std::path::PathBuf,
    calls: Mutex<Vec<StageId>>,
    delay: Duration,
    script: Box<Script>,
}

impl ScriptedInvoker {
    fn new<F>(root: &Path, script: F) -> Arc<Self>
    where
        F: Fn(&Path, &StageRequest) -> Result<StageResponse, StageFailure> + Send + Sync + 'static,
    {
        Arc::new(Self {
            root: root.to_path_buf(),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            script: Box::new(script),
        })
    }

    fn slow(root: &Path, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            calls: Mutex::new(Vec::new()),
            delay,
            script: Box::new(|_, _| Ok(StageResponse::default())),
        })
    }

    fn calls(&self) -> Vec<StageId> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, stage: StageId) -> usize {
        self.calls().iter().filter(|s| **s == stage).count()
    }
}

#[async_trait]
impl StageInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        request: &StageRequest,
        cancel: &CancellationToken,
    ) -> Result<StageResponse, StageFailure> {
        self.calls.lock().unwrap().push(request.stage);
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Err(StageFailure::Cancelled),
            }
        }
        (self.script)(&self.root, request)
    }
}

/// Version control that is dirty whenever `touch` was called since the last commit.
#[derive(Default)]
struct FakeVcs {
    dirty: AtomicBool,
    commits: Mutex<Vec<String>>,
}

impl FakeVcs {
    fn touch(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn init_if_needed(&self) -> Result<bool, VcsError> {
        Ok(false)
    }

    async fn status(&self) -> Result<RepoStatus, VcsError> {
        let entries = if self.dirty.load(Ordering::SeqCst) {
            vec![StatusEntry {
                path: "tasks.md".to_string(),
                kind: ChangeKind::Modified,
            }]
        } else {
            Vec::new()
        };
        Ok(RepoStatus { entries })
    }

    async fn diff(&self) -> Result<String, VcsError> {
        Ok("--- a/tasks.md\n+++ b/tasks.md\n".to_string())
    }

    async fn add_all(&self) -> Result<(), VcsError> {
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String, VcsError> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Err(VcsError::NothingToCommit);
        }
        let mut commits = self.commits.lock().unwrap();
        commits.push(message.to_string());
        Ok(format!("{:07x}", commits.len()))
    }

    async fn push(&self, _remote: &str) -> Result<(), VcsError> {
        Ok(())
    }
}

fn project(tasks: &str) -> (TempDir, ArtifactStore) {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    store.ensure_layout(&[ReviewCategory::General]).unwrap();
    fs::write(store.tasks_path(), tasks).unwrap();
    (dir, store)
}

fn quiet_context(root: &Path) -> RunContext {
    let mut ctx = RunContext::new(root);
    ctx.git.mode = GitMode::Off;
    ctx.review.max_iterations = 0;
    ctx.questions.max_batches = 0;
    ctx
}

fn deps(invoker: Arc<dyn StageInvoker>, vcs: Arc<dyn VersionControl>) -> OrchestratorDeps {
    OrchestratorDeps {
        invoker,
        vcs,
        operator: Arc::new(AutoOperator),
        timeouts: StageTimeouts::default(),
        retry: RetryPolicy {
            max_retries: 0,
            delay: Duration::from_millis(1),
        },
    }
}

/// Check off the first open task, as an execution stage would.
fn check_off_one(root: &Path) {
    let path = root.join("tasks.md");
    let content = fs::read_to_string(&path).unwrap();
    fs::write(&path, content.replacen("- [ ]", "- [x]", 1)).unwrap();
}

const THREE_TASKS: &str = "# Tasks\n\n- [ ] Create model\n- [ ] Add API\n- [ ] Write docs\n";

#[tokio::test]
async fn three_tasks_complete_in_three_iterations() {
    let (dir, store) = project(THREE_TASKS);
    let invoker = ScriptedInvoker::new(dir.path(), |root, request| {
        if request.stage == StageId::Execution {
            check_off_one(root);
        }
        Ok(StageResponse::default())
    });

    let mut ctx = quiet_context(dir.path());
    ctx.tasks_per_iteration = 1;
    ctx.max_main_iterations = 5;
    let mut orch = Orchestrator::new(
        store.clone(),
        ctx,
        deps(invoker.clone(), Arc::new(FakeVcs::default())),
    );

    let report = orch.run().await.unwrap();
    assert_eq!(report.final_phase, Phase::Completed);
    assert_eq!(report.iterations, 3);
    assert_eq!(invoker.count(StageId::Execution), 3);
    assert_eq!(invoker.calls().len(), 3);
    assert!(report.counts.all_done());
    assert!(!store.session_path().exists());
}

#[tokio::test]
async fn task_counts_come_from_the_file_not_the_output() {
    let (dir, store) = project(THREE_TASKS);
    // Claims success in its output but only ever checks off the first task
    let invoker = ScriptedInvoker::new(dir.path(), |root, request| {
        if request.stage == StageId::Execution {
            let path = root.join("tasks.md");
            let content = fs::read_to_string(&path).unwrap();
            fs::write(&path, content.replace("- [ ] Create model", "- [x] Create model")).unwrap();
        }
        Ok(StageResponse {
            output: "All tasks done!".to_string(),
            ..StageResponse::default()
        })
    });

    let mut ctx = quiet_context(dir.path());
    ctx.max_main_iterations = 2;
    let mut orch = Orchestrator::new(store, ctx, deps(invoker.clone(), Arc::new(FakeVcs::default())));

    let report = orch.run().await.unwrap();
    // AutoOperator finalizes once the budget is spent
    assert_eq!(report.final_phase, Phase::Completed);
    assert_eq!(invoker.count(StageId::Execution), 2);
    assert_eq!(report.counts.completed, 1);
    assert_eq!(report.counts.total, 3);
}

#[tokio::test]
async fn fixer_runs_only_for_categories_with_findings() {
    let (dir, store) = project("# Tasks\n\n- [ ] Only task\n");
    store
        .ensure_layout(&[ReviewCategory::General, ReviewCategory::Safety])
        .unwrap();

    let general = ReviewCategory::General.findings_file();
    let invoker = ScriptedInvoker::new(dir.path(), move |root, request| {
        match request.stage {
            StageId::Execution => check_off_one(root),
            StageId::Reviewer if request.prompt.contains(&general) => {
                fs::write(root.join(&general), "- unused import in main.rs\n").unwrap();
            }
            _ => {}
        }
        Ok(StageResponse::default())
    });

    let mut ctx = quiet_context(dir.path());
    ctx.review.categories = vec![ReviewCategory::Safety, ReviewCategory::General];
    // Room for more passes; the fix alone must end the review
    ctx.review.max_iterations = 3;
    let mut orch = Orchestrator::new(
        store.clone(),
        ctx,
        deps(invoker.clone(), Arc::new(FakeVcs::default())),
    );

    let report = orch.run().await.unwrap();
    assert_eq!(report.final_phase, Phase::Completed);
    assert_eq!(invoker.count(StageId::Reviewer), 2);
    assert_eq!(invoker.count(StageId::Fixer), 1);
    assert_eq!(
        invoker.calls(),
        vec![
            StageId::Execution,
            StageId::Reviewer,
            StageId::Fixer,
            StageId::Reviewer
        ]
    );
    assert!(store.read_findings(ReviewCategory::General).unwrap().is_empty());
}

#[tokio::test]
async fn breakpoint_holds_execution_until_continued() {
    let (dir, store) = project("# Tasks\n\n- [ ] Only task\n");
    let invoker = ScriptedInvoker::new(dir.path(), |root, request| {
        if request.stage == StageId::Execution {
            check_off_one(root);
        }
        Ok(StageResponse::default())
    });

    let mut ctx = quiet_context(dir.path());
    ctx.debug.enabled = true;
    ctx.debug.breakpoints.insert(
        StageId::Execution,
        Breakpoint {
            pause_before: true,
            pause_after: false,
        },
    );
    let mut orch = Orchestrator::new(store, ctx, deps(invoker.clone(), Arc::new(FakeVcs::default())));
    let handle = orch.handle();
    let observed = invoker.clone();

    let control = async move {
        let mut gate = handle.watch_gate();
        gate.wait_for(|s| *s == GateState::PendingBefore(StageId::Execution))
            .await
            .unwrap();
        // Held: nothing has been invoked yet
        assert!(observed.calls().is_empty());
        assert!(handle.continue_stage());
    };

    let (report, ()) = tokio::join!(orch.run(), control);
    let report = report.unwrap();
    assert_eq!(report.final_phase, Phase::Completed);
    assert_eq!(invoker.count(StageId::Execution), 1);
}

#[tokio::test]
async fn cancel_while_held_at_breakpoint_invokes_nothing() {
    let (dir, store) = project(THREE_TASKS);
    let invoker = ScriptedInvoker::new(dir.path(), |_, _| Ok(StageResponse::default()));

    let mut ctx = quiet_context(dir.path());
    ctx.debug.enabled = true;
    ctx.debug.breakpoints.insert(
        StageId::Execution,
        Breakpoint {
            pause_before: true,
            pause_after: false,
        },
    );
    let mut orch = Orchestrator::new(
        store.clone(),
        ctx,
        deps(invoker.clone(), Arc::new(FakeVcs::default())),
    );
    let handle = orch.handle();

    let control = async move {
        let mut gate = handle.watch_gate();
        gate.wait_for(|s| matches!(s, GateState::PendingBefore(_)))
            .await
            .unwrap();
        handle.cancel();
    };

    let (report, ()) = tokio::join!(orch.run(), control);
    let report = report.unwrap();
    assert_eq!(report.final_phase, Phase::Cancelled);
    assert!(invoker.calls().is_empty());
    // Cancelled runs keep a snapshot to resume from
    assert!(store.session_path().exists());
}

#[tokio::test]
async fn second_stage_is_rejected_while_one_is_in_flight() {
    let (dir, store) = project(THREE_TASKS);
    let invoker = ScriptedInvoker::slow(dir.path(), Duration::from_millis(200));
    let orch = Orchestrator::new(
        store,
        quiet_context(dir.path()),
        deps(invoker.clone(), Arc::new(FakeVcs::default())),
    );

    let first = orch.run_stage(StageId::Execution, "work".to_string());
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.run_stage(StageId::Reviewer, "review".to_string()).await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.unwrap().success);
    match second {
        Err(DispatchError::ConcurrentStage { active, requested }) => {
            assert_eq!(active, StageId::Execution);
            assert_eq!(requested, StageId::Reviewer);
        }
        other => panic!("expected a concurrent stage rejection, got {:?}", other.map(|o| o.success)),
    }
    assert_eq!(invoker.calls(), vec![StageId::Execution]);
}

#[tokio::test]
async fn commit_message_file_is_empty_around_every_commit() {
    let (dir, store) = project("# Tasks\n\n- [ ] First\n- [ ] Second\n");
    let vcs = Arc::new(FakeVcs::default());
    let seen_before_authoring = Arc::new(Mutex::new(Vec::new()));

    let invoker = {
        let vcs = vcs.clone();
        let seen = seen_before_authoring.clone();
        let message_path = store.commit_message_path();
        ScriptedInvoker::new(dir.path(), move |root, request| {
            match request.stage {
                StageId::Execution => {
                    check_off_one(root);
                    vcs.touch();
                }
                StageId::CommitMessage => {
                    seen.lock()
                        .unwrap()
                        .push(fs::read_to_string(&message_path).unwrap());
                    fs::write(&message_path, "feat: complete a task\n").unwrap();
                }
                _ => {}
            }
            Ok(StageResponse::default())
        })
    };

    let mut ctx = quiet_context(dir.path());
    ctx.git.mode = GitMode::Local;
    let mut orch = Orchestrator::new(store.clone(), ctx, deps(invoker.clone(), vcs.clone()));

    let report = orch.run().await.unwrap();
    assert_eq!(report.final_phase, Phase::Completed);
    assert_eq!(invoker.count(StageId::CommitMessage), 2);

    let commits = vcs.commits.lock().unwrap().clone();
    assert_eq!(commits.len(), 2);
    assert!(commits.iter().all(|m| m.starts_with("feat: complete a task")));

    let seen = seen_before_authoring.lock().unwrap().clone();
    assert_eq!(seen, vec![String::new(), String::new()]);
    assert!(store.read_commit_message().unwrap().is_empty());
}
