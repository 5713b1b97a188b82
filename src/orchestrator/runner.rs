//! The workflow orchestrator.
//!
//! [`Orchestrator`] owns the [`RunContext`] and the state machine and drives
//! one stage at a time. Operators talk to a running orchestrator through an
//! [`OrchestratorHandle`]: continue a paused stage, pause, cancel, patch the
//! context, or queue a message. Patches and messages are only picked up at
//! boundaries between stages.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::artifacts::{ArtifactStore, REVIEW_DIR, TaskCounts};
use crate::context::{ContextPatch, PendingMessage, RunContext};
use crate::errors::{DispatchError, FailureClass, OrchestratorError, StageFailure};
use crate::gates::{BudgetDecision, DebugGate, GateState, Operator, QuestionDecision, RecoveryDecision};
use crate::phase::{Phase, SubPhase};
use crate::prompts;
use crate::review::{PassResult, ReviewEngine, ReviewEnv};
use crate::session::SessionPersister;
use crate::stage::{RetryPolicy, StageId, StageInvoker, StageTimeouts};
use crate::tracker::{CommitCoordinator, VersionControl};

use super::dispatch::{StageDispatcher, StageOutcome};
use super::events::{EventBus, RunEvent};
use super::recovery::RecoveryTracker;
use super::state::StateMachine;

/// External collaborators of a run.
pub struct OrchestratorDeps {
    pub invoker: Arc<dyn StageInvoker>,
    pub vcs: Arc<dyn VersionControl>,
    pub operator: Arc<dyn Operator>,
    pub timeouts: StageTimeouts,
    pub retry: RetryPolicy,
}

enum Control {
    Patch(ContextPatch),
    Message(String),
}

/// Cloneable remote control for a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    gate: DebugGate,
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
    controls: mpsc::UnboundedSender<Control>,
}

impl OrchestratorHandle {
    /// Release a stage held at a breakpoint. `false` if nothing was paused.
    pub fn continue_stage(&self) -> bool {
        self.gate.continue_stage()
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn watch_gate(&self) -> watch::Receiver<GateState> {
        self.gate.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop at the next boundary and save a snapshot.
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn reconfigure(&self, patch: ContextPatch) -> bool {
        self.controls.send(Control::Patch(patch)).is_ok()
    }

    pub fn submit_message(&self, content: impl Into<String>) -> bool {
        self.controls.send(Control::Message(content.into())).is_ok()
    }
}

/// How a call to [`Orchestrator::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub final_phase: Phase,
    /// Stopped at a boundary on request; the snapshot holds the position.
    pub paused: bool,
    pub iterations: u32,
    pub counts: TaskCounts,
    pub last_error: Option<String>,
}

/// What a phase handler did.
enum Step {
    /// A stage ran; [`Orchestrator::advance`] classifies the outcome.
    Ran(StageOutcome),
    /// The phase's work is done without a stage result to judge.
    Done,
    /// The handler already moved the machine.
    Moved(Phase),
}

pub struct Orchestrator {
    machine: StateMachine,
    context: RunContext,
    store: ArtifactStore,
    dispatcher: StageDispatcher,
    vcs: Arc<dyn VersionControl>,
    operator: Arc<dyn Operator>,
    persister: SessionPersister,
    recovery: RecoveryTracker,
    events: EventBus,
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
    controls_tx: mpsc::UnboundedSender<Control>,
    controls_rx: mpsc::UnboundedReceiver<Control>,
    review: Option<ReviewEngine>,
    /// Iteration the current step started in; keys the recovery tracker.
    step_iteration: u32,
    /// Last non-terminal position, saved when the run stops in Error or Cancelled.
    resume_point: (Phase, Option<SubPhase>),
}

impl Orchestrator {
    /// A fresh run starting in `Idle`.
    pub fn new(store: ArtifactStore, context: RunContext, deps: OrchestratorDeps) -> Self {
        Self::build(store, context, Phase::Idle, None, deps)
    }

    /// Continue from the saved snapshot, or start fresh with `fresh` if there
    /// is none or it cannot be trusted. The second value says why a snapshot
    /// was discarded.
    pub fn resume(
        store: ArtifactStore,
        fresh: RunContext,
        deps: OrchestratorDeps,
    ) -> (Self, Option<String>) {
        let restored = SessionPersister::new(store.clone()).restore(fresh);
        let mut context = restored.context;
        if restored.discarded.is_none() && restored.phase != Phase::Idle {
            tracing::info!(phase = %restored.phase, iteration = context.current_iteration, "resuming session");
        }
        context.last_error = None;
        let orchestrator = Self::build(store, context, restored.phase, restored.sub_phase, deps);
        (orchestrator, restored.discarded)
    }

    fn build(
        store: ArtifactStore,
        context: RunContext,
        phase: Phase,
        sub_phase: Option<SubPhase>,
        deps: OrchestratorDeps,
    ) -> Self {
        let events = EventBus::default();
        let mut machine = StateMachine::restored(phase, sub_phase, events.clone());
        machine.set_questions_answered(context.questions.answered);
        let dispatcher = StageDispatcher::new(
            deps.invoker,
            DebugGate::new(),
            deps.retry,
            deps.timeouts,
            events.clone(),
        );
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();
        let step_iteration = context.current_iteration;
        Self {
            machine,
            persister: SessionPersister::new(store.clone()),
            context,
            store,
            dispatcher,
            vcs: deps.vcs,
            operator: deps.operator,
            recovery: RecoveryTracker::new(),
            events,
            cancel: CancellationToken::new(),
            pause: Arc::new(AtomicBool::new(false)),
            controls_tx,
            controls_rx,
            review: None,
            step_iteration,
            resume_point: (phase, sub_phase),
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            gate: self.dispatcher.gate().clone(),
            cancel: self.cancel.clone(),
            pause: Arc::clone(&self.pause),
            controls: self.controls_tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn sub_phase(&self) -> Option<SubPhase> {
        self.machine.sub_phase()
    }

    pub fn display_name(&self) -> String {
        self.machine.display_name()
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &StageDispatcher {
        &self.dispatcher
    }

    /// Dispatch one stage against the context as it is now.
    pub async fn run_stage(&self, stage: StageId, prompt: String) -> Result<StageOutcome, DispatchError> {
        self.dispatcher
            .run_for(&self.context, stage, prompt, &self.cancel)
            .await
    }

    /// Drive the run until it reaches a terminal phase or is paused.
    pub async fn run(&mut self) -> Result<RunReport, OrchestratorError> {
        self.store.ensure_layout(&self.context.review.categories)?;

        loop {
            self.apply_controls();
            let phase = self.machine.phase();
            if phase.is_terminal() {
                break;
            }
            if self.cancel.is_cancelled() {
                self.enter(Phase::Cancelled)?;
                continue;
            }
            if self.pause.swap(false, Ordering::SeqCst) {
                self.persister
                    .save(phase, self.machine.sub_phase(), &self.context)?;
                self.events.notice(format!(
                    "Paused during {}; run again to resume",
                    phase.display_name()
                ));
                return Ok(self.report(true));
            }

            self.resume_point = (phase, self.machine.sub_phase());
            match self.step().await {
                Ok(_) => {}
                Err(e @ OrchestratorError::InvalidTransition(_)) => return Err(e),
                Err(e) => {
                    tracing::error!(%phase, error = %e, "phase failed");
                    self.context.last_error = Some(e.to_string());
                    if !self.machine.can_transition(Phase::Error) {
                        if phase != Phase::Idle {
                            self.persister.save(phase, self.machine.sub_phase(), &self.context)?;
                        }
                        return Err(e);
                    }
                    self.enter(Phase::Error)?;
                }
            }
        }

        self.finish()?;
        Ok(self.report(false))
    }

    fn finish(&mut self) -> Result<(), OrchestratorError> {
        match self.machine.phase() {
            Phase::Completed => {
                self.persister.delete()?;
                tracing::info!(iterations = self.context.current_iteration, "run completed");
            }
            Phase::Error | Phase::Cancelled => {
                let (phase, sub_phase) = self.resume_point;
                if !phase.is_terminal() {
                    self.persister.save(phase, sub_phase, &self.context)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn report(&self, paused: bool) -> RunReport {
        RunReport {
            final_phase: self.machine.phase(),
            paused,
            iterations: self.context.current_iteration,
            counts: self.store.task_counts().unwrap_or_default(),
            last_error: self.context.last_error.clone(),
        }
    }

    /// Run the current phase's work once and move to the resulting phase.
    pub async fn step(&mut self) -> Result<Phase, OrchestratorError> {
        self.step_iteration = self.context.current_iteration;
        let step = match self.machine.phase() {
            Phase::Idle => self.start()?,
            Phase::QuestionGeneration => Step::Ran(self.generate_questions().await?),
            Phase::AwaitingAnswers => self.await_answers().await?,
            Phase::DescriptionMolding => self.mold_description().await?,
            Phase::TaskPlanning => Step::Ran(self.plan_tasks().await?),
            Phase::MainExecution => self.execute_iteration().await?,
            Phase::Review => self.review().await?,
            Phase::GitOperations => self.commit_cycle().await?,
            terminal => return Ok(terminal),
        };
        match step {
            Step::Ran(outcome) => self.advance(&outcome).await,
            Step::Done => {
                let next = self.successor()?;
                self.enter(next)
            }
            Step::Moved(phase) => Ok(phase),
        }
    }

    /// Apply the transition a stage outcome implies.
    ///
    /// Success takes the phase's successor. A transient failure stays put,
    /// malformed output goes to the operator, and environment problems or
    /// exhausted retries end the run in `Error`.
    pub async fn advance(&mut self, outcome: &StageOutcome) -> Result<Phase, OrchestratorError> {
        let phase = self.machine.phase();
        if outcome.success {
            self.recovery.clear(phase, self.step_iteration);
            let next = self.successor()?;
            return self.enter(next);
        }

        let failure = outcome.error.clone().unwrap_or_else(|| {
            StageFailure::malformed(outcome.stage, "stage reported failure without a cause")
        });
        tracing::warn!(%phase, stage = %outcome.stage, error = %failure, "stage failed");
        match failure.class() {
            FailureClass::Transient => Ok(phase),
            FailureClass::Cancelled => self.enter(Phase::Cancelled),
            FailureClass::Environment | FailureClass::Exhausted => self.fail(failure),
            FailureClass::MalformedOutput => self.recover(failure).await,
        }
    }

    fn fail(&mut self, failure: StageFailure) -> Result<Phase, OrchestratorError> {
        let phase = self.machine.phase();
        self.context.last_error = Some(failure.to_string());
        if !self.machine.can_transition(Phase::Error) {
            return Err(OrchestratorError::Stage { phase, failure });
        }
        self.enter(Phase::Error)
    }

    async fn recover(&mut self, failure: StageFailure) -> Result<Phase, OrchestratorError> {
        let phase = self.machine.phase();
        let iteration = self.step_iteration;
        let auto_fix = self.recovery.can_attempt(phase, iteration);

        let operator = Arc::clone(&self.operator);
        let decision = tokio::select! {
            decision = operator.malformed_output(phase, &failure, auto_fix) => Some(decision),
            _ = self.cancel.cancelled() => None,
        };
        let Some(decision) = decision else {
            return self.enter(Phase::Cancelled);
        };
        tracing::info!(%phase, ?decision, "recovery decision");

        match decision {
            RecoveryDecision::Retry => Ok(phase),
            RecoveryDecision::Skip => {
                let next = self.successor()?;
                self.enter(next)
            }
            RecoveryDecision::AutoFix if auto_fix => {
                let attempt = self.recovery.record(phase, iteration);
                self.machine.set_sub_phase(Some(SubPhase::RecoveringError));
                let prompt = prompts::error_fix(
                    phase.display_name(),
                    &failure.to_string(),
                    &self.expected_artifact(phase),
                );
                let outcome = self.run_stage(StageId::ErrorFix, prompt).await?;
                match outcome.failure_class() {
                    None => {
                        tracing::info!(%phase, attempt, "error fixer finished; retrying phase");
                        Ok(phase)
                    }
                    Some(FailureClass::Cancelled) => self.enter(Phase::Cancelled),
                    Some(_) => {
                        self.events.notice(format!(
                            "Error fixer failed (attempt {}): {}",
                            attempt,
                            outcome.error.map(|e| e.to_string()).unwrap_or_default()
                        ));
                        Ok(phase)
                    }
                }
            }
            RecoveryDecision::AutoFix | RecoveryDecision::Abort => self.fail(failure),
        }
    }

    fn enter(&mut self, to: Phase) -> Result<Phase, OrchestratorError> {
        let from = self.machine.phase();
        let phase = self.machine.transition(to)?;
        if from == Phase::Review {
            self.review = None;
        }
        Ok(phase)
    }

    /// Next phase after this phase's work succeeded, read from the
    /// artifacts and the context as they are now.
    fn successor(&self) -> Result<Phase, OrchestratorError> {
        let ctx = &self.context;
        let next = match self.machine.phase() {
            Phase::Idle => {
                if !self.store.read_tasks()?.is_empty() {
                    Phase::MainExecution
                } else if ctx.questions.batches_completed < ctx.questions.max_batches {
                    Phase::QuestionGeneration
                } else {
                    Phase::TaskPlanning
                }
            }
            Phase::QuestionGeneration => {
                let has_questions = self
                    .store
                    .read_questions()
                    .ok()
                    .flatten()
                    .is_some_and(|set| !set.is_empty());
                if has_questions {
                    Phase::AwaitingAnswers
                } else {
                    Phase::TaskPlanning
                }
            }
            Phase::AwaitingAnswers => Phase::DescriptionMolding,
            Phase::DescriptionMolding => {
                if ctx.questions.batches_completed < ctx.questions.max_batches {
                    Phase::QuestionGeneration
                } else {
                    Phase::TaskPlanning
                }
            }
            Phase::TaskPlanning => Phase::MainExecution,
            Phase::MainExecution => {
                if ctx.review.is_enabled() {
                    Phase::Review
                } else if ctx.git.mode.commits() {
                    Phase::GitOperations
                } else {
                    self.next_cycle()?
                }
            }
            Phase::Review => {
                if ctx.git.mode.commits() {
                    Phase::GitOperations
                } else {
                    self.next_cycle()?
                }
            }
            Phase::GitOperations => self.next_cycle()?,
            Phase::Completed | Phase::Error | Phase::Cancelled => Phase::Idle,
        };
        Ok(next)
    }

    fn next_cycle(&self) -> Result<Phase, OrchestratorError> {
        if !self.context.finalizing && self.store.read_tasks()?.has_incomplete() {
            Ok(Phase::MainExecution)
        } else {
            Ok(Phase::Completed)
        }
    }

    fn expected_artifact(&self, phase: Phase) -> String {
        let path = match phase {
            Phase::QuestionGeneration | Phase::AwaitingAnswers => self.store.questions_path(),
            Phase::DescriptionMolding => self.store.description_path(),
            Phase::TaskPlanning | Phase::MainExecution => self.store.tasks_path(),
            Phase::Review => self.store.root().join(REVIEW_DIR),
            Phase::GitOperations => self.store.commit_message_path(),
            _ => self.store.root().to_path_buf(),
        };
        self.display_path(&path)
    }

    fn display_path(&self, path: &Path) -> String {
        self.store.relative(path).display().to_string()
    }

    fn apply_controls(&mut self) {
        while let Ok(control) = self.controls_rx.try_recv() {
            match control {
                Control::Patch(patch) => self.context.apply(patch),
                Control::Message(content) => {
                    let message = PendingMessage::new(content);
                    tracing::info!(id = %message.id, "queued operator message");
                    self.context.pending_messages.push_back(message);
                }
            }
        }
    }

    fn emit_progress(&self, counts: TaskCounts) {
        self.events.emit(RunEvent::TaskProgress {
            iteration: self.context.current_iteration,
            max_iterations: self.context.max_main_iterations,
            counts,
        });
    }

    fn start(&mut self) -> Result<Step, OrchestratorError> {
        let has_tasks = !self.store.read_tasks()?.is_empty();
        let has_description = !self.store.read_description()?.trim().is_empty();
        if !has_tasks && !has_description {
            return Err(anyhow!(
                "Nothing to do: write {} or {} first",
                self.display_path(&self.store.description_path()),
                self.display_path(&self.store.tasks_path())
            )
            .into());
        }
        Ok(Step::Done)
    }

    async fn generate_questions(&mut self) -> Result<StageOutcome, OrchestratorError> {
        self.machine.set_sub_phase(Some(SubPhase::GeneratingQuestions));
        self.store.reset_questions()?;

        let description = self.store.read_description()?;
        let file = self.display_path(&self.store.questions_path());
        let prompt = prompts::question_generation(
            &description,
            &self.context.questions.qa_pairs,
            self.context.questions.max_questions,
            &file,
        );
        let outcome = self.run_stage(StageId::QuestionGeneration, prompt).await?;
        if !outcome.success {
            return Ok(outcome);
        }

        match self.store.read_questions() {
            Ok(Some(set)) => {
                tracing::info!(questions = set.questions.len(), "questions generated");
                Ok(outcome)
            }
            Ok(None) => Ok(outcome.into_malformed(format!("{} was left empty", file))),
            Err(e) => Ok(outcome.into_malformed(e.to_string())),
        }
    }

    async fn await_answers(&mut self) -> Result<Step, OrchestratorError> {
        let max = self.context.questions.max_questions as usize;
        let questions = match self.store.read_questions() {
            Ok(Some(set)) => set.truncated(max).questions,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable questions file");
                Vec::new()
            }
        };
        if questions.is_empty() {
            tracing::warn!("no questions to answer; moving on");
            return Ok(Step::Done);
        }

        self.machine.set_sub_phase(Some(SubPhase::AwaitingAnswers));
        let operator = Arc::clone(&self.operator);
        let decision = tokio::select! {
            decision = operator.answer_questions(&questions) => Some(decision),
            _ = self.cancel.cancelled() => None,
        };
        let Some(decision) = decision else {
            return Ok(Step::Moved(self.enter(Phase::Cancelled)?));
        };

        match decision {
            QuestionDecision::Answers(pairs) => {
                tracing::info!(answers = pairs.len(), "answers captured");
                self.context.questions.qa_pairs.extend(pairs);
                self.context.questions.answered = true;
                self.machine.set_questions_answered(true);
                Ok(Step::Done)
            }
            QuestionDecision::Skip => {
                self.context.questions.batches_completed = self.context.questions.max_batches;
                Ok(Step::Done)
            }
            QuestionDecision::NewBatch => {
                self.enter(Phase::AwaitingAnswers)?;
                let outcome = self.generate_questions().await?;
                if outcome.success {
                    Ok(Step::Moved(Phase::AwaitingAnswers))
                } else {
                    Ok(Step::Ran(outcome))
                }
            }
        }
    }

    async fn mold_description(&mut self) -> Result<Step, OrchestratorError> {
        if !self.context.questions.answered {
            tracing::info!("no new answers; description left as is");
            return Ok(Step::Done);
        }

        self.machine.set_sub_phase(Some(SubPhase::MoldingDescription));
        let description = self.store.read_description()?;
        let file = self.display_path(&self.store.description_path());
        let prompt =
            prompts::description_molding(&description, &self.context.questions.qa_pairs, &file);
        let outcome = self.run_stage(StageId::DescriptionMolding, prompt).await?;
        if !outcome.success {
            return Ok(Step::Ran(outcome));
        }
        if self.store.read_description()?.trim().is_empty() {
            return Ok(Step::Ran(
                outcome.into_malformed(format!("{} is empty after molding", file)),
            ));
        }

        self.context.questions.answered = false;
        self.context.questions.batches_completed += 1;
        self.machine.set_questions_answered(false);
        Ok(Step::Ran(outcome))
    }

    async fn plan_tasks(&mut self) -> Result<StageOutcome, OrchestratorError> {
        self.machine.set_sub_phase(Some(SubPhase::PlanningTasks));
        let description = self.store.read_description()?;
        let file = self.display_path(&self.store.tasks_path());
        let prompt =
            prompts::task_planning(&description, &self.context.questions.qa_pairs, &file);
        let outcome = self.run_stage(StageId::TaskPlanning, prompt).await?;
        if !outcome.success {
            return Ok(outcome);
        }

        let counts = self.store.task_counts()?;
        if counts.total == 0 {
            return Ok(outcome.into_malformed(format!("{} has no checklist items", file)));
        }
        tracing::info!(tasks = counts.total, "task list planned");
        self.emit_progress(counts);
        Ok(outcome)
    }

    /// Hand queued operator messages to the message stage, oldest first.
    ///
    /// A message leaves the queue only once its stage succeeded.
    async fn drain_messages(&mut self) -> Result<Option<StageOutcome>, OrchestratorError> {
        while let Some(message) = self.context.pending_messages.front().cloned() {
            self.machine.set_sub_phase(Some(SubPhase::HandlingMessages));
            let description = self.store.read_description()?;
            let tasks_raw = self.store.read_tasks_raw()?;
            let prompt = prompts::client_message(&message.content, &description, &tasks_raw);
            let outcome = self.run_stage(StageId::ClientMessage, prompt).await?;
            if !outcome.success {
                return Ok(Some(outcome));
            }
            self.context.pending_messages.pop_front();
            tracing::info!(id = %message.id, "operator message handled");
        }
        Ok(None)
    }

    async fn execute_iteration(&mut self) -> Result<Step, OrchestratorError> {
        if let Some(failed) = self.drain_messages().await? {
            return Ok(Step::Ran(failed));
        }

        self.machine.set_sub_phase(Some(SubPhase::ReadingTasks));
        let tasks = self.store.read_tasks()?;
        let before = tasks.counts();
        self.emit_progress(before);
        if !tasks.has_incomplete() {
            tracing::info!(%before, "no incomplete tasks");
            return Ok(Step::Moved(self.enter(Phase::Completed)?));
        }

        if !self.context.iteration_budget_left() {
            if self.context.finalizing {
                return Ok(Step::Moved(self.enter(Phase::Completed)?));
            }
            let operator = Arc::clone(&self.operator);
            let used = self.context.current_iteration;
            let decision = tokio::select! {
                decision = operator.budget_exhausted(before, used) => Some(decision),
                _ = self.cancel.cancelled() => None,
            };
            match decision {
                None => return Ok(Step::Moved(self.enter(Phase::Cancelled)?)),
                Some(BudgetDecision::Continue(more)) => {
                    self.context.max_main_iterations += more.max(1);
                    self.events.notice(format!(
                        "Iteration budget extended to {}",
                        self.context.max_main_iterations
                    ));
                }
                Some(BudgetDecision::Finalize) => {
                    self.context.finalizing = true;
                    self.events.notice(format!(
                        "Finalizing with {} task(s) left",
                        before.remaining()
                    ));
                    return Ok(Step::Moved(self.enter(Phase::Completed)?));
                }
            }
        }

        self.machine.set_sub_phase(Some(SubPhase::ExecutingTasks));
        let raw = self.store.read_tasks_raw()?;
        let recent = self.store.read_change_log()?;
        let prompt = prompts::execution(
            &self.context.working_dir.display().to_string(),
            &tasks,
            &raw,
            &recent,
            self.context.tasks_per_iteration,
        );
        let outcome = self.run_stage(StageId::Execution, prompt).await?;
        if !outcome.success {
            return Ok(Step::Ran(outcome));
        }

        // Progress comes from the file, never from the stage's output
        let after = self.store.task_counts()?;
        if after.completed < before.completed {
            tracing::warn!(%before, %after, "completed tasks went down");
        } else if after.completed == before.completed {
            tracing::warn!(%after, "execution finished without checking off a task");
        }
        self.context.current_iteration += 1;
        tracing::info!(
            iteration = self.context.current_iteration,
            max = self.context.max_main_iterations,
            %after,
            "iteration finished"
        );
        self.emit_progress(after);
        Ok(Step::Ran(outcome))
    }

    async fn review(&mut self) -> Result<Step, OrchestratorError> {
        let mut engine = self.review.take().unwrap_or_default();

        while engine.may_continue(&self.context) {
            let env = ReviewEnv {
                dispatcher: &self.dispatcher,
                store: &self.store,
                vcs: self.vcs.as_ref(),
                events: &self.events,
                cancel: &self.cancel,
            };
            let result = match engine.run_pass(&self.context, &env, &mut self.machine).await {
                Ok(result) => result,
                Err(e) => {
                    self.review = Some(engine);
                    return Err(e);
                }
            };
            match result {
                PassResult::Clean => break,
                PassResult::FindingsRemain => {
                    // Limit and reviewer selection may change between passes
                    self.apply_controls();
                    if self.cancel.is_cancelled() {
                        return Ok(Step::Moved(self.enter(Phase::Cancelled)?));
                    }
                }
                PassResult::Failed(outcome) => {
                    self.review = Some(engine);
                    return Ok(Step::Ran(outcome));
                }
            }
        }

        tracing::info!(
            passes = engine.passes(),
            fixes = engine.fixes_applied(),
            "review finished"
        );
        Ok(Step::Done)
    }

    async fn commit_cycle(&mut self) -> Result<Step, OrchestratorError> {
        if !self.context.git.mode.commits() {
            return Ok(Step::Done);
        }
        let coordinator = CommitCoordinator::new(
            self.vcs.as_ref(),
            &self.store,
            &self.dispatcher,
            &self.events,
            &self.cancel,
        );
        let report = coordinator.run(&self.context, &mut self.machine).await?;
        match report.failure {
            Some(failure) => Ok(Step::Ran(failure)),
            None => Ok(Step::Done),
        }
    }
}
