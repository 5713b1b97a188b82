//! The review loop.
//!
//! One *pass* walks the enabled categories in declared order. For each
//! category the reviewer writes its findings file; an empty file means the
//! category is clean and its fixer is skipped. Otherwise the fixer runs and
//! the findings are truncated only once the fixer succeeded.
//!
//! A pass that leaves every findings file empty ends the phase. A pass that
//! fails part way resumes at the category it stopped on.
//!
//! The orchestrator drives passes one at a time so it can apply operator
//! changes (provider selection, iteration limit) between them.

use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::context::RunContext;
use crate::errors::OrchestratorError;
use crate::orchestrator::dispatch::{StageDispatcher, StageOutcome};
use crate::orchestrator::events::{EventBus, RunEvent};
use crate::orchestrator::state::StateMachine;
use crate::phase::SubPhase;
use crate::prompts;
use crate::stage::StageId;
use crate::tracker::VersionControl;

use super::ReviewCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStep {
    PrepPending,
    PrepRunning,
    CategoryPending(usize),
    CategoryRunning(usize),
    CategoryFixing(usize),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassResult {
    /// Every enabled findings file is empty at the end of the pass, either
    /// because the reviewer found nothing or because the fix went through.
    Clean,
    /// Some findings file is still non-empty; another pass may run.
    FindingsRemain,
    /// A stage failed; the orchestrator decides what happens next.
    Failed(StageOutcome),
}

/// Collaborators a pass needs, borrowed from the orchestrator.
pub struct ReviewEnv<'a> {
    pub dispatcher: &'a StageDispatcher,
    pub store: &'a ArtifactStore,
    pub vcs: &'a dyn VersionControl,
    pub events: &'a EventBus,
    pub cancel: &'a CancellationToken,
}

/// State of one `Review` phase entry.
#[derive(Debug, Clone)]
pub struct ReviewEngine {
    step: ReviewStep,
    passes: u32,
    fixes_applied: u32,
}

impl Default for ReviewEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewEngine {
    pub fn new() -> Self {
        Self {
            step: ReviewStep::PrepPending,
            passes: 0,
            fixes_applied: 0,
        }
    }

    pub fn step(&self) -> ReviewStep {
        self.step
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn fixes_applied(&self) -> u32 {
        self.fixes_applied
    }

    pub fn is_done(&self) -> bool {
        self.step == ReviewStep::Done
    }

    /// Whether another pass is allowed under the limit as configured now.
    pub fn may_continue(&self, ctx: &RunContext) -> bool {
        !self.is_done() && self.passes < ctx.review.max_iterations
    }

    pub async fn run_pass(
        &mut self,
        ctx: &RunContext,
        env: &ReviewEnv<'_>,
        machine: &mut StateMachine,
    ) -> Result<PassResult, OrchestratorError> {
        if self.step == ReviewStep::PrepPending {
            if ctx.review.unit_test_prep {
                self.step = ReviewStep::PrepRunning;
                machine.set_sub_phase(Some(SubPhase::UnitTestPrep));
                let diff = match env.vcs.diff().await {
                    Ok(diff) => diff,
                    Err(e) => {
                        tracing::warn!(error = %e, "no diff available for unit test prep");
                        String::new()
                    }
                };
                let outcome = env
                    .dispatcher
                    .run_for(ctx, StageId::UnitTestPrep, prompts::unit_test_prep(&diff), env.cancel)
                    .await?;
                if !outcome.success {
                    // Prep is retried on the next entry, not skipped
                    self.step = ReviewStep::PrepPending;
                    return Ok(PassResult::Failed(outcome));
                }
            }
            self.step = ReviewStep::CategoryPending(0);
        }

        let categories = ReviewCategory::in_declared_order(&ctx.review.categories);
        let recent = env.store.read_change_log()?;
        // Index into the categories as enabled now
        let start = match self.step {
            ReviewStep::CategoryPending(i) => i,
            _ => 0,
        };
        if start > 0 {
            tracing::info!(start, "resuming review pass");
        }

        for (i, &category) in categories.iter().enumerate().skip(start) {
            self.step = ReviewStep::CategoryRunning(i);
            machine.set_sub_phase(Some(SubPhase::Reviewing(category)));

            let findings_file = category.findings_file();
            let outcome = env
                .dispatcher
                .run_for(
                    ctx,
                    StageId::Reviewer,
                    prompts::reviewer(category, &findings_file, &recent),
                    env.cancel,
                )
                .await?;
            if !outcome.success {
                self.step = ReviewStep::CategoryPending(i);
                return Ok(PassResult::Failed(outcome));
            }

            let findings = env.store.read_findings(category)?;
            if findings.trim().is_empty() {
                tracing::info!(%category, "no findings; fixer skipped");
                env.events.emit(RunEvent::ReviewCategoryFinished {
                    category,
                    had_findings: false,
                    fixed: false,
                });
                continue;
            }

            self.step = ReviewStep::CategoryFixing(i);
            machine.set_sub_phase(Some(SubPhase::Fixing(category)));
            let outcome = env
                .dispatcher
                .run_for(
                    ctx,
                    StageId::Fixer,
                    prompts::fixer(category, &findings_file, &findings),
                    env.cancel,
                )
                .await?;
            if !outcome.success {
                // Findings stay so the next attempt sees them
                self.step = ReviewStep::CategoryPending(i);
                return Ok(PassResult::Failed(outcome));
            }

            env.store.truncate_findings(category)?;
            self.fixes_applied += 1;
            env.events.emit(RunEvent::ReviewCategoryFinished {
                category,
                had_findings: true,
                fixed: true,
            });
        }

        self.passes += 1;
        let mut remaining = Vec::new();
        for category in categories {
            if !env.store.read_findings(category)?.trim().is_empty() {
                remaining.push(category);
            }
        }
        if remaining.is_empty() {
            self.step = ReviewStep::Done;
            Ok(PassResult::Clean)
        } else {
            tracing::info!(?remaining, pass = self.passes, "findings remain after pass");
            self.step = ReviewStep::CategoryPending(0);
            Ok(PassResult::FindingsRemain)
        }
    }
}
