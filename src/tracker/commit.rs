use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::context::{GitMode, RunContext};
use crate::errors::{FailureClass, OrchestratorError, VcsError};
use crate::orchestrator::dispatch::{StageDispatcher, StageOutcome};
use crate::orchestrator::events::EventBus;
use crate::orchestrator::state::StateMachine;
use crate::phase::SubPhase;
use crate::prompts;
use crate::stage::StageId;

use super::git::VersionControl;

/// What one commit cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// The working tree was clean; nothing was authored or committed.
    pub skipped: bool,
    pub commit_id: Option<String>,
    pub pushed: bool,
    /// Non-blocking problems surfaced to the operator.
    pub notices: Vec<String>,
    /// A stage failure the orchestrator must handle like any other.
    pub failure: Option<StageOutcome>,
}

impl CommitReport {
    pub fn committed(&self) -> bool {
        self.commit_id.is_some()
    }
}

/// Wraps one model-authored commit message in deterministic git calls.
///
/// The model only writes the message file. Staging, committing and pushing
/// are done here so a confused model can never rewrite history.
pub struct CommitCoordinator<'a> {
    vcs: &'a dyn VersionControl,
    store: &'a ArtifactStore,
    dispatcher: &'a StageDispatcher,
    events: &'a EventBus,
    cancel: &'a CancellationToken,
}

impl<'a> CommitCoordinator<'a> {
    pub fn new(
        vcs: &'a dyn VersionControl,
        store: &'a ArtifactStore,
        dispatcher: &'a StageDispatcher,
        events: &'a EventBus,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            vcs,
            store,
            dispatcher,
            events,
            cancel,
        }
    }

    fn notice(&self, report: &mut CommitReport, message: String) {
        self.events.notice(message.clone());
        report.notices.push(message);
    }

    pub async fn run(
        &self,
        ctx: &RunContext,
        machine: &mut StateMachine,
    ) -> Result<CommitReport, OrchestratorError> {
        let mut report = CommitReport::default();
        let aux = self.dispatcher.timeouts().auxiliary;

        let created = tokio::time::timeout(aux, self.vcs.init_if_needed())
            .await
            .map_err(|_| VcsError::Timeout(aux))??;
        if created {
            self.events.notice("Initialized a new git repository");
        }

        let status = self.vcs.status().await?;
        if status.is_clean() {
            tracing::info!("working tree clean; skipping commit");
            report.skipped = true;
            return Ok(report);
        }

        if !self.store.read_commit_message()?.is_empty() {
            tracing::warn!("clearing commit message left by an earlier run");
            self.store.clear_commit_message()?;
        }

        let diff = self.vcs.diff().await?;
        let message_path = self.store.commit_message_path();
        let prompt = prompts::commit_message(
            &status.summary(),
            &diff,
            &self.store.relative(&message_path).display().to_string(),
        );

        machine.set_sub_phase(Some(SubPhase::AuthoringCommitMessage));
        let outcome = self
            .dispatcher
            .run_for(ctx, StageId::CommitMessage, prompt, self.cancel)
            .await?;
        if !outcome.success {
            report.failure = Some(outcome);
            return Ok(report);
        }

        let message = self.store.read_commit_message()?;
        if message.is_empty() {
            report.failure = Some(outcome.into_malformed(format!(
                "{} is empty after the commit message stage",
                message_path.display()
            )));
            return Ok(report);
        }

        let stray: Vec<_> = outcome
            .artifacts_touched
            .iter()
            .filter(|p| **p != message_path)
            .map(|p| self.store.relative(p).display().to_string())
            .collect();
        if !stray.is_empty() {
            self.notice(
                &mut report,
                format!(
                    "Commit message stage also modified: {} (included in the commit)",
                    stray.join(", ")
                ),
            );
        }

        machine.set_sub_phase(Some(SubPhase::Committing));
        self.vcs.add_all().await?;
        match self.vcs.commit(&message).await {
            Ok(id) => {
                self.store.clear_commit_message()?;
                let dropped = self.store.cap_change_log(ctx.git.change_log_max_lines)?;
                tracing::info!(commit = %id, dropped_log_lines = dropped, "commit cycle done");
                report.commit_id = Some(id);
            }
            Err(e) => {
                self.notice(&mut report, format!("Commit failed: {}", e));
                return Ok(report);
            }
        }

        if ctx.git.mode == GitMode::Push {
            machine.set_sub_phase(Some(SubPhase::Pushing));
            let gate = self
                .dispatcher
                .run_for(ctx, StageId::GitPush, String::new(), self.cancel)
                .await?;
            if gate.failure_class() == Some(FailureClass::Cancelled) {
                report.failure = Some(gate);
                return Ok(report);
            }
            match tokio::time::timeout(aux, self.vcs.push(&ctx.git.remote)).await {
                Ok(Ok(())) => report.pushed = true,
                Ok(Err(e)) => self.notice(&mut report, format!("Push failed: {}", e)),
                Err(_) => self.notice(
                    &mut report,
                    format!("Push timed out after {}s", aux.as_secs()),
                ),
            }
        }

        Ok(report)
    }
}
