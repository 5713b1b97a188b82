//! Interactive continue/cancel prompt for debug breakpoints.

use dialoguer::{Select, theme::ColorfulTheme};
use indicatif::MultiProgress;
use tokio::task::JoinHandle;

use crate::gates::GateState;
use crate::orchestrator::OrchestratorHandle;

/// Prompt the operator every time the gate holds a stage.
///
/// The handle keeps the gate alive, so abort the returned task once the run ends.
pub fn spawn_breakpoint_prompt(handle: OrchestratorHandle, multi: MultiProgress) -> JoinHandle<()> {
    let mut rx = handle.watch_gate();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            let label = match state {
                GateState::PendingBefore(stage) => format!("Breakpoint before {}", stage),
                GateState::PendingAfter(stage) => format!("Breakpoint after {}", stage),
                _ => continue,
            };

            let multi = multi.clone();
            let choice = tokio::task::spawn_blocking(move || {
                multi.suspend(|| {
                    Select::with_theme(&ColorfulTheme::default())
                        .with_prompt(label)
                        .items(&["Continue", "Cancel run"])
                        .default(0)
                        .interact()
                })
            })
            .await;

            match choice {
                Ok(Ok(0)) => {
                    handle.continue_stage();
                }
                Ok(Ok(_)) => handle.cancel(),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "breakpoint prompt failed; continuing");
                    handle.continue_stage();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "breakpoint prompt task failed; continuing");
                    handle.continue_stage();
                }
            }
        }
    })
}
