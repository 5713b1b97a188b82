//! Debug gate around every stage call, plus operator decision points.
//!
//! In debug mode the gate can hold a stage before it starts and after it
//! finishes until the operator says continue. The per-call state is published
//! on a `watch` channel so a UI can render it without polling.

pub mod decisions;

use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::context::Breakpoint;
use crate::errors::StageFailure;
use crate::stage::StageId;

pub use decisions::{
    AutoOperator, BudgetDecision, InteractiveOperator, Operator, QuestionDecision,
    RecoveryDecision,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausePoint {
    Before,
    After,
}

impl std::fmt::Display for PausePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PausePoint::Before => "before",
            PausePoint::After => "after",
        })
    }
}

/// Where the current stage call stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    PendingBefore(StageId),
    Running(StageId),
    PendingAfter(StageId),
    Done(StageId),
}

impl GateState {
    pub fn is_paused(&self) -> bool {
        matches!(self, GateState::PendingBefore(_) | GateState::PendingAfter(_))
    }
}

struct GateInner {
    state: watch::Sender<GateState>,
    /// At most one held continuation.
    pending: Mutex<Option<oneshot::Sender<()>>>,
}

/// Shared handle to the gate; clones observe and release the same call.
#[derive(Clone)]
pub struct DebugGate {
    inner: Arc<GateInner>,
}

impl Default for DebugGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Idle);
        Self {
            inner: Arc::new(GateInner {
                state,
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> GateState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.inner.state.subscribe()
    }

    /// Release the held stage. Returns `false` when nothing is pending.
    pub fn continue_stage(&self) -> bool {
        let sender = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Hold before the call if the breakpoint asks for it, then mark running.
    pub async fn before(
        &self,
        stage: StageId,
        breakpoint: Breakpoint,
        cancel: &CancellationToken,
    ) -> Result<(), StageFailure> {
        if breakpoint.pause_before {
            self.hold(GateState::PendingBefore(stage), cancel).await?;
        }
        self.inner.state.send_replace(GateState::Running(stage));
        Ok(())
    }

    /// Hold after the call if the breakpoint asks for it, then mark done.
    pub async fn after(
        &self,
        stage: StageId,
        breakpoint: Breakpoint,
        cancel: &CancellationToken,
    ) -> Result<(), StageFailure> {
        if breakpoint.pause_after {
            self.hold(GateState::PendingAfter(stage), cancel).await?;
        }
        self.inner.state.send_replace(GateState::Done(stage));
        Ok(())
    }

    /// Return to `Idle` once the dispatcher has released the stage.
    pub fn reset(&self) {
        self.clear_pending();
        self.inner.state.send_replace(GateState::Idle);
    }

    async fn hold(&self, state: GateState, cancel: &CancellationToken) -> Result<(), StageFailure> {
        let (tx, rx) = oneshot::channel();
        *self.inner.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        self.inner.state.send_replace(state);
        tracing::info!(?state, "debug gate holding stage");

        tokio::select! {
            released = rx => match released {
                Ok(()) => Ok(()),
                // Sender dropped without a continue: treat as cancellation
                Err(_) => Err(StageFailure::Cancelled),
            },
            _ = cancel.cancelled() => {
                self.clear_pending();
                Err(StageFailure::Cancelled)
            }
        }
    }

    fn clear_pending(&self) {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}
