//! Run events broadcast to observers (console reporter, logs, tests).

use tokio::sync::broadcast;

use crate::artifacts::TaskCounts;
use crate::gates::PausePoint;
use crate::phase::{Phase, SubPhase};
use crate::review::ReviewCategory;
use crate::stage::StageId;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
        display: String,
    },
    SubPhaseChanged {
        phase: Phase,
        sub_phase: Option<SubPhase>,
        display: String,
    },
    StageStarted {
        stage: StageId,
        provider: String,
    },
    StageRetrying {
        stage: StageId,
        attempt: u32,
        reason: String,
    },
    StageFinished {
        stage: StageId,
        success: bool,
        files_touched: usize,
    },
    DebugPaused {
        stage: StageId,
        point: PausePoint,
    },
    TaskProgress {
        iteration: u32,
        max_iterations: u32,
        counts: TaskCounts,
    },
    ReviewCategoryFinished {
        category: ReviewCategory,
        had_findings: bool,
        fixed: bool,
    },
    /// Non-blocking message for the operator (e.g. push failed).
    Notice {
        message: String,
    },
}

/// Cloneable sender side of the event stream.
///
/// Emitting with no subscribers is fine; events are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: RunEvent) {
        tracing::debug!(?event, "run event");
        let _ = self.tx.send(event);
    }

    pub fn notice(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "notice");
        self.emit(RunEvent::Notice { message });
    }
}
