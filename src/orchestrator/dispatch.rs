use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::context::{Breakpoint, RunContext};
use crate::errors::{DispatchError, FailureClass, StageFailure};
use crate::gates::{DebugGate, PausePoint};
use crate::stage::{
    RetryPolicy, StageId, StageInvoker, StageRequest, StageResponse, StageTimeouts,
};

use super::events::{EventBus, RunEvent};

/// Result of one dispatched stage, retries included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: StageId,
    pub success: bool,
    pub artifacts_touched: Vec<PathBuf>,
    pub error: Option<StageFailure>,
    pub attempts: u32,
    pub output: String,
}

impl StageOutcome {
    pub fn succeeded(stage: StageId, response: StageResponse, attempts: u32) -> Self {
        Self {
            stage,
            success: true,
            artifacts_touched: response.files_written,
            error: None,
            attempts,
            output: response.output,
        }
    }

    pub fn failed(stage: StageId, failure: StageFailure, attempts: u32) -> Self {
        Self {
            stage,
            success: false,
            artifacts_touched: Vec::new(),
            error: Some(failure),
            attempts,
            output: String::new(),
        }
    }

    /// Turn a successful call into a failure because its artifact check failed.
    pub fn into_malformed(self, detail: impl Into<String>) -> Self {
        let failure = StageFailure::malformed(self.stage, detail);
        Self {
            success: false,
            error: Some(failure),
            ..self
        }
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        self.error.as_ref().map(StageFailure::class)
    }
}

struct DispatcherInner {
    invoker: Arc<dyn StageInvoker>,
    gate: DebugGate,
    retry: RetryPolicy,
    timeouts: StageTimeouts,
    events: EventBus,
    in_flight: Mutex<Option<StageId>>,
}

/// Routes every stage call through the debug gate and the invoker.
///
/// At most one stage is in flight. A second call while one is running is
/// rejected with [`DispatchError::ConcurrentStage`], never queued.
#[derive(Clone)]
pub struct StageDispatcher {
    inner: Arc<DispatcherInner>,
}

/// Releases the single slot when dropped, even if the call future is dropped.
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<StageId>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl StageDispatcher {
    pub fn new(
        invoker: Arc<dyn StageInvoker>,
        gate: DebugGate,
        retry: RetryPolicy,
        timeouts: StageTimeouts,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                invoker,
                gate,
                retry,
                timeouts,
                events,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn gate(&self) -> &DebugGate {
        &self.inner.gate
    }

    /// Stage currently holding the slot.
    pub fn in_flight(&self) -> Option<StageId> {
        *self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self, requested: StageId) -> Result<SlotGuard<'_>, DispatchError> {
        let mut slot = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = *slot {
            tracing::warn!(%active, %requested, "rejected concurrent stage");
            return Err(DispatchError::ConcurrentStage { active, requested });
        }
        *slot = Some(requested);
        Ok(SlotGuard {
            slot: &self.inner.in_flight,
        })
    }

    pub fn timeouts(&self) -> StageTimeouts {
        self.inner.timeouts
    }

    /// Build the request from the context as it is right now and dispatch it.
    ///
    /// Provider, timeout and breakpoint are read fresh on every call, so a
    /// patch applied between calls takes effect on the next one.
    pub async fn run_for(
        &self,
        ctx: &RunContext,
        stage: StageId,
        prompt: String,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, DispatchError> {
        let request = StageRequest {
            stage,
            prompt,
            provider: ctx.selection(stage),
            timeout: self.inner.timeouts.for_stage(stage),
            working_dir: ctx.working_dir.clone(),
        };
        self.run_stage(request, ctx.debug.breakpoint(stage), cancel)
            .await
    }

    /// Gate, invoke with bounded retries, gate again.
    ///
    /// Stage-level failures come back inside the outcome; only a refused
    /// dispatch is an `Err`.
    pub async fn run_stage(
        &self,
        request: StageRequest,
        breakpoint: Breakpoint,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, DispatchError> {
        let stage = request.stage;
        let _guard = self.acquire(stage)?;
        let gate = &self.inner.gate;

        if breakpoint.pause_before {
            self.inner.events.emit(RunEvent::DebugPaused {
                stage,
                point: PausePoint::Before,
            });
        }
        if let Err(failure) = gate.before(stage, breakpoint, cancel).await {
            gate.reset();
            return Ok(StageOutcome::failed(stage, failure, 0));
        }

        self.inner.events.emit(RunEvent::StageStarted {
            stage,
            provider: request.provider.to_string(),
        });

        let (result, attempts) = if stage.calls_model() {
            self.invoke_with_retry(&request, cancel).await
        } else {
            (Ok(StageResponse::default()), 0)
        };

        let mut outcome = match result {
            Ok(response) => StageOutcome::succeeded(stage, response, attempts),
            Err(failure) => StageOutcome::failed(stage, failure, attempts),
        };

        if outcome.success {
            if breakpoint.pause_after {
                self.inner.events.emit(RunEvent::DebugPaused {
                    stage,
                    point: PausePoint::After,
                });
            }
            if let Err(failure) = gate.after(stage, breakpoint, cancel).await {
                outcome = StageOutcome::failed(stage, failure, attempts);
            }
        }
        gate.reset();

        self.inner.events.emit(RunEvent::StageFinished {
            stage,
            success: outcome.success,
            files_touched: outcome.artifacts_touched.len(),
        });
        tracing::info!(
            %stage,
            success = outcome.success,
            attempts = outcome.attempts,
            touched = outcome.artifacts_touched.len(),
            "stage finished"
        );
        Ok(outcome)
    }

    async fn invoke_with_retry(
        &self,
        request: &StageRequest,
        cancel: &CancellationToken,
    ) -> (Result<StageResponse, StageFailure>, u32) {
        let retry = self.inner.retry;
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return (Err(StageFailure::Cancelled), attempts);
            }
            attempts += 1;
            let failure = match self.inner.invoker.invoke(request, cancel).await {
                Ok(response) => return (Ok(response), attempts),
                Err(failure) => failure,
            };

            if failure.class() != FailureClass::Transient {
                return (Err(failure), attempts);
            }
            if attempts > retry.max_retries {
                tracing::error!(stage = %request.stage, attempts, error = %failure, "retries exhausted");
                return (
                    Err(StageFailure::Exhausted {
                        stage: request.stage,
                        attempts,
                        last: failure.to_string(),
                    }),
                    attempts,
                );
            }

            tracing::warn!(
                stage = %request.stage,
                attempt = attempts,
                delay_secs = retry.delay.as_secs(),
                error = %failure,
                "transient stage failure, retrying"
            );
            self.inner.events.emit(RunEvent::StageRetrying {
                stage: request.stage,
                attempt: attempts,
                reason: failure.to_string(),
            });
            tokio::select! {
                _ = tokio::time::sleep(retry.delay) => {}
                _ = cancel.cancelled() => return (Err(StageFailure::Cancelled), attempts),
            }
        }
    }
}
