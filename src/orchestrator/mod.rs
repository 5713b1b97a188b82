//! Run orchestration.
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `dispatch`  | single-slot stage dispatch with gate and retries     |
//! | `events`    | broadcast of run events to observers                 |
//! | `recovery`  | cap on automated error-fix attempts                  |
//! | `runner`    | the orchestrator that owns a run                     |
//! | `state`     | phase state machine                                  |

pub mod dispatch;
pub mod events;
pub mod recovery;
pub mod runner;
pub mod state;

pub use dispatch::{StageDispatcher, StageOutcome};
pub use events::{EventBus, RunEvent};
pub use recovery::RecoveryTracker;
pub use runner::{Orchestrator, OrchestratorDeps, OrchestratorHandle, RunReport};
pub use state::StateMachine;
