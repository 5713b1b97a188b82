use crate::errors::InvalidTransition;
use crate::phase::{self, Phase, SubPhase};

use super::events::{EventBus, RunEvent};

/// Holds the current phase and sub-phase and enforces the transition table.
#[derive(Debug, Clone)]
pub struct StateMachine {
    phase: Phase,
    sub_phase: Option<SubPhase>,
    questions_answered: bool,
    events: EventBus,
}

impl StateMachine {
    pub fn new(events: EventBus) -> Self {
        Self::restored(Phase::Idle, None, events)
    }

    /// Start from a snapshot's phase without walking the table.
    pub fn restored(phase: Phase, sub_phase: Option<SubPhase>, events: EventBus) -> Self {
        Self {
            phase,
            sub_phase,
            questions_answered: false,
            events,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sub_phase(&self) -> Option<SubPhase> {
        self.sub_phase
    }

    pub fn can_transition(&self, to: Phase) -> bool {
        phase::can_transition(self.phase, to)
    }

    /// Move to `to`, clearing the sub-phase.
    ///
    /// An illegal edge leaves phase and sub-phase untouched.
    pub fn transition(&mut self, to: Phase) -> Result<Phase, InvalidTransition> {
        let from = self.phase;
        if !phase::can_transition(from, to) {
            tracing::error!(%from, %to, "rejected phase transition");
            return Err(InvalidTransition { from, to });
        }
        self.phase = to;
        self.sub_phase = None;
        tracing::info!(%from, %to, "phase transition");
        self.events.emit(RunEvent::PhaseChanged {
            from,
            to,
            display: self.display_name(),
        });
        Ok(to)
    }

    pub fn set_sub_phase(&mut self, sub_phase: Option<SubPhase>) {
        if self.sub_phase == sub_phase {
            return;
        }
        self.sub_phase = sub_phase;
        self.events.emit(RunEvent::SubPhaseChanged {
            phase: self.phase,
            sub_phase,
            display: self.display_name(),
        });
    }

    /// Mirror of the run context's flag, used only for the display name.
    pub fn set_questions_answered(&mut self, answered: bool) {
        self.questions_answered = answered;
    }

    pub fn display_name(&self) -> String {
        phase::display_name(self.phase, self.sub_phase, self.questions_answered)
    }
}
