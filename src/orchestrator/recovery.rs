use std::collections::HashMap;

use crate::phase::Phase;

/// Automated-fix attempts allowed per phase and iteration.
pub const MAX_FIX_ATTEMPTS: u32 = 3;

/// Caps how often the error fixer may run for the same spot in a run.
///
/// Keyed by `(phase, iteration)` so a stuck planning stage cannot burn the
/// fixer budget of later execution iterations.
#[derive(Debug, Clone, Default)]
pub struct RecoveryTracker {
    attempts: HashMap<(Phase, u32), u32>,
    max_attempts: u32,
}

impl RecoveryTracker {
    pub fn new() -> Self {
        Self::with_limit(MAX_FIX_ATTEMPTS)
    }

    pub fn with_limit(max_attempts: u32) -> Self {
        Self {
            attempts: HashMap::new(),
            max_attempts,
        }
    }

    pub fn can_attempt(&self, phase: Phase, iteration: u32) -> bool {
        self.attempts(phase, iteration) < self.max_attempts
    }

    /// Record an attempt and return the new count.
    pub fn record(&mut self, phase: Phase, iteration: u32) -> u32 {
        let count = self.attempts.entry((phase, iteration)).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, phase: Phase, iteration: u32) -> u32 {
        self.attempts.get(&(phase, iteration)).copied().unwrap_or(0)
    }

    /// Forget the count once the phase succeeds.
    pub fn clear(&mut self, phase: Phase, iteration: u32) {
        self.attempts.remove(&(phase, iteration));
    }
}
