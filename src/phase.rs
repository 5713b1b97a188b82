//! Phase and sub-phase definitions for the workflow state machine.
//!
//! This module provides:
//! - `Phase`, the coarse state of a run
//! - `SubPhase`, the finer state within a phase
//! - The fixed transition table and `can_transition`
//! - Display-name derivation

use serde::{Deserialize, Serialize};

use crate::review::ReviewCategory;

/// Coarse state of a run. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    QuestionGeneration,
    AwaitingAnswers,
    DescriptionMolding,
    TaskPlanning,
    MainExecution,
    Review,
    GitOperations,
    Completed,
    Error,
    Cancelled,
}

impl Phase {
    pub const ALL: [Phase; 11] = [
        Phase::Idle,
        Phase::QuestionGeneration,
        Phase::AwaitingAnswers,
        Phase::DescriptionMolding,
        Phase::TaskPlanning,
        Phase::MainExecution,
        Phase::Review,
        Phase::GitOperations,
        Phase::Completed,
        Phase::Error,
        Phase::Cancelled,
    ];

    /// Terminal phases only lead back to `Idle`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Error | Phase::Cancelled)
    }

    /// Outbound edges of the transition table.
    pub fn successors(self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Idle => &[QuestionGeneration, TaskPlanning, MainExecution, Cancelled],
            QuestionGeneration => &[AwaitingAnswers, TaskPlanning, Error, Cancelled],
            AwaitingAnswers => &[AwaitingAnswers, DescriptionMolding, Cancelled],
            DescriptionMolding => &[QuestionGeneration, TaskPlanning, Error, Cancelled],
            TaskPlanning => &[MainExecution, Error, Cancelled],
            MainExecution => &[Review, GitOperations, Completed, Error, Cancelled],
            Review => &[GitOperations, MainExecution, Completed, Error, Cancelled],
            GitOperations => &[MainExecution, Completed, Error, Cancelled],
            Completed | Error | Cancelled => &[Idle],
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::QuestionGeneration => "Generating Questions",
            Phase::AwaitingAnswers => "Awaiting Answers",
            Phase::DescriptionMolding => "Molding Description",
            Phase::TaskPlanning => "Planning Tasks",
            Phase::MainExecution => "Executing Tasks",
            Phase::Review => "Code Review",
            Phase::GitOperations => "Git Operations",
            Phase::Completed => "Completed",
            Phase::Error => "Error",
            Phase::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::QuestionGeneration => "question_generation",
            Phase::AwaitingAnswers => "awaiting_answers",
            Phase::DescriptionMolding => "description_molding",
            Phase::TaskPlanning => "task_planning",
            Phase::MainExecution => "main_execution",
            Phase::Review => "review",
            Phase::GitOperations => "git_operations",
            Phase::Completed => "completed",
            Phase::Error => "error",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Whether the table declares the edge `from -> to`.
pub fn can_transition(from: Phase, to: Phase) -> bool {
    from.successors().contains(&to)
}

/// Finer state within a phase. `None` at the use sites means "no sub-state".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "category")]
pub enum SubPhase {
    GeneratingQuestions,
    AwaitingAnswers,
    MoldingDescription,
    PlanningTasks,
    ReadingTasks,
    ExecutingTasks,
    HandlingMessages,
    UnitTestPrep,
    Reviewing(ReviewCategory),
    Fixing(ReviewCategory),
    AuthoringCommitMessage,
    Committing,
    Pushing,
    RecoveringError,
}

impl SubPhase {
    pub fn display_name(&self) -> String {
        match self {
            SubPhase::GeneratingQuestions => "Generating Questions".to_string(),
            SubPhase::AwaitingAnswers => "Awaiting Answers".to_string(),
            SubPhase::MoldingDescription => "Molding Description".to_string(),
            SubPhase::PlanningTasks => "Planning Tasks".to_string(),
            SubPhase::ReadingTasks => "Reading Tasks".to_string(),
            SubPhase::ExecutingTasks => "Executing Task".to_string(),
            SubPhase::HandlingMessages => "Handling Messages".to_string(),
            SubPhase::UnitTestPrep => "Unit Test Prep".to_string(),
            SubPhase::Reviewing(category) => format!("{} Review", category.display_name()),
            SubPhase::Fixing(category) => format!("Fixing {}", category.display_name()),
            SubPhase::AuthoringCommitMessage => "Writing Commit Message".to_string(),
            SubPhase::Committing => "Git Commit".to_string(),
            SubPhase::Pushing => "Git Push".to_string(),
            SubPhase::RecoveringError => "Recovering From Error".to_string(),
        }
    }
}

/// Human-readable status line for the current state.
///
/// `AwaitingAnswers` reads "Ready to Continue" once the batch has been answered,
/// so "waiting for input" and "processing input" look different without an
/// extra phase.
pub fn display_name(phase: Phase, sub_phase: Option<SubPhase>, questions_answered: bool) -> String {
    let base = if phase == Phase::AwaitingAnswers && questions_answered {
        "Ready to Continue"
    } else {
        phase.display_name()
    };

    match sub_phase {
        Some(sub) if sub != SubPhase::AwaitingAnswers => {
            format!("{} - {}", base, sub.display_name())
        }
        _ => base.to_string(),
    }
}
