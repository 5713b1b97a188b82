use async_trait::async_trait;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use indicatif::MultiProgress;

use crate::artifacts::{QaPair, Question, TaskCounts};
use crate::errors::StageFailure;
use crate::phase::Phase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionDecision {
    Answers(Vec<QaPair>),
    /// Discard this batch and generate another.
    NewBatch,
    /// Go straight to planning with what is known.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// Extend the iteration budget by this many iterations.
    Continue(u32),
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Retry,
    Skip,
    AutoFix,
    Abort,
}

/// The human in the loop. Every decision the engine cannot make alone goes here.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn answer_questions(&self, questions: &[Question]) -> QuestionDecision;

    async fn budget_exhausted(&self, counts: TaskCounts, iterations_used: u32) -> BudgetDecision;

    async fn malformed_output(
        &self,
        phase: Phase,
        failure: &StageFailure,
        auto_fix_available: bool,
    ) -> RecoveryDecision;
}

/// Non-interactive operator used with `--yes`.
///
/// Picks the first offered option for each question, finalizes when the
/// budget runs out, and tries the automated fixer before giving up.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoOperator;

#[async_trait]
impl Operator for AutoOperator {
    async fn answer_questions(&self, questions: &[Question]) -> QuestionDecision {
        QuestionDecision::Answers(questions.iter().map(default_answer).collect())
    }

    async fn budget_exhausted(&self, _counts: TaskCounts, _iterations_used: u32) -> BudgetDecision {
        BudgetDecision::Finalize
    }

    async fn malformed_output(
        &self,
        _phase: Phase,
        _failure: &StageFailure,
        auto_fix_available: bool,
    ) -> RecoveryDecision {
        if auto_fix_available {
            RecoveryDecision::AutoFix
        } else {
            RecoveryDecision::Abort
        }
    }
}

fn default_answer(q: &Question) -> QaPair {
    QaPair {
        question: q.question.clone(),
        answer: q
            .options
            .first()
            .cloned()
            .unwrap_or_else(|| "No preference; use your best judgement.".to_string()),
    }
}

/// Terminal prompts via `dialoguer`.
///
/// Prompts run on the blocking pool. If the terminal cannot be used the
/// operator falls back to [`AutoOperator`]'s choice and logs a warning.
#[derive(Debug, Clone, Default)]
pub struct InteractiveOperator {
    progress: Option<MultiProgress>,
}

impl InteractiveOperator {
    /// Hide `progress` while a prompt is on screen.
    pub fn with_progress(progress: MultiProgress) -> Self {
        Self {
            progress: Some(progress),
        }
    }

    async fn prompt<T, F>(&self, label: &'static str, fallback: T, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> dialoguer::Result<T> + Send + 'static,
    {
        let progress = self.progress.clone();
        let run = move || match progress {
            Some(progress) => progress.suspend(f),
            None => f(),
        };
        match tokio::task::spawn_blocking(run).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(prompt = label, error = %e, "prompt failed; using default");
                fallback
            }
            Err(e) => {
                tracing::warn!(prompt = label, error = %e, "prompt task failed; using default");
                fallback
            }
        }
    }
}

fn ask_questions(questions: Vec<Question>) -> dialoguer::Result<QuestionDecision> {
    let theme = ColorfulTheme::default();
    println!();
    for (i, q) in questions.iter().enumerate() {
        println!("  {}. {}", i + 1, console::style(&q.question).bold());
    }
    println!();

    let choice = Select::with_theme(&theme)
        .with_prompt("How do you want to proceed?")
        .items(&[
            "Answer these questions",
            "Generate a different batch",
            "Skip questions and plan now",
        ])
        .default(0)
        .interact()?;

    match choice {
        1 => return Ok(QuestionDecision::NewBatch),
        2 => return Ok(QuestionDecision::Skip),
        _ => {}
    }

    let mut answers = Vec::with_capacity(questions.len());
    for q in &questions {
        let answer = if q.options.is_empty() {
            Input::<String>::with_theme(&theme)
                .with_prompt(&q.question)
                .interact_text()?
        } else {
            let mut items = q.options.clone();
            items.push("Other (type an answer)".to_string());
            let picked = Select::with_theme(&theme)
                .with_prompt(&q.question)
                .items(&items)
                .default(0)
                .interact()?;
            if picked < q.options.len() {
                q.options[picked].clone()
            } else {
                Input::<String>::with_theme(&theme)
                    .with_prompt("Your answer")
                    .interact_text()?
            }
        };
        answers.push(QaPair {
            question: q.question.clone(),
            answer,
        });
    }
    Ok(QuestionDecision::Answers(answers))
}

#[async_trait]
impl Operator for InteractiveOperator {
    async fn answer_questions(&self, questions: &[Question]) -> QuestionDecision {
        let fallback = AutoOperator.answer_questions(questions).await;
        let owned = questions.to_vec();
        self.prompt("questions", fallback, move || ask_questions(owned)).await
    }

    async fn budget_exhausted(&self, counts: TaskCounts, iterations_used: u32) -> BudgetDecision {
        let prompt = format!(
            "Iteration budget used ({} iterations, {} tasks done). Continue?",
            iterations_used, counts
        );
        self.prompt("budget", BudgetDecision::Finalize, move || {
            let theme = ColorfulTheme::default();
            let choice = Select::with_theme(&theme)
                .with_prompt(prompt)
                .items(&["Continue for more iterations", "Finalize the run"])
                .default(0)
                .interact()?;
            if choice == 1 {
                return Ok(BudgetDecision::Finalize);
            }
            let extra = Input::<u32>::with_theme(&theme)
                .with_prompt("How many more iterations?")
                .default(counts.remaining().max(1) as u32)
                .interact_text()?;
            Ok(BudgetDecision::Continue(extra.max(1)))
        })
        .await
    }

    async fn malformed_output(
        &self,
        phase: Phase,
        failure: &StageFailure,
        auto_fix_available: bool,
    ) -> RecoveryDecision {
        let fallback = AutoOperator
            .malformed_output(phase, failure, auto_fix_available)
            .await;
        let prompt = format!("{} produced unusable output: {}", phase.display_name(), failure);
        self.prompt("recovery", fallback, move || {
            let mut options = vec![
                ("Retry the stage", RecoveryDecision::Retry),
                ("Skip and move on", RecoveryDecision::Skip),
            ];
            if auto_fix_available {
                options.push(("Let the error fixer repair it", RecoveryDecision::AutoFix));
            }
            options.push(("Abort the run", RecoveryDecision::Abort));

            let labels: Vec<&str> = options.iter().map(|(label, _)| *label).collect();
            let picked = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .items(&labels)
                .default(0)
                .interact()?;
            Ok(options
                .get(picked)
                .map(|(_, decision)| *decision)
                .unwrap_or(RecoveryDecision::Abort))
        })
        .await
    }
}
