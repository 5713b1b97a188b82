use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::orchestrator::{RunEvent, RunReport};
use crate::phase::Phase;
use crate::ui::icons::{CHECK, CROSS, PAUSED, PROGRESS, RETRY, REVIEW, RUNNING, SPARKLE, WARN};

/// Terminal view of a run, driven by [`RunEvent`]s.
///
/// Two bars are stacked vertically:
/// - Task bar: checked tasks out of the total, with the current phase
/// - Stage bar: spinner for the stage in flight
pub struct RunReporter {
    multi: MultiProgress,
    task_bar: ProgressBar,
    stage_bar: ProgressBar,
    verbose: bool,
}

impl RunReporter {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let task_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let task_bar = multi.add(ProgressBar::new(0));
        task_bar.set_style(task_style);
        task_bar.set_prefix(" Tasks");

        let stage_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");
        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix(" Stage");

        Self {
            multi,
            task_bar,
            stage_bar,
            verbose,
        }
    }

    /// Handle for suspending the bars while an interactive prompt is shown.
    pub fn multi(&self) -> MultiProgress {
        self.multi.clone()
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn handle(&self, event: &RunEvent) {
        match event {
            RunEvent::PhaseChanged { display, .. } | RunEvent::SubPhaseChanged { display, .. } => {
                self.task_bar.set_message(display.clone());
            }
            RunEvent::StageStarted { .. } => {
                self.stage_bar.reset_elapsed();
                self.stage_bar.enable_steady_tick(Duration::from_millis(100));
            }
            RunEvent::StageFinished { .. } => {
                self.stage_bar.disable_steady_tick();
            }
            RunEvent::TaskProgress { counts, .. } => {
                self.task_bar.set_length(counts.total as u64);
                self.task_bar.set_position(counts.completed as u64);
            }
            _ => {}
        }

        if let Some(line) = describe(event, self.verbose) {
            if matches!(event, RunEvent::StageStarted { .. }) {
                self.stage_bar.set_message(line.clone());
            }
            self.print_line(line);
        }
    }

    /// Render events until the orchestrator drops its bus.
    pub fn spawn(self, mut rx: broadcast::Receiver<RunEvent>) -> JoinHandle<Self> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "reporter lagged behind run events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            self
        })
    }

    pub fn finish(&self, report: &RunReport) {
        self.stage_bar.finish_and_clear();
        self.task_bar.abandon();
        println!();
        match report.final_phase {
            Phase::Completed => println!(
                "{} {} after {} iteration(s), tasks {}",
                SPARKLE,
                style("Run completed").green().bold(),
                report.iterations,
                report.counts
            ),
            Phase::Cancelled => println!("{} {}", CROSS, style("Run cancelled").yellow().bold()),
            Phase::Error => {
                println!("{} {}", CROSS, style("Run failed").red().bold());
                if let Some(error) = &report.last_error {
                    println!("  {}", style(error).red());
                }
            }
            phase if report.paused => println!(
                "{} Paused during {}. Run `harness run` to resume.",
                PAUSED,
                phase.display_name()
            ),
            phase => println!("Stopped in {}", phase.display_name()),
        }
    }
}

/// One printable line for an event, or `None` if it only updates the bars.
pub fn describe(event: &RunEvent, verbose: bool) -> Option<String> {
    match event {
        RunEvent::PhaseChanged { to, .. } => Some(format!(
            "{} {}",
            style("==>").cyan().bold(),
            style(to.display_name()).bold()
        )),
        RunEvent::SubPhaseChanged { sub_phase, .. } if verbose => sub_phase
            .map(|sub| format!("    {} {}", style("→").dim(), style(sub.display_name()).dim())),
        RunEvent::SubPhaseChanged { .. } => None,
        RunEvent::StageStarted { stage, provider } => Some(format!(
            "{} {} {}",
            RUNNING,
            stage,
            style(format!("({})", provider)).dim()
        )),
        RunEvent::StageRetrying {
            stage,
            attempt,
            reason,
        } => Some(format!(
            "{} {} retry {}: {}",
            RETRY,
            stage,
            attempt,
            style(reason).yellow()
        )),
        RunEvent::StageFinished {
            stage,
            success: true,
            files_touched,
        } => Some(format!(
            "{} {} {}",
            CHECK,
            stage,
            style(format!("({} file(s) touched)", files_touched)).dim()
        )),
        RunEvent::StageFinished { stage, .. } => {
            Some(format!("{} {} {}", CROSS, stage, style("failed").red()))
        }
        RunEvent::DebugPaused { stage, point } => Some(format!(
            "{} Breakpoint {} {}",
            PAUSED,
            point,
            style(stage).yellow().bold()
        )),
        RunEvent::TaskProgress {
            iteration,
            max_iterations,
            counts,
        } if verbose => Some(format!(
            "{} iteration {}/{}, tasks {}",
            PROGRESS, iteration, max_iterations, counts
        )),
        RunEvent::TaskProgress { .. } => None,
        RunEvent::ReviewCategoryFinished {
            category,
            had_findings,
            fixed,
        } => {
            let result = match (had_findings, fixed) {
                (false, _) => style("clean").green().to_string(),
                (true, true) => style("findings fixed").yellow().to_string(),
                (true, false) => style("findings pending").red().to_string(),
            };
            Some(format!("{} {}: {}", REVIEW, category.display_name(), result))
        }
        RunEvent::Notice { message } => Some(format!("{} {}", WARN, style(message).yellow())),
    }
}
