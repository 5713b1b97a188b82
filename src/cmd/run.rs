//! Workflow execution: `harness run`.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use harness::context::ContextPatch;
use harness::orchestrator::OrchestratorHandle;

use super::super::{Cli, RunArgs};

/// CLI flags that must also apply to a resumed session.
fn flag_patch(args: &RunArgs, yes: bool) -> ContextPatch {
    ContextPatch {
        max_main_iterations: args.max_iterations,
        review_categories: args.review.clone(),
        git_mode: args.git,
        debug_enabled: if yes {
            Some(false)
        } else if args.debug {
            Some(true)
        } else {
            None
        },
        ..ContextPatch::default()
    }
}

/// First Ctrl-C pauses at the next boundary, the second cancels.
fn spawn_interrupt_handler(handle: OrchestratorHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!();
        eprintln!("Pausing after the current stage. Press Ctrl-C again to cancel.");
        handle.pause();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling run...");
            handle.cancel();
        }
    })
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, args: RunArgs) -> Result<()> {
    use harness::artifacts::ArtifactStore;
    use harness::config::HarnessToml;
    use harness::gates::{AutoOperator, InteractiveOperator, Operator};
    use harness::orchestrator::{Orchestrator, OrchestratorDeps};
    use harness::phase::Phase;
    use harness::session::SessionPersister;
    use harness::stage::{ProcessInvoker, ProviderRegistry};
    use harness::tracker::GitTracker;
    use harness::ui::icons::WARN;
    use harness::ui::{RunReporter, spawn_breakpoint_prompt};

    let store = ArtifactStore::new(&project_dir);
    let mut config = HarnessToml::load_or_default(&store.harness_dir())?;
    for warning in config.apply_env().into_iter().chain(config.validate()) {
        println!("{} {}", WARN, warning);
    }

    let _lock = store.lock_run()?;
    store.ensure_layout(&config.review.categories)?;
    if let Some(description) = &args.description {
        store.write_description(description)?;
    }
    if args.fresh {
        SessionPersister::new(store.clone()).delete()?;
    }

    let timeouts = config.stage_timeouts();
    let reporter = RunReporter::new(cli.verbose);
    let operator: Arc<dyn Operator> = if cli.yes {
        Arc::new(AutoOperator)
    } else {
        Arc::new(InteractiveOperator::with_progress(reporter.multi()))
    };
    let deps = OrchestratorDeps {
        invoker: Arc::new(ProcessInvoker::new(
            ProviderRegistry::with_commands(&config.providers),
            timeouts.cancel_grace,
        )),
        vcs: Arc::new(GitTracker::new(&project_dir, timeouts.auxiliary)),
        operator,
        timeouts,
        retry: config.retry_policy(),
    };

    let (mut orchestrator, discarded) =
        Orchestrator::resume(store, config.to_run_context(&project_dir), deps);
    if let Some(reason) = discarded {
        println!("{} Starting fresh: {}", WARN, reason);
    } else if orchestrator.phase() != Phase::Idle {
        println!(
            "Resuming from {} (iteration {}/{})",
            orchestrator.display_name(),
            orchestrator.context().current_iteration,
            orchestrator.context().max_main_iterations
        );
    }

    let handle = orchestrator.handle();
    handle.reconfigure(flag_patch(&args, cli.yes));

    let multi = reporter.multi();
    let reporter_task = reporter.spawn(orchestrator.subscribe());
    let prompt_task = spawn_breakpoint_prompt(handle.clone(), multi);
    let interrupt_task = spawn_interrupt_handler(handle);

    let result = orchestrator.run().await;

    prompt_task.abort();
    interrupt_task.abort();
    // Dropping the orchestrator closes the event stream and ends the reporter
    drop(orchestrator);
    let reporter = reporter_task.await?;

    let report = result?;
    reporter.finish(&report);
    if report.final_phase == Phase::Error {
        anyhow::bail!(
            "{}",
            report
                .last_error
                .unwrap_or_else(|| "run ended in error".to_string())
        );
    }
    Ok(())
}
